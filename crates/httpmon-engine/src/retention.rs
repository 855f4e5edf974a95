use chrono::{DateTime, Duration as ChronoDuration, Utc};
use httpmon_storage::StateStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing;

/// Retention sweeper, orthogonal to the check scheduler.
///
/// Daily at 03:00 UTC check results beyond the absolute horizon go; at
/// 03:30 UTC alerts beyond theirs. Every few hours the per-plan sweep
/// applies the stricter of the plan cap and the absolute cap. Sweep errors
/// are logged and the loop carries on.
pub struct RetentionSweeper {
    store: Arc<StateStore>,
    check_result_days: i64,
    alert_days: i64,
    plan_sweep_hours: u64,
}

impl RetentionSweeper {
    pub fn new(
        store: Arc<StateStore>,
        check_result_days: i64,
        alert_days: i64,
        plan_sweep_hours: u64,
    ) -> Self {
        Self {
            store,
            check_result_days,
            alert_days,
            plan_sweep_hours,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            check_result_days = self.check_result_days,
            alert_days = self.alert_days,
            plan_sweep_hours = self.plan_sweep_hours,
            "Retention sweeper started"
        );

        let mut plan_tick = interval(Duration::from_secs(self.plan_sweep_hours * 3600));
        // The first interval tick fires immediately; consume it so the
        // initial plan sweep happens one period in.
        plan_tick.tick().await;

        loop {
            let now = Utc::now();
            let next_results = next_occurrence(now, 3, 0);
            let next_alerts = next_occurrence(now, 3, 30);

            tokio::select! {
                _ = sleep_until(now, next_results) => self.sweep_check_results(),
                _ = sleep_until(now, next_alerts) => self.sweep_alerts(),
                _ = plan_tick.tick() => self.sweep_per_plan(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Retention sweeper stopping");
                        return;
                    }
                }
            }
        }
    }

    fn sweep_check_results(&self) {
        let cutoff = Utc::now() - ChronoDuration::days(self.check_result_days);
        match self.store.delete_check_results_before(cutoff) {
            Ok(deleted) => {
                tracing::info!(deleted, days = self.check_result_days, "Old check results removed")
            }
            Err(e) => tracing::error!(error = %e, "Check result cleanup failed"),
        }
    }

    fn sweep_alerts(&self) {
        let cutoff = Utc::now() - ChronoDuration::days(self.alert_days);
        match self.store.delete_alerts_before(cutoff) {
            Ok(deleted) => tracing::info!(deleted, days = self.alert_days, "Old alerts removed"),
            Err(e) => tracing::error!(error = %e, "Alert cleanup failed"),
        }
    }

    fn sweep_per_plan(&self) {
        match self
            .store
            .plan_retention_sweep(Utc::now(), self.check_result_days * 24)
        {
            Ok(deleted) => tracing::info!(deleted, "Per-plan retention sweep finished"),
            Err(e) => tracing::error!(error = %e, "Per-plan retention sweep failed"),
        }
    }
}

/// Next wall-clock occurrence of `hour:minute` UTC strictly after `now`.
fn next_occurrence(now: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    let today = now
        .date_naive()
        .and_hms_opt(hour, minute, 0)
        .expect("static time is valid")
        .and_utc();
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

async fn sleep_until(now: DateTime<Utc>, at: DateTime<Utc>) {
    let wait = (at - now).to_std().unwrap_or(Duration::ZERO);
    tokio::time::sleep(wait).await;
}
