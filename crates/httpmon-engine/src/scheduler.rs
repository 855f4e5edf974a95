use crate::incident::IncidentEngine;
use chrono::Utc;
use httpmon_probe::Prober;
use httpmon_storage::StateStore;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::time::interval;
use tracing;

/// Tick-driven check scheduler.
///
/// Every tick the due endpoints are admitted up to the concurrency budget;
/// whatever does not fit waits for the next tick. Backpressure is by
/// admission, never by queue growth. The in-flight set guarantees an
/// endpoint is probed at most once at a time, which is also what serializes
/// the incident engine per endpoint.
pub struct Scheduler {
    store: Arc<StateStore>,
    prober: Prober,
    incidents: Arc<IncidentEngine>,
    tick_secs: u64,
    max_concurrent: usize,
    permits: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        store: Arc<StateStore>,
        prober: Prober,
        incidents: Arc<IncidentEngine>,
        tick_secs: u64,
        max_concurrent: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            prober,
            incidents,
            tick_secs,
            max_concurrent,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            shutdown,
        }
    }

    /// Runs until the shutdown signal flips, then drains in-flight checks
    /// for up to `grace`.
    pub async fn run(&self, grace: Duration) {
        tracing::info!(
            tick_secs = self.tick_secs,
            max_concurrent = self.max_concurrent,
            "Check scheduler started"
        );

        let mut tick = interval(Duration::from_secs(self.tick_secs));
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.run_cycle() {
                        tracing::error!(error = %e, "Check cycle failed");
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender means the process is going down too
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Scheduler stopping, no further checks admitted");
                        break;
                    }
                }
            }
        }

        self.drain(grace).await;
    }

    /// One tick: query due endpoints and admit them while permits last.
    fn run_cycle(&self) -> httpmon_storage::Result<()> {
        let due = self.store.due_endpoints(Utc::now())?;
        if due.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = due.len(), "Endpoints due for check");

        for endpoint in due {
            // Reentry guard: an endpoint still being probed from an earlier
            // tick is skipped, never queued.
            let Some(guard) = InFlightGuard::try_mark(&self.in_flight, &endpoint.id) else {
                tracing::debug!(endpoint_id = %endpoint.id, "Check already in flight, skipping");
                continue;
            };

            let permit = match self.permits.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    drop(guard);
                    tracing::warn!(
                        max_concurrent = self.max_concurrent,
                        "Max concurrent checks reached, deferring remaining endpoints to next tick"
                    );
                    break;
                }
            };

            let prober = self.prober.clone();
            let incidents = self.incidents.clone();
            tokio::spawn(async move {
                // Guard and permit are released on drop, whatever happens in
                // the probe or the incident engine, panics included.
                let _permit = permit;
                let _guard = guard;

                let result = prober.probe(&endpoint).await;
                if let Err(e) = incidents.apply(&endpoint, &result) {
                    tracing::error!(
                        endpoint_id = %endpoint.id,
                        error = %e,
                        "Failed to process check result, will retry next tick"
                    );
                }
            });
        }

        Ok(())
    }

    /// Waits for every permit to come home, up to `grace`. Workers still
    /// running afterwards are abandoned.
    async fn drain(&self, grace: Duration) {
        let all = self.max_concurrent as u32;
        match tokio::time::timeout(grace, self.permits.clone().acquire_many_owned(all)).await {
            Ok(_) => tracing::info!("All in-flight checks drained"),
            Err(_) => tracing::warn!(
                grace_secs = grace.as_secs(),
                "Grace period elapsed, abandoning in-flight checks"
            ),
        }
    }

}

/// Holds an endpoint id in the in-flight set; removal happens on drop so a
/// panicking worker cannot leak the flag.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    id: String,
}

impl InFlightGuard {
    fn try_mark(set: &Arc<Mutex<HashSet<String>>>, id: &str) -> Option<Self> {
        let mut guard = set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !guard.insert(id.to_string()) {
            return None;
        }
        Some(Self {
            set: set.clone(),
            id: id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut guard = self
            .set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_guard_rejects_reentry() {
        let set = Arc::new(Mutex::new(HashSet::new()));
        let guard = InFlightGuard::try_mark(&set, "ep-1").unwrap();
        assert!(InFlightGuard::try_mark(&set, "ep-1").is_none());
        // A different endpoint is unaffected
        assert!(InFlightGuard::try_mark(&set, "ep-2").is_some());
        drop(guard);
        assert!(InFlightGuard::try_mark(&set, "ep-1").is_some());
    }

    #[tokio::test]
    async fn in_flight_guard_survives_worker_panic() {
        let set = Arc::new(Mutex::new(HashSet::new()));
        let guard = InFlightGuard::try_mark(&set, "ep-1").unwrap();

        let handle = tokio::spawn(async move {
            let _guard = guard;
            panic!("worker died");
        });
        assert!(handle.await.is_err());

        // The flag must be gone despite the panic
        assert!(InFlightGuard::try_mark(&set, "ep-1").is_some());
    }
}
