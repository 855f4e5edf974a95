use chrono::{Duration, Utc};
use httpmon_common::types::{
    truncate_chars, Alert, AlertChannel, AlertKind, CheckResult, Endpoint,
};
use httpmon_notify::SinkRegistry;
use httpmon_storage::{Result, StateStore};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing;

/// Titles are clipped here, whatever the endpoint name looks like.
const MAX_TITLE_CHARS: usize = 120;

/// What the incident engine hands over after processing one check.
#[derive(Debug, Clone)]
pub enum IncidentEvent {
    Failure {
        endpoint: Endpoint,
        result: CheckResult,
        incident_id: String,
        /// Fresh counter value as written by the incident engine.
        consecutive_failures: u32,
    },
    Recovered { endpoint: Endpoint },
}

#[derive(Debug, Clone)]
pub struct AlertEngineConfig {
    /// Minimum consecutive failures before a failure alert may fire.
    pub failure_threshold: u32,
    /// Window within which a second alert of the same (endpoint, kind) is
    /// suppressed.
    pub dedup_window_minutes: i64,
    /// Bound on concurrently running sink deliveries.
    pub max_concurrent_deliveries: usize,
}

impl Default for AlertEngineConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            dedup_window_minutes: 15,
            max_concurrent_deliveries: 8,
        }
    }
}

#[derive(Clone)]
pub struct AlertEngine {
    store: Arc<StateStore>,
    sinks: Arc<SinkRegistry>,
    failure_threshold: u32,
    dedup_window: Duration,
    max_deliveries: usize,
    delivery_permits: Arc<Semaphore>,
}

impl AlertEngine {
    pub fn new(store: Arc<StateStore>, sinks: Arc<SinkRegistry>, config: AlertEngineConfig) -> Self {
        let max_deliveries = config.max_concurrent_deliveries.max(1);
        Self {
            store,
            sinks,
            failure_threshold: config.failure_threshold,
            dedup_window: Duration::minutes(config.dedup_window_minutes),
            max_deliveries,
            delivery_permits: Arc::new(Semaphore::new(max_deliveries)),
        }
    }

    /// Waits for in-flight deliveries to finish, up to `grace`. Used on
    /// shutdown so a slow sink cannot hold the process forever.
    pub async fn drain(&self, grace: std::time::Duration) {
        let all = self.max_deliveries as u32;
        match tokio::time::timeout(grace, self.delivery_permits.clone().acquire_many_owned(all))
            .await
        {
            Ok(_) => tracing::info!("All alert deliveries drained"),
            Err(_) => tracing::warn!(
                grace_secs = grace.as_secs(),
                "Grace period elapsed, abandoning in-flight deliveries"
            ),
        }
    }

    /// Applies the gates, persists the alert if one is warranted, and hands
    /// delivery to the bounded pool. Returns the persisted alert, or `None`
    /// when a gate dropped the event.
    pub fn process(&self, event: &IncidentEvent) -> Result<Option<Alert>> {
        let alert = match self.evaluate(event)? {
            Some(alert) => alert,
            None => return Ok(None),
        };
        self.dispatch_delivery(alert.clone());
        Ok(Some(alert))
    }

    /// Gate evaluation and persistence, without dispatching delivery.
    /// Split out so tests can drive delivery synchronously.
    pub fn evaluate(&self, event: &IncidentEvent) -> Result<Option<Alert>> {
        match event {
            IncidentEvent::Failure {
                endpoint,
                result,
                incident_id,
                consecutive_failures,
            } => {
                if *consecutive_failures < self.failure_threshold {
                    tracing::debug!(
                        endpoint_id = %endpoint.id,
                        consecutive_failures,
                        threshold = self.failure_threshold,
                        "Failure threshold not reached"
                    );
                    return Ok(None);
                }

                let kind = match AlertKind::from_result_kind(result.kind) {
                    Some(kind) => kind,
                    None => return Ok(None),
                };

                let since = Utc::now() - self.dedup_window;
                if self.store.exists_recent_alert(&endpoint.id, kind, since)? {
                    tracing::debug!(
                        endpoint_id = %endpoint.id,
                        kind = %kind,
                        "Alert suppressed (dedup window)"
                    );
                    return Ok(None);
                }

                let alert = self.build_alert(
                    endpoint,
                    kind,
                    Some(incident_id.clone()),
                    failure_message(endpoint, result),
                );
                self.store.insert_alert(&alert)?;
                tracing::info!(
                    alert_id = %alert.id,
                    endpoint_id = %endpoint.id,
                    kind = %kind,
                    severity = %alert.severity,
                    "Alert created"
                );
                Ok(Some(alert))
            }
            IncidentEvent::Recovered { endpoint } => {
                // Recovery bypasses threshold and dedup.
                let alert = self.build_alert(
                    endpoint,
                    AlertKind::EndpointRecovered,
                    None,
                    recovery_message(endpoint),
                );
                self.store.insert_alert(&alert)?;
                tracing::info!(
                    alert_id = %alert.id,
                    endpoint_id = %endpoint.id,
                    "Recovery alert created"
                );
                Ok(Some(alert))
            }
        }
    }

    fn build_alert(
        &self,
        endpoint: &Endpoint,
        kind: AlertKind,
        incident_id: Option<String>,
        message: String,
    ) -> Alert {
        let title = truncate_chars(
            &format!("{} {}: {}", kind.emoji(), kind.action(), endpoint.name),
            MAX_TITLE_CHARS,
        );
        Alert {
            id: httpmon_common::id::next_id(),
            endpoint_id: endpoint.id.clone(),
            incident_id,
            kind,
            severity: kind.severity(),
            channel: self.preferred_channel(),
            title,
            message,
            delivered: false,
            delivery_error: None,
            acknowledged: false,
            acknowledged_at: None,
            created_at: Utc::now(),
        }
    }

    /// Email is the default channel; Slack/webhook take over only when they
    /// are the only sinks configured.
    fn preferred_channel(&self) -> AlertChannel {
        for channel in [
            AlertChannel::Email,
            AlertChannel::Slack,
            AlertChannel::Webhook,
        ] {
            if self.sinks.has_sink(channel) {
                return channel;
            }
        }
        AlertChannel::Email
    }

    fn dispatch_delivery(&self, alert: Alert) {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.deliver(&alert).await;
        });
    }

    /// Runs one delivery under a pool permit and records the outcome on the
    /// alert row. Sink failures are recorded, never retried.
    pub async fn deliver(&self, alert: &Alert) {
        let _permit = match self.delivery_permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        match self.sinks.deliver(alert).await {
            Ok(()) => {
                if let Err(e) = self.store.mark_alert_delivery(&alert.id, true, None) {
                    tracing::error!(alert_id = %alert.id, error = %e, "Failed to mark alert delivered");
                } else {
                    tracing::info!(alert_id = %alert.id, channel = %alert.channel, "Alert delivered");
                }
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::error!(alert_id = %alert.id, error = %reason, "Alert delivery failed");
                if let Err(e) =
                    self.store
                        .mark_alert_delivery(&alert.id, false, Some(&reason))
                {
                    tracing::error!(alert_id = %alert.id, error = %e, "Failed to record delivery error");
                }
            }
        }
    }
}

fn failure_message(endpoint: &Endpoint, result: &CheckResult) -> String {
    let mut message = format!(
        "Endpoint: {}\nURL: {}\nStatus Code: {}\nLatency: {}ms\n",
        endpoint.name, endpoint.url, result.status_code, result.latency_ms
    );
    if let Some(error) = &result.error_message {
        message.push_str(&format!("Error: {error}\n"));
    }
    message.push_str(&format!("Time: {}\n", result.created_at));
    message
}

fn recovery_message(endpoint: &Endpoint) -> String {
    format!(
        "Good news! Your API endpoint is back online.\n\n\
         Endpoint: {}\nURL: {}\nStatus: UP\nTime: {}\n\n\
         The endpoint is now responding correctly.\n",
        endpoint.name,
        endpoint.url,
        Utc::now()
    )
}
