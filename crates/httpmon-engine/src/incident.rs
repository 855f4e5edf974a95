use chrono::{Duration, Utc};
use httpmon_alert::{AlertEngine, IncidentEvent};
use httpmon_common::types::{CheckResult, Endpoint, EndpointStatus, ResultKind};
use httpmon_storage::{Result, StateStore};
use std::sync::Arc;
use tracing;

/// Per-endpoint state machine. Consumes `(endpoint, check result)` tuples
/// from the scheduler workers; transitions for a single endpoint are
/// serialized by the scheduler's in-flight set, so no locking happens here.
pub struct IncidentEngine {
    store: Arc<StateStore>,
    alerts: AlertEngine,
}

impl IncidentEngine {
    pub fn new(store: Arc<StateStore>, alerts: AlertEngine) -> Self {
        Self { store, alerts }
    }

    /// Applies one check result: persists it, updates the endpoint's runtime
    /// fields, maintains the incident, and forwards the event to the alert
    /// engine.
    ///
    /// `endpoint` is the pre-probe snapshot; its `consecutive_failures` is
    /// the base for the new counter value.
    pub fn apply(&self, endpoint: &Endpoint, result: &CheckResult) -> Result<()> {
        self.store.append_check_result(result)?;

        let now = Utc::now();
        let next_check_at = now + Duration::seconds(endpoint.interval_secs as i64);

        if result.success {
            self.store.update_endpoint_check_status(
                &endpoint.id,
                EndpointStatus::Up,
                now,
                next_check_at,
                0,
            )?;

            // A recovery alert fires only when an incident actually
            // transitioned to RESOLVED on this check.
            if self.store.resolve_open_incident(&endpoint.id, now)? {
                tracing::info!(endpoint_id = %endpoint.id, "Incident resolved, endpoint recovered");
                self.alerts.process(&IncidentEvent::Recovered {
                    endpoint: endpoint.clone(),
                })?;
            }
        } else {
            let consecutive_failures = endpoint.consecutive_failures + 1;
            // A slow-but-correct endpoint is degraded, not down.
            let status = if result.kind == ResultKind::LatencyBreach {
                EndpointStatus::Degraded
            } else {
                EndpointStatus::Down
            };
            self.store.update_endpoint_check_status(
                &endpoint.id,
                status,
                now,
                next_check_at,
                consecutive_failures,
            )?;

            let (incident, created) = self.store.open_incident(
                &endpoint.id,
                result.kind,
                result.error_message.as_deref(),
            )?;
            if !created {
                self.store
                    .increment_incident_failures(&incident.id, result.error_message.as_deref())?;
            }

            self.alerts.process(&IncidentEvent::Failure {
                endpoint: endpoint.clone(),
                result: result.clone(),
                incident_id: incident.id,
                consecutive_failures,
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmon_alert::AlertEngineConfig;
    use httpmon_common::types::{HttpMethod, IncidentState, Plan};
    use httpmon_notify::SinkRegistry;
    use httpmon_storage::admin::NewEndpoint;

    fn setup(threshold: u32) -> (Arc<StateStore>, IncidentEngine, Endpoint) {
        httpmon_common::id::init(1, 1);
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let project = store.create_project("demo", Plan::Pro).unwrap();
        let endpoint = store
            .register_endpoint(&NewEndpoint {
                project_id: project.id,
                name: "orders".to_string(),
                url: "https://api.example.com/orders/health".to_string(),
                method: HttpMethod::Get,
                headers_json: None,
                request_body: None,
                expected_status: 200,
                interval_secs: 60,
                timeout_ms: 5000,
                max_latency_ms: Some(400),
                credential_id: None,
            })
            .unwrap();
        let alerts = AlertEngine::new(
            store.clone(),
            Arc::new(SinkRegistry::new()),
            AlertEngineConfig {
                failure_threshold: threshold,
                dedup_window_minutes: 15,
                max_concurrent_deliveries: 2,
            },
        );
        let engine = IncidentEngine::new(store.clone(), alerts);
        (store, engine, endpoint)
    }

    fn failure(endpoint: &Endpoint, kind: ResultKind) -> CheckResult {
        CheckResult::failure(&endpoint.id, kind, 500, 40, "Server error: HTTP 500".into())
    }

    #[tokio::test]
    async fn success_resets_counter_and_sets_up() {
        let (store, engine, endpoint) = setup(3);

        engine
            .apply(&endpoint, &failure(&endpoint, ResultKind::ServerError))
            .unwrap();
        let endpoint = store.get_endpoint(&endpoint.id).unwrap();
        assert_eq!(endpoint.status, EndpointStatus::Down);
        assert_eq!(endpoint.consecutive_failures, 1);

        engine
            .apply(&endpoint, &CheckResult::success(&endpoint.id, 200, 30))
            .unwrap();
        let endpoint = store.get_endpoint(&endpoint.id).unwrap();
        assert_eq!(endpoint.status, EndpointStatus::Up);
        assert_eq!(endpoint.consecutive_failures, 0);
        assert!(endpoint.next_check_at.unwrap() >= endpoint.last_check_at.unwrap());
    }

    #[tokio::test]
    async fn failures_grow_one_incident() {
        let (store, engine, mut snapshot) = setup(3);

        for expected_count in 1..=3u32 {
            engine
                .apply(&snapshot, &failure(&snapshot, ResultKind::ServerError))
                .unwrap();
            snapshot = store.get_endpoint(&snapshot.id).unwrap();
            assert_eq!(snapshot.consecutive_failures, expected_count);

            let incident = store.find_open_incident(&snapshot.id).unwrap().unwrap();
            assert_eq!(incident.failed_check_count, expected_count);
            assert_eq!(incident.state, IncidentState::Open);
        }

        let incidents = store.list_incidents(&snapshot.id, 10).unwrap();
        assert_eq!(incidents.len(), 1, "failures group into one incident");
    }

    #[tokio::test]
    async fn recovery_resolves_and_alerts_once() {
        let (store, engine, endpoint) = setup(3);

        engine
            .apply(&endpoint, &failure(&endpoint, ResultKind::Timeout))
            .unwrap();
        let snapshot = store.get_endpoint(&endpoint.id).unwrap();
        engine
            .apply(&snapshot, &CheckResult::success(&endpoint.id, 200, 30))
            .unwrap();

        let incidents = store.list_incidents(&endpoint.id, 10).unwrap();
        assert_eq!(incidents[0].state, IncidentState::Resolved);

        let alerts = store.list_alerts(&endpoint.id, 10).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(
            alerts[0].kind,
            httpmon_common::types::AlertKind::EndpointRecovered
        );

        // A second success must not produce another recovery alert
        let snapshot = store.get_endpoint(&endpoint.id).unwrap();
        engine
            .apply(&snapshot, &CheckResult::success(&endpoint.id, 200, 30))
            .unwrap();
        assert_eq!(store.list_alerts(&endpoint.id, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn latency_breach_degrades_instead_of_down() {
        let (store, engine, endpoint) = setup(3);

        let result = CheckResult::failure(
            &endpoint.id,
            ResultKind::LatencyBreach,
            200,
            900,
            "Response time exceeded threshold".into(),
        );
        engine.apply(&endpoint, &result).unwrap();

        let endpoint = store.get_endpoint(&endpoint.id).unwrap();
        assert_eq!(endpoint.status, EndpointStatus::Degraded);
        assert_eq!(endpoint.consecutive_failures, 1);
        // Still opens an incident: degraded is a failure run
        assert!(store.find_open_incident(&endpoint.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn check_results_are_append_only_and_ordered() {
        let (store, engine, endpoint) = setup(3);

        engine
            .apply(&endpoint, &CheckResult::success(&endpoint.id, 200, 10))
            .unwrap();
        let snapshot = store.get_endpoint(&endpoint.id).unwrap();
        engine
            .apply(&snapshot, &failure(&snapshot, ResultKind::ServerError))
            .unwrap();

        let results = store.recent_results(&endpoint.id, 10).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].created_at >= results[1].created_at);
    }
}
