use crate::engine::{AlertEngine, AlertEngineConfig, IncidentEvent};
use httpmon_common::types::{
    AlertKind, CheckResult, Endpoint, EndpointStatus, HttpMethod, Plan, ResultKind, Severity,
};
use httpmon_notify::SinkRegistry;
use httpmon_storage::admin::NewEndpoint;
use httpmon_storage::StateStore;
use std::sync::Arc;

fn setup(threshold: u32, dedup_minutes: i64) -> (Arc<StateStore>, AlertEngine, Endpoint) {
    httpmon_common::id::init(1, 1);
    let store = Arc::new(StateStore::open_in_memory().unwrap());
    let project = store.create_project("demo", Plan::Pro).unwrap();
    let endpoint = store
        .register_endpoint(&NewEndpoint {
            project_id: project.id,
            name: "payments".to_string(),
            url: "https://api.example.com/payments/health".to_string(),
            method: HttpMethod::Get,
            headers_json: None,
            request_body: None,
            expected_status: 200,
            interval_secs: 60,
            timeout_ms: 5000,
            max_latency_ms: None,
            credential_id: None,
        })
        .unwrap();
    let engine = AlertEngine::new(
        store.clone(),
        Arc::new(SinkRegistry::new()),
        AlertEngineConfig {
            failure_threshold: threshold,
            dedup_window_minutes: dedup_minutes,
            max_concurrent_deliveries: 2,
        },
    );
    (store, engine, endpoint)
}

fn failure_event(endpoint: &Endpoint, kind: ResultKind, consecutive_failures: u32) -> IncidentEvent {
    IncidentEvent::Failure {
        endpoint: endpoint.clone(),
        result: CheckResult::failure(&endpoint.id, kind, 500, 40, "Server error: HTTP 500".into()),
        incident_id: "inc-1".to_string(),
        consecutive_failures,
    }
}

#[test]
fn failure_below_threshold_is_dropped() {
    let (_store, engine, endpoint) = setup(3, 15);

    for failures in 1..3 {
        let alert = engine
            .evaluate(&failure_event(&endpoint, ResultKind::ServerError, failures))
            .unwrap();
        assert!(alert.is_none(), "no alert at {failures} consecutive failures");
    }

    let alert = engine
        .evaluate(&failure_event(&endpoint, ResultKind::ServerError, 3))
        .unwrap()
        .expect("alert at threshold");
    assert_eq!(alert.kind, AlertKind::ServerError);
    assert_eq!(alert.severity, Severity::Error);
    assert_eq!(alert.incident_id.as_deref(), Some("inc-1"));
    assert!(!alert.delivered);
}

#[test]
fn dedup_window_suppresses_same_kind() {
    let (_store, engine, endpoint) = setup(1, 15);

    let first = engine
        .evaluate(&failure_event(&endpoint, ResultKind::Timeout, 1))
        .unwrap();
    assert!(first.is_some());

    let second = engine
        .evaluate(&failure_event(&endpoint, ResultKind::Timeout, 2))
        .unwrap();
    assert!(second.is_none(), "same kind within window is suppressed");

    // A different failure kind is not deduplicated against it
    let other_kind = engine
        .evaluate(&failure_event(&endpoint, ResultKind::SslError, 3))
        .unwrap();
    assert!(other_kind.is_some());
}

#[test]
fn dedup_is_per_endpoint() {
    let (store, engine, endpoint) = setup(1, 15);
    let other = store
        .register_endpoint(&NewEndpoint {
            project_id: endpoint.project_id.clone(),
            name: "search".to_string(),
            url: "https://api.example.com/search/health".to_string(),
            method: HttpMethod::Get,
            headers_json: None,
            request_body: None,
            expected_status: 200,
            interval_secs: 60,
            timeout_ms: 5000,
            max_latency_ms: None,
            credential_id: None,
        })
        .unwrap();

    assert!(engine
        .evaluate(&failure_event(&endpoint, ResultKind::Timeout, 1))
        .unwrap()
        .is_some());
    assert!(engine
        .evaluate(&failure_event(&other, ResultKind::Timeout, 1))
        .unwrap()
        .is_some());
}

#[test]
fn recovery_bypasses_both_gates() {
    let (_store, engine, endpoint) = setup(3, 15);

    // Threshold would drop a failure at 0 failures; recovery goes through
    let alert = engine
        .evaluate(&IncidentEvent::Recovered {
            endpoint: endpoint.clone(),
        })
        .unwrap()
        .expect("recovery alert");
    assert_eq!(alert.kind, AlertKind::EndpointRecovered);
    assert_eq!(alert.severity, Severity::Info);
    assert!(alert.incident_id.is_none());
    assert!(alert.title.starts_with("✅ Recovered: payments"));

    // And a second recovery is not deduplicated either
    let again = engine
        .evaluate(&IncidentEvent::Recovered { endpoint })
        .unwrap();
    assert!(again.is_some());
}

#[test]
fn title_format_and_severity_per_kind() {
    let (_store, engine, endpoint) = setup(1, 0);

    let cases = [
        (ResultKind::ServerError, "🔴 API Down: payments", Severity::Error),
        (ResultKind::AuthFailure, "🔐 Auth Failed: payments", Severity::Critical),
        (ResultKind::SslError, "🔒 SSL Error: payments", Severity::Critical),
        (ResultKind::LatencyBreach, "🐢 Slow Response: payments", Severity::Warning),
        (ResultKind::Timeout, "⏱️ Timeout: payments", Severity::Error),
        (ResultKind::ConnectionError, "🔌 Connection Failed: payments", Severity::Error),
    ];
    for (kind, title, severity) in cases {
        let alert = engine
            .evaluate(&failure_event(&endpoint, kind, 1))
            .unwrap()
            .unwrap();
        assert_eq!(alert.title, title);
        assert_eq!(alert.severity, severity);
    }
}

#[test]
fn overlong_titles_are_clipped() {
    let (store, engine, _endpoint) = setup(1, 0);
    let endpoint = store
        .register_endpoint(&NewEndpoint {
            project_id: store.list_projects().unwrap()[0].id.clone(),
            name: "x".repeat(300),
            url: "https://x".to_string(),
            method: HttpMethod::Get,
            headers_json: None,
            request_body: None,
            expected_status: 200,
            interval_secs: 60,
            timeout_ms: 5000,
            max_latency_ms: None,
            credential_id: None,
        })
        .unwrap();

    let alert = engine
        .evaluate(&failure_event(&endpoint, ResultKind::ServerError, 1))
        .unwrap()
        .unwrap();
    assert!(alert.title.chars().count() <= 120);
}

#[tokio::test]
async fn failed_delivery_is_recorded_not_retried() {
    // Empty sink registry: delivery must fail and leave delivered=false
    let (store, engine, endpoint) = setup(1, 0);

    let alert = engine
        .evaluate(&failure_event(&endpoint, ResultKind::ServerError, 1))
        .unwrap()
        .unwrap();
    engine.deliver(&alert).await;

    let stored = store.get_alert(&alert.id).unwrap();
    assert!(!stored.delivered);
    assert!(stored
        .delivery_error
        .as_deref()
        .unwrap()
        .contains("no sink registered"));
}

#[test]
fn failure_message_carries_check_details() {
    let (_store, engine, endpoint) = setup(1, 0);
    let alert = engine
        .evaluate(&failure_event(&endpoint, ResultKind::ServerError, 1))
        .unwrap()
        .unwrap();
    assert!(alert.message.contains("Endpoint: payments"));
    assert!(alert.message.contains("Status Code: 500"));
    assert!(alert.message.contains("Latency: 40ms"));
    assert!(alert.message.contains("Error: Server error: HTTP 500"));
}

#[test]
fn endpoint_statuses_do_not_leak_into_events() {
    // evaluate() must not consult endpoint.status; the counter on the event
    // is authoritative (the engine's row update may lag the event)
    let (_store, engine, mut endpoint) = setup(1, 0);
    endpoint.status = EndpointStatus::Up;
    endpoint.consecutive_failures = 0;
    let alert = engine
        .evaluate(&failure_event(&endpoint, ResultKind::Timeout, 1))
        .unwrap();
    assert!(alert.is_some());
}
