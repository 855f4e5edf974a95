use crate::sinks::email::EmailSink;
use crate::sinks::slack::SlackSink;
use crate::sinks::webhook::WebhookSink;
use crate::{DeliveryError, SinkRegistry};
use chrono::Utc;
use httpmon_common::types::{Alert, AlertChannel, AlertKind, Severity};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn make_alert(channel: AlertChannel) -> Alert {
    Alert {
        id: "alert-1".to_string(),
        endpoint_id: "ep-1".to_string(),
        incident_id: Some("inc-1".to_string()),
        kind: AlertKind::ServerError,
        severity: Severity::Error,
        channel,
        title: "🔴 API Down: payments".to_string(),
        message: "Endpoint: payments\nStatus Code: 500".to_string(),
        delivered: false,
        delivery_error: None,
        acknowledged: false,
        acknowledged_at: None,
        created_at: Utc::now(),
    }
}

#[test]
fn webhook_payload_carries_alert_fields() {
    let alert = make_alert(AlertChannel::Webhook);
    let payload = WebhookSink::render_payload(&alert);
    assert_eq!(payload["alert_id"], "alert-1");
    assert_eq!(payload["kind"], "SERVER_ERROR");
    assert_eq!(payload["severity"], "ERROR");
    assert_eq!(payload["incident_id"], "inc-1");
}

#[test]
fn slack_payload_is_text_with_title() {
    let alert = make_alert(AlertChannel::Slack);
    let payload = SlackSink::render_payload(&alert);
    let text = payload["text"].as_str().unwrap();
    assert!(text.starts_with("*🔴 API Down: payments*"));
    assert!(text.contains("Status Code: 500"));
}

#[test]
fn email_sink_requires_recipients() {
    let result = EmailSink::new("smtp.example.com", 587, None, None, "mon@example.com", vec![]);
    assert!(matches!(result, Err(DeliveryError::InvalidConfig(_))));
}

#[test]
fn registry_knows_registered_channels() {
    let mut registry = SinkRegistry::new();
    assert!(!registry.has_sink(AlertChannel::Webhook));

    let client = reqwest::Client::new();
    registry.register(Box::new(WebhookSink::new(client, "http://127.0.0.1:9/hook")));
    assert!(registry.has_sink(AlertChannel::Webhook));
    assert!(!registry.has_sink(AlertChannel::Email));
}

#[tokio::test]
async fn delivery_without_sink_is_an_error() {
    let registry = SinkRegistry::new();
    let alert = make_alert(AlertChannel::Email);
    let result = registry.deliver(&alert).await;
    assert!(matches!(result, Err(DeliveryError::NoSink(_))));
}

#[tokio::test]
async fn webhook_delivery_posts_json() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 16384];
        let n = socket.read(&mut buf).await.unwrap();
        let request = String::from_utf8_lossy(&buf[..n]).to_string();
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        request
    });

    let sink = WebhookSink::new(reqwest::Client::new(), &format!("http://{addr}/hook"));
    let alert = make_alert(AlertChannel::Webhook);
    crate::NotifierSink::deliver(&sink, &alert).await.unwrap();

    let request = handle.await.unwrap();
    assert!(request.to_lowercase().contains("content-type: application/json"));
    assert!(request.contains("SERVER_ERROR"));
}

#[tokio::test]
async fn webhook_non_success_status_is_api_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 16384];
        let _ = socket.read(&mut buf).await.unwrap();
        socket
            .write_all(b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
    });

    let sink = WebhookSink::new(reqwest::Client::new(), &format!("http://{addr}/hook"));
    let alert = make_alert(AlertChannel::Webhook);
    let result = crate::NotifierSink::deliver(&sink, &alert).await;
    match result {
        Err(DeliveryError::Api { status, .. }) => assert_eq!(status, 503),
        other => panic!("expected Api error, got {other:?}"),
    }
}
