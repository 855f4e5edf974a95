use crate::{DeliveryError, NotifierSink};
use async_trait::async_trait;
use httpmon_common::types::{Alert, AlertChannel};
use tracing;

/// Generic webhook delivery: the alert is POSTed as JSON to a configured
/// URL.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(client: reqwest::Client, url: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
        }
    }

    pub(crate) fn render_payload(alert: &Alert) -> serde_json::Value {
        serde_json::json!({
            "alert_id": alert.id,
            "endpoint_id": alert.endpoint_id,
            "incident_id": alert.incident_id,
            "kind": alert.kind.to_string(),
            "severity": alert.severity.to_string(),
            "title": alert.title,
            "message": alert.message,
            "created_at": alert.created_at.to_rfc3339(),
        })
    }
}

#[async_trait]
impl NotifierSink for WebhookSink {
    async fn deliver(&self, alert: &Alert) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .json(&Self::render_payload(alert))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Api {
                service: "webhook",
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(alert_id = %alert.id, url = %self.url, "Alert posted to webhook");
        Ok(())
    }

    fn channel(&self) -> AlertChannel {
        AlertChannel::Webhook
    }
}
