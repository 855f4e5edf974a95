use crate::{DeliveryError, NotifierSink};
use async_trait::async_trait;
use httpmon_common::types::{Alert, AlertChannel};
use tracing;

/// Slack incoming-webhook delivery. Enabled only for plans that carry the
/// channel; the configuration provider gates that before alerts are
/// produced.
pub struct SlackSink {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackSink {
    pub fn new(client: reqwest::Client, webhook_url: &str) -> Self {
        Self {
            client,
            webhook_url: webhook_url.to_string(),
        }
    }

    pub(crate) fn render_payload(alert: &Alert) -> serde_json::Value {
        serde_json::json!({
            "text": format!("*{}*\n{}", alert.title, alert.message),
        })
    }
}

#[async_trait]
impl NotifierSink for SlackSink {
    async fn deliver(&self, alert: &Alert) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&Self::render_payload(alert))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Api {
                service: "slack",
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(alert_id = %alert.id, "Alert posted to Slack");
        Ok(())
    }

    fn channel(&self) -> AlertChannel {
        AlertChannel::Slack
    }
}
