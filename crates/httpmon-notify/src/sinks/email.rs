use crate::{DeliveryError, NotifierSink};
use async_trait::async_trait;
use httpmon_common::types::{Alert, AlertChannel};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing;

/// SMTP delivery. The transport keeps its own connection pool; one sink
/// instance serves the whole process.
pub struct EmailSink {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
    recipients: Vec<String>,
}

impl EmailSink {
    pub fn new(
        smtp_host: &str,
        smtp_port: u16,
        username: Option<&str>,
        password: Option<&str>,
        from: &str,
        recipients: Vec<String>,
    ) -> Result<Self, DeliveryError> {
        if recipients.is_empty() {
            return Err(DeliveryError::InvalidConfig(
                "email sink needs at least one recipient".to_string(),
            ));
        }
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)
            .map_err(|e| DeliveryError::InvalidConfig(format!("bad smtp host: {e}")))?
            .port(smtp_port);

        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
        }

        Ok(Self {
            transport: builder.build(),
            from: from.to_string(),
            recipients,
        })
    }
}

#[async_trait]
impl NotifierSink for EmailSink {
    async fn deliver(&self, alert: &Alert) -> Result<(), DeliveryError> {
        for recipient in &self.recipients {
            let email = Message::builder()
                .from(
                    self.from
                        .parse()
                        .map_err(|e| DeliveryError::InvalidConfig(format!("bad from address: {e}")))?,
                )
                .to(recipient
                    .parse()
                    .map_err(|e| DeliveryError::InvalidConfig(format!("bad recipient: {e}")))?)
                .subject(&alert.title)
                .header(ContentType::TEXT_PLAIN)
                .body(alert.message.clone())
                .map_err(|e| DeliveryError::Smtp(e.to_string()))?;

            self.transport
                .send(email)
                .await
                .map_err(|e| DeliveryError::Smtp(e.to_string()))?;

            tracing::debug!(alert_id = %alert.id, recipient = %recipient, "Alert email sent");
        }
        Ok(())
    }

    fn channel(&self) -> AlertChannel {
        AlertChannel::Email
    }
}
