/// Errors raised by notifier sinks during delivery.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Sink configuration is missing a required field or contains an
    /// invalid value.
    #[error("Delivery: invalid sink configuration: {0}")]
    InvalidConfig(String),

    /// No sink is registered for the requested channel.
    #[error("Delivery: no sink registered for channel '{0}'")]
    NoSink(String),

    /// SMTP transport failure.
    #[error("Delivery: SMTP error: {0}")]
    Smtp(String),

    /// HTTP request to the notification endpoint failed.
    #[error("Delivery: HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The external API answered with a non-success status.
    #[error("Delivery: {service} returned status {status}: {body}")]
    Api {
        service: &'static str,
        status: u16,
        body: String,
    },
}
