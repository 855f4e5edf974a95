//! Notification delivery with pluggable sinks.
//!
//! The alert engine persists an alert first, then hands it to the sink
//! registered for its channel. Built-in sinks cover email (SMTP), Slack,
//! and generic webhooks; adding a sink is additive.

pub mod error;
pub mod registry;
pub mod sinks;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use httpmon_common::types::{Alert, AlertChannel};

pub use error::DeliveryError;
pub use registry::SinkRegistry;

/// A delivery backend for one alert channel.
///
/// Implementations must be `Send + Sync`: deliveries run on the alert
/// engine's bounded worker pool, never on the probing path.
#[async_trait]
pub trait NotifierSink: Send + Sync {
    /// Delivers the alert to the external service.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] when the service rejects or the transport
    /// fails. The engine records the failure on the alert row; there is no
    /// automatic retry.
    async fn deliver(&self, alert: &Alert) -> Result<(), DeliveryError>;

    /// The channel this sink serves.
    fn channel(&self) -> AlertChannel;
}
