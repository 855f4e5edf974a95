use crate::{DeliveryError, NotifierSink};
use httpmon_common::types::{Alert, AlertChannel};
use std::collections::HashMap;
use tracing;

/// Sinks addressed by channel. The engine delivers through whatever is
/// registered; an unregistered channel is a delivery error, not a panic.
#[derive(Default)]
pub struct SinkRegistry {
    sinks: HashMap<String, Box<dyn NotifierSink>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self {
            sinks: HashMap::new(),
        }
    }

    pub fn register(&mut self, sink: Box<dyn NotifierSink>) {
        let channel = sink.channel().to_string();
        tracing::info!(channel = %channel, "Notifier sink registered");
        self.sinks.insert(channel, sink);
    }

    pub fn has_sink(&self, channel: AlertChannel) -> bool {
        self.sinks.contains_key(&channel.to_string())
    }

    pub fn channels(&self) -> Vec<&str> {
        self.sinks.keys().map(|s| s.as_str()).collect()
    }

    pub async fn deliver(&self, alert: &Alert) -> Result<(), DeliveryError> {
        let sink = self
            .sinks
            .get(&alert.channel.to_string())
            .ok_or_else(|| DeliveryError::NoSink(alert.channel.to_string()))?;
        sink.deliver(alert).await
    }
}
