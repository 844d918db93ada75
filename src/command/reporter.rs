//! Failure reporter - publishes exhausted verifications as telemetry

use crate::transport::PubSub;
use homy_shared::{codec, topic, FailureEvent};
use std::sync::Arc;
use tracing::error;

/// Publishes `FailureEvent`s to `homy/automation/<bot>/command_failed`
pub struct FailureReporter {
    transport: Arc<dyn PubSub>,
    topic: String,
}

impl FailureReporter {
    pub fn new(transport: Arc<dyn PubSub>, bot_name: &str) -> Self {
        Self {
            transport,
            topic: topic::command_failed(bot_name),
        }
    }

    /// Topic failures are published to
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish one failure event; reporting errors are logged, never retried
    pub async fn report(&self, channel_id: &str, event: &FailureEvent) {
        error!(
            "Command {} on {} failed after {} attempts (expected {}, last seen {:?})",
            event.reason, channel_id, event.attempts, event.expected_state, event.actual_state
        );

        let payload = match codec::encode_failure(event) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode failure event for {}: {}", event.reason, e);
                return;
            }
        };

        if let Err(e) = self.transport.publish(&self.topic, payload).await {
            error!("Failed to publish failure event to {}: {}", self.topic, e);
        }
    }
}
