//! Command dispatcher for sending commands to automation channels

use super::controller::{ControllerEvent, VerificationController};
use super::tracker::CommandKey;
use crate::config::BotConfig;
use crate::transport::PubSub;
use anyhow::Context;
use bytes::Bytes;
use homy_shared::{codec, reasons, VerificationPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Errors returned to callers of `send`
///
/// Verification outcomes are never reported here; they surface as telemetry.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Verification controller has stopped")]
    ControllerClosed,
}

/// Addressing and verification settings of one channel
#[derive(Debug, Clone)]
struct Route {
    command_topic: String,
    policy: Option<VerificationPolicy>,
    on_payload: Bytes,
    off_payload: Bytes,
}

/// Sends commands to channels, verifying them where configured
///
/// Cheap to clone; the controller loop stops once every clone is dropped.
#[derive(Clone)]
pub struct CommandDispatcher {
    transport: Arc<dyn PubSub>,
    routes: Arc<HashMap<String, Route>>,
    events: mpsc::UnboundedSender<ControllerEvent>,
}

impl CommandDispatcher {
    /// Build the dispatcher for a bot and start its verification controller
    pub async fn spawn(
        transport: Arc<dyn PubSub>,
        config: &BotConfig,
    ) -> anyhow::Result<(Self, JoinHandle<()>)> {
        let (events, events_rx) = mpsc::unbounded_channel();
        let mut controller = VerificationController::new(
            transport.clone(),
            &config.bot_name,
            events_rx,
            events.downgrade(),
        );

        let mut routes = HashMap::new();
        for (channel_id, channel) in &config.channels {
            let policy = channel.verification(channel_id);
            let route = Route {
                command_topic: channel.command_topic.clone(),
                policy,
                on_payload: codec::encode(channel.payload_for(true))
                    .with_context(|| format!("Encoding ON payload of {}", channel_id))?,
                off_payload: codec::encode(channel.payload_for(false))
                    .with_context(|| format!("Encoding OFF payload of {}", channel_id))?,
            };

            match policy {
                Some(policy) => {
                    let subscription = transport
                        .subscribe(&channel.status_topic)
                        .await
                        .with_context(|| format!("Subscribing to {}", channel.status_topic))?;
                    controller.attach_status(channel_id.clone(), subscription, events.downgrade());
                    info!(
                        "Channel {}: verified (timeout {:?}, {} retries, delay {:?})",
                        channel_id, policy.timeout, policy.max_retries, policy.retry_delay
                    );
                }
                None => info!("Channel {}: fire-and-forget", channel_id),
            }

            routes.insert(channel_id.clone(), route);
        }

        let handle = tokio::spawn(controller.run());

        Ok((
            Self {
                transport,
                routes: Arc::new(routes),
                events,
            },
            handle,
        ))
    }

    /// Send a command to a channel
    ///
    /// Exactly one publish happens per call. On verified channels the command is
    /// tracked under `(channel_id, reason)`, replacing any earlier command with
    /// the same reason that is still pending.
    ///
    /// Commands with different reasons do not cancel each other. A `toggle_on`
    /// still retrying after a quick `toggle_off` was verified will publish ON
    /// again and turn the light back on.
    pub async fn send(
        &self,
        channel_id: &str,
        reason: &str,
        expected_state: bool,
        payload: Bytes,
    ) -> Result<(), DispatchError> {
        let route = self
            .routes
            .get(channel_id)
            .ok_or_else(|| DispatchError::UnknownChannel(channel_id.to_string()))?;

        let Some(policy) = route.policy else {
            // Legacy channels: publish and forget
            debug!(">>> {} {} (unverified)", channel_id, reason);
            if let Err(e) = self.transport.publish(&route.command_topic, payload).await {
                error!("Failed to publish {} to {}: {}", reason, route.command_topic, e);
            }
            return Ok(());
        };

        debug!(">>> {} {} (expect {})", channel_id, reason, expected_state);
        self.events
            .send(ControllerEvent::Dispatch {
                key: CommandKey::new(channel_id, reason),
                expected_state,
                command_topic: route.command_topic.clone(),
                payload,
                policy,
            })
            .map_err(|_| DispatchError::ControllerClosed)
    }

    /// Switch a channel on or off with its configured payloads
    pub async fn switch(&self, channel_id: &str, on: bool) -> Result<(), DispatchError> {
        let route = self
            .routes
            .get(channel_id)
            .ok_or_else(|| DispatchError::UnknownChannel(channel_id.to_string()))?;
        let payload = if on {
            route.on_payload.clone()
        } else {
            route.off_payload.clone()
        };
        self.send(channel_id, reasons::for_state(on), on, payload)
            .await
    }

    /// Inject a status observation without going through the broker
    #[cfg(test)]
    pub fn observe_status(&self, channel_id: &str, state: bool) -> Result<(), DispatchError> {
        if !self.routes.contains_key(channel_id) {
            return Err(DispatchError::UnknownChannel(channel_id.to_string()));
        }
        self.events
            .send(ControllerEvent::StatusObserved {
                channel_id: channel_id.to_string(),
                state,
            })
            .map_err(|_| DispatchError::ControllerClosed)
    }

    /// Get count of pending commands
    pub async fn pending_count(&self) -> usize {
        self.query_pending(None).await
    }

    /// Get count of pending commands for a specific channel
    pub async fn pending_count_for(&self, channel_id: &str) -> usize {
        self.query_pending(Some(channel_id.to_string())).await
    }

    async fn query_pending(&self, channel_id: Option<String>) -> usize {
        let (reply, rx) = oneshot::channel();
        if self
            .events
            .send(ControllerEvent::PendingCount { channel_id, reply })
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// IDs of all configured channels
    pub fn channel_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.routes.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether commands on a channel are verified
    pub fn is_verified(&self, channel_id: &str) -> bool {
        self.routes
            .get(channel_id)
            .is_some_and(|r| r.policy.is_some())
    }
}
