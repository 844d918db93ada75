//! Simulated light for running the bot without real devices
//!
//! The device listens on its command topic and reports the commanded state on
//! its status topic, optionally dropping the first few commands to exercise
//! retries.

use crate::config::{ChannelConfig, SimulatedDeviceConfig};
use crate::transport::PubSub;
use anyhow::Result;
use homy_shared::codec;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// A light that echoes commands back as status
pub struct SimulatedLight {
    channel_id: String,
    command_topic: String,
    status_topic: String,
    config: SimulatedDeviceConfig,
}

impl SimulatedLight {
    pub fn new(channel_id: &str, channel: &ChannelConfig, config: SimulatedDeviceConfig) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            command_topic: channel.command_topic.clone(),
            status_topic: channel.status_topic.clone(),
            config,
        }
    }

    /// Subscribe to the command topic and start answering
    pub async fn spawn(self, transport: Arc<dyn PubSub>) -> Result<JoinHandle<()>> {
        let mut commands = transport.subscribe(&self.command_topic).await?;
        info!(
            "[SIM] {} listening on {} (ignores first {}, latency {}ms)",
            self.channel_id, self.command_topic, self.config.ignore_commands, self.config.latency
        );

        Ok(tokio::spawn(async move {
            let mut received: u32 = 0;

            while let Some(msg) = commands.recv().await {
                received += 1;
                if received <= self.config.ignore_commands {
                    debug!("[SIM] {} dropped command #{}", self.channel_id, received);
                    continue;
                }

                let on = match codec::decode_state(&msg.payload) {
                    Ok(on) => on,
                    Err(e) => {
                        warn!("[SIM] {} got unreadable command: {}", self.channel_id, e);
                        continue;
                    }
                };

                if self.config.latency > 0 {
                    sleep(Duration::from_millis(self.config.latency)).await;
                }

                let status = match codec::encode(&codec::state_payload(on)) {
                    Ok(status) => status,
                    Err(e) => {
                        warn!("[SIM] {} failed to encode status: {}", self.channel_id, e);
                        continue;
                    }
                };
                if let Err(e) = transport.publish(&self.status_topic, status).await {
                    warn!("[SIM] {} failed to report status: {}", self.channel_id, e);
                }
            }
        }))
    }
}
