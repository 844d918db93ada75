//! Bot configuration loaded from JSON

use homy_shared::{codec, CommandConfig, ConfigError, VerificationPolicy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Top-level configuration for one automation bot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    /// Bot identity, used to namespace telemetry topics
    pub bot_name: String,
    /// Controlled channels by channel ID
    pub channels: BTreeMap<String, ChannelConfig>,
    /// Interval of the on/off cycle driven by `main`, in milliseconds
    #[serde(default = "default_toggle_interval")]
    pub toggle_interval: u64,
}

/// One controlled output, e.g. a light
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    pub command_topic: String,
    pub status_topic: String,
    /// Raw verification settings; absent means fire-and-forget
    ///
    /// Kept unparsed so a bad block only affects its own channel, see
    /// [`ChannelConfig::verification`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_config: Option<Value>,
    #[serde(default = "default_on_payload")]
    pub on_payload: Value,
    #[serde(default = "default_off_payload")]
    pub off_payload: Value,
    /// Run a simulated device for this channel on the in-process broker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulate: Option<SimulatedDeviceConfig>,
}

/// Behaviour of a simulated light
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedDeviceConfig {
    /// Number of leading commands the device drops on the floor
    #[serde(default)]
    pub ignore_commands: u32,
    /// Delay before the device reports its new state, in milliseconds
    #[serde(default)]
    pub latency: u64,
}

fn default_toggle_interval() -> u64 {
    30_000
}

fn default_on_payload() -> Value {
    codec::state_payload(true)
}

fn default_off_payload() -> Value {
    codec::state_payload(false)
}

impl Default for BotConfig {
    fn default() -> Self {
        let mut channels = BTreeMap::new();
        channels.insert(
            "bath1Light".to_string(),
            ChannelConfig {
                simulate: Some(SimulatedDeviceConfig {
                    ignore_commands: 1,
                    latency: 200,
                }),
                ..ChannelConfig::new("zigbee2mqtt/bath1_light/set", "zigbee2mqtt/bath1_light")
                    .with_command_config(CommandConfig::new(5000, 3, 1000))
            },
        );
        channels.insert(
            "bath2Light".to_string(),
            ChannelConfig {
                simulate: Some(SimulatedDeviceConfig::default()),
                ..ChannelConfig::new("zigbee2mqtt/bath2_light/set", "zigbee2mqtt/bath2_light")
            },
        );

        Self {
            bot_name: "bath-lights".into(),
            channels,
            toggle_interval: default_toggle_interval(),
        }
    }
}

impl BotConfig {
    /// Load the configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Parse the configuration from a JSON string
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Load `path` when given, otherwise use the built-in demo setup
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Interval of the demo on/off cycle
    pub fn toggle_interval(&self) -> Duration {
        Duration::from_millis(self.toggle_interval)
    }
}

impl ChannelConfig {
    /// Create a legacy channel with default ON/OFF payloads
    pub fn new(command_topic: impl Into<String>, status_topic: impl Into<String>) -> Self {
        Self {
            command_topic: command_topic.into(),
            status_topic: status_topic.into(),
            command_config: None,
            on_payload: default_on_payload(),
            off_payload: default_off_payload(),
            simulate: None,
        }
    }

    /// Enable verification on this channel
    pub fn with_command_config(mut self, config: CommandConfig) -> Self {
        self.command_config = serde_json::to_value(config).ok();
        self
    }

    /// Verification policy for this channel, `None` in legacy mode
    ///
    /// An invalid `commandConfig` is logged and treated as legacy so that
    /// commands keep flowing.
    pub fn verification(&self, channel_id: &str) -> Option<VerificationPolicy> {
        let raw = self.command_config.clone()?;
        match CommandConfig::from_value(raw).and_then(|config| config.policy()) {
            Ok(policy) => policy,
            Err(e) => {
                warn!(
                    "Channel {} has invalid commandConfig, running unverified: {}",
                    channel_id, e
                );
                None
            }
        }
    }

    /// Command payload for a target state
    pub fn payload_for(&self, on: bool) -> &Value {
        if on {
            &self.on_payload
        } else {
            &self.off_payload
        }
    }
}
