//! Homy Shared Automation Types
//!
//! This crate provides the plain data types, the verification state machine and
//! the payload codec shared by homy automation bots.

pub mod codec;
pub mod config;
pub mod state_machine;
pub mod topic;

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub use config::{CommandConfig, ConfigError, VerificationPolicy};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Command naming conventions shared by the automations
pub mod reasons {
    /// Reason used when a light is commanded on
    pub const TOGGLE_ON: &str = "toggle_on";

    /// Reason used when a light is commanded off
    pub const TOGGLE_OFF: &str = "toggle_off";

    /// Reason label for a given target state
    pub fn for_state(on: bool) -> &'static str {
        if on {
            TOGGLE_ON
        } else {
            TOGGLE_OFF
        }
    }
}

/// Telemetry published once a verified command has exhausted its retries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEvent {
    pub reason: String,
    pub attempts: u32,
    pub expected_state: bool,
    /// Last mismatching state seen, `None` if the channel never reported
    pub actual_state: Option<bool>,
    /// Unix epoch milliseconds
    pub timestamp: u64,
}

impl FailureEvent {
    /// Create a failure event stamped with the current time
    pub fn new(
        reason: impl Into<String>,
        attempts: u32,
        expected_state: bool,
        actual_state: Option<bool>,
    ) -> Self {
        Self {
            reason: reason.into(),
            attempts,
            expected_state,
            actual_state,
            timestamp: now_ms(),
        }
    }
}
