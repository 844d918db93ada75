//! Per-channel command verification settings
//!
//! A channel's `commandConfig` block is resolved on its own, through
//! [`CommandConfig::from_value`], so a mistyped field (a string, a fraction, a
//! negative number) is reported for that channel instead of failing the whole
//! configuration file.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while reading automation configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid commandConfig: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Invalid commandConfig: {field} must not be negative (got {value})")]
    Negative { field: &'static str, value: i64 },
}

/// Raw `commandConfig` block as written in channel configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandConfig {
    /// Verification timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<i64>,
    /// Attempts allowed after the first one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<i64>,
    /// Delay before a retry in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<i64>,
}

/// Validated verification settings for a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl CommandConfig {
    /// Create a config with all three settings present
    pub fn new(verification_ms: i64, max_retries: i64, retry_delay_ms: i64) -> Self {
        Self {
            verification: Some(verification_ms),
            max_retries: Some(max_retries),
            retry_delay: Some(retry_delay_ms),
        }
    }

    /// Read a raw `commandConfig` block
    ///
    /// Fields must be integers; anything else is `ConfigError::Malformed`.
    pub fn from_value(raw: serde_json::Value) -> Result<Self, ConfigError> {
        serde_json::from_value(raw).map_err(ConfigError::Malformed)
    }

    /// Resolve the block into a verification policy
    ///
    /// Returns:
    /// - `Ok(None)` when verification is unset or zero (legacy mode)
    /// - `Ok(Some(policy))` when verification is enabled
    /// - `Err(...)` when a field is negative; callers fall back to legacy mode
    pub fn policy(&self) -> Result<Option<VerificationPolicy>, ConfigError> {
        let timeout_ms = match self.verification {
            None | Some(0) => return Ok(None),
            Some(ms) if ms < 0 => {
                return Err(ConfigError::Negative {
                    field: "verification",
                    value: ms,
                })
            }
            Some(ms) => ms as u64,
        };

        let max_retries = non_negative("maxRetries", self.max_retries.unwrap_or(0))?;
        let retry_delay_ms = non_negative("retryDelay", self.retry_delay.unwrap_or(0))?;

        Ok(Some(VerificationPolicy {
            timeout: Duration::from_millis(timeout_ms),
            max_retries: u32::try_from(max_retries).unwrap_or(u32::MAX),
            retry_delay: Duration::from_millis(retry_delay_ms),
        }))
    }
}

fn non_negative(field: &'static str, value: i64) -> Result<u64, ConfigError> {
    u64::try_from(value).map_err(|_| ConfigError::Negative { field, value })
}
