//! JSON payload codec for command, status and telemetry messages
//!
//! Devices report their switch state in several shapes depending on firmware:
//! ```text
//! true | false | "ON" | "OFF" | {"state": "ON", ...} | {"state": true, ...}
//! ```
//! All of them decode to a single `bool`.

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::FailureEvent;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Empty payload")]
    Empty,

    #[error("Unrecognized switch state: {0}")]
    UnrecognizedState(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode any serializable value as a JSON payload
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, CodecError> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

/// Decode a JSON payload into a typed value
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    if payload.is_empty() {
        return Err(CodecError::Empty);
    }
    Ok(serde_json::from_slice(payload)?)
}

/// Default command payload for switching a light
pub fn state_payload(on: bool) -> Value {
    serde_json::json!({ "state": if on { "ON" } else { "OFF" } })
}

/// Encode a failure event for the `command_failed` topic
pub fn encode_failure(event: &FailureEvent) -> Result<Bytes, CodecError> {
    encode(event)
}

/// Decode a failure event from the `command_failed` topic
pub fn decode_failure(payload: &[u8]) -> Result<FailureEvent, CodecError> {
    decode(payload)
}

/// Decode the switch state reported on a status topic
pub fn decode_state(payload: &[u8]) -> Result<bool, CodecError> {
    let trimmed = payload.trim_ascii();
    if trimmed.is_empty() {
        return Err(CodecError::Empty);
    }

    // Some firmwares publish a bare ON/OFF without JSON quoting
    match serde_json::from_slice::<Value>(trimmed) {
        Ok(value) => state_from_value(&value),
        Err(_) => state_from_str(&String::from_utf8_lossy(trimmed)),
    }
}

fn state_from_value(value: &Value) -> Result<bool, CodecError> {
    match value {
        Value::Bool(on) => Ok(*on),
        Value::String(s) => state_from_str(s),
        Value::Number(n) => match n.as_u64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(CodecError::UnrecognizedState(n.to_string())),
        },
        Value::Object(map) => match map.get("state") {
            Some(state) => state_from_value(state),
            None => Err(CodecError::UnrecognizedState(value.to_string())),
        },
        other => Err(CodecError::UnrecognizedState(other.to_string())),
    }
}

fn state_from_str(s: &str) -> Result<bool, CodecError> {
    match s.trim().to_ascii_uppercase().as_str() {
        "ON" | "TRUE" | "1" => Ok(true),
        "OFF" | "FALSE" | "0" => Ok(false),
        other => Err(CodecError::UnrecognizedState(other.to_string())),
    }
}
