//! Classification of inbound text frames.
//!
//! The wire format is untyped JSON objects, so classification inspects the
//! parsed map rather than deserializing into a tagged enum. Field meanings:
//!
//! - `{"type":"heartbeat"}` - liveness echo, discarded by the router
//! - `{"type":"handshake","device":...}` - informational, not required
//! - any object with a string `deviceId` - telemetry update
//! - anything else well-formed - unroutable, silently dropped

use serde_json::{Map, Value};
use thiserror::Error;

/// Maximum accepted payload size (64 KiB).
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Field carrying the device identifier on telemetry updates.
pub const DEVICE_ID_FIELD: &str = "deviceId";

/// Field carrying the control message type.
pub const TYPE_FIELD: &str = "type";

/// Errors raised while classifying an inbound payload.
#[derive(Debug, Error)]
pub enum WireError {
    /// Payload is not valid JSON.
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Payload is valid JSON but not an object.
    #[error("Payload is not a JSON object")]
    NotAnObject,

    /// Payload exceeds the maximum size.
    #[error("Payload size {0} exceeds maximum {MAX_PAYLOAD_SIZE}")]
    PayloadTooLarge(usize),
}

/// A classified inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Liveness echo from a peer. Never stored, never rebroadcast.
    Heartbeat,

    /// Optional connect-time introduction. Informational only.
    Handshake {
        /// Self-reported device or client name.
        device: Option<String>,
    },

    /// A telemetry update from a device.
    Update {
        /// The reporting device's identifier.
        device_id: String,
        /// The full payload, `deviceId` included. Existing clients expect
        /// the identifier to survive the merge, so it is kept in place.
        payload: Map<String, Value>,
    },

    /// A well-formed object the relay has no use for.
    Unroutable,
}

/// Classify a raw text frame.
///
/// # Errors
///
/// Returns an error if the text is oversized, not valid JSON, or not a
/// JSON object. Classification itself never fails: an object that matches
/// nothing is [`Inbound::Unroutable`].
pub fn classify(text: &str) -> Result<Inbound, WireError> {
    if text.len() > MAX_PAYLOAD_SIZE {
        return Err(WireError::PayloadTooLarge(text.len()));
    }

    let value: Value = serde_json::from_str(text)?;
    let Value::Object(map) = value else {
        return Err(WireError::NotAnObject);
    };

    match map.get(TYPE_FIELD).and_then(Value::as_str) {
        Some("heartbeat") => return Ok(Inbound::Heartbeat),
        Some("handshake") => {
            return Ok(Inbound::Handshake {
                device: map.get("device").and_then(Value::as_str).map(String::from),
            })
        }
        // Unknown types fall through to the deviceId check; some sensor
        // firmwares tag their updates with a free-form `type` field.
        _ => {}
    }

    match map.get(DEVICE_ID_FIELD).and_then(Value::as_str) {
        Some(id) => Ok(Inbound::Update {
            device_id: id.to_string(),
            payload: map,
        }),
        None => Ok(Inbound::Unroutable),
    }
}

/// The heartbeat control message sent by the per-connection pinger.
#[must_use]
pub fn heartbeat_json() -> String {
    r#"{"type":"heartbeat"}"#.to_string()
}
