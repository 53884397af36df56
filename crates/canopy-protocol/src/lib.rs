//! # canopy-protocol
//!
//! Wire payload definitions for the Canopy telemetry relay.
//!
//! Canopy speaks newline-free JSON text over WebSocket. Sensors and
//! dashboards were deployed long before this server, so the relay does not
//! impose a schema: any JSON object carrying a string `deviceId` is a
//! telemetry update, and a small set of `type`-tagged objects are control
//! messages. This crate turns a raw text frame into that classification.
//!
//! ## Example
//!
//! ```rust
//! use canopy_protocol::{classify, Inbound};
//!
//! let payload = r#"{"deviceId":"S1","temperature":22.5}"#;
//! match classify(payload).unwrap() {
//!     Inbound::Update { device_id, .. } => assert_eq!(device_id, "S1"),
//!     _ => unreachable!(),
//! }
//! ```

pub mod wire;

pub use wire::{classify, heartbeat_json, Inbound, WireError, MAX_PAYLOAD_SIZE};
