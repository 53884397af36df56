//! # canopy-core
//!
//! Connection bookkeeping, device state, and fanout routing for the Canopy
//! telemetry relay.
//!
//! This crate provides the relay's moving parts:
//!
//! - **Registry** - tracks connected peers and their liveness state
//! - **StateStore** - last-known attribute set per device
//! - **Router** - merges inbound updates and rebroadcasts them
//! - **Liveness** - per-connection pinger and the global stale sweep
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Socket    │────▶│   Router    │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │ StateStore  │
//!                     └─────────────┘
//! ```
//!
//! The registry and store are constructed once at startup and shared by
//! `Arc`; handlers never block while holding a map entry.

pub mod liveness;
pub mod registry;
pub mod router;
pub mod store;

pub use liveness::{spawn_sweeper, Pinger};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionState, Registry};
pub use router::{RouteOutcome, Router};
pub use store::{DeviceRecord, StateStore};
