//! Connection registry for Canopy.
//!
//! The registry is pure bookkeeping over the set of currently connected
//! peers. Every broadcast walks it; the stale sweep prunes it.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Atomic counter for ensuring unique IDs even within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}", timestamp.wrapping_add(counter)))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Liveness state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl From<u8> for ConnectionState {
    fn from(value: u8) -> Self {
        match value {
            0 => ConnectionState::Open,
            1 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// A handle to a connected peer.
///
/// The handle carries the outbound message queue and a liveness flag shared
/// with the socket task. Sends are state-checked: a message handed to a
/// non-open handle is skipped, not an error.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    state: Arc<AtomicU8>,
    outbound: mpsc::UnboundedSender<String>,
}

impl ConnectionHandle {
    /// Create a handle in the `Open` state, returning the receiving half of
    /// its outbound queue for the socket writer.
    #[must_use]
    pub fn open(id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id,
            state: Arc::new(AtomicU8::new(ConnectionState::Open as u8)),
            outbound: tx,
        };
        (handle, rx)
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Get the current liveness state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::Acquire))
    }

    /// Check whether the connection is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Transition the liveness state.
    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Queue a text frame for delivery.
    ///
    /// Returns `true` if the frame was queued. A send to a non-open handle
    /// is silently skipped; a disconnected queue marks the handle closed so
    /// the next sweep removes it.
    pub fn send(&self, text: impl Into<String>) -> bool {
        if !self.is_open() {
            trace!(connection = %self.id, "Skipping send to non-open connection");
            return false;
        }
        if self.outbound.send(text.into()).is_err() {
            self.set_state(ConnectionState::Closed);
            return false;
        }
        true
    }
}

/// The set of currently connected peers.
#[derive(Debug, Default)]
pub struct Registry {
    connections: DashMap<ConnectionId, ConnectionHandle>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, making it visible to future broadcasts.
    pub fn add(&self, handle: ConnectionHandle) {
        debug!(connection = %handle.id(), "Connection registered");
        self.connections.insert(handle.id().clone(), handle);
    }

    /// Unregister a connection. Idempotent: removing an absent connection
    /// is a no-op.
    ///
    /// Returns `true` if the connection was present.
    pub fn remove(&self, id: &ConnectionId) -> bool {
        let removed = self.connections.remove(id).is_some();
        if removed {
            debug!(connection = %id, "Connection unregistered");
        }
        removed
    }

    /// Visit every registered connection, in unspecified order.
    pub fn for_each(&self, mut f: impl FnMut(&ConnectionHandle)) {
        for entry in self.connections.iter() {
            f(entry.value());
        }
    }

    /// Get the number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Remove every connection whose state is not `Open`.
    ///
    /// Returns the removed IDs. This is the backstop for transports that
    /// never deliver a close event.
    pub fn sweep(&self) -> Vec<ConnectionId> {
        let stale: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|e| !e.value().is_open())
            .map(|e| e.key().clone())
            .collect();

        for id in &stale {
            self.connections.remove(id);
            debug!(connection = %id, "Swept stale connection");
        }

        stale
    }
}
