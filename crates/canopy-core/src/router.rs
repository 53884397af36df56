//! Message routing for Canopy.
//!
//! The router turns one inbound text frame into a state mutation plus a
//! fanout: merge into the store, then rebroadcast the original raw payload
//! to every open connection. The sender is not excluded; dashboards rely
//! on seeing their own test updates echoed back.

use crate::registry::Registry;
use crate::store::StateStore;
use canopy_protocol::{classify, Inbound};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// What the router did with an inbound payload.
///
/// None of these are errors: a malformed payload is logged and dropped
/// while the connection stays open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A telemetry update was merged and rebroadcast.
    Broadcast {
        /// The reporting device.
        device_id: String,
        /// Number of connections the raw payload was queued to.
        recipients: usize,
    },
    /// A control message (heartbeat or handshake) was consumed.
    Ignored,
    /// A well-formed payload with nothing to route; no storage, no fanout.
    Dropped,
    /// The payload failed classification; no storage, no fanout.
    Malformed,
}

/// The central message router.
///
/// Holds the registry and store by `Arc`; both are constructed once at
/// startup and injected here rather than living as ambient globals.
pub struct Router {
    registry: Arc<Registry>,
    store: Arc<StateStore>,
}

impl Router {
    /// Create a router over the given registry and store.
    #[must_use]
    pub fn new(registry: Arc<Registry>, store: Arc<StateStore>) -> Self {
        Self { registry, store }
    }

    /// Route one inbound text frame.
    pub fn route(&self, raw: &str) -> RouteOutcome {
        let inbound = match classify(raw) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, "Discarding malformed payload");
                return RouteOutcome::Malformed;
            }
        };

        match inbound {
            Inbound::Heartbeat => {
                trace!("Heartbeat echo consumed");
                RouteOutcome::Ignored
            }
            Inbound::Handshake { device } => {
                debug!(device = ?device, "Handshake received");
                RouteOutcome::Ignored
            }
            Inbound::Update { device_id, payload } => {
                self.store.merge(&device_id, payload);
                let recipients = self.broadcast(raw);
                trace!(device = %device_id, recipients, "Update rebroadcast");
                RouteOutcome::Broadcast {
                    device_id,
                    recipients,
                }
            }
            Inbound::Unroutable => {
                debug!("Dropping payload with no deviceId");
                RouteOutcome::Dropped
            }
        }
    }

    /// Queue the raw payload to every open connection.
    ///
    /// Returns the number of connections it was queued to. Non-open
    /// handles are skipped silently.
    fn broadcast(&self, raw: &str) -> usize {
        let mut recipients = 0;
        self.registry.for_each(|handle| {
            if handle.send(raw) {
                recipients += 1;
            }
        });
        recipients
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConnectionHandle, ConnectionId, ConnectionState};
    use serde_json::json;

    fn router() -> (Router, Arc<Registry>, Arc<StateStore>) {
        let registry = Arc::new(Registry::new());
        let store = Arc::new(StateStore::new());
        let router = Router::new(Arc::clone(&registry), Arc::clone(&store));
        (router, registry, store)
    }

    #[test]
    fn test_update_merged_and_broadcast_to_all() {
        let (router, registry, store) = router();
        let (sender_conn, mut rx_a) = ConnectionHandle::open(ConnectionId::from("conn-a"));
        let (viewer_conn, mut rx_b) = ConnectionHandle::open(ConnectionId::from("conn-b"));
        registry.add(sender_conn);
        registry.add(viewer_conn);

        let raw = r#"{"deviceId":"S2","soilMoisture":40}"#;
        let outcome = router.route(raw);

        assert_eq!(
            outcome,
            RouteOutcome::Broadcast {
                device_id: "S2".to_string(),
                recipients: 2
            }
        );
        // Both peers receive the raw payload verbatim, sender included
        assert_eq!(rx_a.try_recv().unwrap(), raw);
        assert_eq!(rx_b.try_recv().unwrap(), raw);

        let record = store.get("S2").unwrap();
        assert_eq!(record.attributes.get("soilMoisture"), Some(&json!(40)));
    }

    #[test]
    fn test_sequential_updates_overlay() {
        let (router, _registry, store) = router();

        router.route(r#"{"deviceId":"S1","temperature":22.5}"#);
        router.route(r#"{"deviceId":"S1","humidity":60}"#);

        let record = store.get("S1").unwrap();
        assert_eq!(record.attributes.get("temperature"), Some(&json!(22.5)));
        assert_eq!(record.attributes.get("humidity"), Some(&json!(60)));
    }

    #[test]
    fn test_heartbeat_never_stored_nor_broadcast() {
        let (router, registry, store) = router();
        let (conn, mut rx) = ConnectionHandle::open(ConnectionId::from("conn-a"));
        registry.add(conn);

        let outcome = router.route(r#"{"type":"heartbeat"}"#);

        assert_eq!(outcome, RouteOutcome::Ignored);
        assert!(rx.try_recv().is_err());
        assert_eq!(store.device_count(), 0);
    }

    #[test]
    fn test_malformed_payload_dropped_quietly() {
        let (router, registry, store) = router();
        let (conn, mut rx) = ConnectionHandle::open(ConnectionId::from("conn-a"));
        registry.add(conn);

        let outcome = router.route("{not json");

        assert_eq!(outcome, RouteOutcome::Malformed);
        assert!(rx.try_recv().is_err());
        assert_eq!(store.device_count(), 0);
    }

    #[test]
    fn test_payload_without_device_id_dropped() {
        let (router, registry, store) = router();
        let (conn, mut rx) = ConnectionHandle::open(ConnectionId::from("conn-a"));
        registry.add(conn);

        assert_eq!(router.route(r#"{"hello":"world"}"#), RouteOutcome::Dropped);
        assert!(rx.try_recv().is_err());
        assert_eq!(store.device_count(), 0);
    }

    #[test]
    fn test_broadcast_skips_non_open_connections() {
        let (router, registry, _store) = router();
        let (open_conn, mut rx_open) = ConnectionHandle::open(ConnectionId::from("conn-open"));
        let (dead_conn, mut rx_dead) = ConnectionHandle::open(ConnectionId::from("conn-dead"));
        dead_conn.set_state(ConnectionState::Closed);
        registry.add(open_conn);
        registry.add(dead_conn);

        let outcome = router.route(r#"{"deviceId":"S1","temperature":21}"#);

        assert!(matches!(outcome, RouteOutcome::Broadcast { recipients: 1, .. }));
        assert!(rx_open.try_recv().is_ok());
        assert!(rx_dead.try_recv().is_err());
    }
}
