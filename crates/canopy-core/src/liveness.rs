//! Liveness monitoring for Canopy.
//!
//! Two independent timers keep the registry honest: a per-connection pinger
//! that sends heartbeat control messages while the connection is open, and
//! a single global sweep that removes connections whose state is no longer
//! `Open`. The sweep is the backstop for failure modes where the transport
//! never delivers a close event (silently dropped network paths).

use crate::registry::{ConnectionHandle, Registry};
use canopy_protocol::heartbeat_json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// A per-connection heartbeat pinger.
///
/// The timer task is aborted when the guard is dropped, so tying the guard
/// to the connection task's scope guarantees cancellation exactly once. A
/// leaked timer per stale connection would be a resource leak.
#[derive(Debug)]
pub struct Pinger {
    task: JoinHandle<()>,
}

impl Pinger {
    /// Spawn a repeating heartbeat timer for the given connection.
    ///
    /// Sends `{"type":"heartbeat"}` every `interval` while the connection
    /// is open; sends to a non-open handle are skipped by the handle.
    #[must_use]
    pub fn spawn(handle: ConnectionHandle, interval: Duration) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; a heartbeat on connect
            // would race the snapshot replay.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                trace!(connection = %handle.id(), "Sending heartbeat");
                handle.send(heartbeat_json());
            }
        });
        Self { task }
    }
}

impl Drop for Pinger {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn the global stale-connection sweep.
///
/// Every `interval`, removes registry entries whose state is not `Open`.
/// Runs for the life of the process.
pub fn spawn_sweeper(registry: Arc<Registry>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let swept = registry.sweep();
            if swept.is_empty() {
                trace!(connections = registry.len(), "Sweep found nothing stale");
            } else {
                info!(
                    swept = swept.len(),
                    connections = registry.len(),
                    "Swept stale connections"
                );
            }
            debug!(connections = registry.len(), "Sweep complete");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConnectionId, ConnectionState};
    use canopy_protocol::{classify, Inbound};

    #[tokio::test(start_paused = true)]
    async fn test_pinger_sends_heartbeats_on_interval() {
        let (handle, mut rx) = ConnectionHandle::open(ConnectionId::from("conn-1"));
        let _pinger = Pinger::spawn(handle, Duration::from_secs(15));

        // Nothing before the first interval elapses
        tokio::time::sleep(Duration::from_secs(14)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let frame = rx.try_recv().unwrap();
        assert_eq!(classify(&frame).unwrap(), Inbound::Heartbeat);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pinger_canceled_on_drop() {
        let (handle, mut rx) = ConnectionHandle::open(ConnectionId::from("conn-1"));
        let pinger = Pinger::spawn(handle, Duration::from_secs(15));

        drop(pinger);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pinger_skips_non_open_connection() {
        let (handle, mut rx) = ConnectionHandle::open(ConnectionId::from("conn-1"));
        handle.set_state(ConnectionState::Closing);
        let _pinger = Pinger::spawn(handle, Duration::from_secs(15));

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_stale_within_one_interval() {
        let registry = Arc::new(Registry::new());
        let (open, _rx1) = ConnectionHandle::open(ConnectionId::from("conn-open"));
        let (dead, _rx2) = ConnectionHandle::open(ConnectionId::from("conn-dead"));
        registry.add(open);
        registry.add(dead.clone());

        let sweeper = spawn_sweeper(Arc::clone(&registry), Duration::from_secs(30));

        // Connection dies without an explicit close event
        dead.set_state(ConnectionState::Closed);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(registry.len(), 1);

        sweeper.abort();
    }
}
