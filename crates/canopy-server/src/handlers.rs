//! Connection handlers for the Canopy relay.
//!
//! This module handles the connection lifecycle and message processing.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use canopy_core::{
    spawn_sweeper, ConnectionHandle, ConnectionId, ConnectionState, Pinger, Registry,
    RouteOutcome, Router as RelayRouter, StateStore,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, error, info, warn};

/// Shared server state.
///
/// The registry and store are constructed exactly once here and injected
/// into the router and the connection handlers; their lifetime is the
/// process lifetime.
pub struct AppState {
    /// The set of connected peers.
    pub registry: Arc<Registry>,
    /// Last-known state per device.
    pub store: Arc<StateStore>,
    /// Merge-and-fanout routing.
    pub router: RelayRouter,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(Registry::new());
        let store = Arc::new(StateStore::new());
        let router = RelayRouter::new(Arc::clone(&registry), Arc::clone(&store));

        Self {
            registry,
            store,
            router,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the listen socket fails to bind.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Global stale-connection sweep, one per process
    spawn_sweeper(Arc::clone(&state.registry), config.sweep_interval());

    // Build router
    let mut app = Router::new()
        .route(&config.ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    if config.static_assets.enabled {
        app = app.fallback_service(ServeDir::new(&config.static_assets.dir));
        info!("Serving dashboard from {}", config.static_assets.dir);
    }

    let app = app.layer(TraceLayer::new_for_http());

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind listen socket on {}", addr))?;

    info!("Canopy relay listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, config.ws_path);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.registry.len(),
        "devices": state.store.device_count(),
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let max_message_size = state.config.limits.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection from open to close.
///
/// On open: register, replay the current device snapshot, start the pinger.
/// While open: forward outbound frames, route inbound ones. On close or
/// transport error: mark closed, cancel the pinger, unregister.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = ConnectionId::generate();
    let (handle, mut outbound_rx) = ConnectionHandle::open(connection_id.clone());

    debug!(connection = %connection_id, "WebSocket connected");

    state.registry.add(handle.clone());

    // Replay current state to the new peer only: exactly one snapshot
    // message per tracked device.
    for (device_id, record) in state.store.snapshot() {
        handle.send(record.to_wire(&device_id));
    }

    let pinger = Pinger::spawn(handle.clone(), state.config.ping_interval());

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            // Outbound: broadcasts, snapshot replay, and heartbeats
            Some(text) = outbound_rx.recv() => {
                metrics::record_message(text.len(), "outbound");
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }

            // Inbound from the peer
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        metrics::record_message(text.len(), "inbound");
                        route_inbound(&state, &text);
                    }
                    Some(Ok(Message::Binary(data))) => {
                        // Some sensor firmwares send JSON as binary frames
                        metrics::record_message(data.len(), "inbound");
                        match String::from_utf8(data) {
                            Ok(text) => route_inbound(&state, &text),
                            Err(_) => {
                                warn!(connection = %connection_id, "Discarding non-UTF-8 binary frame");
                                metrics::record_drop("malformed");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup: mark closed, cancel the pinger, unregister. Removal is
    // idempotent with the sweep.
    handle.set_state(ConnectionState::Closed);
    drop(pinger);
    state.registry.remove(&connection_id);

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Route one inbound text frame and record what became of it.
fn route_inbound(state: &Arc<AppState>, text: &str) {
    match state.router.route(text) {
        RouteOutcome::Broadcast {
            device_id,
            recipients,
        } => {
            debug!(device = %device_id, recipients, "Update rebroadcast");
            metrics::record_broadcast(recipients);
            metrics::set_devices_tracked(state.store.device_count());
        }
        RouteOutcome::Ignored => {}
        RouteOutcome::Dropped => metrics::record_drop("unroutable"),
        RouteOutcome::Malformed => metrics::record_drop("malformed"),
    }
}
