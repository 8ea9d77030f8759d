//! Per-peer WebSocket session on the server side.
//!
//! 1. Attaches a [`BusBridge`] to the hub's bus
//! 2. Publishes incoming text (or UTF-8 binary) frames through the bridge
//! 3. Forwards the bridge's outbound frames, with periodic Ping frames
//! 4. Disconnects peers that stay silent for two ping intervals
//! 5. Detaches the bridge on disconnect or server shutdown

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::bridge::BusBridge;
use crate::server::AppState;

/// Tracks whether a peer has shown signs of life since the last ping.
pub(crate) struct Liveness {
    alive: AtomicBool,
    last_seen: Mutex<Instant>,
}

impl Liveness {
    pub(crate) fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    /// Any frame from the peer counts.
    pub(crate) fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Read and reset the alive flag.
    pub(crate) fn check_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    pub(crate) fn silent_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Whether the peer should be dropped at this ping tick.
    pub(crate) fn is_unresponsive(&self, ping_interval: Duration) -> bool {
        !self.check_alive() && self.silent_for() > ping_interval * 2
    }
}

#[instrument(skip_all, fields(peer = peer))]
pub(crate) async fn run_ws_session(ws: WebSocket, peer: u64, state: AppState) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<String>(state.config.outbound_capacity);
    let bridge = BusBridge::attach(&state.bus, send_tx);
    let liveness = Arc::new(Liveness::new());

    let connected = state.connections.fetch_add(1, Ordering::Relaxed) + 1;
    info!(connections = connected, "peer connected");

    let ping_interval = state.config.ping_interval;
    let outbound_liveness = Arc::clone(&liveness);
    let mut outbound = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        // Skip the immediate first tick
        let _ = ping.tick().await;

        loop {
            tokio::select! {
                frame = send_rx.recv() => {
                    let Some(text) = frame else { break };
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if outbound_liveness.is_unresponsive(ping_interval) {
                        warn!(silent_for = ?outbound_liveness.silent_for(), "peer unresponsive, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::<u8>::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    let inbound = async {
        while let Some(Ok(msg)) = ws_rx.next().await {
            liveness.mark_alive();
            match msg {
                Message::Text(text) => {
                    let _ = bridge.handle_frame(text.as_str());
                }
                Message::Binary(data) => match std::str::from_utf8(&data) {
                    Ok(text) => {
                        let _ = bridge.handle_frame(text);
                    }
                    Err(_) => info!(len = data.len(), "ignoring non-UTF8 binary frame"),
                },
                Message::Close(_) => {
                    info!("peer sent close frame");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    };

    tokio::select! {
        () = inbound => {}
        _ = &mut outbound => {}
        () = state.shutdown.cancelled() => debug!("server shutting down"),
    }

    outbound.abort();
    bridge.detach();
    let remaining = state.connections.fetch_sub(1, Ordering::Relaxed) - 1;
    info!(
        connections = remaining,
        forwarded = bridge.forwarded_count(),
        dropped = bridge.drop_count(),
        "peer disconnected"
    );
}
