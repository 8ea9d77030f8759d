//! Hub endpoint: axum HTTP + WebSocket server.
//!
//! Every peer connecting on the WebSocket route gets its own
//! [`BusBridge`](crate::bridge::BusBridge) onto the hub's bus, so a capture
//! from one peer reaches every other peer and anything listening on the hub
//! (a hook router, say), and the resolving dispatch travels back the same
//! way.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use waylay_bus::bus::EventBus;

use crate::errors::Result;
use crate::health::{self, HealthResponse};
use crate::session::run_ws_session;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port, `0` for any free port.
    pub port: u16,
    /// WebSocket route.
    pub ws_path: String,
    /// Frames buffered per peer before new ones are dropped.
    pub outbound_capacity: usize,
    /// Interval between keep-alive pings.
    pub ping_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ws_path: "/ws".into(),
            outbound_capacity: 256,
            ping_interval: Duration::from_secs(30),
        }
    }
}

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The hub's bus.
    pub bus: EventBus,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Live peer count.
    pub connections: Arc<AtomicUsize>,
    /// Sequence for peer log labels.
    pub next_peer: Arc<AtomicU64>,
    /// When the server started.
    pub start_time: Instant,
    /// Cancelled on shutdown; ends every session.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Fresh state for `bus`.
    pub fn new(bus: &EventBus, config: ServerConfig) -> Self {
        Self {
            bus: bus.clone(),
            config: Arc::new(config),
            connections: Arc::new(AtomicUsize::new(0)),
            next_peer: Arc::new(AtomicU64::new(1)),
            start_time: Instant::now(),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Build the axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let ws_path = state.config.ws_path.clone();
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Bind and serve in the background.
pub async fn start(config: ServerConfig, bus: &EventBus) -> Result<ServerHandle> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(bus, config);
    let router = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, ws_path = %state.config.ws_path, bus = %bus.id().short(), "bridge server started");

    let token = state.shutdown.clone();
    let task = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(token.cancelled_owned())
            .await;
        if let Err(err) = result {
            error!(error = %err, "bridge server stopped with error");
        }
    });

    Ok(ServerHandle {
        addr: local_addr,
        state,
        task,
    })
}

/// Handle returned by [`start`]; the server runs until
/// [`shutdown`](ServerHandle::shutdown).
pub struct ServerHandle {
    addr: SocketAddr,
    state: AppState,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// URL peers connect to.
    pub fn ws_url(&self) -> String {
        format!("ws://{}{}", self.addr, self.state.config.ws_path)
    }

    /// Live peer count.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::Relaxed)
    }

    /// Token that stops the server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Stop accepting, end every session, and wait up to `timeout` for the
    /// server task.
    pub async fn shutdown(self, timeout: Duration) {
        self.state.shutdown.cancel();
        if tokio::time::timeout(timeout, self.task).await.is_err() {
            error!(?timeout, "bridge server did not stop in time");
        }
        info!("bridge server stopped");
    }
}

/// GET `<ws_path>`
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let peer = state.next_peer.fetch_add(1, Ordering::Relaxed);
    ws.on_upgrade(move |socket| run_ws_session(socket, peer, state))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.connections.load(Ordering::Relaxed),
        state.bus.id().as_str(),
    ))
}
