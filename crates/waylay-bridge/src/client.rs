//! Connect a local bus to a hub.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use waylay_bus::bus::EventBus;

use crate::bridge::BusBridge;
use crate::errors::{BridgeError, Result};
use crate::session::Liveness;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Client tuning.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Frames buffered before new ones are dropped.
    pub outbound_capacity: usize,
    /// Interval between keep-alive pings.
    pub ping_interval: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            ping_interval: Duration::from_secs(30),
        }
    }
}

/// Connect `bus` to the hub at `url` with default options.
pub async fn connect(url: &str, bus: &EventBus) -> Result<ClientHandle> {
    connect_with(url, bus, ClientOptions::default()).await
}

/// Connect `bus` to the hub at `url`.
pub async fn connect_with(url: &str, bus: &EventBus, options: ClientOptions) -> Result<ClientHandle> {
    let (stream, _response) = connect_async(url)
        .await
        .map_err(|source| BridgeError::Connect {
            url: url.to_owned(),
            source: Box::new(source),
        })?;
    info!(url, bus = %bus.id().short(), "connected to hub");

    let (tx, rx) = mpsc::channel(options.outbound_capacity);
    let bridge = BusBridge::attach(bus, tx);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run_client_session(
        stream,
        bridge.clone(),
        rx,
        options.ping_interval,
        cancel.clone(),
    ));

    Ok(ClientHandle {
        bridge,
        cancel,
        task,
    })
}

/// A live connection. The session ends when the hub closes the socket or
/// [`close`](Self::close) is called.
pub struct ClientHandle {
    bridge: BusBridge,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ClientHandle {
    /// The bridge between the local bus and the hub.
    pub fn bridge(&self) -> &BusBridge {
        &self.bridge
    }

    /// Whether the session has ended.
    pub fn is_closed(&self) -> bool {
        self.task.is_finished()
    }

    /// Send a close frame and wait for the session to end.
    pub async fn close(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }

    /// Wait for the hub to end the session.
    pub async fn closed(self) {
        let _ = self.task.await;
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("bridge", &self.bridge)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn run_client_session(
    stream: WsStream,
    bridge: BusBridge,
    mut outbound_rx: mpsc::Receiver<String>,
    ping_interval: Duration,
    cancel: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = stream.split();
    let liveness = Arc::new(Liveness::new());

    let outbound_liveness = Arc::clone(&liveness);
    let outbound_cancel = cancel.clone();
    let mut outbound = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        // Skip the immediate first tick
        let _ = ping.tick().await;

        loop {
            tokio::select! {
                frame = outbound_rx.recv() => {
                    let Some(text) = frame else { break };
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if outbound_liveness.is_unresponsive(ping_interval) {
                        warn!(silent_for = ?outbound_liveness.silent_for(), "hub unresponsive, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::<u8>::new().into())).await.is_err() {
                        break;
                    }
                }
                () = outbound_cancel.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
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
                    info!("hub sent close frame");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    };

    tokio::select! {
        () = inbound => {}
        _ = &mut outbound => {}
    }

    outbound.abort();
    bridge.detach();
    debug!(
        forwarded = bridge.forwarded_count(),
        dropped = bridge.drop_count(),
        "hub session ended"
    );
}
