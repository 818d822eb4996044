//! WebSocket transport and upgrade handler.
//!
//! The upgrade handler wires a socket to a [`Client`]: a writer task
//! drains a bounded reply channel into the socket, and the reader pumps
//! inbound frames through [`Client::handle`]. The transport's `close`
//! carries the disconnect advice as the close-frame reason.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use surge_core::DisconnectAdvice;

use crate::client::Client;
use crate::node::Node;
use crate::transport::{Transport, TransportError};

/// Outbound reply buffer per connection; the client's own queue provides
/// the real backpressure, this only smooths socket writes.
const OUTBOUND_BUFFER: usize = 64;

/// Shared application state passed to axum handlers via `State` extraction.
#[derive(Clone)]
pub struct AppState {
    /// The process-wide pub/sub node serving every connection.
    pub node: Arc<dyn Node>,
}

/// Builds a router exposing the client WebSocket endpoint.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/connection/websocket", get(ws_upgrade_handler))
        .with_state(state)
}

/// Upgrades an HTTP connection and runs the client session on it.
pub async fn ws_upgrade_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_session(state.node, socket))
}

enum WsOutbound {
    Frame(Vec<u8>),
    Close(DisconnectAdvice),
}

/// Transport over one WebSocket, feeding the socket writer task.
struct WsTransport {
    tx: mpsc::Sender<WsOutbound>,
    closed: AtomicBool,
}

#[async_trait]
impl Transport for WsTransport {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        self.tx
            .try_send(WsOutbound::Frame(frame.to_vec()))
            .map_err(|err| match err {
                TrySendError::Full(_) => TransportError::BufferFull,
                TrySendError::Closed(_) => TransportError::Closed,
            })
    }

    async fn close(&self, advice: &DisconnectAdvice) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // The writer exits on the close marker; if the channel is already
        // gone the socket is being torn down anyway.
        let _ = self.tx.try_send(WsOutbound::Close(advice.clone()));
        Ok(())
    }
}

async fn client_session(node: Arc<dyn Node>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel(OUTBOUND_BUFFER);
    let transport = Arc::new(WsTransport {
        tx,
        closed: AtomicBool::new(false),
    });
    let client = Client::new(node, transport as Arc<dyn Transport>);

    let writer = tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            match item {
                WsOutbound::Frame(frame) => {
                    let Ok(text) = String::from_utf8(frame) else {
                        continue;
                    };
                    if sink.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                WsOutbound::Close(advice) => {
                    let reason = serde_json::to_string(&advice).unwrap_or_default();
                    let _ = sink
                        .send(WsMessage::Close(Some(CloseFrame {
                            code: close_code::NORMAL,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    while let Some(message) = stream.next().await {
        let Ok(message) = message else {
            break;
        };
        match message {
            WsMessage::Text(text) => {
                if client.handle(text.as_bytes()).await.is_err() {
                    break;
                }
            }
            WsMessage::Binary(data) => {
                if client.handle(&data).await.is_err() {
                    break;
                }
            }
            WsMessage::Close(_) => break,
            WsMessage::Ping(_) | WsMessage::Pong(_) => {}
        }
    }

    client.close(None).await;
    let _ = writer.await;
}
