//! WebSocket transport for the relay.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use crate::error::RelayError;
use crate::transport::{RelayConnector, RelayLink};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens Engine.IO WebSocket transports with `tokio-tungstenite`.
#[derive(Clone, Debug)]
pub struct WsConnector {
    buffer: usize,
}

impl WsConnector {
    /// `buffer` bounds both the outbound and inbound frame queues.
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
        }
    }
}

#[async_trait]
impl RelayConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<RelayLink, RelayError> {
        let endpoint = engine_url(url)?;
        debug!(endpoint = %endpoint, "opening relay websocket");
        let (ws, _) = connect_async(&endpoint)
            .await
            .map_err(|e| RelayError::Transport {
                reason: e.to_string(),
            })?;

        let (out_tx, out_rx) = mpsc::channel(self.buffer);
        let (in_tx, in_rx) = mpsc::channel(self.buffer);
        let _ = tokio::spawn(socket_loop(ws, out_rx, in_tx));
        Ok(RelayLink::new(out_tx, in_rx))
    }
}

/// Map a relay base URL to its Engine.IO WebSocket endpoint.
pub fn engine_url(url: &str) -> Result<String, RelayError> {
    let invalid = || RelayError::Transport {
        reason: format!("unsupported relay url: {url}"),
    };
    let (scheme, rest) = url.split_once("://").ok_or_else(invalid)?;
    let scheme = match scheme {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(invalid()),
    };
    let host = rest.trim_end_matches('/');
    if host.is_empty() {
        return Err(invalid());
    }
    Ok(format!("{scheme}://{host}/socket.io/?EIO=4&transport=websocket"))
}

/// Pumps frames between the socket and the link channels until either side
/// goes away.
async fn socket_loop(
    ws: WsStream,
    mut outbound: mpsc::Receiver<String>,
    inbound: mpsc::Sender<String>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        if inbound.send(text.as_str().to_owned()).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    let _ = ws_tx.close().await;
    debug!("relay websocket closed");
}
