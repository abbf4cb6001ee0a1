//! Scripted in-memory relay for tests.
//!
//! [`FakeRelay`] implements [`RelayConnector`]. Each `connect` call consumes
//! the next scripted [`Outcome`] (falling back to a default) and, when a link
//! is produced, hands the server half to the test via
//! [`FakeRelay::next_server`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::RelayError;
use crate::packet::{OpenPayload, Packet};
use crate::transport::{RelayConnector, RelayLink};

const LINK_BUFFER: usize = 64;

/// What the fake does on one `connect` call.
#[derive(Clone, Debug)]
pub enum Outcome {
    /// Complete the handshake.
    Accept,
    /// Fail to open the transport.
    Refuse(String),
    /// Open, then answer the namespace connect with `44{payload}`.
    Reject(Value),
    /// Open the transport but never speak.
    Silent,
}

/// In-memory relay server.
pub struct FakeRelay {
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    calls: Mutex<Vec<Instant>>,
    accepted_tx: mpsc::UnboundedSender<ServerSide>,
    accepted_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ServerSide>>,
}

impl FakeRelay {
    /// Runs `script` in order, then `fallback` forever.
    pub fn scripted(script: impl IntoIterator<Item = Outcome>, fallback: Outcome) -> Arc<Self> {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            calls: Mutex::new(Vec::new()),
            accepted_tx,
            accepted_rx: tokio::sync::Mutex::new(accepted_rx),
        })
    }

    /// Accepts every connection.
    pub fn accepting() -> Arc<Self> {
        Self::scripted([], Outcome::Accept)
    }

    /// Refuses every connection.
    pub fn refusing() -> Arc<Self> {
        Self::scripted([], Outcome::Refuse("connection refused".into()))
    }

    /// Number of `connect` calls so far.
    pub fn connect_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Time between consecutive `connect` calls.
    pub fn connect_gaps(&self) -> Vec<Duration> {
        self.calls
            .lock()
            .windows(2)
            .map(|pair| pair[1].duration_since(pair[0]))
            .collect()
    }

    /// Server half of the next link produced, in connect order.
    pub async fn next_server(&self) -> ServerSide {
        self.accepted_rx
            .lock()
            .await
            .recv()
            .await
            .expect("fake relay dropped")
    }

    fn open_frame() -> String {
        Packet::Open(OpenPayload {
            sid: "fake-engine".into(),
            upgrades: vec![],
            ping_interval: 25_000,
            ping_timeout: 20_000,
            max_payload: Some(1_000_000),
        })
        .encode()
    }
}

#[async_trait]
impl RelayConnector for FakeRelay {
    async fn connect(&self, _url: &str) -> Result<RelayLink, RelayError> {
        self.calls.lock().push(Instant::now());
        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let preamble = match outcome {
            Outcome::Refuse(reason) => return Err(RelayError::Transport { reason }),
            Outcome::Accept => vec![
                Self::open_frame(),
                Packet::Connect(Some(json!({"sid": "fake-socket"}))).encode(),
            ],
            Outcome::Reject(payload) => {
                vec![Self::open_frame(), Packet::ConnectError(payload).encode()]
            }
            Outcome::Silent => vec![],
        };

        let (to_client, client_rx) = mpsc::channel(LINK_BUFFER);
        let (client_tx, from_client) = mpsc::channel(LINK_BUFFER);
        for frame in preamble {
            let _ = to_client.try_send(frame);
        }
        let _ = self.accepted_tx.send(ServerSide {
            to_client,
            from_client,
        });
        Ok(RelayLink::new(client_tx, client_rx))
    }
}

/// The server end of one fake link. Dropping it closes the transport.
pub struct ServerSide {
    to_client: mpsc::Sender<String>,
    from_client: mpsc::Receiver<String>,
}

impl ServerSide {
    /// Push a raw frame to the client.
    pub async fn send_raw(&self, frame: &str) {
        let _ = self.to_client.send(frame.to_owned()).await;
    }

    /// Push a `42` event to the client.
    pub async fn emit(&self, name: &str, data: Value) {
        let _ = self
            .to_client
            .send(Packet::event(name, data).encode())
            .await;
    }

    /// Next raw frame from the client; `None` once the client side is gone.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next frame already sent by the client, without waiting.
    pub fn try_next_frame(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    /// Next event from the client, skipping control frames.
    pub async fn next_event(&mut self) -> Option<(String, Value)> {
        while let Some(frame) = self.next_frame().await {
            if let Ok(Packet::Event { name, data }) = Packet::decode(&frame) {
                return Some((name, data));
            }
        }
        None
    }

    /// Close the transport.
    pub fn close(self) {}
}
