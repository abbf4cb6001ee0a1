//! The relay connection.
//!
//! One [`RelayConnection`] per process, shared as `Arc<RelayConnection>`.
//! A background task owns the transport; callers only ever touch the shared
//! state under a short `parking_lot` lock. Every task run carries a
//! generation number so a task that was cancelled or replaced can never
//! overwrite the state of its successor.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use duplex_core::BridgeError;
use duplex_core::retry::ReconnectConfig;
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::names::{self, CONNECT, CONNECT_ERROR, DISCONNECT, RECONNECT_ATTEMPT};
use crate::packet::{OpenPayload, Packet};
use crate::transport::{RelayConnector, RelayLink};

/// Default transport + handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

/// Relay connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// `connect` has never been called.
    #[default]
    Uninitialized,
    /// Not connected and not trying.
    Disconnected,
    /// Opening a transport or waiting to retry.
    Connecting,
    /// Handshake complete; `emit` delivers.
    Connected,
}

impl ConnectionState {
    /// Wire/log name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }

    /// Whether a connection task is running.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an established connection ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// `disconnect()` was called.
    ClientDisconnect,
    /// The server sent a namespace disconnect.
    ServerDisconnect,
    /// The transport closed underneath us.
    TransportClose,
    /// No server ping within the liveness window.
    PingTimeout,
}

impl CloseReason {
    /// Reason string passed to `disconnect` handlers.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientDisconnect => "io client disconnect",
            Self::ServerDisconnect => "io server disconnect",
            Self::TransportClose => "transport close",
            Self::PingTimeout => "ping timeout",
        }
    }

    /// Whether the bounded reconnect cycle should start.
    pub fn should_reconnect(self) -> bool {
        matches!(self, Self::TransportClose | Self::PingTimeout)
    }
}

/// Connection parameters.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Relay base URL (`http(s)://host:port`).
    pub url: String,
    /// Automatic retry policy.
    pub reconnect: ReconnectConfig,
    /// Transport + handshake timeout per attempt.
    pub connect_timeout: Duration,
}

impl RelayConfig {
    /// Config with default retry policy and timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Why an outbound event did not reach the transport.
#[derive(Debug)]
enum Dropped {
    Reserved,
    NotConnected(ConnectionState),
    QueueFull,
    TransportClosed,
}

impl fmt::Display for Dropped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reserved => f.write_str("reserved event name"),
            Self::NotConnected(state) => write!(f, "relay not connected ({state})"),
            Self::QueueFull => f.write_str("relay outbound queue full"),
            Self::TransportClosed => f.write_str("relay transport closed"),
        }
    }
}

struct Inner {
    state: ConnectionState,
    retry_count: u32,
    generation: u64,
    outbound: Option<mpsc::Sender<String>>,
    cancel: Option<CancellationToken>,
}

// ─────────────────────────────────────────────────────────────────────────────
// RelayConnection
// ─────────────────────────────────────────────────────────────────────────────

/// Deduplicated, reconnecting connection to the backend relay.
pub struct RelayConnection {
    config: RelayConfig,
    connector: Arc<dyn RelayConnector>,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl RelayConnection {
    /// Create an unconnected relay.
    pub fn new(config: RelayConfig, connector: Arc<dyn RelayConnector>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Uninitialized);
        Arc::new(Self {
            config,
            connector,
            inner: Mutex::new(Inner {
                state: ConnectionState::Uninitialized,
                retry_count: 0,
                generation: 0,
                outbound: None,
                cancel: None,
            }),
            state_tx,
            handlers: RwLock::new(HashMap::new()),
        })
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Retries made in the current cycle.
    pub fn retry_count(&self) -> u32 {
        self.inner.lock().retry_count
    }

    /// Subscribe to state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Relay base URL.
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Start connecting. Returns `false` without side effects if a
    /// connection is already established or in progress.
    pub fn connect(self: &Arc<Self>) -> bool {
        let (generation, cancel) = {
            let mut inner = self.inner.lock();
            if inner.state.is_live() {
                info!(state = %inner.state, "relay already connected or connecting, skipping");
                return false;
            }
            inner.generation += 1;
            inner.retry_count = 0;
            let cancel = CancellationToken::new();
            inner.cancel = Some(cancel.clone());
            self.set_state(&mut inner, ConnectionState::Connecting);
            (inner.generation, cancel)
        };

        info!(url = %self.config.url, "connecting to relay");
        let _ = tokio::spawn(Arc::clone(self).run(generation, cancel));
        true
    }

    /// Stop the connection task and settle to `disconnected`. The task sends
    /// the Socket.IO disconnect packet if it was connected. No-op when
    /// nothing is running.
    pub fn disconnect(&self) {
        let cancel = {
            let mut inner = self.inner.lock();
            if !inner.state.is_live() {
                debug!(state = %inner.state, "relay not connected, nothing to disconnect");
                return;
            }
            // Detach the running task from the shared state.
            inner.generation += 1;
            inner.retry_count = 0;
            inner.outbound = None;
            self.set_state(&mut inner, ConnectionState::Disconnected);
            inner.cancel.take()
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        info!("relay disconnect requested");
    }

    /// Send `name` with `payload` if connected.
    ///
    /// Events are never queued for later and never retried.
    pub fn try_emit(&self, name: &str, payload: Value) -> Result<(), BridgeError> {
        self.deliver(name, payload)
            .map_err(|dropped| BridgeError::RelayUnavailable {
                reason: dropped.to_string(),
            })
    }

    /// Fire-and-forget [`try_emit`](Self::try_emit). Failures are logged at
    /// `warn`; returns whether the frame was handed to the transport.
    pub fn emit(&self, name: &str, payload: Value) -> bool {
        match self.deliver(name, payload) {
            Ok(()) => {
                debug!(event = name, "relay event emitted");
                true
            }
            Err(dropped) => {
                warn!(event = name, "{dropped}, dropping event");
                false
            }
        }
    }

    fn deliver(&self, name: &str, payload: Value) -> Result<(), Dropped> {
        if names::is_lifecycle(name) {
            return Err(Dropped::Reserved);
        }
        let outbound = {
            let inner = self.inner.lock();
            match (&inner.outbound, inner.state) {
                (Some(outbound), ConnectionState::Connected) => outbound.clone(),
                (_, state) => return Err(Dropped::NotConnected(state)),
            }
        };

        outbound
            .try_send(Packet::event(name, payload).encode())
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => Dropped::QueueFull,
                mpsc::error::TrySendError::Closed(_) => Dropped::TransportClosed,
            })
    }

    /// Register a handler for `name`. Handlers run synchronously on the
    /// connection task, in registration order.
    pub fn on<F>(&self, name: &str, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(name.to_owned())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Number of handlers registered for `name`.
    pub fn handler_count(&self, name: &str) -> usize {
        self.handlers.read().get(name).map_or(0, Vec::len)
    }

    fn dispatch(&self, name: &str, payload: &Value) {
        // Clone out so handlers may register further handlers.
        let handlers = self.handlers.read().get(name).cloned().unwrap_or_default();
        if handlers.is_empty() {
            debug!(event = name, "no handler for relay event");
            return;
        }
        for handler in &handlers {
            handler(payload);
        }
    }

    fn set_state(&self, inner: &mut Inner, state: ConnectionState) {
        if inner.state != state {
            debug!(from = %inner.state, to = %state, "relay state change");
        }
        inner.state = state;
        let _ = self.state_tx.send_replace(state);
    }

    // ── connection task ─────────────────────────────────────────────────────

    async fn run(self: Arc<Self>, generation: u64, cancel: CancellationToken) {
        let mut attempts: u32 = 0;

        loop {
            let opened = tokio::select! {
                () = cancel.cancelled() => break,
                opened = self.open() => opened,
            };

            match opened {
                Ok((link, open)) => {
                    attempts = 0;
                    let reason = self.serve(generation, link, &open, &cancel).await;
                    if !reason.should_reconnect() {
                        break;
                    }
                }
                Err(err) => {
                    let message = err.to_string();
                    let err = BridgeError::from(err);
                    warn!(code = err.code(), attempt = attempts, error = %message, "relay connect failed");
                    self.dispatch(CONNECT_ERROR, &json!({ "message": message }));
                }
            }

            let Some(next) = self.config.reconnect.next_attempt(attempts) else {
                warn!(attempts, "relay reconnect attempts exhausted");
                break;
            };
            attempts = next;
            {
                let mut inner = self.inner.lock();
                if inner.generation != generation {
                    break;
                }
                inner.retry_count = next;
                self.set_state(&mut inner, ConnectionState::Connecting);
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.reconnect.delay()) => {}
            }
            info!(attempt = next, "relay reconnect attempt");
            self.dispatch(RECONNECT_ATTEMPT, &json!(next));
        }

        self.settle(generation);
    }

    /// Open a transport and complete the handshake within the timeout.
    async fn open(&self) -> Result<(RelayLink, OpenPayload), RelayError> {
        let attempt = async {
            let mut link = self.connector.connect(&self.config.url).await?;
            let open = handshake(&mut link).await?;
            Ok::<_, RelayError>((link, open))
        };
        timeout(self.config.connect_timeout, attempt)
            .await
            .map_err(|_| RelayError::Timeout {
                timeout_ms: u64::try_from(self.config.connect_timeout.as_millis())
                    .unwrap_or(u64::MAX),
            })?
    }

    async fn serve(
        &self,
        generation: u64,
        mut link: RelayLink,
        open: &OpenPayload,
        cancel: &CancellationToken,
    ) -> CloseReason {
        {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return CloseReason::ClientDisconnect;
            }
            inner.retry_count = 0;
            inner.outbound = Some(link.sender());
            self.set_state(&mut inner, ConnectionState::Connected);
        }
        info!(sid = %open.sid, url = %self.config.url, "connected to relay");
        self.dispatch(CONNECT, &Value::Null);

        let window = open.liveness_window();
        let liveness = tokio::time::sleep(window);
        tokio::pin!(liveness);

        let reason = loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = link.try_send(Packet::Disconnect.encode());
                    break CloseReason::ClientDisconnect;
                }
                () = &mut liveness => break CloseReason::PingTimeout,
                frame = link.recv() => {
                    let Ok(frame) = frame else { break CloseReason::TransportClose };
                    match Packet::decode(&frame) {
                        Ok(Packet::Ping) => {
                            liveness.as_mut().reset(Instant::now() + window);
                            // Never block here: the socket task may itself be
                            // waiting on us to drain inbound frames.
                            if let Err(err) = link.try_send(Packet::Pong.encode()) {
                                warn!(error = %err, "failed to answer relay ping");
                                break CloseReason::TransportClose;
                            }
                        }
                        Ok(Packet::Event { name, data }) => self.dispatch(&name, &data),
                        Ok(Packet::Disconnect) => break CloseReason::ServerDisconnect,
                        Ok(Packet::Close) => break CloseReason::TransportClose,
                        Ok(other) => debug!(packet = ?other, "ignoring relay packet"),
                        Err(err) => warn!(error = %err, "malformed relay frame"),
                    }
                }
            }
        };

        {
            let mut inner = self.inner.lock();
            if inner.generation == generation {
                inner.outbound = None;
                let next = if reason.should_reconnect() {
                    ConnectionState::Connecting
                } else {
                    ConnectionState::Disconnected
                };
                self.set_state(&mut inner, next);
            }
        }
        info!(reason = reason.as_str(), "disconnected from relay");
        self.dispatch(DISCONNECT, &json!(reason.as_str()));
        reason
    }

    fn settle(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation == generation {
            inner.outbound = None;
            inner.cancel = None;
            self.set_state(&mut inner, ConnectionState::Disconnected);
        }
    }
}

impl fmt::Debug for RelayConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConnection")
            .field("url", &self.config.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Engine.IO open, then Socket.IO namespace connect.
async fn handshake(link: &mut RelayLink) -> Result<OpenPayload, RelayError> {
    let open = match Packet::decode(&link.recv().await?)? {
        Packet::Open(open) => open,
        other => {
            return Err(RelayError::Handshake {
                reason: format!("expected open packet, got {other:?}"),
            });
        }
    };
    link.send(Packet::Connect(None).encode()).await?;

    loop {
        match Packet::decode(&link.recv().await?)? {
            Packet::Connect(_) => return Ok(open),
            Packet::ConnectError(data) => {
                return Err(RelayError::Rejected {
                    reason: data
                        .get("message")
                        .and_then(Value::as_str)
                        .map_or_else(|| data.to_string(), str::to_owned),
                });
            }
            Packet::Ping => link.send(Packet::Pong.encode()).await?,
            Packet::Close => return Err(RelayError::Closed),
            other => debug!(packet = ?other, "ignoring packet during handshake"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::{OPEN_AI_WEBRTC, SERVER_RESPONSE};
    use crate::testing::{FakeRelay, Outcome};
    use assert_matches::assert_matches;
    use duplex_core::logging::capture_logs;
    use tracing::Level;

    fn relay_with(fake: &Arc<FakeRelay>) -> Arc<RelayConnection> {
        let mut config = RelayConfig::new("http://relay.test");
        config.connect_timeout = Duration::from_secs(20);
        RelayConnection::new(config, Arc::clone(fake) as Arc<dyn RelayConnector>)
    }

    async fn wait_for(relay: &RelayConnection, state: ConnectionState) {
        let mut rx = relay.watch_state();
        let _ = rx.wait_for(|s| *s == state).await.unwrap();
    }

    fn record(relay: &RelayConnection, name: &str) -> Arc<Mutex<Vec<Value>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        relay.on(name, move |payload| sink.lock().push(payload.clone()));
        seen
    }

    #[test]
    fn state_names() {
        assert_eq!(ConnectionState::default(), ConnectionState::Uninitialized);
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert!(ConnectionState::Connected.is_live());
        assert!(!ConnectionState::Disconnected.is_live());
        assert!(CloseReason::PingTimeout.should_reconnect());
        assert!(!CloseReason::ServerDisconnect.should_reconnect());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_idempotent() {
        let fake = FakeRelay::accepting();
        let relay = relay_with(&fake);

        assert!(relay.connect());
        assert!(!relay.connect());
        wait_for(&relay, ConnectionState::Connected).await;
        assert!(!relay.connect());

        assert_eq!(fake.connect_count(), 1);
        assert_eq!(relay.retry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn emit_while_not_connected_is_dropped() {
        let fake = FakeRelay::accepting();
        let relay = relay_with(&fake);
        let (logs, _guard) = capture_logs();

        assert!(!relay.emit(OPEN_AI_WEBRTC, json!({"type": "x"})));
        assert_eq!(relay.state(), ConnectionState::Uninitialized);
        assert_eq!(fake.connect_count(), 0);
        assert!(logs.has_event(
            Level::WARN,
            "relay not connected (uninitialized), dropping event"
        ));
        assert_matches!(
            relay.try_emit(OPEN_AI_WEBRTC, Value::Null),
            Err(BridgeError::RelayUnavailable { .. })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn emit_while_connecting_is_not_queued() {
        let fake = FakeRelay::scripted([Outcome::Silent], Outcome::Accept);
        let relay = relay_with(&fake);

        assert!(relay.connect());
        tokio::task::yield_now().await;
        assert_eq!(relay.state(), ConnectionState::Connecting);
        assert!(!relay.emit(OPEN_AI_WEBRTC, json!({"n": 1})));

        // The attempt times out without the dropped event reaching the wire.
        let mut silent = fake.next_server().await;
        assert_eq!(silent.next_frame().await, None);

        let mut server = fake.next_server().await;
        wait_for(&relay, ConnectionState::Connected).await;
        assert_eq!(server.next_frame().await.as_deref(), Some("40"));
        assert!(server.try_next_frame().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn emit_when_connected_delivers_event() {
        let fake = FakeRelay::accepting();
        let relay = relay_with(&fake);
        assert!(relay.connect());
        wait_for(&relay, ConnectionState::Connected).await;

        assert!(relay.emit(OPEN_AI_WEBRTC, json!({"type": "response.create"})));
        let mut server = fake.next_server().await;
        let (name, data) = server.next_event().await.unwrap();
        assert_eq!(name, OPEN_AI_WEBRTC);
        assert_eq!(data["type"], "response.create");
    }

    #[tokio::test(start_paused = true)]
    async fn reserved_names_cannot_be_emitted() {
        let fake = FakeRelay::accepting();
        let relay = relay_with(&fake);
        assert!(relay.connect());
        wait_for(&relay, ConnectionState::Connected).await;

        let (logs, _guard) = capture_logs();
        assert!(!relay.emit(CONNECT, Value::Null));
        assert!(logs.has_event(Level::WARN, "reserved event name, dropping event"));
        assert!(!logs.has_event(Level::WARN, "relay not connected"));
        assert_matches!(
            relay.try_emit(RECONNECT_ATTEMPT, json!(1)),
            Err(BridgeError::RelayUnavailable { .. })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn handlers_run_in_registration_order() {
        let fake = FakeRelay::accepting();
        let relay = relay_with(&fake);
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            relay.on(SERVER_RESPONSE, move |payload| {
                order.lock().push(format!("{tag}:{}", payload["data"]));
            });
        }
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        relay.on(SERVER_RESPONSE, move |_| {
            let _ = done_tx.send(());
        });
        assert_eq!(relay.handler_count(SERVER_RESPONSE), 4);

        assert!(relay.connect());
        let server = fake.next_server().await;
        server.emit(SERVER_RESPONSE, json!({"data": 1})).await;
        server.emit(SERVER_RESPONSE, json!({"data": 2})).await;
        done_rx.recv().await.unwrap();
        done_rx.recv().await.unwrap();

        assert_eq!(
            *order.lock(),
            vec!["first:1", "second:1", "third:1", "first:2", "second:2", "third:2"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unregistered_events_are_ignored() {
        let fake = FakeRelay::accepting();
        let relay = relay_with(&fake);
        let seen = record(&relay, "known");
        assert!(relay.connect());
        let server = fake.next_server().await;
        server.emit("unknown", json!(1)).await;
        server.emit("known", json!(2)).await;
        while seen.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(*seen.lock(), vec![json!(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connects_retry_a_bounded_number_of_times() {
        let fake = FakeRelay::refusing();
        let relay = relay_with(&fake);
        let attempts = record(&relay, RECONNECT_ATTEMPT);
        let errors = record(&relay, CONNECT_ERROR);

        assert!(relay.connect());
        wait_for(&relay, ConnectionState::Disconnected).await;

        assert_eq!(fake.connect_count(), 6);
        assert_eq!(
            *attempts.lock(),
            vec![json!(1), json!(2), json!(3), json!(4), json!(5)]
        );
        assert_eq!(errors.lock().len(), 6);
        for gap in fake.connect_gaps() {
            assert!(gap >= Duration::from_millis(1000), "gap {gap:?} shorter than delay");
        }

        // Nothing further happens once the budget is spent.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fake.connect_count(), 6);
        assert_eq!(relay.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_count_resets_on_success_and_manual_connect() {
        let fake = FakeRelay::scripted(
            [Outcome::Refuse("down".into()), Outcome::Refuse("down".into())],
            Outcome::Accept,
        );
        let relay = relay_with(&fake);

        assert!(relay.connect());
        wait_for(&relay, ConnectionState::Connected).await;
        assert_eq!(fake.connect_count(), 3);
        assert_eq!(relay.retry_count(), 0);

        relay.disconnect();
        assert!(relay.connect());
        assert_eq!(relay.retry_count(), 0);
        wait_for(&relay, ConnectionState::Connected).await;
        assert_eq!(fake.connect_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_connect_after_exhaustion_starts_fresh_cycle() {
        let fake = FakeRelay::refusing();
        let relay = relay_with(&fake);
        assert!(relay.connect());
        wait_for(&relay, ConnectionState::Disconnected).await;
        assert_eq!(fake.connect_count(), 6);

        assert!(relay.connect());
        wait_for(&relay, ConnectionState::Disconnected).await;
        assert_eq!(fake.connect_count(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_handshake_is_a_connect_error() {
        let fake = FakeRelay::scripted(
            [Outcome::Reject(json!({"message": "unauthorized"}))],
            Outcome::Accept,
        );
        let relay = relay_with(&fake);
        let errors = record(&relay, CONNECT_ERROR);

        assert!(relay.connect());
        wait_for(&relay, ConnectionState::Connected).await;
        assert_eq!(fake.connect_count(), 2);
        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert!(errors[0]["message"].as_str().unwrap().contains("unauthorized"));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_times_out_then_retries() {
        let fake = FakeRelay::scripted([Outcome::Silent], Outcome::Accept);
        let relay = relay_with(&fake);
        let errors = record(&relay, CONNECT_ERROR);

        let started = Instant::now();
        assert!(relay.connect());
        wait_for(&relay, ConnectionState::Connected).await;

        assert!(started.elapsed() >= Duration::from_secs(21));
        assert!(errors.lock()[0]["message"].as_str().unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn pings_are_answered() {
        let fake = FakeRelay::accepting();
        let relay = relay_with(&fake);
        assert!(relay.connect());
        let mut server = fake.next_server().await;
        assert_eq!(server.next_frame().await.as_deref(), Some("40"));

        server.send_raw("2").await;
        assert_eq!(server.next_frame().await.as_deref(), Some("3"));
    }

    #[tokio::test(start_paused = true)]
    async fn full_outbound_queue_is_reported_as_such() {
        let fake = FakeRelay::accepting();
        let relay = relay_with(&fake);
        assert!(relay.connect());
        let _server = fake.next_server().await;
        wait_for(&relay, ConnectionState::Connected).await;
        let (logs, _guard) = capture_logs();

        while relay.emit(OPEN_AI_WEBRTC, json!({"n": 1})) {}

        assert!(logs.has_event(Level::WARN, "relay outbound queue full, dropping event"));
        assert_eq!(relay.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_with_backed_up_outbound_queue_drops_the_transport() {
        let fake = FakeRelay::accepting();
        let relay = relay_with(&fake);
        let reasons = record(&relay, DISCONNECT);
        assert!(relay.connect());
        let first = fake.next_server().await;
        wait_for(&relay, ConnectionState::Connected).await;

        // The server stops reading, so nothing drains the outbound queue.
        while relay.emit(OPEN_AI_WEBRTC, json!({"n": 1})) {}
        first.send_raw("2").await;

        let _second = fake.next_server().await;
        wait_for(&relay, ConnectionState::Connected).await;
        assert_eq!(*reasons.lock(), vec![json!("transport close")]);
        assert_eq!(fake.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn regular_pings_keep_the_connection_alive() {
        let fake = FakeRelay::accepting();
        let relay = relay_with(&fake);
        assert!(relay.connect());
        let server = fake.next_server().await;
        wait_for(&relay, ConnectionState::Connected).await;

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(25)).await;
            server.send_raw("2").await;
        }
        assert_eq!(relay.state(), ConnectionState::Connected);
        assert_eq!(fake.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missed_pings_restart_the_cycle() {
        let fake = FakeRelay::accepting();
        let relay = relay_with(&fake);
        let reasons = record(&relay, DISCONNECT);
        assert!(relay.connect());
        let _first = fake.next_server().await;

        let _second = fake.next_server().await;
        wait_for(&relay, ConnectionState::Connected).await;
        assert_eq!(fake.connect_count(), 2);
        assert_eq!(*reasons.lock(), vec![json!("ping timeout")]);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_close_restarts_the_cycle() {
        let fake = FakeRelay::accepting();
        let relay = relay_with(&fake);
        let attempts = record(&relay, RECONNECT_ATTEMPT);
        assert!(relay.connect());
        let first = fake.next_server().await;
        wait_for(&relay, ConnectionState::Connected).await;

        first.close();
        let _second = fake.next_server().await;
        wait_for(&relay, ConnectionState::Connected).await;
        assert_eq!(*attempts.lock(), vec![json!(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn server_disconnect_does_not_reconnect() {
        let fake = FakeRelay::accepting();
        let relay = relay_with(&fake);
        let reasons = record(&relay, DISCONNECT);
        assert!(relay.connect());
        let server = fake.next_server().await;
        wait_for(&relay, ConnectionState::Connected).await;

        server.send_raw("41").await;
        wait_for(&relay, ConnectionState::Disconnected).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fake.connect_count(), 1);
        assert_eq!(*reasons.lock(), vec![json!("io server disconnect")]);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_sends_packet_and_is_idempotent() {
        let fake = FakeRelay::accepting();
        let relay = relay_with(&fake);
        let reasons = record(&relay, DISCONNECT);
        assert!(relay.connect());
        let mut server = fake.next_server().await;
        wait_for(&relay, ConnectionState::Connected).await;

        relay.disconnect();
        assert_eq!(relay.state(), ConnectionState::Disconnected);
        assert!(!relay.emit(OPEN_AI_WEBRTC, Value::Null));
        assert_eq!(server.next_frame().await.as_deref(), Some("40"));
        assert_eq!(server.next_frame().await.as_deref(), Some("41"));

        relay.disconnect();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(relay.state(), ConnectionState::Disconnected);
        assert_eq!(fake.connect_count(), 1);
        assert_eq!(*reasons.lock(), vec![json!("io client disconnect")]);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_retry_wait_stops_the_cycle() {
        let fake = FakeRelay::refusing();
        let relay = relay_with(&fake);
        assert!(relay.connect());
        while fake.connect_count() == 0 {
            tokio::task::yield_now().await;
        }
        relay.disconnect();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fake.connect_count(), 1);
        assert_eq!(relay.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_when_never_connected_is_noop() {
        let fake = FakeRelay::accepting();
        let relay = relay_with(&fake);
        relay.disconnect();
        assert_eq!(relay.state(), ConnectionState::Uninitialized);
    }
}
