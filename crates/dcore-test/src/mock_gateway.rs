//! In-memory gateway server.
//!
//! [`MockGateway`] is a [`GatewayConnector`]. Every `connect` call produces a
//! [`ServerHandle`] that the test picks up with
//! [`MockGateway::next_connection`] and uses to play the server side.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dcore_gateway::protocol::{GatewayPayload, opcode};
use dcore_gateway::{Connection, Frame, FrameSink, FrameStream, GatewayConnector, GatewayError, GatewayResult};
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;

/// Something the client sent.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// A JSON payload.
    Payload(GatewayPayload),
    /// A close frame with its code.
    Close(u16),
}

enum ServerEvent {
    Frame(Frame),
    Disconnect,
}

/// [`GatewayConnector`] backed by in-memory channels.
///
/// Heartbeats are acknowledged automatically unless
/// [`without_auto_ack`](Self::without_auto_ack) is used.
#[derive(Clone)]
pub struct MockGateway {
    connections_tx: mpsc::UnboundedSender<ServerHandle>,
    connections_rx: Arc<Mutex<mpsc::UnboundedReceiver<ServerHandle>>>,
    attempts: Arc<AtomicUsize>,
    refuse: Arc<AtomicBool>,
    auto_ack: bool,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    /// A gateway that accepts every connection.
    #[must_use]
    pub fn new() -> Self {
        let (connections_tx, connections_rx) = mpsc::unbounded_channel();
        Self {
            connections_tx,
            connections_rx: Arc::new(Mutex::new(connections_rx)),
            attempts: Arc::new(AtomicUsize::new(0)),
            refuse: Arc::new(AtomicBool::new(false)),
            auto_ack: true,
        }
    }

    /// Leave heartbeats unacknowledged.
    #[must_use]
    pub fn without_auto_ack(mut self) -> Self {
        self.auto_ack = false;
        self
    }

    /// Make `connect` fail while `refuse` is set.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Connect calls seen so far, refused ones included.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the client's next connection.
    pub async fn next_connection(&self) -> Option<ServerHandle> {
        self.connections_rx.lock().await.recv().await
    }
}

#[async_trait]
impl GatewayConnector for MockGateway {
    async fn connect(&self, url: &str) -> GatewayResult<Connection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(GatewayError::Connect("connection refused".into()));
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let handle = ServerHandle {
            url: url.to_owned(),
            connected_at: Instant::now(),
            to_client: to_client.clone(),
            from_client,
        };
        let _ = self.connections_tx.send(handle);

        let sink = MockSink {
            outbound,
            auto_ack: self.auto_ack.then_some(to_client),
        };
        Ok((Box::new(sink), Box::new(MockStream { inbound })))
    }
}

struct MockSink {
    outbound: mpsc::UnboundedSender<ClientFrame>,
    auto_ack: Option<mpsc::UnboundedSender<ServerEvent>>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send_text(&mut self, text: String) -> GatewayResult<()> {
        let payload: GatewayPayload = serde_json::from_str(&text)?;
        if payload.op == opcode::HEARTBEAT
            && let Some(to_client) = &self.auto_ack
        {
            let ack = json!({ "op": opcode::HEARTBEAT_ACK, "d": null }).to_string();
            let _ = to_client.send(ServerEvent::Frame(Frame::Text(ack)));
        }
        self.outbound
            .send(ClientFrame::Payload(payload))
            .map_err(|_| GatewayError::ConnectionClosed)
    }

    async fn close(&mut self, code: u16) -> GatewayResult<()> {
        let _ = self.outbound.send(ClientFrame::Close(code));
        Ok(())
    }
}

struct MockStream {
    inbound: mpsc::UnboundedReceiver<ServerEvent>,
}

#[async_trait]
impl FrameStream for MockStream {
    async fn next_frame(&mut self) -> Option<GatewayResult<Frame>> {
        match self.inbound.recv().await? {
            ServerEvent::Frame(frame) => Some(Ok(frame)),
            ServerEvent::Disconnect => None,
        }
    }
}

/// Server side of one mock connection.
pub struct ServerHandle {
    url: String,
    connected_at: Instant,
    to_client: mpsc::UnboundedSender<ServerEvent>,
    from_client: mpsc::UnboundedReceiver<ClientFrame>,
}

impl ServerHandle {
    /// URL the client connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// When the client connected.
    #[must_use]
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Send a raw text frame.
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self
            .to_client
            .send(ServerEvent::Frame(Frame::Text(text.into())));
    }

    /// Send a payload.
    pub fn send_payload(&self, op: u8, d: Value) {
        self.send_text(json!({ "op": op, "d": d }).to_string());
    }

    /// Send Hello with `interval_ms`.
    pub fn hello(&self, interval_ms: u64) {
        self.send_payload(opcode::HELLO, json!({ "heartbeat_interval": interval_ms }));
    }

    /// Send a dispatch.
    pub fn dispatch(&self, seq: u64, name: &str, d: Value) {
        self.send_text(json!({ "op": opcode::DISPATCH, "s": seq, "t": name, "d": d }).to_string());
    }

    /// Send READY for `session_id`.
    pub fn ready(&self, seq: u64, session_id: &str, resume_url: &str) {
        self.dispatch(
            seq,
            "READY",
            json!({
                "v": 10,
                "session_id": session_id,
                "resume_gateway_url": resume_url,
                "user": { "id": "1", "username": "bot" },
            }),
        );
    }

    /// Acknowledge a heartbeat.
    pub fn heartbeat_ack(&self) {
        self.send_payload(opcode::HEARTBEAT_ACK, Value::Null);
    }

    /// Ask the client for a heartbeat.
    pub fn request_heartbeat(&self) {
        self.send_payload(opcode::HEARTBEAT, Value::Null);
    }

    /// Tell the client to reconnect.
    pub fn reconnect(&self) {
        self.send_payload(opcode::RECONNECT, Value::Null);
    }

    /// Invalidate the session.
    pub fn invalid_session(&self, resumable: bool) {
        self.send_payload(opcode::INVALID_SESSION, Value::Bool(resumable));
    }

    /// Close with `code`.
    pub fn close(&self, code: u16) {
        let _ = self
            .to_client
            .send(ServerEvent::Frame(Frame::Close(Some(code))));
    }

    /// Drop the connection without a close frame.
    pub fn disconnect(&self) {
        let _ = self.to_client.send(ServerEvent::Disconnect);
    }

    /// Next frame from the client, or `None` once it has gone away.
    pub async fn recv(&mut self) -> Option<ClientFrame> {
        self.from_client.recv().await
    }

    /// Skip ahead to the next payload with `op`. Returns `None` if the client
    /// closes first.
    pub async fn expect_op(&mut self, op: u8) -> Option<GatewayPayload> {
        loop {
            match self.recv().await? {
                ClientFrame::Payload(payload) if payload.op == op => return Some(payload),
                ClientFrame::Payload(_) => {},
                ClientFrame::Close(_) => return None,
            }
        }
    }

    /// Skip ahead to the client's close frame and return its code.
    pub async fn expect_close(&mut self) -> Option<u16> {
        loop {
            if let ClientFrame::Close(code) = self.recv().await? {
                return Some(code);
            }
        }
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for MockGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockGateway")
            .field("attempts", &self.connect_attempts())
            .field("auto_ack", &self.auto_ack)
            .finish_non_exhaustive()
    }
}
