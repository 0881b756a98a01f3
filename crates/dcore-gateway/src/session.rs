//! Gateway session state machine.
//!
//! [`GatewaySession::run`] owns one shard's connection for its whole life:
//! connect, wait for Hello, identify or resume, read until something ends the
//! connection, tear it down, and decide whether and how to come back.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dcore_core::Backoff;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::close::{self, ABNORMAL_CLOSURE, CloseClass, NORMAL_TEARDOWN, RESUMABLE_TEARDOWN};
use crate::connection::{Frame, FrameStream, GatewayConnector};
use crate::error::{GatewayError, GatewayResult};
use crate::heartbeat;
use crate::protocol::{self, GatewayPayload, HelloPayload, IdentifyParams, ReadyPayload, opcode};
use crate::shard::IdentifyQueue;
use crate::state::SessionState;
use crate::writer::{self, Outbound};

/// Outbound frames buffered per connection.
const OUTBOUND_BUFFER: usize = 64;
/// How long teardown waits for the writer to flush.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);
/// Bounds of the random wait after an invalid session.
const INVALID_SESSION_DELAY: (Duration, Duration) =
    (Duration::from_secs(1), Duration::from_secs(5));

/// Where the state machine is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    /// Not connected and not trying yet.
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Connected, waiting for Hello.
    AwaitingHello,
    /// Identify sent, waiting for READY.
    Identifying,
    /// Resume sent, waiting for replay or RESUMED.
    Resuming,
    /// Session established; dispatches are forwarded.
    Connected,
    /// Tearing down to reconnect.
    Reconnecting,
    /// The connection was closed. Terminal only after a fatal close or
    /// shutdown.
    Closed,
}

/// One dispatch forwarded to the event sink.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayEvent {
    /// Shard that received it.
    pub shard_id: u32,
    /// Event name (`t`).
    pub name: String,
    /// Sequence number (`s`).
    pub sequence: u64,
    /// Raw event data (`d`).
    pub payload: serde_json::Value,
}

/// Settings for one session.
#[derive(Clone)]
pub struct SessionConfig {
    /// Bot token.
    pub token: String,
    /// Intents bitmask.
    pub intents: u32,
    /// This shard's id.
    pub shard_id: u32,
    /// Total shards.
    pub shard_count: u32,
    /// Member count above which offline members are omitted.
    pub large_threshold: u32,
    /// Initial presence sent with Identify.
    pub presence: Option<serde_json::Value>,
    /// How long to wait for Hello after connecting.
    pub hello_timeout: Duration,
    /// Reconnect backoff base.
    pub backoff_base: Duration,
    /// Reconnect backoff ceiling.
    pub backoff_max: Duration,
    /// Consecutive reconnects allowed without reaching READY/RESUMED.
    /// `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
}

impl SessionConfig {
    /// Defaults for a single-shard session.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            intents: protocol::DEFAULT_INTENTS,
            shard_id: 0,
            shard_count: 1,
            large_threshold: 250,
            presence: None,
            hello_timeout: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            max_reconnect_attempts: None,
        }
    }

    /// Set the shard identity.
    #[must_use]
    pub fn with_shard(mut self, shard_id: u32, shard_count: u32) -> Self {
        self.shard_id = shard_id;
        self.shard_count = shard_count;
        self
    }

    /// Set the intents bitmask.
    #[must_use]
    pub fn with_intents(mut self, intents: u32) -> Self {
        self.intents = intents;
        self
    }

    /// Set the initial presence.
    #[must_use]
    pub fn with_presence(mut self, presence: serde_json::Value) -> Self {
        self.presence = Some(presence);
        self
    }

    /// Set the reconnect backoff bounds.
    #[must_use]
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    /// Cap consecutive reconnect attempts.
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("has_token", &!self.token.is_empty())
            .field("intents", &self.intents)
            .field("shard_id", &self.shard_id)
            .field("shard_count", &self.shard_count)
            .field("large_threshold", &self.large_threshold)
            .field("hello_timeout", &self.hello_timeout)
            .field("backoff_base", &self.backoff_base)
            .field("backoff_max", &self.backoff_max)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .finish_non_exhaustive()
    }
}

/// What the outer loop does after a connection ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopAction {
    /// Stop and return `Ok(())`.
    Shutdown,
    /// Reconnect after backoff, keeping the session.
    Resume,
    /// Reconnect after backoff with a fresh identify.
    Reidentify,
    /// Reconnect after a short random wait.
    InvalidSession { resumable: bool },
}

/// What happened while waiting for Hello.
enum HelloOutcome {
    Hello(HelloPayload),
    Closed(u16),
}

/// One shard's gateway session.
pub struct GatewaySession {
    config: SessionConfig,
    gateway_url: String,
    connector: Arc<dyn GatewayConnector>,
    state: Arc<SessionState>,
    events: mpsc::Sender<GatewayEvent>,
    status: watch::Sender<GatewayStatus>,
    identify_queue: Option<Arc<IdentifyQueue>>,
    cancel: CancellationToken,
    backoff: Backoff,
    failures: u32,
}

impl GatewaySession {
    /// Create a session that connects to `gateway_url` through `connector`
    /// and forwards dispatches to `events`.
    #[must_use]
    pub fn new(
        config: SessionConfig,
        gateway_url: impl Into<String>,
        connector: Arc<dyn GatewayConnector>,
        events: mpsc::Sender<GatewayEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let state = Arc::new(SessionState::new(config.shard_id, config.shard_count));
        let backoff = Backoff::new(config.backoff_base, config.backoff_max);
        let (status, _) = watch::channel(GatewayStatus::Disconnected);
        Self {
            config,
            gateway_url: gateway_url.into(),
            connector,
            state,
            events,
            status,
            identify_queue: None,
            cancel,
            backoff,
            failures: 0,
        }
    }

    /// Space identifies through a shared queue.
    #[must_use]
    pub fn with_identify_queue(mut self, queue: Arc<IdentifyQueue>) -> Self {
        self.identify_queue = Some(queue);
        self
    }

    /// Shared session state.
    #[must_use]
    pub fn state(&self) -> Arc<SessionState> {
        Arc::clone(&self.state)
    }

    /// Watch status transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<GatewayStatus> {
        self.status.subscribe()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> GatewayStatus {
        *self.status.borrow()
    }

    /// Run until shutdown or a fatal error, reconnecting as needed.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::FatalClose`] when the server closes with a
    /// fatal code and [`GatewayError::ReconnectLimit`] when the configured
    /// number of consecutive reconnects fails.
    pub async fn run(mut self) -> GatewayResult<()> {
        let shard_id = self.config.shard_id;
        info!(shard_id, shard_count = self.config.shard_count, "Gateway session starting");

        let result = match self.run_loop().await {
            Err(GatewayError::Shutdown) => Ok(()),
            other => other,
        };
        self.set_status(GatewayStatus::Closed);

        match &result {
            Ok(()) => info!(shard_id, "Gateway session stopped"),
            Err(e) => error!(shard_id, error = %e, "Gateway session ended"),
        }
        result
    }

    async fn run_loop(&mut self) -> GatewayResult<()> {
        let shard_id = self.config.shard_id;
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let action = match self.connect_and_run().await {
                Ok(action) => action,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(shard_id, error = %e, "Gateway connection error");
                    self.set_status(GatewayStatus::Disconnected);
                    LoopAction::Resume
                },
            };

            let delay = match action {
                LoopAction::Shutdown => return Ok(()),
                LoopAction::Resume => self.next_backoff()?,
                LoopAction::Reidentify => {
                    self.state.invalidate().await;
                    self.next_backoff()?
                },
                LoopAction::InvalidSession { resumable } => {
                    if !resumable {
                        self.state.invalidate().await;
                    }
                    self.count_failure()?;
                    let (min, max) = INVALID_SESSION_DELAY;
                    dcore_core::clock::random_between(min, max)
                },
            };

            info!(
                shard_id,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                attempt = self.failures,
                "Reconnecting to gateway"
            );
            dcore_core::clock::sleep_or_cancel(delay, &self.cancel).await?;
        }
    }

    /// One physical connection: connect, handshake, read, tear down.
    async fn connect_and_run(&mut self) -> GatewayResult<LoopAction> {
        let shard_id = self.config.shard_id;
        self.set_status(GatewayStatus::Connecting);

        let resuming = self.state.resume_info().await.is_some();
        if !resuming && let Some(queue) = &self.identify_queue {
            queue.wait_turn(shard_id, &self.cancel).await?;
        }

        let url = protocol::connect_url(&self.resolve_url(resuming).await);
        info!(shard_id, url = %url, resuming, "Connecting to gateway");

        let (sink, mut stream) = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Ok(LoopAction::Shutdown),
            conn = self.connector.connect(&url) => conn?,
        };

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let writer = tokio::spawn(writer::run_writer(sink, outbound_rx, shard_id));
        let heartbeat_cancel = self.cancel.child_token();

        let result = self
            .drive(stream.as_mut(), &outbound_tx, &heartbeat_cancel)
            .await;

        heartbeat_cancel.cancel();
        let code = teardown_code(&result);
        Self::teardown(outbound_tx, writer, code).await;
        debug!(shard_id, code, "Connection torn down");
        result
    }

    async fn resolve_url(&self, resuming: bool) -> String {
        if resuming && let Some(url) = self.state.resume_url().await {
            return url;
        }
        self.gateway_url.clone()
    }

    /// Send the close frame, stop the writer, and wait briefly for it to flush.
    async fn teardown(outbound: mpsc::Sender<Outbound>, mut writer: JoinHandle<()>, code: u16) {
        let flush = async {
            let _ = outbound.send(Outbound::Close(code)).await;
            drop(outbound);
            let _ = (&mut writer).await;
        };
        if tokio::time::timeout(WRITER_FLUSH_TIMEOUT, flush).await.is_err() {
            warn!(code, "Gateway writer did not flush in time");
            writer.abort();
        }
    }

    /// Hello, heartbeat, identify/resume, then the read loop.
    async fn drive(
        &mut self,
        stream: &mut dyn FrameStream,
        outbound: &mpsc::Sender<Outbound>,
        heartbeat_cancel: &CancellationToken,
    ) -> GatewayResult<LoopAction> {
        let shard_id = self.config.shard_id;
        self.set_status(GatewayStatus::AwaitingHello);

        let hello = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Ok(LoopAction::Shutdown),
            hello = tokio::time::timeout(self.config.hello_timeout, read_hello(stream)) => {
                hello.map_err(|_| GatewayError::HelloTimeout)??
            },
        };
        let hello = match hello {
            HelloOutcome::Hello(hello) => hello,
            HelloOutcome::Closed(code) => return self.on_close(code),
        };
        if hello.heartbeat_interval == 0 {
            return Err(GatewayError::Protocol("Hello with zero heartbeat interval".into()));
        }

        let interval = Duration::from_millis(hello.heartbeat_interval);
        self.state.begin_connection(interval).await;
        let (missed_tx, mut missed_rx) = oneshot::channel();
        tokio::spawn(heartbeat::run_heartbeat(
            interval,
            Arc::clone(&self.state),
            outbound.clone(),
            missed_tx,
            heartbeat_cancel.clone(),
        ));

        let auth = match self.state.resume_info().await {
            Some((session_id, seq)) => {
                info!(shard_id, session_id = %session_id, seq, "Resuming gateway session");
                self.set_status(GatewayStatus::Resuming);
                protocol::build_resume(&self.config.token, &session_id, seq)
            },
            None => {
                info!(shard_id, "Identifying");
                self.set_status(GatewayStatus::Identifying);
                protocol::build_identify(&IdentifyParams {
                    token: &self.config.token,
                    intents: self.config.intents,
                    shard: [self.config.shard_id, self.config.shard_count],
                    large_threshold: self.config.large_threshold,
                    presence: self.config.presence.as_ref(),
                })
            },
        };
        send(outbound, auth).await?;

        loop {
            let frame = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(LoopAction::Shutdown),
                _ = &mut missed_rx => {
                    warn!(shard_id, "Heartbeat ACK missed, reconnecting");
                    self.set_status(GatewayStatus::Reconnecting);
                    return Ok(LoopAction::Resume);
                },
                frame = stream.next_frame() => frame,
            };

            let text = match frame {
                Some(Ok(Frame::Text(text))) => text,
                Some(Ok(Frame::Close(code))) => {
                    return self.on_close(code.unwrap_or(ABNORMAL_CLOSURE));
                },
                Some(Err(e)) => {
                    warn!(shard_id, error = %e, "Gateway read error");
                    self.set_status(GatewayStatus::Reconnecting);
                    return Ok(LoopAction::Resume);
                },
                None => return self.on_close(ABNORMAL_CLOSURE),
            };

            let payload: GatewayPayload = match serde_json::from_str(&text) {
                Ok(payload) => payload,
                Err(e) => return Ok(self.protocol_violation(&format!("malformed payload: {e}"))),
            };
            if let Some(action) = self.handle_payload(payload, outbound).await? {
                return Ok(action);
            }
        }
    }

    async fn handle_payload(
        &mut self,
        payload: GatewayPayload,
        outbound: &mpsc::Sender<Outbound>,
    ) -> GatewayResult<Option<LoopAction>> {
        let shard_id = self.config.shard_id;
        match payload.op {
            opcode::DISPATCH => Ok(self.handle_dispatch(payload).await),
            opcode::HEARTBEAT => {
                let seq = self.state.sequence().await;
                debug!(shard_id, seq = ?seq, "Heartbeat requested by gateway");
                send(outbound, protocol::build_heartbeat(seq)).await?;
                Ok(None)
            },
            opcode::HEARTBEAT_ACK => {
                self.state.ack().await;
                Ok(None)
            },
            opcode::RECONNECT => {
                info!(shard_id, "Gateway requested reconnect (op=7)");
                self.set_status(GatewayStatus::Reconnecting);
                Ok(Some(LoopAction::Resume))
            },
            opcode::INVALID_SESSION => {
                let resumable = payload
                    .d
                    .as_ref()
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                warn!(shard_id, resumable, "Invalid session (op=9)");
                self.set_status(GatewayStatus::Reconnecting);
                Ok(Some(LoopAction::InvalidSession { resumable }))
            },
            opcode::HELLO => Ok(Some(self.protocol_violation("unexpected Hello mid-session"))),
            op => Ok(Some(self.protocol_violation(&format!("unknown opcode {op}")))),
        }
    }

    /// Update the sequence, track READY/RESUMED, and forward while connected.
    async fn handle_dispatch(&mut self, payload: GatewayPayload) -> Option<LoopAction> {
        let shard_id = self.config.shard_id;
        let (Some(name), Some(sequence)) = (payload.t, payload.s) else {
            return Some(self.protocol_violation("dispatch without event name or sequence"));
        };
        self.state.observe_sequence(sequence).await;
        let data = payload.d.unwrap_or(serde_json::Value::Null);

        match name.as_str() {
            "READY" => {
                let ready: ReadyPayload = match serde_json::from_value(data.clone()) {
                    Ok(ready) => ready,
                    Err(e) => return Some(self.protocol_violation(&format!("bad READY: {e}"))),
                };
                let resume_url = ready.resume_gateway_url.filter(|url| {
                    let valid = protocol::is_valid_resume_url(url);
                    if !valid {
                        warn!(shard_id, url = %url, "Ignoring resume URL outside allowed domains");
                    }
                    valid
                });
                info!(shard_id, session_id = %ready.session_id, "Gateway session ready");
                self.state.replace_session(ready.session_id, resume_url).await;
                self.mark_connected();
            },
            "RESUMED" => {
                info!(shard_id, "Gateway session resumed");
                self.mark_connected();
            },
            _ if self.status() == GatewayStatus::Resuming => {
                debug!(shard_id, "Replaying missed events");
                self.mark_connected();
            },
            _ => {},
        }

        if self.status() != GatewayStatus::Connected {
            debug!(shard_id, event = %name, "Dropping dispatch before session is ready");
            return None;
        }

        let event = GatewayEvent {
            shard_id,
            name,
            sequence,
            payload: data,
        };
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Some(LoopAction::Shutdown),
            sent = self.events.send(event) => {
                if sent.is_err() {
                    warn!(shard_id, "Event receiver dropped, stopping session");
                    Some(LoopAction::Shutdown)
                } else {
                    None
                }
            },
        }
    }

    fn on_close(&mut self, code: u16) -> GatewayResult<LoopAction> {
        let shard_id = self.config.shard_id;
        let close = close::classify(code);
        self.set_status(GatewayStatus::Closed);
        match close.class {
            CloseClass::Resumable => {
                warn!(shard_id, code, reason = close.reason, "Gateway closed, will resume");
                Ok(LoopAction::Resume)
            },
            CloseClass::Reidentify => {
                info!(shard_id, code, reason = close.reason, "Gateway closed, will identify again");
                Ok(LoopAction::Reidentify)
            },
            CloseClass::Fatal => Err(GatewayError::FatalClose {
                code,
                reason: close.reason,
            }),
        }
    }

    fn protocol_violation(&self, detail: &str) -> LoopAction {
        warn!(shard_id = self.config.shard_id, detail, "Gateway protocol violation, reconnecting");
        self.set_status(GatewayStatus::Reconnecting);
        LoopAction::Resume
    }

    fn mark_connected(&mut self) {
        self.failures = 0;
        self.backoff.reset();
        self.set_status(GatewayStatus::Connected);
    }

    fn count_failure(&mut self) -> GatewayResult<()> {
        self.failures = self.failures.saturating_add(1);
        if let Some(max) = self.config.max_reconnect_attempts
            && self.failures > max
        {
            return Err(GatewayError::ReconnectLimit { attempts: max });
        }
        Ok(())
    }

    fn next_backoff(&mut self) -> GatewayResult<Duration> {
        self.count_failure()?;
        Ok(self.backoff.next_delay())
    }

    fn set_status(&self, status: GatewayStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            debug!(shard_id = self.config.shard_id, from = ?previous, to = ?status, "Gateway status");
        }
    }
}

impl fmt::Debug for GatewaySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewaySession")
            .field("config", &self.config)
            .field("gateway_url", &self.gateway_url)
            .field("status", &self.status())
            .field("failures", &self.failures)
            .finish_non_exhaustive()
    }
}

async fn send(outbound: &mpsc::Sender<Outbound>, payload: GatewayPayload) -> GatewayResult<()> {
    outbound
        .send(Outbound::Payload(payload))
        .await
        .map_err(|_| GatewayError::ConnectionClosed)
}

/// Read until Hello. Other payloads before it are ignored.
async fn read_hello(stream: &mut dyn FrameStream) -> GatewayResult<HelloOutcome> {
    loop {
        match stream.next_frame().await {
            Some(Ok(Frame::Text(text))) => {
                let payload: GatewayPayload = serde_json::from_str(&text)?;
                if payload.op != opcode::HELLO {
                    debug!(op = payload.op, "Ignoring payload before Hello");
                    continue;
                }
                let data = payload
                    .d
                    .ok_or_else(|| GatewayError::Protocol("Hello missing data".into()))?;
                return Ok(HelloOutcome::Hello(serde_json::from_value(data)?));
            },
            Some(Ok(Frame::Close(code))) => {
                return Ok(HelloOutcome::Closed(code.unwrap_or(ABNORMAL_CLOSURE)));
            },
            Some(Err(e)) => return Err(e),
            None => return Ok(HelloOutcome::Closed(ABNORMAL_CLOSURE)),
        }
    }
}

/// Close code the client sends when tearing a connection down.
fn teardown_code(result: &GatewayResult<LoopAction>) -> u16 {
    match result {
        Ok(LoopAction::Resume | LoopAction::InvalidSession { resumable: true }) => {
            RESUMABLE_TEARDOWN
        },
        Ok(_) => NORMAL_TEARDOWN,
        Err(e) if e.is_fatal() => NORMAL_TEARDOWN,
        Err(_) => RESUMABLE_TEARDOWN,
    }
}
