//! Session state shared by the read loop and the heartbeat loop.
//!
//! All fields live behind one mutex and are only reachable through the
//! operations below, each of which takes the lock exactly once.

use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{trace, warn};

/// Result of asking to send a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatTick {
    /// Send a heartbeat carrying this sequence. The ack flag is now set.
    Send(Option<u64>),
    /// The previous heartbeat was never acknowledged.
    Missed,
}

/// Point-in-time copy of the session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Current session id, if identified.
    pub session_id: Option<String>,
    /// Last observed dispatch sequence.
    pub sequence: Option<u64>,
    /// Interval from the last Hello.
    pub heartbeat_interval: Option<Duration>,
    /// Whether a heartbeat is awaiting its ack.
    pub heartbeat_ack_pending: bool,
    /// Resume URL from the last READY.
    pub resume_url: Option<String>,
    /// This shard's id.
    pub shard_id: u32,
    /// Total shards.
    pub shard_count: u32,
}

#[derive(Debug)]
struct Inner {
    session_id: Option<String>,
    sequence: Option<u64>,
    heartbeat_interval: Option<Duration>,
    heartbeat_ack_pending: bool,
    resume_url: Option<String>,
}

/// Mutable state of one gateway session.
#[derive(Debug)]
pub struct SessionState {
    shard_id: u32,
    shard_count: u32,
    inner: Mutex<Inner>,
}

impl SessionState {
    /// Fresh state with no session.
    #[must_use]
    pub fn new(shard_id: u32, shard_count: u32) -> Self {
        Self {
            shard_id,
            shard_count,
            inner: Mutex::new(Inner {
                session_id: None,
                sequence: None,
                heartbeat_interval: None,
                heartbeat_ack_pending: false,
                resume_url: None,
            }),
        }
    }

    /// This shard's id.
    #[must_use]
    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    /// Total shards.
    #[must_use]
    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    /// Last observed sequence.
    pub async fn sequence(&self) -> Option<u64> {
        self.inner.lock().await.sequence
    }

    /// Record a dispatch sequence. Returns `false` if `seq` is older than
    /// what was already observed, in which case it is ignored.
    pub async fn observe_sequence(&self, seq: u64) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.sequence {
            Some(current) if seq < current => {
                warn!(
                    shard_id = self.shard_id,
                    current, seq, "Ignoring out-of-order sequence"
                );
                false
            },
            _ => {
                inner.sequence = Some(seq);
                true
            },
        }
    }

    /// Reset heartbeat bookkeeping for a new connection.
    pub async fn begin_connection(&self, interval: Duration) {
        let mut inner = self.inner.lock().await;
        inner.heartbeat_interval = Some(interval);
        inner.heartbeat_ack_pending = false;
    }

    /// Compare-and-set on the ack flag: if it is clear, set it and return the
    /// sequence to send; otherwise report a missed ack.
    pub async fn begin_heartbeat(&self) -> HeartbeatTick {
        let mut inner = self.inner.lock().await;
        if inner.heartbeat_ack_pending {
            return HeartbeatTick::Missed;
        }
        inner.heartbeat_ack_pending = true;
        HeartbeatTick::Send(inner.sequence)
    }

    /// Clear the ack flag.
    pub async fn ack(&self) {
        self.inner.lock().await.heartbeat_ack_pending = false;
        trace!(shard_id = self.shard_id, "Heartbeat ACK received");
    }

    /// Install a new session from READY.
    pub async fn replace_session(&self, session_id: String, resume_url: Option<String>) {
        let mut inner = self.inner.lock().await;
        inner.session_id = Some(session_id);
        inner.resume_url = resume_url;
    }

    /// Forget the session. The next connection must identify.
    pub async fn invalidate(&self) {
        let mut inner = self.inner.lock().await;
        inner.session_id = None;
        inner.sequence = None;
        inner.resume_url = None;
    }

    /// Session id and sequence, if both exist.
    pub async fn resume_info(&self) -> Option<(String, u64)> {
        let inner = self.inner.lock().await;
        match (&inner.session_id, inner.sequence) {
            (Some(id), Some(seq)) => Some((id.clone(), seq)),
            _ => None,
        }
    }

    /// Resume URL from the last READY.
    pub async fn resume_url(&self) -> Option<String> {
        self.inner.lock().await.resume_url.clone()
    }

    /// Copy of every field.
    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().await;
        SessionSnapshot {
            session_id: inner.session_id.clone(),
            sequence: inner.sequence,
            heartbeat_interval: inner.heartbeat_interval,
            heartbeat_ack_pending: inner.heartbeat_ack_pending,
            resume_url: inner.resume_url.clone(),
            shard_id: self.shard_id,
            shard_count: self.shard_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequence_is_monotonic() {
        let state = SessionState::new(0, 1);
        assert!(state.observe_sequence(5).await);
        assert!(!state.observe_sequence(3).await);
        assert_eq!(state.sequence().await, Some(5));
        assert!(state.observe_sequence(5).await);
        assert!(state.observe_sequence(6).await);
        assert_eq!(state.sequence().await, Some(6));
    }

    #[tokio::test]
    async fn heartbeat_ack_cycle() {
        let state = SessionState::new(0, 1);
        state.begin_connection(Duration::from_secs(41)).await;
        state.observe_sequence(9).await;

        assert_eq!(state.begin_heartbeat().await, HeartbeatTick::Send(Some(9)));
        assert!(state.snapshot().await.heartbeat_ack_pending);
        assert_eq!(state.begin_heartbeat().await, HeartbeatTick::Missed);

        state.ack().await;
        assert_eq!(state.begin_heartbeat().await, HeartbeatTick::Send(Some(9)));
    }

    #[tokio::test]
    async fn new_connection_clears_pending_ack() {
        let state = SessionState::new(0, 1);
        let _ = state.begin_heartbeat().await;
        state.begin_connection(Duration::from_millis(500)).await;
        let snapshot = state.snapshot().await;
        assert!(!snapshot.heartbeat_ack_pending);
        assert_eq!(snapshot.heartbeat_interval, Some(Duration::from_millis(500)));
    }

    #[tokio::test]
    async fn resume_requires_session_and_sequence() {
        let state = SessionState::new(2, 4);
        assert!(state.resume_info().await.is_none());

        state
            .replace_session("abc".into(), Some("wss://r.discord.gg".into()))
            .await;
        assert!(state.resume_info().await.is_none());

        state.observe_sequence(1).await;
        assert_eq!(state.resume_info().await, Some(("abc".into(), 1)));
        assert_eq!(state.resume_url().await.as_deref(), Some("wss://r.discord.gg"));
    }

    #[tokio::test]
    async fn invalidate_clears_session() {
        let state = SessionState::new(0, 1);
        state.replace_session("abc".into(), None).await;
        state.observe_sequence(10).await;
        state.invalidate().await;

        let snapshot = state.snapshot().await;
        assert!(snapshot.session_id.is_none());
        assert!(snapshot.sequence.is_none());
        assert!(snapshot.resume_url.is_none());
        // A fresh session may start again from a low sequence.
        assert!(state.observe_sequence(1).await);
    }
}
