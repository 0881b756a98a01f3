//! Shard manager and identify spacing.
//!
//! The server allows `max_concurrency` identifies per [`IDENTIFY_WINDOW`],
//! bucketed by `shard_id % max_concurrency`. [`IdentifyQueue`] enforces that
//! across every session sharing it; [`ShardManager`] runs one
//! [`GatewaySession`] per shard with a shared queue and event sink.

use std::sync::Arc;
use std::time::Duration;

use dcore_core::Cancelled;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::connection::GatewayConnector;
use crate::error::{GatewayError, GatewayResult};
use crate::session::{GatewayEvent, GatewaySession, GatewayStatus, SessionConfig};
use crate::state::SessionState;

/// Minimum spacing between identifies in one concurrency bucket.
pub const IDENTIFY_WINDOW: Duration = Duration::from_secs(5);

/// Serializes identifies per concurrency bucket.
#[derive(Debug)]
pub struct IdentifyQueue {
    buckets: Vec<Mutex<Option<Instant>>>,
}

impl IdentifyQueue {
    /// A queue with `max_concurrency` buckets (at least one).
    #[must_use]
    pub fn new(max_concurrency: u32) -> Self {
        let count = usize::try_from(max_concurrency.max(1)).unwrap_or(1);
        Self {
            buckets: (0..count).map(|_| Mutex::new(None)).collect(),
        }
    }

    /// Number of concurrency buckets.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.buckets.len()
    }

    /// Wait until `shard_id` may identify, then claim the slot.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if `cancel` fires first.
    pub async fn wait_turn(&self, shard_id: u32, cancel: &CancellationToken) -> Result<(), Cancelled> {
        let index = usize::try_from(shard_id)
            .ok()
            .and_then(|id| id.checked_rem(self.buckets.len()))
            .unwrap_or(0);
        let Some(bucket) = self.buckets.get(index) else {
            return Ok(());
        };

        let mut last = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Cancelled),
            guard = bucket.lock() => guard,
        };
        if let Some(next) = (*last).and_then(|at| at.checked_add(IDENTIFY_WINDOW)) {
            debug!(shard_id, bucket = index, "Waiting for identify slot");
            dcore_core::clock::sleep_until_or_cancel(next, cancel).await?;
        }
        *last = Some(Instant::now());
        Ok(())
    }
}

/// A running shard.
#[derive(Debug)]
struct ShardHandle {
    shard_id: u32,
    status: watch::Receiver<GatewayStatus>,
    state: Arc<SessionState>,
    task: JoinHandle<GatewayResult<()>>,
}

/// Runs one gateway session per shard.
pub struct ShardManager {
    template: SessionConfig,
    gateway_url: String,
    connector: Arc<dyn GatewayConnector>,
    events: mpsc::Sender<GatewayEvent>,
    cancel: CancellationToken,
    shard_ids: Vec<u32>,
    queue: Arc<IdentifyQueue>,
    shards: Vec<ShardHandle>,
}

impl ShardManager {
    /// Manage shards `0..template.shard_count` with one identify at a time.
    #[must_use]
    pub fn new(
        template: SessionConfig,
        gateway_url: impl Into<String>,
        connector: Arc<dyn GatewayConnector>,
        events: mpsc::Sender<GatewayEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let shard_ids = (0..template.shard_count.max(1)).collect();
        Self {
            template,
            gateway_url: gateway_url.into(),
            connector,
            events,
            cancel,
            shard_ids,
            queue: Arc::new(IdentifyQueue::new(1)),
            shards: Vec::new(),
        }
    }

    /// Run only these shard ids.
    #[must_use]
    pub fn with_shard_ids(mut self, shard_ids: Vec<u32>) -> Self {
        self.shard_ids = shard_ids;
        self
    }

    /// Allow `max_concurrency` identifies per window.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: u32) -> Self {
        self.queue = Arc::new(IdentifyQueue::new(max_concurrency));
        self
    }

    /// Shard ids this manager runs.
    #[must_use]
    pub fn shard_ids(&self) -> &[u32] {
        &self.shard_ids
    }

    /// Total shard count sent with each identify.
    #[must_use]
    pub fn shard_count(&self) -> u32 {
        self.template.shard_count.max(1)
    }

    /// Spawn every shard's session. Calling it again does nothing.
    pub fn start(&mut self) {
        if !self.shards.is_empty() {
            return;
        }
        let shard_count = self.shard_count();
        info!(
            shards = self.shard_ids.len(),
            shard_count,
            max_concurrency = self.queue.max_concurrency(),
            "Starting shards"
        );

        for &shard_id in &self.shard_ids {
            let config = self.template.clone().with_shard(shard_id, shard_count);
            let session = GatewaySession::new(
                config,
                self.gateway_url.clone(),
                Arc::clone(&self.connector),
                self.events.clone(),
                self.cancel.child_token(),
            )
            .with_identify_queue(Arc::clone(&self.queue));

            self.shards.push(ShardHandle {
                shard_id,
                status: session.subscribe(),
                state: session.state(),
                task: tokio::spawn(session.run()),
            });
        }
    }

    /// Current status of `shard_id`.
    #[must_use]
    pub fn status(&self, shard_id: u32) -> Option<GatewayStatus> {
        self.handle(shard_id).map(|h| *h.status.borrow())
    }

    /// Status receiver for `shard_id`.
    #[must_use]
    pub fn subscribe(&self, shard_id: u32) -> Option<watch::Receiver<GatewayStatus>> {
        self.handle(shard_id).map(|h| h.status.clone())
    }

    /// Session state of `shard_id`.
    #[must_use]
    pub fn session_state(&self, shard_id: u32) -> Option<Arc<SessionState>> {
        self.handle(shard_id).map(|h| Arc::clone(&h.state))
    }

    /// Ask every shard to stop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for every shard to finish and collect their results.
    pub async fn join(self) -> Vec<(u32, GatewayResult<()>)> {
        let mut results = Vec::with_capacity(self.shards.len());
        for handle in self.shards {
            let result = handle
                .task
                .await
                .unwrap_or_else(|e| Err(GatewayError::Task(e.to_string())));
            results.push((handle.shard_id, result));
        }
        results
    }

    fn handle(&self, shard_id: u32) -> Option<&ShardHandle> {
        self.shards.iter().find(|h| h.shard_id == shard_id)
    }
}

impl std::fmt::Debug for ShardManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardManager")
            .field("gateway_url", &self.gateway_url)
            .field("shard_ids", &self.shard_ids)
            .field("running", &self.shards.len())
            .finish_non_exhaustive()
    }
}
