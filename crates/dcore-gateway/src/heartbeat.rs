//! Heartbeat task for zombie connection detection.
//!
//! Runs alongside the read loop. Sends periodic heartbeats and reports a
//! missed ack once, then stops.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::protocol;
use crate::state::{HeartbeatTick, SessionState};
use crate::writer::Outbound;

/// Runs the heartbeat loop.
///
/// The first heartbeat is sent after `interval * random(0..1)`; later ones
/// every `interval`. If the previous heartbeat is still unacknowledged when
/// the next is due, `missed_tx` fires and the task exits. It also exits when
/// `cancel` fires or the writer is gone.
pub(crate) async fn run_heartbeat(
    interval: Duration,
    state: Arc<SessionState>,
    outbound: mpsc::Sender<Outbound>,
    missed_tx: oneshot::Sender<()>,
    cancel: CancellationToken,
) {
    let first_delay = dcore_core::clock::jittered(interval);
    debug!(
        shard_id = state.shard_id(),
        interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        first_delay_ms = u64::try_from(first_delay.as_millis()).unwrap_or(u64::MAX),
        "Heartbeat task started"
    );

    let mut delay = first_delay;
    loop {
        if dcore_core::clock::sleep_or_cancel(delay, &cancel).await.is_err() {
            debug!(shard_id = state.shard_id(), "Heartbeat task cancelled");
            return;
        }
        delay = interval;

        match state.begin_heartbeat().await {
            HeartbeatTick::Missed => {
                warn!(
                    shard_id = state.shard_id(),
                    "Heartbeat ACK missed, zombie connection detected"
                );
                let _ = missed_tx.send(());
                return;
            },
            HeartbeatTick::Send(seq) => {
                debug!(shard_id = state.shard_id(), seq = ?seq, "Sending heartbeat");
                let payload = protocol::build_heartbeat(seq);
                if outbound.send(Outbound::Payload(payload)).await.is_err() {
                    return;
                }
            },
        }
    }
}
