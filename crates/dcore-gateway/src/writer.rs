//! Writer task: the only owner of a connection's write half.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::FrameSink;
use crate::protocol::GatewayPayload;

/// A frame queued for the writer task.
#[derive(Debug)]
pub(crate) enum Outbound {
    /// Serialize and send as text.
    Payload(GatewayPayload),
    /// Send a close frame with this code, then stop.
    Close(u16),
}

/// Drain `rx` into `sink` until a close is written, a send fails, or every
/// sender is dropped.
pub(crate) async fn run_writer(
    mut sink: Box<dyn FrameSink>,
    mut rx: mpsc::Receiver<Outbound>,
    shard_id: u32,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Payload(payload) => {
                let json = match serde_json::to_string(&payload) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(shard_id, op = payload.op, error = %e, "Failed to serialize payload");
                        continue;
                    },
                };
                if let Err(e) = sink.send_text(json).await {
                    debug!(shard_id, error = %e, "Gateway write failed");
                    return;
                }
            },
            Outbound::Close(code) => {
                if let Err(e) = sink.close(code).await {
                    debug!(shard_id, code, error = %e, "Close frame not delivered");
                }
                return;
            },
        }
    }
}
