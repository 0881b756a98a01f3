//! dcore Gateway - persistent session with the real-time gateway.
//!
//! A [`GatewaySession`] drives one shard through connect, Hello,
//! Identify/Resume, the read loop, and reconnection. Dispatches are forwarded
//! as [`GatewayEvent`]s on a bounded channel; status transitions are
//! published on a `watch` channel. A [`ShardManager`] runs several sessions
//! behind one identify queue.
//!
//! The transport is a [`GatewayConnector`]; [`TungsteniteConnector`] speaks
//! `WebSocket` via `tokio-tungstenite`.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use dcore_gateway::{GatewaySession, SessionConfig, TungsteniteConnector};
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), dcore_gateway::GatewayError> {
//! let (events_tx, mut events) = mpsc::channel(1024);
//! let session = GatewaySession::new(
//!     SessionConfig::new("my-token"),
//!     "wss://gateway.discord.gg",
//!     Arc::new(TungsteniteConnector),
//!     events_tx,
//!     CancellationToken::new(),
//! );
//! tokio::spawn(session.run());
//!
//! while let Some(event) = events.recv().await {
//!     println!("{} #{}", event.name, event.sequence);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod close;
mod connection;
mod error;
mod heartbeat;
pub mod protocol;
mod session;
mod shard;
mod state;
mod writer;

pub use close::{CloseClass, CloseCode, classify};
pub use connection::{
    Connection, Frame, FrameSink, FrameStream, GatewayConnector, TungsteniteConnector,
};
pub use error::{GatewayError, GatewayResult};
pub use protocol::{GatewayBotInfo, GatewayPayload, SessionStartLimit};
pub use session::{GatewayEvent, GatewaySession, GatewayStatus, SessionConfig};
pub use shard::{IDENTIFY_WINDOW, IdentifyQueue, ShardManager};
pub use state::{HeartbeatTick, SessionSnapshot, SessionState};
