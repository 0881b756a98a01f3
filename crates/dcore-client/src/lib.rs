//! dcore Client - configuration, requests, and shards in one place.
//!
//! A [`Client`] is built from a [`Config`](dcore_config::Config). It owns:
//!
//! - one [`RateLimiter`](dcore_http::RateLimiter) shared by every request
//! - a [`Dispatcher`](dcore_http::Dispatcher) for REST calls
//! - a [`ShardManager`](dcore_gateway::ShardManager) once [`Client::start`]
//!   has run
//!
//! # Example
//!
//! ```rust,no_run
//! use dcore_client::config::Config;
//! use dcore_client::{Client, init_logging};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load(None)?;
//! init_logging(&config)?;
//!
//! let mut client = Client::new(config)?;
//! let mut events = client.start().await?;
//! while let Some(event) = events.recv().await {
//!     println!("shard {} got {}", event.shard_id, event.name);
//! }
//! client.shutdown();
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod client;
mod error;
pub mod settings;

pub use client::{Client, ClientBuilder};
pub use error::{ClientError, ClientResult};

pub use dcore_config as config;
pub use dcore_gateway as gateway;
pub use dcore_http as http;

use dcore_telemetry::{LogConfig, setup_logging};

/// Install the global `tracing` subscriber described by `[logging]`.
///
/// # Errors
///
/// Returns an error if the section does not describe a valid setup or a
/// subscriber is already installed.
pub fn init_logging(config: &dcore_config::Config) -> ClientResult<()> {
    let log_config = LogConfig::try_from(&config.logging)?;
    setup_logging(&log_config)?;
    Ok(())
}
