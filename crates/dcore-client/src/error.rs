//! Error types for the client.

use dcore_config::ConfigError;
use dcore_gateway::GatewayError;
use dcore_http::{DispatchError, TransportError};
use dcore_telemetry::TelemetryError;

/// Errors that can occur while building or running a [`Client`](crate::Client).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Logging could not be set up.
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    /// The HTTP transport could not be built.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A request failed.
    #[error("request failed: {0}")]
    Dispatch(#[from] DispatchError),

    /// A gateway session failed.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// [`Client::start`](crate::Client::start) was called twice.
    #[error("shards already started")]
    AlreadyStarted,
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
