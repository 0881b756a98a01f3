//! Telemetry error types.

use thiserror::Error;

/// Errors that can occur while setting up logging.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A level or directive does not parse as an `EnvFilter` directive.
    #[error("invalid filter directive '{directive}': {message}")]
    InvalidFilter {
        /// The offending directive.
        directive: String,
        /// Parser message.
        message: String,
    },

    /// The requested output format does not exist.
    #[error("unknown log format '{0}'")]
    UnknownFormat(String),

    /// A global subscriber is already installed.
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(String),

    /// The log directory could not be created.
    #[error("log directory error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
