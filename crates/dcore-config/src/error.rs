//! Configuration error types.

use thiserror::Error;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path of the file.
        path: String,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML or does not match the schema.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path of the file (or `<inline>`).
        path: String,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// A value is out of range or violates a cross-field rule.
    #[error("invalid config value for {field}: {message}")]
    ValidationError {
        /// Dotted path of the offending field.
        field: String,
        /// Human-readable explanation.
        message: String,
    },

    /// No bot token was configured in the file or the environment.
    #[error("no bot token configured (set `token` or DCORE_TOKEN)")]
    MissingToken,
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
