#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
//! Configuration for the dcore client.
//!
//! This crate provides a single [`Config`] type holding everything the
//! request layer and the gateway consume at construction time: the bot
//! token, HTTP retry and rate-limit knobs, gateway shard layout and
//! reconnect bounds, and logging preferences.
//!
//! # Usage
//!
//! ```rust,no_run
//! use dcore_config::Config;
//!
//! let config = Config::load(Some(std::path::Path::new("dcore.toml"))).unwrap();
//! println!("API base: {}", config.http.base_url);
//! ```
//!
//! # Precedence
//!
//! 1. **File** (`dcore.toml` or the path passed to [`Config::load`])
//! 2. **Environment variables** (`DCORE_TOKEN`, `DISCORD_TOKEN`) as a fallback
//!    for the token; `DCORE_LOG` overrides the log level
//! 3. **Defaults** compiled into every section's [`Default`] impl
//!
//! # Design
//!
//! This crate has **no dependencies on other internal dcore crates**.
//! Conversion from config sections to runtime settings happens in
//! `dcore-client`.

/// Configuration error types.
pub mod error;
/// Configuration file loading and environment fallbacks.
pub mod loader;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use types::*;

impl Config {
    /// Load configuration from an optional TOML file, apply environment
    /// fallbacks, and validate.
    ///
    /// With `None` the defaults are used as the base.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read or parsed, or if
    /// the final configuration fails validation.
    pub fn load(path: Option<&std::path::Path>) -> ConfigResult<Self> {
        loader::load(path, &loader::collect_env_vars())
    }

    /// Parse a TOML document without touching the file system or the
    /// environment, then validate it.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] on parse or validation failure.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config = loader::parse("<inline>", content)?;
        validate::validate(&config)?;
        Ok(config)
    }
}
