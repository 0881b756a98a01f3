//! dcore telemetry: logging setup for the gateway and request layers.
//!
//! Every other dcore crate only emits `tracing` events. This crate decides
//! where those events go: the level filter, per-crate directives, output
//! format, and whether to write to stderr, stdout, or rolling files.
//!
//! # Example
//!
//! ```rust,no_run
//! use dcore_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), dcore_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("dcore_gateway=debug");
//!
//! setup_logging(&config)?;
//! tracing::info!("logging ready");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileRotation, LogConfig, LogFormat, LogTarget, TRANSPORT_TARGETS, setup_default_logging,
    setup_logging,
};
