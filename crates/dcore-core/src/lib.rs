//! dcore Core - timing primitives shared by the request layer and the gateway.
//!
//! This crate provides:
//! - [`Backoff`]: exponential backoff with full jitter, used for HTTP retries
//!   and gateway reconnects
//! - [`clock`]: monotonic deadlines, cancellable sleeps, and parsing of the
//!   fractional-second durations the API reports in headers
//!
//! All timing goes through [`tokio::time`], so tests can pause and advance
//! the clock deterministically.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod backoff;
pub mod clock;

pub use backoff::Backoff;
pub use clock::Cancelled;
