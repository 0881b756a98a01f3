//! dcore HTTP - rate-limited request dispatcher.
//!
//! Callers describe a request with a [`Route`] and a [`RequestDescriptor`]
//! and hand it to a [`Dispatcher`]. The dispatcher:
//!
//! - waits for the route's bucket and the account-wide [`GlobalGate`]
//! - sends over an [`HttpTransport`] ([`ReqwestTransport`] in production)
//! - records the server's quota headers, remapping routes whose bucket hash
//!   changes
//! - retries 429s after the server's `retry_after` and 5xx/transport
//!   failures with jittered backoff, up to the descriptor's retry cap
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use dcore_http::{Dispatcher, DispatcherConfig, RateLimiter, ReqwestTransport, Route};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let dispatcher = Dispatcher::new(
//!     DispatcherConfig::new("my-token"),
//!     Arc::new(ReqwestTransport::new(Duration::from_secs(15))?),
//!     Arc::new(RateLimiter::default()),
//!     CancellationToken::new(),
//! );
//!
//! let route = Route::post("/channels/{channel_id}/messages").param("channel_id", 1234);
//! let request = dispatcher
//!     .request(route)
//!     .with_json(&serde_json::json!({ "content": "hello" }))?;
//! let response = dispatcher.send(request).await?;
//! println!("status {}", response.status);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod dispatcher;
mod error;
pub mod ratelimit;
mod request;
mod route;
mod transport;

pub use dispatcher::{DEFAULT_BASE_URL, Dispatcher, DispatcherConfig};
pub use error::{DispatchError, DispatchResult, FailureKind, TransportError};
pub use ratelimit::{BucketSnapshot, GlobalGate, Permit, RateLimiter};
pub use request::{Attachment, DEFAULT_MAX_RETRIES, RequestBody, RequestDescriptor};
pub use route::{Method, Route, RouteKey};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
