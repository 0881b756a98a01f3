//! dcore Test - shared test utilities for the dcore crates.
//!
//! This crate provides scripted transports that stand in for the network in
//! tests, used across the workspace as a dev-dependency.
//!
//! - [`MockHttpTransport`] answers dispatcher requests from a script and
//!   records each request with its arrival time.
//! - [`MockGateway`] accepts gateway connections in memory; the test plays
//!   the server through a [`ServerHandle`].
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! dcore-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use dcore_test::{MockGateway, init_test_logging};
//!
//! #[tokio::test(start_paused = true)]
//! async fn identifies_after_hello() {
//!     init_test_logging();
//!     let gateway = MockGateway::new();
//!     // spawn a GatewaySession with Arc::new(gateway.clone()) ...
//!     let mut conn = gateway.next_connection().await.unwrap();
//!     conn.hello(41_250);
//!     assert!(conn.expect_op(2).await.is_some());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod harness;
pub mod mock_gateway;
pub mod mock_http;

pub use harness::*;
pub use mock_gateway::*;
pub use mock_http::*;
