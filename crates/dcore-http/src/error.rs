//! Error types for the request dispatcher.

use thiserror::Error;

/// The last retryable failure seen before the retry cap was exceeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The server answered with a 5xx status.
    ServerStatus(u16),
    /// The transport failed before a response arrived.
    Io(String),
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServerStatus(code) => write!(f, "server status {code}"),
            Self::Io(message) => write!(f, "transport failure: {message}"),
        }
    }
}

/// Terminal errors returned by [`Dispatcher::send`](crate::Dispatcher::send).
///
/// Rate limits and transient failures are retried internally; only these
/// outcomes reach the caller.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The request kept hitting 429 responses past the retry cap.
    #[error("rate limited after {attempts} attempts")]
    RateLimitExhausted {
        /// Total number of sends made.
        attempts: u32,
    },

    /// The request kept failing with 5xx or transport errors past the retry cap.
    #[error("request failed after {attempts} attempts: {last_failure}")]
    TransportExhausted {
        /// Total number of sends made.
        attempts: u32,
        /// The final failure.
        last_failure: FailureKind,
    },

    /// The server rejected the request with a non-retryable 4xx status.
    #[error("request rejected with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, lossily decoded.
        body: String,
    },

    /// The descriptor cannot be sent as built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A successful response body did not decode into the requested type.
    #[error("failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// The dispatcher was shut down while the request was pending.
    #[error("dispatcher shut down")]
    Shutdown,
}

impl From<dcore_core::Cancelled> for DispatchError {
    fn from(_: dcore_core::Cancelled) -> Self {
        Self::Shutdown
    }
}

/// Result type for dispatcher operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Failure reported by an [`HttpTransport`](crate::HttpTransport).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The request did not complete within the transport timeout.
    #[error("request timed out")]
    Timeout,

    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Any other I/O or protocol failure.
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else {
            Self::Other(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_errors_carry_attempts() {
        let err = DispatchError::TransportExhausted {
            attempts: 11,
            last_failure: FailureKind::ServerStatus(503),
        };
        let text = err.to_string();
        assert!(text.contains("11"));
        assert!(text.contains("503"));

        let err = DispatchError::RateLimitExhausted { attempts: 4 };
        assert!(err.to_string().contains('4'));
    }

    #[test]
    fn cancelled_maps_to_shutdown() {
        let err: DispatchError = dcore_core::Cancelled.into();
        assert!(matches!(err, DispatchError::Shutdown));
    }
}
