//! Error types for the gateway session.

/// Errors produced by a gateway session.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// `WebSocket` transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// The transport could not open a connection.
    #[error("connection failed: {0}")]
    Connect(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server closed the session with a code that must not be retried.
    #[error("gateway closed with fatal code {code} ({reason})")]
    FatalClose {
        /// Close code.
        code: u16,
        /// What the code means.
        reason: &'static str,
    },

    /// The gateway did not send Hello in time.
    #[error("timed out waiting for Hello from gateway")]
    HelloTimeout,

    /// The gateway sent something the protocol does not allow.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The connection went away underneath a send.
    #[error("connection closed")]
    ConnectionClosed,

    /// Too many consecutive reconnects failed to re-establish the session.
    #[error("gave up after {attempts} consecutive reconnect attempts")]
    ReconnectLimit {
        /// Attempts made.
        attempts: u32,
    },

    /// A session task panicked or was aborted.
    #[error("session task failed: {0}")]
    Task(String),

    /// Shutdown was requested.
    #[error("shutdown requested")]
    Shutdown,
}

impl GatewayError {
    /// Whether the session must stop instead of reconnecting.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::FatalClose { .. } | Self::ReconnectLimit { .. } | Self::Task(_) | Self::Shutdown
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl From<dcore_core::Cancelled> for GatewayError {
    fn from(_: dcore_core::Cancelled) -> Self {
        Self::Shutdown
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = GatewayError::FatalClose {
            code: 4004,
            reason: "authentication failed",
        };
        assert!(err.to_string().contains("4004"));

        let err = GatewayError::HelloTimeout;
        assert!(err.to_string().contains("Hello"));

        let err = GatewayError::Protocol("bad opcode".into());
        assert!(err.to_string().contains("bad opcode"));

        let err = GatewayError::ReconnectLimit { attempts: 3 };
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn only_terminal_errors_are_fatal() {
        assert!(
            GatewayError::FatalClose {
                code: 4014,
                reason: "disallowed intents"
            }
            .is_fatal()
        );
        assert!(GatewayError::ReconnectLimit { attempts: 1 }.is_fatal());
        assert!(!GatewayError::HelloTimeout.is_fatal());
        assert!(!GatewayError::ConnectionClosed.is_fatal());
        assert!(!GatewayError::Connect("refused".into()).is_fatal());
    }
}
