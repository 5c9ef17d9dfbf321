//! Gateway client errors

use std::time::Duration;

use crate::connection::{ConnectionState, Trigger};

/// Errors produced by the gateway client
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// Missing or blank token, or unusable configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed inbound frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The outbound send budget is exhausted
    #[error("Rate limit exceeded, retry in {retry_in:?}")]
    RateLimitExceeded { retry_in: Duration },

    /// Socket or gateway URL lookup failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server rejected the token
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Session invalidated by the gateway")]
    SessionInvalidated,

    /// A trigger was fired in a state that does not accept it
    #[error("Illegal transition: {trigger:?} in state {state:?}")]
    IllegalTransition {
        state: ConnectionState,
        trigger: Trigger,
    },

    #[error("Session is not ready")]
    NotReady,

    #[error("Not connected to the gateway")]
    NotConnected,
}

impl GatewayError {
    /// Whether the condition needs the application to step in
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_) | Self::IllegalTransition { .. } | Self::Configuration(_)
        )
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
