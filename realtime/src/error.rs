//! Realtime error types.
//!
//! Provides error types for connection manager operations.

use crate::config::ConfigError;
use crate::state::ConnectionState;

/// Realtime connection errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RealtimeError {
    /// No endpoint is configured.
    #[error("realtime endpoint is not configured")]
    MissingEndpoint,

    /// The configured endpoint cannot be used.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The transport could not be constructed or the handshake failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// WebSocket protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A send was attempted while the connection is not open.
    #[error("connection is not open (state: {state}, ready state: {ready_state})")]
    NotOpen {
        /// Manager state at the time of the call.
        state: ConnectionState,
        /// WebSocket ready state value for diagnostics.
        ready_state: u8,
    },

    /// The transport rejected an outbound frame.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Failed to serialize an outbound message.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RealtimeError {
    /// Builds the not-open error for the given state.
    #[must_use]
    pub fn not_open(state: ConnectionState) -> Self {
        Self::NotOpen {
            ready_state: state.ready_state(),
            state,
        }
    }

    /// Returns true for errors that are never retried.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::MissingEndpoint | Self::InvalidEndpoint(_) | Self::Config(_)
        )
    }

    /// Returns true when a send failed only because the connection is down
    /// or going down. The connection may recover through a reconnect.
    #[must_use]
    pub const fn is_transient_send(&self) -> bool {
        matches!(self, Self::NotOpen { .. } | Self::SendFailed(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RealtimeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CloseReason;

    #[test]
    fn test_error_display() {
        let err = RealtimeError::Connection("refused".to_string());
        assert_eq!(err.to_string(), "connection failed: refused");
    }

    #[test]
    fn test_error_missing_endpoint() {
        let err = RealtimeError::MissingEndpoint;
        assert_eq!(err.to_string(), "realtime endpoint is not configured");
        assert!(err.is_configuration());
    }

    #[test]
    fn test_error_not_open_carries_ready_state() {
        let err = RealtimeError::not_open(ConnectionState::Connecting);
        assert_eq!(
            err,
            RealtimeError::NotOpen {
                state: ConnectionState::Connecting,
                ready_state: 0,
            }
        );
        assert_eq!(
            err.to_string(),
            "connection is not open (state: connecting, ready state: 0)"
        );
    }

    #[test]
    fn test_error_not_open_closed() {
        let err = RealtimeError::not_open(ConnectionState::Closed(CloseReason::Manual));
        assert!(err.to_string().contains("ready state: 3"));
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_error_from_config() {
        let err: RealtimeError = ConfigError::InvalidReconnectDelay.into();
        assert!(err.is_configuration());
        assert_eq!(err.to_string(), "reconnect_delay must be > 0");
    }

    #[test]
    fn test_error_transient_send() {
        assert!(RealtimeError::not_open(ConnectionState::Connecting).is_transient_send());
        assert!(RealtimeError::SendFailed("gone".to_string()).is_transient_send());
        assert!(!RealtimeError::Serialization("bad".to_string()).is_transient_send());
        assert!(!RealtimeError::MissingEndpoint.is_transient_send());
    }
}
