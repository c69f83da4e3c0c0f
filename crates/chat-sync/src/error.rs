//! Error types for chat synchronization.

use crate::types::ConnectionState;
use thiserror::Error;

/// Result type for chat synchronization operations.
pub type Result<T> = std::result::Result<T, ChatError>;

/// Which part of the connection lifecycle produced a [`ChatError::Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPhase {
    Connecting,
    Reconnecting,
}

impl std::fmt::Display for ConnectPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectPhase::Connecting => f.write_str("connecting"),
            ConnectPhase::Reconnecting => f.write_str("reconnecting"),
        }
    }
}

/// Why a send was rejected as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendFailure {
    EmptyBody,
    NotConnected(ConnectionState),
    BothPathsFailed { live: String, durable: String },
}

impl std::fmt::Display for SendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendFailure::EmptyBody => f.write_str("message body is empty"),
            SendFailure::NotConnected(state) => write!(f, "connection is {}", state),
            SendFailure::BothPathsFailed { live, durable } => {
                write!(f, "live channel failed ({}) and storage failed ({})", live, durable)
            }
        }
    }
}

/// Errors that can occur while loading, connecting, sending or receiving.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ChatError {
    /// History fetch or persist request failed.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection error while {phase}: {reason}")]
    Connection { phase: ConnectPhase, reason: String },

    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Send failed: {0}")]
    Send(SendFailure),

    #[error("Hub protocol error: {0}")]
    Protocol(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cannot {op} while {state}")]
    InvalidState {
        op: &'static str,
        state: ConnectionState,
    },

    #[error("History was already loaded for this session")]
    HistoryAlreadyLoaded,

    /// The store already holds live or locally sent messages.
    #[error("History arrived after live messages were merged; seed refused")]
    SeedAfterLive,

    #[error("Operation timed out")]
    Timeout,
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Json(err.to_string())
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChatError::Timeout
        } else {
            ChatError::Transport(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChatError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ChatError::Transport(format!("websocket: {}", err))
    }
}

impl ChatError {
    pub fn connecting(reason: impl Into<String>) -> Self {
        ChatError::Connection {
            phase: ConnectPhase::Connecting,
            reason: reason.into(),
        }
    }

    pub fn reconnecting(reason: impl Into<String>) -> Self {
        ChatError::Connection {
            phase: ConnectPhase::Reconnecting,
            reason: reason.into(),
        }
    }

    /// Check if this error is worth another connection attempt.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChatError::Transport(_) | ChatError::Timeout | ChatError::Connection { .. }
        )
    }

    #[inline]
    #[must_use]
    pub fn is_send_failure(&self) -> bool {
        matches!(self, ChatError::Send(_))
    }

    #[inline]
    #[must_use]
    pub fn connect_phase(&self) -> Option<ConnectPhase> {
        match self {
            ChatError::Connection { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_retryable() {
        assert!(ChatError::Timeout.is_retryable());
    }

    #[test]
    fn test_invalid_session_not_retryable() {
        assert!(!ChatError::InvalidSession("blank".into()).is_retryable());
    }

    #[test]
    fn test_connection_error_carries_phase() {
        let err = ChatError::reconnecting("refused");
        assert_eq!(err.connect_phase(), Some(ConnectPhase::Reconnecting));
        assert_eq!(err.to_string(), "Connection error while reconnecting: refused");
    }

    #[test]
    fn test_send_failure_display() {
        let err = ChatError::Send(SendFailure::NotConnected(ConnectionState::Disconnected));
        assert!(err.is_send_failure());
        assert_eq!(err.to_string(), "Send failed: connection is Disconnected");
    }
}
