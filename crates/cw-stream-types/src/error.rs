//! Error types for the stream client
//!
//! Every fault the client can observe at runtime is one of these variants.
//! None of them are thrown past the client: they are delivered on the error
//! notification channel and the connection carries on (or cycles through a
//! reconnect, for transport and authentication failures).

use thiserror::Error;

use crate::proto::AuthStatus;

/// Runtime error reported through the client's error notifications
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    // === Transport Errors ===
    /// The transport could not be opened
    #[error("Connection refused by {url}: {reason}")]
    ConnectionRefused { url: String, reason: String },

    /// A live transport failed while sending or receiving
    #[error("Transport error: {0}")]
    Transport(String),

    // === Protocol Errors ===
    /// Inbound bytes were not a valid envelope
    #[error("Failed to decode message envelope: {0}")]
    ProtobufDecode(String),

    /// Envelope decoded but carried no body this client understands
    #[error("Unrecognized message envelope")]
    UnrecognizedMessage,

    /// A data message arrived before authentication completed
    #[error("Unexpected {0} message while authenticating")]
    UnexpectedMessage(&'static str),

    // === Authentication Errors ===
    /// Server reported the token as expired
    #[error("Authentication token expired")]
    TokenExpired,

    /// Server rejected the nonce
    #[error("Authentication rejected: bad nonce")]
    BadNonce,

    /// Server rejected the token
    #[error("Authentication rejected: bad token")]
    BadToken,

    /// Server answered with a status this client does not know
    #[error("Authentication failed with unknown status {0}")]
    UnknownAuthStatus(i32),

    // === Client Errors ===
    /// An outbound frame was requested while no connection is live
    #[error("Not connected")]
    NotConnected,

    /// `connect` was called outside of a tokio runtime
    #[error("No tokio runtime available to drive the connection")]
    NoRuntime,
}

impl StreamError {
    /// Stable, protocol-style name of this error
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionRefused { .. } => "CONNECTION_REFUSED",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::ProtobufDecode(_) => "PROTOBUF_ERROR",
            Self::UnrecognizedMessage => "UNRECOGNIZED_MESSAGE",
            Self::UnexpectedMessage(_) => "UNEXPECTED_MESSAGE",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::BadNonce => "BAD_NONCE",
            Self::BadToken => "BAD_TOKEN",
            Self::UnknownAuthStatus(_) => "UNKNOWN",
            Self::NotConnected => "NOT_CONNECTED",
            Self::NoRuntime => "NO_RUNTIME",
        }
    }

    /// Returns true if this error came out of the authentication handshake
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::TokenExpired | Self::BadNonce | Self::BadToken | Self::UnknownAuthStatus(_)
        )
    }

    /// Returns true if a reconnect cycle follows this error (when enabled)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionRefused { .. } | Self::Transport(_)) || self.is_auth_failure()
    }

    /// Returns true for protocol faults that leave the connection untouched
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::ProtobufDecode(_) | Self::UnrecognizedMessage | Self::UnexpectedMessage(_)
        )
    }

    /// Map a rejected authentication status to its error.
    ///
    /// Returns `None` for [`AuthStatus::Authenticated`].
    pub fn from_auth_status(status: AuthStatus, code: i32) -> Option<Self> {
        match status {
            AuthStatus::Authenticated => None,
            AuthStatus::TokenExpired => Some(Self::TokenExpired),
            AuthStatus::BadNonce => Some(Self::BadNonce),
            AuthStatus::BadToken => Some(Self::BadToken),
            AuthStatus::Unknown => Some(Self::UnknownAuthStatus(code)),
        }
    }
}

impl From<prost::DecodeError> for StreamError {
    fn from(err: prost::DecodeError) -> Self {
        Self::ProtobufDecode(err.to_string())
    }
}

/// Result type alias for stream operations
pub type StreamResult<T> = Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_names() {
        assert_eq!(StreamError::BadNonce.name(), "BAD_NONCE");
        assert_eq!(StreamError::BadToken.name(), "BAD_TOKEN");
        assert_eq!(StreamError::TokenExpired.name(), "TOKEN_EXPIRED");
        assert_eq!(StreamError::UnknownAuthStatus(0).name(), "UNKNOWN");
        assert_eq!(
            StreamError::ProtobufDecode("bad wire type".into()).name(),
            "PROTOBUF_ERROR"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(StreamError::BadToken.is_auth_failure());
        assert!(StreamError::BadToken.is_retryable());
        assert!(StreamError::Transport("reset".into()).is_retryable());
        assert!(!StreamError::UnrecognizedMessage.is_retryable());
        assert!(StreamError::UnrecognizedMessage.is_protocol_error());
        assert!(!StreamError::NotConnected.is_protocol_error());
    }

    #[test]
    fn test_from_auth_status() {
        assert_eq!(StreamError::from_auth_status(AuthStatus::Authenticated, 1), None);
        assert_eq!(
            StreamError::from_auth_status(AuthStatus::BadNonce, 4),
            Some(StreamError::BadNonce)
        );
        assert_eq!(
            StreamError::from_auth_status(AuthStatus::Unknown, 42),
            Some(StreamError::UnknownAuthStatus(42))
        );
    }
}
