//! Authentication request construction and result interpretation

use cw_stream_types::{encode_auth, ApiAuthentication, AuthStatus, ClientSource, StreamError};
use tracing::debug;

use crate::credentials::{generate_nonce, Credentials};

/// Builder for the authentication request sent after the transport opens
#[derive(Debug)]
pub struct AuthRequest<'a> {
    credentials: &'a Credentials,
    nonce: String,
    subscriptions: Vec<String>,
    client_version: String,
}

impl<'a> AuthRequest<'a> {
    /// Create a request with a fresh time-based nonce
    pub fn new(credentials: &'a Credentials, client_version: impl Into<String>) -> Self {
        Self {
            credentials,
            nonce: generate_nonce(),
            subscriptions: Vec::new(),
            client_version: client_version.into(),
        }
    }

    /// Replace the generated nonce (deterministic tests only)
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = nonce.into();
        self
    }

    /// Set the stream subscriptions requested at authentication time
    pub fn with_subscriptions(mut self, subscriptions: Vec<String>) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    /// Get the nonce for this request
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Build the protobuf message, computing the token
    pub fn to_message(&self) -> ApiAuthentication {
        ApiAuthentication {
            api_key: self.credentials.api_key().to_string(),
            nonce: self.nonce.clone(),
            token: self.credentials.token(&self.nonce),
            source: ClientSource::Rust as i32,
            subscriptions: self.subscriptions.clone(),
            client_version: self.client_version.clone(),
        }
    }

    /// Encode the request into an outbound envelope
    pub fn encode(&self) -> Vec<u8> {
        debug!(
            subscriptions = self.subscriptions.len(),
            "Encoding authentication request"
        );
        encode_auth(self.to_message())
    }
}

/// Interpret an authentication result
///
/// `Ok(())` means the session is authenticated; any other status maps to
/// the error that must be reported before the connection is dropped.
pub fn interpret_result(status: AuthStatus, code: i32) -> Result<(), StreamError> {
    match StreamError::from_auth_status(status, code) {
        None => Ok(()),
        Some(err) => Err(err),
    }
}
