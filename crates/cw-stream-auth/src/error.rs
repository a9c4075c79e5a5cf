//! Error types for authentication setup

/// Errors raised while building credentials
///
/// These are configuration faults: a client is never constructed with
/// credentials that fail here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// API key is empty
    #[error("API key is missing")]
    MissingApiKey,

    /// Secret key is empty
    #[error("Secret key is missing")]
    MissingSecretKey,

    /// Secret key is not valid base64
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),
}

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;
