//! Authentication for the market-data stream
//!
//! The stream handshake is challenge-free: right after the transport opens
//! the client sends its API key, a time-based nonce and a token proving it
//! holds the secret key. This crate derives those values and interprets the
//! server's answer.
//!
//! # Example
//!
//! ```
//! use cw_stream_auth::{AuthRequest, Credentials};
//!
//! let creds = Credentials::new("my-api-key", "dGVzdF9zZWNyZXRfa2V5").unwrap();
//! let request = AuthRequest::new(&creds, "cw-stream-rs/0.1.0")
//!     .with_subscriptions(vec!["markets:*:trades".to_string()]);
//!
//! let bytes = request.encode();
//! assert!(!bytes.is_empty());
//! ```

mod credentials;
mod error;
mod handshake;

pub use credentials::{generate_nonce, nonce_at, Credentials};
pub use error::{AuthError, AuthResult};
pub use handshake::{interpret_result, AuthRequest};
