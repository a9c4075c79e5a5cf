//! Stream access credentials
//!
//! Implements the keyed digest the stream server expects in the
//! authentication request: HMAC-SHA512 over
//! `stream_access;access_key_id=<api key>;nonce=<nonce>;`, keyed with the
//! base64-decoded secret, base64 encoded.
//!
//! # Security
//!
//! The decoded secret is held in a `secrecy::SecretBox`, zeroized on drop and
//! redacted from `Debug` output.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretBox};
use sha2::Sha512;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{AuthError, AuthResult};

type HmacSha512 = Hmac<Sha512>;

/// Last nonce handed out, so nonces stay strictly increasing within a process
static LAST_NONCE: AtomicU64 = AtomicU64::new(0);

/// API credentials for the stream handshake
pub struct Credentials {
    /// API key (public)
    api_key: String,
    /// Secret key (decoded from base64, zeroized on drop)
    secret_key: SecretBox<Vec<u8>>,
}

impl Credentials {
    /// Create credentials from an API key and a base64 encoded secret key
    pub fn new(api_key: impl Into<String>, secret_key: impl AsRef<str>) -> AuthResult<Self> {
        let api_key = api_key.into();
        let secret_key = secret_key.as_ref();

        if api_key.is_empty() {
            return Err(AuthError::MissingApiKey);
        }
        if secret_key.is_empty() {
            return Err(AuthError::MissingSecretKey);
        }

        let decoded = BASE64.decode(secret_key).map_err(|e| {
            AuthError::InvalidCredentials(format!("Invalid base64 secret key: {}", e))
        })?;

        Ok(Self {
            api_key,
            secret_key: SecretBox::new(Box::new(decoded)),
        })
    }

    /// Get the API key
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Canonical string the token is computed over
    pub fn access_string(&self, nonce: &str) -> String {
        format!("stream_access;access_key_id={};nonce={};", self.api_key, nonce)
    }

    /// Compute the access token for a nonce
    pub fn token(&self, nonce: &str) -> String {
        let mut mac = HmacSha512::new_from_slice(self.secret_key.expose_secret())
            .expect("HMAC can take key of any size");
        mac.update(self.access_string(nonce).as_bytes());

        BASE64.encode(mac.finalize().into_bytes())
    }
}

/// Nanoseconds since the Unix epoch as a plain decimal string.
///
/// Integer formatting only: the value has 19 digits today, more than an
/// `f64` can carry, and must never appear in exponent notation.
pub fn nonce_at(time: DateTime<Utc>) -> String {
    let nanos = i128::from(time.timestamp()) * 1_000_000_000
        + i128::from(time.timestamp_subsec_nanos());
    nanos.to_string()
}

/// Generate a fresh nonce from the current time
///
/// Strictly increasing across calls in this process, even when two calls land
/// on the same clock reading.
pub fn generate_nonce() -> String {
    let now = Utc::now();
    let nanos = u64::try_from(
        i128::from(now.timestamp()) * 1_000_000_000 + i128::from(now.timestamp_subsec_nanos()),
    )
    .unwrap_or(0);

    let previous = LAST_NONCE
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(nanos.max(last + 1))
        })
        .unwrap_or(0);

    nanos.max(previous + 1).to_string()
}

impl Clone for Credentials {
    fn clone(&self) -> Self {
        Self {
            api_key: self.api_key.clone(),
            secret_key: SecretBox::new(Box::new(self.secret_key.expose_secret().clone())),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field(
                "api_key",
                &format!("{}...", self.api_key.chars().take(8).collect::<String>()),
            )
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}
