//! Session configuration
//!
//! Configuration is resolved once, from explicit [`ClientOptions`] and an
//! environment lookup, into an immutable-by-default [`StreamConfig`]. Only
//! reconnect timing and the subscription list can change afterwards, through
//! typed setters.
//!
//! # Example
//!
//! ```
//! use cw_stream::config::{ClientOptions, StreamConfig};
//!
//! let options = ClientOptions::new()
//!     .with_api_key("my-api-key")
//!     .with_secret_key("dGVzdF9zZWNyZXRfa2V5")
//!     .with_reconnect_timeout(2);
//!
//! // Pure resolution: no process environment involved
//! let config = StreamConfig::resolve(options, |_| None).unwrap();
//! assert_eq!(config.backoff().base_delay.as_secs(), 2);
//! ```

use crate::backoff::Backoff;
use cw_stream_auth::{AuthError, Credentials};
use std::time::Duration;

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "CW_API_KEY";

/// Environment variable holding the base64 secret key
pub const SECRET_KEY_ENV: &str = "CW_SECRET_KEY";

/// Stream endpoint used when no URL is configured
pub const DEFAULT_URL: &str = "wss://stream.cryptowat.ch/connect";

/// Default base reconnect delay in seconds
pub const DEFAULT_RECONNECT_TIMEOUT: u64 = 1;

/// Default maximum reconnect delay in seconds
pub const DEFAULT_MAX_RECONNECT_TIMEOUT: u64 = 30;

/// Configuration validation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// No API key in options or environment
    #[error("API key is required (set CW_API_KEY or pass it explicitly)")]
    MissingApiKey,

    /// No secret key in options or environment
    #[error("secret key is required (set CW_SECRET_KEY or pass it explicitly)")]
    MissingSecretKey,

    /// Secret key could not be decoded
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Base delay below one second
    #[error("reconnect timeout must be at least 1 second")]
    ReconnectTimeoutTooShort,

    /// Max delay below base delay
    #[error("max reconnect timeout ({max}s) must not be lower than reconnect timeout ({base}s)")]
    MaxBelowBase { base: u64, max: u64 },
}

impl From<AuthError> for ConfigError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingApiKey => Self::MissingApiKey,
            AuthError::MissingSecretKey => Self::MissingSecretKey,
            AuthError::InvalidCredentials(reason) => Self::InvalidCredentials(reason),
        }
    }
}

/// Explicit client options; anything left unset falls back to the
/// environment (credentials) or to defaults
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
    pub subscriptions: Vec<String>,
    pub reconnect: Option<bool>,
    pub backoff: Option<bool>,
    /// Seconds
    pub reconnect_timeout: Option<u64>,
    /// Seconds
    pub max_reconnect_timeout: Option<u64>,
    pub verbose: Option<bool>,
    pub connect_timeout: Option<Duration>,
}

impl ClientOptions {
    /// Create empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the stream URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the API key
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the base64 secret key
    pub fn with_secret_key(mut self, key: impl Into<String>) -> Self {
        self.secret_key = Some(key.into());
        self
    }

    /// Set the stream subscriptions sent with the authentication request
    pub fn with_subscriptions<I, S>(mut self, subscriptions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subscriptions = subscriptions.into_iter().map(Into::into).collect();
        self
    }

    /// Enable or disable automatic reconnection
    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = Some(reconnect);
        self
    }

    /// Enable or disable exponential backoff
    pub fn with_backoff(mut self, backoff: bool) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Set the base reconnect delay in seconds
    pub fn with_reconnect_timeout(mut self, secs: u64) -> Self {
        self.reconnect_timeout = Some(secs);
        self
    }

    /// Set the maximum reconnect delay in seconds
    pub fn with_max_reconnect_timeout(mut self, secs: u64) -> Self {
        self.max_reconnect_timeout = Some(secs);
        self
    }

    /// Log lifecycle transitions at info level
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }

    /// Set the transport connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

/// Resolved session configuration
#[derive(Debug, Clone)]
pub struct StreamConfig {
    url: String,
    credentials: Credentials,
    subscriptions: Vec<String>,
    reconnect: bool,
    backoff: bool,
    reconnect_timeout: u64,
    max_reconnect_timeout: u64,
    verbose: bool,
    connect_timeout: Duration,
}

impl StreamConfig {
    /// Resolve options against an environment lookup.
    ///
    /// Explicit options win over the environment. Empty values count as
    /// missing.
    pub fn resolve<F>(options: ClientOptions, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |value: Option<String>| value.filter(|v| !v.is_empty());

        let api_key = non_empty(options.api_key)
            .or_else(|| non_empty(env(API_KEY_ENV)))
            .ok_or(ConfigError::MissingApiKey)?;
        let secret_key = non_empty(options.secret_key)
            .or_else(|| non_empty(env(SECRET_KEY_ENV)))
            .ok_or(ConfigError::MissingSecretKey)?;

        let credentials = Credentials::new(api_key, secret_key)?;

        let reconnect_timeout = options.reconnect_timeout.unwrap_or(DEFAULT_RECONNECT_TIMEOUT);
        let max_reconnect_timeout = options
            .max_reconnect_timeout
            .unwrap_or(DEFAULT_MAX_RECONNECT_TIMEOUT);
        validate_timeouts(reconnect_timeout, max_reconnect_timeout)?;

        Ok(Self {
            url: options.url.unwrap_or_else(|| DEFAULT_URL.to_string()),
            credentials,
            subscriptions: options.subscriptions,
            reconnect: options.reconnect.unwrap_or(true),
            backoff: options.backoff.unwrap_or(true),
            reconnect_timeout,
            max_reconnect_timeout,
            verbose: options.verbose.unwrap_or(false),
            connect_timeout: options.connect_timeout.unwrap_or(Duration::from_secs(10)),
        })
    }

    /// Resolve options against the process environment
    pub fn from_env(options: ClientOptions) -> Result<Self, ConfigError> {
        Self::resolve(options, |name| std::env::var(name).ok())
    }

    /// Stream URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Credentials used for the handshake
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// API key
    pub fn api_key(&self) -> &str {
        self.credentials.api_key()
    }

    /// Stream subscriptions sent with the authentication request
    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    /// Automatic reconnection enabled
    pub fn reconnect(&self) -> bool {
        self.reconnect
    }

    /// Verbose lifecycle logging
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Transport connect timeout
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Reconnect delay policy derived from the timing fields
    pub fn backoff(&self) -> Backoff {
        Backoff::new()
            .with_base_delay(Duration::from_secs(self.reconnect_timeout))
            .with_max_delay(Duration::from_secs(self.max_reconnect_timeout))
            .with_exponential(self.backoff)
    }

    /// Enable or disable automatic reconnection
    pub fn set_reconnect(&mut self, reconnect: bool) {
        self.reconnect = reconnect;
    }

    /// Enable or disable exponential backoff
    pub fn set_backoff(&mut self, backoff: bool) {
        self.backoff = backoff;
    }

    /// Set the base reconnect delay in seconds
    pub fn set_reconnect_timeout(&mut self, secs: u64) -> Result<(), ConfigError> {
        validate_timeouts(secs, self.max_reconnect_timeout)?;
        self.reconnect_timeout = secs;
        Ok(())
    }

    /// Set the maximum reconnect delay in seconds
    pub fn set_max_reconnect_timeout(&mut self, secs: u64) -> Result<(), ConfigError> {
        validate_timeouts(self.reconnect_timeout, secs)?;
        self.max_reconnect_timeout = secs;
        Ok(())
    }

    /// Replace the stream subscriptions; used from the next handshake on
    pub fn set_subscriptions(&mut self, subscriptions: Vec<String>) {
        self.subscriptions = subscriptions;
    }
}

fn validate_timeouts(base: u64, max: u64) -> Result<(), ConfigError> {
    if base < 1 {
        return Err(ConfigError::ReconnectTimeoutTooShort);
    }
    if max < base {
        return Err(ConfigError::MaxBelowBase { base, max });
    }
    Ok(())
}
