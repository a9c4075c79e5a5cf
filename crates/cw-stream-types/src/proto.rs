//! Protobuf wire messages
//!
//! Hand-maintained `prost` definitions for the subset of the stream envelope
//! schema this client speaks. Field tags must match the server schema.

/// Client-to-server envelope
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientMessage {
    #[prost(oneof = "client_message::Body", tags = "1")]
    pub body: Option<client_message::Body>,
}

pub mod client_message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "1")]
        ApiAuthentication(super::ApiAuthentication),
    }
}

/// Authentication request sent right after the transport opens
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ApiAuthentication {
    #[prost(string, tag = "1")]
    pub api_key: String,
    #[prost(string, tag = "2")]
    pub nonce: String,
    #[prost(string, tag = "3")]
    pub token: String,
    #[prost(enumeration = "ClientSource", tag = "4")]
    pub source: i32,
    #[prost(string, repeated, tag = "5")]
    pub subscriptions: Vec<String>,
    #[prost(string, tag = "6")]
    pub client_version: String,
}

/// Which client library produced a request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ClientSource {
    Unknown = 0,
    Golang = 1,
    Cli = 2,
    Javascript = 3,
    Rust = 4,
}

/// Server-to-client envelope
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamEnvelope {
    #[prost(oneof = "stream_envelope::Body", tags = "1, 2, 3")]
    pub body: Option<stream_envelope::Body>,
}

pub mod stream_envelope {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "1")]
        AuthenticationResult(super::AuthenticationResult),
        #[prost(message, tag = "2")]
        MarketUpdate(super::MarketUpdate),
        #[prost(message, tag = "3")]
        PairUpdate(super::PairUpdateFrame),
    }
}

/// Answer to [`ApiAuthentication`]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AuthenticationResult {
    #[prost(enumeration = "AuthStatus", tag = "1")]
    pub status: i32,
}

/// Authentication outcome reported by the server
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum AuthStatus {
    Unknown = 0,
    Authenticated = 1,
    TokenExpired = 2,
    BadToken = 3,
    BadNonce = 4,
}

/// Opaque market data update, passed through to listeners untouched
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MarketUpdate {
    #[prost(string, tag = "1")]
    pub market_id: String,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
}

/// Pair channel update; `payload` is a JSON array
/// `[channel_id, data.., channel_name, pair]`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PairUpdateFrame {
    #[prost(string, tag = "1")]
    pub payload: String,
}
