//! Decoded stream messages and the envelope codec

use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StreamError, StreamResult};
use crate::proto::{
    client_message, stream_envelope, ApiAuthentication, AuthStatus, AuthenticationResult,
    ClientMessage, MarketUpdate, PairUpdateFrame, StreamEnvelope,
};

/// Single byte the server sends as a keep-alive
pub const HEARTBEAT_MARKER: u8 = 1;

/// Returns true if `bytes` is exactly the heartbeat marker
pub fn is_heartbeat(bytes: &[u8]) -> bool {
    matches!(bytes, [HEARTBEAT_MARKER])
}

/// Raw pair channel update
///
/// Positional elements as sent by the server. By convention the pair is the
/// last element and the channel name the one before it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairUpdate {
    pub elements: Vec<Value>,
}

impl PairUpdate {
    /// Parse the JSON array carried inside a pair update frame
    pub fn from_json(payload: &str) -> StreamResult<Self> {
        serde_json::from_str(payload)
            .map_err(|e| StreamError::ProtobufDecode(format!("pair update payload: {}", e)))
    }

    /// Subscription key (last positional element)
    pub fn key(&self) -> Option<&str> {
        self.elements.last().and_then(Value::as_str)
    }

    /// Channel name (second to last positional element)
    pub fn channel_name(&self) -> Option<&str> {
        let len = self.elements.len();
        if len < 2 {
            return None;
        }
        self.elements[len - 2].as_str()
    }
}

/// A decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// Keep-alive, no payload
    Heartbeat,
    /// Answer to the authentication request
    AuthenticationResult {
        status: AuthStatus,
        /// Raw status code as sent, kept for unknown values
        code: i32,
    },
    /// Market data update
    MarketUpdate(MarketUpdate),
    /// Pair channel update
    PairUpdate(PairUpdate),
}

impl StreamMessage {
    /// Decode an inbound binary frame
    pub fn decode(bytes: &[u8]) -> StreamResult<Self> {
        if is_heartbeat(bytes) {
            return Ok(Self::Heartbeat);
        }

        let envelope = StreamEnvelope::decode(bytes)?;

        match envelope.body {
            Some(stream_envelope::Body::AuthenticationResult(result)) => {
                let status = AuthStatus::try_from(result.status).unwrap_or(AuthStatus::Unknown);
                Ok(Self::AuthenticationResult {
                    status,
                    code: result.status,
                })
            }
            Some(stream_envelope::Body::MarketUpdate(update)) => Ok(Self::MarketUpdate(update)),
            Some(stream_envelope::Body::PairUpdate(frame)) => {
                PairUpdate::from_json(&frame.payload).map(Self::PairUpdate)
            }
            None => Err(StreamError::UnrecognizedMessage),
        }
    }

    /// Encode into the server-side wire form
    ///
    /// The client never sends these; mock servers and tests do.
    pub fn encode(&self) -> Vec<u8> {
        let body = match self {
            Self::Heartbeat => return vec![HEARTBEAT_MARKER],
            Self::AuthenticationResult { code, .. } => {
                stream_envelope::Body::AuthenticationResult(AuthenticationResult { status: *code })
            }
            Self::MarketUpdate(update) => stream_envelope::Body::MarketUpdate(update.clone()),
            Self::PairUpdate(update) => stream_envelope::Body::PairUpdate(PairUpdateFrame {
                payload: Value::Array(update.elements.clone()).to_string(),
            }),
        };
        StreamEnvelope { body: Some(body) }.encode_to_vec()
    }

    /// Short label for logs and errors
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::AuthenticationResult { .. } => "authentication result",
            Self::MarketUpdate(_) => "market update",
            Self::PairUpdate(_) => "pair update",
        }
    }
}

/// Encode an authentication request into a client envelope
pub fn encode_auth(auth: ApiAuthentication) -> Vec<u8> {
    ClientMessage {
        body: Some(client_message::Body::ApiAuthentication(auth)),
    }
    .encode_to_vec()
}

/// Decode a client envelope carrying an authentication request
pub fn decode_auth(bytes: &[u8]) -> StreamResult<ApiAuthentication> {
    match ClientMessage::decode(bytes)?.body {
        Some(client_message::Body::ApiAuthentication(auth)) => Ok(auth),
        None => Err(StreamError::UnrecognizedMessage),
    }
}
