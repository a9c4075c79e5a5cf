//! Connection states and client events

use cw_stream_types::{MarketUpdate, PairUpdate, StreamError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Created, `connect` not called yet
    #[default]
    WaitingToConnect,
    /// Opening the transport
    Connecting,
    /// Transport open, authentication request sent
    Authenticating,
    /// Authenticated; data flows and subscriptions are live
    Connected,
    /// Transport closed
    Disconnected,
    /// Reconnect timer armed
    WaitingToReconnect,
}

impl ConnectionState {
    /// Canonical state name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingToConnect => "WAITING_TO_CONNECT",
            Self::Connecting => "CONNECTING",
            Self::Authenticating => "AUTHENTICATING",
            Self::Connected => "CONNECTED",
            Self::Disconnected => "DISCONNECTED",
            Self::WaitingToReconnect => "WAITING_TO_RECONNECT",
        }
    }

    /// A transport is open or being opened
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Authenticating | Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event published on the notification bus
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Connection state changed
    StateChanged(ConnectionState),
    /// Authenticated; fired on every (re)connection
    Connected,
    /// Transport closed
    Disconnected,
    /// Reconnect scheduled after `delay`
    ReconnectScheduled { delay: Duration },
    /// Runtime error
    Error(StreamError),
    /// Market data update
    MarketUpdate(MarketUpdate),
    /// Raw pair channel update
    PairUpdate(PairUpdate),
}

impl StreamEvent {
    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StateChanged(_) => "state",
            Self::Connected => "connect",
            Self::Disconnected => "disconnect",
            Self::ReconnectScheduled { .. } => "reconnect",
            Self::Error(_) => "error",
            Self::MarketUpdate(_) => "market update",
            Self::PairUpdate(_) => "pair update",
        }
    }
}
