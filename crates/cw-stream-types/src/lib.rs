//! Shared types for the market-data stream client
//!
//! This crate holds the wire-level pieces of the workspace: the protobuf
//! envelope definitions, the codec that turns inbound bytes into a closed
//! [`StreamMessage`] union, and the [`StreamError`] taxonomy used by the
//! client's error notifications.
//!
//! # Key Types
//!
//! - [`StreamMessage`] - Decoded inbound message
//! - [`PairUpdate`] - Positional pair channel update
//! - [`ApiAuthentication`], [`AuthStatus`] - Handshake messages
//! - [`StreamError`] - Runtime error notifications

pub mod error;
pub mod messages;
pub mod proto;

pub use error::*;
pub use messages::*;
pub use proto::{ApiAuthentication, AuthStatus, ClientSource, MarketUpdate};
