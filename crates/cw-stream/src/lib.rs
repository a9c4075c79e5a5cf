//! Resilient client for the authenticated market-data stream
//!
//! This crate keeps a single authenticated stream connection alive and
//! multiplexes pair channels over it.
//!
//! # Features
//!
//! - HMAC-signed authentication on every (re)connection
//! - Automatic reconnection with bounded exponential backoff
//! - Pair subscriptions batched, deduplicated and replayed after reconnect
//! - Callback hooks and an async event stream for lifecycle and data events
//!
//! # Example
//!
//! ```no_run
//! use cw_stream::{ClientOptions, StreamClient, StreamEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = ClientOptions::new()
//!         .with_subscriptions(["markets:*:trades"])
//!         .with_max_reconnect_timeout(60);
//!
//!     let client = StreamClient::new(options)?;
//!     client.subscribe_pairs("book", ["XBT/USD"], |update| {
//!         println!("{} {:?}", update.pair, update.data);
//!     });
//!
//!     let mut events = client.take_event_receiver().unwrap();
//!     client.connect()?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let StreamEvent::Error(err) = event {
//!             eprintln!("{}: {}", err.name(), err);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod connection;
pub mod events;
pub mod hooks;
pub mod session;
pub mod subscription;
pub mod transport;

// Re-export main types
pub use backoff::{Backoff, ReconnectTimer};
pub use config::{ClientOptions, ConfigError, StreamConfig};
pub use connection::StreamClient;
pub use events::{ConnectionState, StreamEvent};
pub use hooks::Hooks;
pub use session::{Output, Session, CLIENT_VERSION};
pub use subscription::{Channel, ChannelUpdate, Multiplexer, MAX_PAIRS_PER_REQUEST};
pub use transport::{Frame, Transport, TransportError, WsTransport};

pub use cw_stream_types::{MarketUpdate, PairUpdate, StreamError};
