//! WebSocket transport abstraction
//!
//! This module provides a trait-based abstraction over the stream socket,
//! so the connection driver can be exercised without real network calls.
//!
//! # Example
//!
//! ```no_run
//! use cw_stream::transport::{Frame, Transport, TransportError, WsTransport};
//!
//! async fn example() -> Result<(), TransportError> {
//!     let mut transport = WsTransport::new("wss://stream.cryptowat.ch/connect");
//!     transport.connect().await?;
//!     transport.send(Frame::Binary(vec![1])).await?;
//!     if let Some(frame) = transport.recv().await? {
//!         println!("Received {} bytes", frame.len());
//!     }
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, instrument, trace};

/// Transport layer errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Connection timeout
    #[error("connection timeout after {0:?}")]
    Timeout(Duration),

    /// Not connected
    #[error("not connected")]
    NotConnected,
}

/// A single message on the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Binary frame (protobuf envelopes, heartbeats)
    Binary(Vec<u8>),
    /// Text frame (JSON subscribe requests)
    Text(String),
}

impl Frame {
    /// Payload bytes regardless of frame type
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Binary(data) => data,
            Self::Text(text) => text.as_bytes(),
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns true for an empty payload
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Text payload, if this is a text frame
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }
}

/// Trait for stream transport abstraction
///
/// Every successful `connect` yields a fresh physical connection; the
/// previous one, if any, is gone.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new connection to the endpoint
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Send a frame
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Receive the next data frame
    ///
    /// Returns `None` if the connection was closed gracefully.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;

    /// Close the connection gracefully
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if currently connected
    fn is_connected(&self) -> bool;

    /// Get the endpoint URL
    fn endpoint(&self) -> &str;
}

/// Real WebSocket transport using tokio-tungstenite
pub struct WsTransport {
    url: String,
    stream: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    connect_timeout: Duration,
}

impl WsTransport {
    /// Create a new WebSocket transport
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream: None,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Set connection timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for WsTransport {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn connect(&mut self) -> Result<(), TransportError> {
        debug!("Connecting to WebSocket");

        let (ws_stream, _response) = timeout(self.connect_timeout, connect_async(&self.url))
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        self.stream = Some(ws_stream);
        debug!("WebSocket connected");
        Ok(())
    }

    #[instrument(skip(self, frame), fields(len = frame.len()))]
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

        let message = match frame {
            Frame::Binary(data) => Message::Binary(data),
            Frame::Text(text) => Message::Text(text),
        };

        stream
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    #[instrument(skip(self))]
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(Frame::Binary(data))),
                Some(Ok(Message::Text(text))) => return Ok(Some(Frame::Text(text))),
                Some(Ok(Message::Close(_))) => {
                    self.stream = None;
                    return Ok(None);
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // tungstenite answers pings itself
                    trace!("Control frame");
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                None => {
                    self.stream = None;
                    return Err(TransportError::ConnectionClosed);
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            stream
                .close(None)
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockHandle, MockTransport};

#[cfg(any(test, feature = "test-utils"))]
mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    type Inbound = Result<Option<Frame>, TransportError>;

    #[derive(Default)]
    struct MockState {
        connected: bool,
        connect_count: usize,
        fail_connects: usize,
        fail_send: bool,
        sent: Vec<Frame>,
    }

    /// Mock transport for testing
    ///
    /// Scripted through its [`MockHandle`]: inbound frames, closes and errors
    /// are queued on the handle and returned by `recv` in order; frames the
    /// client sends are captured for inspection.
    pub struct MockTransport {
        url: String,
        state: Arc<Mutex<MockState>>,
        inbound: mpsc::UnboundedReceiver<Inbound>,
    }

    /// Test-side handle of a [`MockTransport`]
    #[derive(Clone)]
    pub struct MockHandle {
        state: Arc<Mutex<MockState>>,
        inbound: mpsc::UnboundedSender<Inbound>,
    }

    impl MockTransport {
        /// Create a new mock transport and its handle
        pub fn new(url: impl Into<String>) -> (Self, MockHandle) {
            let (tx, rx) = mpsc::unbounded_channel();
            let state = Arc::new(Mutex::new(MockState::default()));

            let transport = Self {
                url: url.into(),
                state: state.clone(),
                inbound: rx,
            };
            (transport, MockHandle { state, inbound: tx })
        }
    }

    impl MockHandle {
        /// Queue an inbound frame
        pub fn push_frame(&self, frame: Frame) {
            let _ = self.inbound.send(Ok(Some(frame)));
        }

        /// Queue an inbound binary frame
        pub fn push_binary(&self, data: impl Into<Vec<u8>>) {
            self.push_frame(Frame::Binary(data.into()));
        }

        /// Simulate the server closing the connection
        pub fn push_close(&self) {
            let _ = self.inbound.send(Ok(None));
        }

        /// Simulate a receive error
        pub fn push_error(&self, error: TransportError) {
            let _ = self.inbound.send(Err(error));
        }

        /// Make the next `n` connection attempts fail
        pub fn fail_next_connects(&self, n: usize) {
            self.state.lock().fail_connects = n;
        }

        /// Make every send fail
        pub fn set_fail_send(&self, fail: bool) {
            self.state.lock().fail_send = fail;
        }

        /// Frames sent so far
        pub fn sent(&self) -> Vec<Frame> {
            self.state.lock().sent.clone()
        }

        /// Take and clear the sent frames
        pub fn take_sent(&self) -> Vec<Frame> {
            std::mem::take(&mut self.state.lock().sent)
        }

        /// Number of connection attempts so far (failed ones included)
        pub fn connect_count(&self) -> usize {
            self.state.lock().connect_count
        }

        /// Whether the transport currently holds a connection
        pub fn is_connected(&self) -> bool {
            self.state.lock().connected
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&mut self) -> Result<(), TransportError> {
            let mut state = self.state.lock();
            state.connect_count += 1;
            if state.fail_connects > 0 {
                state.fail_connects -= 1;
                return Err(TransportError::ConnectionFailed(
                    "mock connection failure".into(),
                ));
            }
            state.connected = true;
            Ok(())
        }

        async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
            let mut state = self.state.lock();
            if !state.connected {
                return Err(TransportError::NotConnected);
            }
            if state.fail_send {
                return Err(TransportError::SendFailed("mock send failure".into()));
            }
            state.sent.push(frame);
            Ok(())
        }

        async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
            if !self.is_connected() {
                return Err(TransportError::NotConnected);
            }
            let next = self.inbound.recv().await.unwrap_or(Ok(None));
            if matches!(next, Ok(None) | Err(_)) {
                self.state.lock().connected = false;
            }
            next
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.state.lock().connected = false;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.state.lock().connected
        }

        fn endpoint(&self) -> &str {
            &self.url
        }
    }
}
