//! Stream client and connection driver
//!
//! [`StreamClient`] is the public handle. Every API call locks the
//! [`Session`], applies the input and wakes the driver task; nothing here
//! blocks on I/O. The driver task owns the transport, executes the outputs
//! the session queues and feeds transport events back into it.

use crate::config::{ClientOptions, ConfigError, StreamConfig};
use crate::events::{ConnectionState, StreamEvent};
use crate::hooks::Hooks;
use crate::session::{Output, Session};
use crate::subscription::ChannelUpdate;
use crate::transport::{Frame, Transport, TransportError, WsTransport};
use cw_stream_types::{MarketUpdate, PairUpdate, StreamError};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace};

/// State shared between the client handle and the driver task
struct Shared {
    session: Mutex<Session>,
    hooks: RwLock<Arc<Hooks>>,
    event_tx: RwLock<Option<mpsc::UnboundedSender<StreamEvent>>>,
    /// Coalesced driver wakeup; a notify without a waiter leaves a permit
    wake: Notify,
}

impl Shared {
    fn next_output(&self) -> Option<Output> {
        self.session.lock().poll_output()
    }

    /// Fan an event out to hooks, then to the event receiver
    fn publish(&self, event: StreamEvent) {
        trace!(kind = event.kind(), "Publishing event");

        let hooks = self.hooks.read().clone();
        hooks.dispatch(&event);

        if let Some(tx) = self.event_tx.read().as_ref() {
            let _ = tx.send(event);
        }
    }
}

enum Wakeup {
    Command,
    Inbound(Result<Option<Frame>, TransportError>),
    ReconnectTimer,
}

/// Connection driver, run as a single tokio task
struct Driver {
    transport: Box<dyn Transport>,
    reconnect_at: Option<Instant>,
}

impl Driver {
    async fn run(mut self, shared: Arc<Shared>) {
        debug!(endpoint = self.transport.endpoint(), "Connection driver started");

        loop {
            while let Some(output) = shared.next_output() {
                self.execute(output, &shared).await;
            }

            let connected = self.transport.is_connected();
            let deadline = self.reconnect_at;

            let wakeup = tokio::select! {
                _ = shared.wake.notified() => Wakeup::Command,
                frame = self.transport.recv(), if connected => Wakeup::Inbound(frame),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    Wakeup::ReconnectTimer
                }
            };

            match wakeup {
                Wakeup::Command => {}
                Wakeup::Inbound(Ok(Some(frame))) => {
                    shared.session.lock().handle_frame(frame.as_bytes());
                }
                Wakeup::Inbound(Ok(None)) => {
                    debug!("Server closed the connection");
                    shared.session.lock().handle_close();
                }
                Wakeup::Inbound(Err(e)) => self.fail_transport(e, &shared).await,
                Wakeup::ReconnectTimer => {
                    self.reconnect_at = None;
                    shared.session.lock().handle_reconnect_timer();
                }
            }
        }
    }

    async fn execute(&mut self, output: Output, shared: &Shared) {
        match output {
            Output::Open => {
                let result = self.transport.connect().await;
                let mut session = shared.session.lock();
                match result {
                    Ok(()) => session.handle_open(),
                    Err(e) => session.handle_connect_error(e.to_string()),
                }
            }
            Output::Transmit(frame) => {
                if let Err(e) = self.transport.send(frame).await {
                    self.fail_transport(e, shared).await;
                }
            }
            Output::Close => {
                if self.transport.is_connected() {
                    if let Err(e) = self.transport.close().await {
                        debug!(error = %e, "Error while closing transport");
                    }
                    shared.session.lock().handle_close();
                }
            }
            Output::ScheduleReconnect(delay) => {
                info!(?delay, "Reconnecting after delay");
                self.reconnect_at = Some(Instant::now() + delay);
            }
            Output::CancelReconnect => self.reconnect_at = None,
            Output::Notify(event) => shared.publish(event),
            Output::Deliver(delivery) => delivery.dispatch(),
        }
    }

    /// Report a send/receive failure and follow the close path
    async fn fail_transport(&mut self, error: TransportError, shared: &Shared) {
        shared.session.lock().handle_transport_error(error.to_string());
        if self.transport.is_connected() {
            let _ = self.transport.close().await;
        }
        shared.session.lock().handle_close();
    }
}

/// Resilient client for the authenticated market-data stream
///
/// # Example
///
/// ```no_run
/// use cw_stream::{ClientOptions, StreamClient};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     // Credentials come from CW_API_KEY / CW_SECRET_KEY
///     let client = StreamClient::new(ClientOptions::new())?;
///
///     client.on_connect(|| println!("Connected"));
///     client.subscribe_pairs("ticker", ["XBT/USD"], |update| {
///         println!("{}: {:?}", update.pair, update.data);
///     });
///
///     client.connect()?;
///     tokio::signal::ctrl_c().await?;
///     client.disconnect();
///     Ok(())
/// }
/// ```
pub struct StreamClient {
    shared: Arc<Shared>,
    /// Driver waiting to be spawned by the first `connect`
    driver: Mutex<Option<Driver>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamClient {
    /// Create a client over a WebSocket transport
    ///
    /// Options are resolved against the process environment; missing or
    /// invalid credentials are fatal.
    pub fn new(options: ClientOptions) -> Result<Self, ConfigError> {
        let config = StreamConfig::from_env(options)?;
        let transport = WsTransport::new(config.url()).with_timeout(config.connect_timeout());
        Ok(Self::with_transport(config, transport))
    }

    /// Create a client over a custom transport
    pub fn with_transport<T>(config: StreamConfig, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        let shared = Arc::new(Shared {
            session: Mutex::new(Session::new(config)),
            hooks: RwLock::new(Arc::new(Hooks::new())),
            event_tx: RwLock::new(None),
            wake: Notify::new(),
        });

        Self {
            shared,
            driver: Mutex::new(Some(Driver {
                transport: Box::new(transport),
                reconnect_at: None,
            })),
            task: Mutex::new(None),
        }
    }

    /// Start connecting
    ///
    /// Clears an earlier `disconnect`. A no-op while a connection is already
    /// being established or live. Must be called within a tokio runtime.
    pub fn connect(&self) -> Result<(), StreamError> {
        self.ensure_driver()?;
        self.shared.session.lock().connect();
        self.wake();
        Ok(())
    }

    /// Close the connection and suppress automatic reconnects
    ///
    /// Idempotent; `connect` re-enables reconnection.
    pub fn disconnect(&self) {
        self.shared.session.lock().disconnect();
        self.wake();
    }

    /// Send a raw frame on the live connection
    pub fn send(&self, frame: Frame) -> Result<(), StreamError> {
        self.shared.session.lock().send(frame)?;
        self.wake();
        Ok(())
    }

    /// Get the current connection state
    pub fn state(&self) -> ConnectionState {
        self.shared.session.lock().state()
    }

    /// Check if connected and authenticated
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> StreamConfig {
        self.shared.session.lock().config().clone()
    }

    /// Delay the next scheduled reconnect would wait
    pub fn reconnect_delay(&self) -> Duration {
        self.shared.session.lock().reconnect_delay()
    }

    /// Enable or disable automatic reconnection
    pub fn set_reconnect(&self, reconnect: bool) {
        self.shared.session.lock().set_reconnect(reconnect);
    }

    /// Enable or disable exponential backoff
    pub fn set_backoff(&self, backoff: bool) {
        self.shared.session.lock().set_backoff(backoff);
    }

    /// Set the base reconnect delay in seconds
    pub fn set_reconnect_timeout(&self, secs: u64) -> Result<(), ConfigError> {
        self.shared.session.lock().set_reconnect_timeout(secs)
    }

    /// Set the maximum reconnect delay in seconds
    pub fn set_max_reconnect_timeout(&self, secs: u64) -> Result<(), ConfigError> {
        self.shared.session.lock().set_max_reconnect_timeout(secs)
    }

    /// Replace the stream subscriptions sent with the next handshake
    pub fn set_subscriptions<I, S>(&self, subscriptions: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let subscriptions = subscriptions.into_iter().map(Into::into).collect();
        self.shared.session.lock().set_subscriptions(subscriptions);
    }

    /// Use a fixed nonce for every handshake (deterministic tests only)
    pub fn set_nonce_override(&self, nonce: Option<String>) {
        self.shared.session.lock().set_nonce_override(nonce);
    }

    /// Create a pair channel with options merged into its subscribe requests
    pub fn register_channel(&self, name: &str, options: Map<String, Value>) {
        self.shared.session.lock().register_channel(name, options);
    }

    /// Subscribe to pairs on a channel
    ///
    /// Returns the number of pairs that were not subscribed before. Pairs are
    /// sent right away when connected, otherwise once the next connection
    /// authenticates.
    pub fn subscribe_pairs<I, S, F>(&self, channel: &str, pairs: I, listener: F) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&ChannelUpdate) + Send + Sync + 'static,
    {
        let added = self
            .shared
            .session
            .lock()
            .subscribe(channel, pairs, Arc::new(listener));
        self.wake();
        added
    }

    /// Register a callback for successful authentication
    pub fn on_connect<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.with_hooks(|hooks| hooks.on_connect(f));
    }

    /// Register a callback for closed connections
    pub fn on_disconnect<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.with_hooks(|hooks| hooks.on_disconnect(f));
    }

    /// Register a callback for state transitions
    pub fn on_state_change<F>(&self, f: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.with_hooks(|hooks| hooks.on_state_change(f));
    }

    /// Register a callback for scheduled reconnects
    pub fn on_reconnect_scheduled<F>(&self, f: F)
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.with_hooks(|hooks| hooks.on_reconnect_scheduled(f));
    }

    /// Register a callback for runtime errors
    pub fn on_error<F>(&self, f: F)
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        self.with_hooks(|hooks| hooks.on_error(f));
    }

    /// Register a callback for market updates
    pub fn on_market_update<F>(&self, f: F)
    where
        F: Fn(&MarketUpdate) + Send + Sync + 'static,
    {
        self.with_hooks(|hooks| hooks.on_market_update(f));
    }

    /// Register a callback for every raw pair update
    pub fn on_pair_update<F>(&self, f: F)
    where
        F: Fn(&PairUpdate) + Send + Sync + 'static,
    {
        self.with_hooks(|hooks| hooks.on_pair_update(f));
    }

    /// Take the event receiver (can only be called once)
    ///
    /// Events are only buffered after the receiver has been taken.
    pub fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<StreamEvent>> {
        let mut event_tx = self.shared.event_tx.write();
        if event_tx.is_some() {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *event_tx = Some(tx);
        Some(rx)
    }

    /// Copy-on-write: the driver keeps dispatching on its own snapshot
    fn with_hooks(&self, register: impl FnOnce(Hooks) -> Hooks) {
        let mut guard = self.shared.hooks.write();
        let hooks = Arc::make_mut(&mut guard);
        *hooks = register(std::mem::take(hooks));
    }

    fn wake(&self) {
        self.shared.wake.notify_one();
    }

    fn ensure_driver(&self) -> Result<(), StreamError> {
        let mut pending = self.driver.lock();
        if pending.is_none() {
            return Ok(());
        }

        let handle = Handle::try_current().map_err(|_| StreamError::NoRuntime)?;
        if let Some(driver) = pending.take() {
            let task = handle.spawn(driver.run(self.shared.clone()));
            *self.task.lock() = Some(task);
        }
        Ok(())
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn client() -> StreamClient {
        let options = ClientOptions::new()
            .with_api_key("api-key")
            .with_secret_key("dGVzdF9zZWNyZXRfa2V5");
        let config = StreamConfig::resolve(options, |_| None).unwrap();
        let (transport, _handle) = MockTransport::new("wss://mock.test");
        StreamClient::with_transport(config, transport)
    }

    #[test]
    fn test_initial_state() {
        let client = client();
        assert_eq!(client.state(), ConnectionState::WaitingToConnect);
        assert!(!client.is_connected());
        assert_eq!(client.reconnect_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_connect_requires_runtime() {
        let client = client();
        assert_eq!(client.connect(), Err(StreamError::NoRuntime));
        assert_eq!(client.state(), ConnectionState::WaitingToConnect);
    }

    #[test]
    fn test_event_receiver_taken_once() {
        let client = client();
        assert!(client.take_event_receiver().is_some());
        assert!(client.take_event_receiver().is_none());
    }

    #[test]
    fn test_hook_registration_is_copy_on_write() {
        let client = client();
        client.on_connect(|| {});
        let snapshot = client.shared.hooks.read().clone();

        client.on_connect(|| {});
        client.on_error(|_| {});
        assert_eq!(snapshot.len(), 1);
        assert_eq!(client.shared.hooks.read().len(), 3);
    }

    #[test]
    fn test_send_when_disconnected() {
        let client = client();
        assert_eq!(
            client.send(Frame::Binary(vec![1])),
            Err(StreamError::NotConnected)
        );
    }

    #[test]
    fn test_setters_update_config() {
        let client = client();
        client.set_reconnect(false);
        client.set_subscriptions(["markets:*:trades"]);
        assert!(client.set_reconnect_timeout(0).is_err());

        let config = client.config();
        assert!(!config.reconnect());
        assert_eq!(config.subscriptions(), ["markets:*:trades".to_string()]);
    }
}
