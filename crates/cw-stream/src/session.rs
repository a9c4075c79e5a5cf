//! Connection lifecycle state machine
//!
//! [`Session`] holds every piece of mutable connection state and makes all
//! transition decisions, but performs no I/O and never calls user code. Each
//! input (an API call or a transport event) may queue [`Output`]s that the
//! driver executes in order: opening or closing the transport, transmitting
//! frames, arming the reconnect timer, or publishing events.

use crate::backoff::ReconnectTimer;
use crate::config::{ConfigError, StreamConfig};
use crate::events::{ConnectionState, StreamEvent};
use crate::subscription::{Delivery, FrameSink, Multiplexer, PairListener};
use crate::transport::Frame;
use cw_stream_auth::{interpret_result, AuthRequest};
use cw_stream_types::{is_heartbeat, AuthStatus, StreamError, StreamMessage};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Client version reported in the authentication request
pub const CLIENT_VERSION: &str = concat!("cw-stream-rs/", env!("CARGO_PKG_VERSION"));

/// Action requested from the driver
#[derive(Debug)]
pub enum Output {
    /// Open a new transport connection
    Open,
    /// Send a frame on the live connection
    Transmit(Frame),
    /// Close the live connection, if any
    Close,
    /// Fire the reconnect timer after the delay
    ScheduleReconnect(Duration),
    /// Disarm the reconnect timer
    CancelReconnect,
    /// Publish an event on the notification bus
    Notify(StreamEvent),
    /// Invoke pair listeners
    Deliver(Delivery),
}

#[derive(Debug, Default)]
struct Outbox(VecDeque<Output>);

impl FrameSink for Outbox {
    fn send_frame(&mut self, frame: Frame) {
        self.0.push_back(Output::Transmit(frame));
    }
}

impl Outbox {
    fn push(&mut self, output: Output) {
        self.0.push_back(output);
    }

    fn notify(&mut self, event: StreamEvent) {
        self.0.push_back(Output::Notify(event));
    }
}

/// Sans-IO connection session
#[derive(Debug)]
pub struct Session {
    config: StreamConfig,
    state: ConnectionState,
    timer: ReconnectTimer,
    multiplexer: Multiplexer,
    outbox: Outbox,
    nonce_override: Option<String>,
    /// A reconnect timer is armed
    reconnect_pending: bool,
    /// The session closed the transport itself and awaits the close event
    closing: bool,
    /// `connect` arrived while a close was still in flight
    reopen_after_close: bool,
}

impl Session {
    /// Create a session in WAITING_TO_CONNECT
    pub fn new(config: StreamConfig) -> Self {
        let timer = ReconnectTimer::new(config.backoff());
        Self {
            config,
            state: ConnectionState::WaitingToConnect,
            timer,
            multiplexer: Multiplexer::new(),
            outbox: Outbox::default(),
            nonce_override: None,
            reconnect_pending: false,
            closing: false,
            reopen_after_close: false,
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Session configuration
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Pair channels
    pub fn multiplexer(&self) -> &Multiplexer {
        &self.multiplexer
    }

    /// Delay the next scheduled reconnect would wait
    pub fn reconnect_delay(&self) -> Duration {
        self.timer.current()
    }

    /// Use a fixed nonce for every handshake (deterministic tests only)
    pub fn set_nonce_override(&mut self, nonce: Option<String>) {
        self.nonce_override = nonce;
    }

    /// Take the next queued output
    pub fn poll_output(&mut self) -> Option<Output> {
        self.outbox.0.pop_front()
    }

    /// Take every queued output
    pub fn drain_outputs(&mut self) -> Vec<Output> {
        self.outbox.0.drain(..).collect()
    }

    // ---- configuration ----

    /// Enable or disable automatic reconnection
    pub fn set_reconnect(&mut self, reconnect: bool) {
        self.config.set_reconnect(reconnect);
    }

    /// Enable or disable exponential backoff
    pub fn set_backoff(&mut self, backoff: bool) {
        self.config.set_backoff(backoff);
        self.timer.set_policy(self.config.backoff());
    }

    /// Set the base reconnect delay in seconds
    pub fn set_reconnect_timeout(&mut self, secs: u64) -> Result<(), ConfigError> {
        self.config.set_reconnect_timeout(secs)?;
        self.timer.set_policy(self.config.backoff());
        Ok(())
    }

    /// Set the maximum reconnect delay in seconds
    pub fn set_max_reconnect_timeout(&mut self, secs: u64) -> Result<(), ConfigError> {
        self.config.set_max_reconnect_timeout(secs)?;
        self.timer.set_policy(self.config.backoff());
        Ok(())
    }

    /// Replace the stream subscriptions sent with the next handshake
    pub fn set_subscriptions(&mut self, subscriptions: Vec<String>) {
        self.config.set_subscriptions(subscriptions);
    }

    // ---- API inputs ----

    /// Start connecting; clears an earlier `disconnect`
    pub fn connect(&mut self) {
        let close_in_flight = self.timer.is_disabled() && self.state.is_active();
        self.timer.set_disabled(false);

        match self.state {
            ConnectionState::Disconnected if self.closing => {
                debug!("Connect requested while closing, reopening after close");
                self.reopen_after_close = true;
            }
            _ if close_in_flight => {
                debug!("Connect requested after disconnect, reopening after close");
                self.reopen_after_close = true;
            }
            ConnectionState::WaitingToConnect | ConnectionState::Disconnected => {
                self.open();
            }
            ConnectionState::WaitingToReconnect => {
                self.cancel_reconnect();
                self.open();
            }
            state => debug!(%state, "Connect ignored, connection already active"),
        }
    }

    /// Close the connection and suppress reconnects until the next `connect`
    pub fn disconnect(&mut self) {
        self.timer.set_disabled(true);
        self.reopen_after_close = false;

        match self.state {
            ConnectionState::Connecting
            | ConnectionState::Authenticating
            | ConnectionState::Connected => {
                self.outbox.push(Output::Close);
            }
            ConnectionState::WaitingToReconnect => {
                self.cancel_reconnect();
                self.enter_disconnected();
            }
            ConnectionState::WaitingToConnect | ConnectionState::Disconnected => {
                debug!(state = %self.state, "Disconnect: nothing to close");
            }
        }
    }

    /// Send a raw frame on the live connection
    pub fn send(&mut self, frame: Frame) -> Result<(), StreamError> {
        if self.state != ConnectionState::Connected {
            return Err(StreamError::NotConnected);
        }
        self.outbox.push(Output::Transmit(frame));
        Ok(())
    }

    /// Create a channel or replace its options
    pub fn register_channel(&mut self, name: &str, options: Map<String, Value>) {
        self.multiplexer.register_channel(name, options);
    }

    /// Attach a listener to pairs of a channel
    ///
    /// New pairs are sent right away when connected; otherwise they go out
    /// with the replay once the connection is authenticated.
    pub fn subscribe<I, S>(&mut self, channel: &str, pairs: I, listener: PairListener) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let added = self.multiplexer.subscribe(channel, pairs, listener);
        if self.state == ConnectionState::Connected {
            self.multiplexer.flush(&mut self.outbox);
        }
        added
    }

    // ---- transport inputs ----

    /// The transport finished opening
    pub fn handle_open(&mut self) {
        if self.state != ConnectionState::Connecting {
            warn!(state = %self.state, "Transport opened in unexpected state, closing");
            self.outbox.push(Output::Close);
            return;
        }

        if self.timer.is_disabled() || self.reopen_after_close {
            debug!("Disconnect requested while connecting, closing new transport");
            self.outbox.push(Output::Close);
            return;
        }

        self.transition(ConnectionState::Authenticating);

        let mut request = AuthRequest::new(self.config.credentials(), CLIENT_VERSION)
            .with_subscriptions(self.config.subscriptions().to_vec());
        if let Some(nonce) = &self.nonce_override {
            request = request.with_nonce(nonce.clone());
        }
        debug!(nonce = request.nonce(), "Sending authentication request");
        self.outbox.push(Output::Transmit(Frame::Binary(request.encode())));
    }

    /// The transport failed to open
    pub fn handle_connect_error(&mut self, reason: impl Into<String>) {
        if self.state != ConnectionState::Connecting {
            return;
        }

        let err = StreamError::ConnectionRefused {
            url: self.config.url().to_string(),
            reason: reason.into(),
        };
        warn!(error = %err, "Connection failed");
        self.reopen_after_close = false;
        self.outbox.notify(StreamEvent::Error(err));
        self.enter_disconnected();
        self.schedule_reconnect();
    }

    /// An inbound frame arrived
    pub fn handle_frame(&mut self, bytes: &[u8]) {
        if is_heartbeat(bytes) {
            trace!("Heartbeat");
            return;
        }

        let message = match StreamMessage::decode(bytes) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, len = bytes.len(), "Failed to decode inbound frame");
                self.outbox.notify(StreamEvent::Error(err));
                return;
            }
        };

        match message {
            StreamMessage::Heartbeat => {}
            StreamMessage::AuthenticationResult { status, code } => {
                self.handle_auth_result(status, code)
            }
            data if self.state == ConnectionState::Authenticating => {
                warn!(kind = data.kind(), "Data message before authentication completed");
                self.outbox
                    .notify(StreamEvent::Error(StreamError::UnexpectedMessage(data.kind())));
            }
            StreamMessage::MarketUpdate(update) => {
                self.outbox.notify(StreamEvent::MarketUpdate(update));
            }
            StreamMessage::PairUpdate(update) => {
                if let Some(delivery) = self.multiplexer.route(&update) {
                    self.outbox.push(Output::Deliver(delivery));
                }
                self.outbox.notify(StreamEvent::PairUpdate(update));
            }
        }
    }

    /// The transport closed, by either side
    pub fn handle_close(&mut self) {
        match self.state {
            ConnectionState::Connecting
            | ConnectionState::Authenticating
            | ConnectionState::Connected => {
                self.enter_disconnected();
                self.reopen_or_schedule();
            }
            ConnectionState::Disconnected if self.closing => {
                self.closing = false;
                self.reopen_or_schedule();
            }
            state => debug!(%state, "Ignoring close event"),
        }
    }

    /// Sending or receiving failed on a live connection
    ///
    /// The driver closes the transport and reports the close afterwards.
    pub fn handle_transport_error(&mut self, reason: impl Into<String>) {
        let err = StreamError::Transport(reason.into());
        warn!(error = %err, state = %self.state, "Transport error");
        self.outbox.notify(StreamEvent::Error(err));
    }

    /// The reconnect timer fired
    pub fn handle_reconnect_timer(&mut self) {
        if !self.reconnect_pending || self.state != ConnectionState::WaitingToReconnect {
            debug!(state = %self.state, "Stale reconnect timer");
            return;
        }
        self.reconnect_pending = false;
        self.open();
    }

    // ---- internals ----

    fn handle_auth_result(&mut self, status: AuthStatus, code: i32) {
        if self.state != ConnectionState::Authenticating {
            debug!(?status, state = %self.state, "Ignoring authentication result");
            return;
        }

        match interpret_result(status, code) {
            Ok(()) => {
                self.timer.reset();
                self.transition(ConnectionState::Connected);
                self.outbox.notify(StreamEvent::Connected);

                let requests = self.multiplexer.on_reconnect(&mut self.outbox);
                debug!(
                    pairs = self.multiplexer.count(),
                    requests, "Restored pair subscriptions"
                );
            }
            Err(err) => {
                warn!(error = %err, "Authentication failed");
                self.outbox.notify(StreamEvent::Error(err));
                self.enter_disconnected();
                self.closing = true;
                self.outbox.push(Output::Close);
            }
        }
    }

    fn reopen_or_schedule(&mut self) {
        if std::mem::take(&mut self.reopen_after_close) {
            self.open();
        } else {
            self.schedule_reconnect();
        }
    }

    fn open(&mut self) {
        self.closing = false;
        self.reopen_after_close = false;
        self.transition(ConnectionState::Connecting);
        self.outbox.push(Output::Open);
    }

    fn cancel_reconnect(&mut self) {
        if self.reconnect_pending {
            self.reconnect_pending = false;
            self.outbox.push(Output::CancelReconnect);
        }
    }

    fn enter_disconnected(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.transition(ConnectionState::Disconnected);
        self.outbox.notify(StreamEvent::Disconnected);
    }

    fn schedule_reconnect(&mut self) {
        if !self.config.reconnect() {
            debug!("Automatic reconnect disabled");
            return;
        }
        if self.timer.is_disabled() {
            debug!("Reconnect suppressed after explicit disconnect");
            return;
        }
        if self.reconnect_pending {
            return;
        }

        let delay = self.timer.advance();
        self.transition(ConnectionState::WaitingToReconnect);
        self.reconnect_pending = true;
        self.outbox.push(Output::ScheduleReconnect(delay));
        self.outbox.notify(StreamEvent::ReconnectScheduled { delay });
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        let previous = std::mem::replace(&mut self.state, next);

        if self.config.verbose() {
            info!(from = %previous, to = %next, "State transition");
        } else {
            debug!(from = %previous, to = %next, "State transition");
        }
        self.outbox.notify(StreamEvent::StateChanged(next));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientOptions;
    use crate::subscription::ChannelUpdate;
    use cw_stream_types::{decode_auth, MarketUpdate, PairUpdate};
    use parking_lot::Mutex;
    use std::sync::Arc;

    const SECRET: &str = "dGVzdF9zZWNyZXRfa2V5";

    fn session_with(options: ClientOptions) -> Session {
        let options = options.with_api_key("api-key").with_secret_key(SECRET);
        Session::new(StreamConfig::resolve(options, |_| None).unwrap())
    }

    fn session() -> Session {
        session_with(ClientOptions::new())
    }

    fn auth_result(status: AuthStatus) -> Vec<u8> {
        StreamMessage::AuthenticationResult {
            status,
            code: status as i32,
        }
        .encode()
    }

    fn pair_update(elements: serde_json::Value) -> Vec<u8> {
        StreamMessage::PairUpdate(PairUpdate {
            elements: elements.as_array().cloned().unwrap(),
        })
        .encode()
    }

    fn states(outputs: &[Output]) -> Vec<ConnectionState> {
        outputs
            .iter()
            .filter_map(|o| match o {
                Output::Notify(StreamEvent::StateChanged(s)) => Some(*s),
                _ => None,
            })
            .collect()
    }

    fn errors(outputs: &[Output]) -> Vec<StreamError> {
        outputs
            .iter()
            .filter_map(|o| match o {
                Output::Notify(StreamEvent::Error(e)) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    fn transmitted(outputs: &[Output]) -> Vec<&Frame> {
        outputs
            .iter()
            .filter_map(|o| match o {
                Output::Transmit(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    fn scheduled(outputs: &[Output]) -> Option<Duration> {
        outputs.iter().find_map(|o| match o {
            Output::ScheduleReconnect(d) => Some(*d),
            _ => None,
        })
    }

    /// Drive a fresh session to CONNECTED
    fn connected(mut session: Session) -> Session {
        session.connect();
        session.handle_open();
        session.handle_frame(&auth_result(AuthStatus::Authenticated));
        session.drain_outputs();
        session
    }

    #[test]
    fn test_initial_state() {
        let session = session();
        assert_eq!(session.state(), ConnectionState::WaitingToConnect);
        assert_eq!(session.reconnect_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_handshake_flow() {
        let mut session = session_with(ClientOptions::new().with_subscriptions(["markets:*:trades"]));
        session.set_nonce_override(Some("1700000000000000001".to_string()));

        session.connect();
        let outputs = session.drain_outputs();
        assert_eq!(states(&outputs), vec![ConnectionState::Connecting]);
        assert!(matches!(outputs.last(), Some(Output::Open)));

        session.handle_open();
        let outputs = session.drain_outputs();
        assert_eq!(states(&outputs), vec![ConnectionState::Authenticating]);

        let frames = transmitted(&outputs);
        assert_eq!(frames.len(), 1);
        let auth = match frames[0] {
            Frame::Binary(bytes) => decode_auth(bytes).unwrap(),
            other => panic!("Expected binary auth frame, got {:?}", other),
        };
        assert_eq!(auth.api_key, "api-key");
        assert_eq!(auth.nonce, "1700000000000000001");
        assert_eq!(auth.subscriptions, vec!["markets:*:trades".to_string()]);
        assert_eq!(auth.client_version, CLIENT_VERSION);

        session.handle_frame(&auth_result(AuthStatus::Authenticated));
        let outputs = session.drain_outputs();
        assert_eq!(states(&outputs), vec![ConnectionState::Connected]);
        assert!(outputs
            .iter()
            .any(|o| matches!(o, Output::Notify(StreamEvent::Connected))));
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_close_schedules_reconnect_at_base_delay() {
        let mut session = connected(session_with(ClientOptions::new().with_reconnect_timeout(2)));

        session.handle_close();
        let outputs = session.drain_outputs();
        assert_eq!(
            states(&outputs),
            vec![ConnectionState::Disconnected, ConnectionState::WaitingToReconnect]
        );
        assert_eq!(scheduled(&outputs), Some(Duration::from_secs(2)));

        session.handle_reconnect_timer();
        let outputs = session.drain_outputs();
        assert_eq!(states(&outputs), vec![ConnectionState::Connecting]);
        assert!(matches!(outputs.last(), Some(Output::Open)));
    }

    #[test]
    fn test_failed_attempts_back_off() {
        let mut session = session();
        session.connect();

        let mut delays = Vec::new();
        for _ in 0..7 {
            session.handle_connect_error("refused");
            let outputs = session.drain_outputs();
            assert!(matches!(
                errors(&outputs)[0],
                StreamError::ConnectionRefused { .. }
            ));
            delays.push(scheduled(&outputs).unwrap().as_secs());
            session.handle_reconnect_timer();
        }
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);

        // Success resets the delay
        session.handle_open();
        session.handle_frame(&auth_result(AuthStatus::Authenticated));
        session.handle_close();
        assert_eq!(scheduled(&session.drain_outputs()), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_auth_failures() {
        let cases = [
            (AuthStatus::BadNonce, StreamError::BadNonce),
            (AuthStatus::BadToken, StreamError::BadToken),
            (AuthStatus::TokenExpired, StreamError::TokenExpired),
            (AuthStatus::Unknown, StreamError::UnknownAuthStatus(0)),
        ];

        for (status, expected) in cases {
            let mut session = session();
            session.connect();
            session.handle_open();
            session.drain_outputs();

            session.handle_frame(&auth_result(status));
            let outputs = session.drain_outputs();
            assert_eq!(errors(&outputs), vec![expected.clone()]);
            assert_eq!(states(&outputs), vec![ConnectionState::Disconnected]);
            assert!(matches!(outputs.last(), Some(Output::Close)));

            // The close completes the cycle and arms the reconnect
            session.handle_close();
            let outputs = session.drain_outputs();
            assert_eq!(states(&outputs), vec![ConnectionState::WaitingToReconnect]);
            assert_eq!(scheduled(&outputs), Some(Duration::from_secs(1)));
        }
    }

    #[test]
    fn test_auth_failure_without_reconnect() {
        let cases = [
            (AuthStatus::BadNonce, StreamError::BadNonce),
            (AuthStatus::BadToken, StreamError::BadToken),
            (AuthStatus::TokenExpired, StreamError::TokenExpired),
            (AuthStatus::Unknown, StreamError::UnknownAuthStatus(0)),
        ];

        for (status, expected) in cases {
            let mut session = session_with(ClientOptions::new().with_reconnect(false));
            session.connect();
            session.handle_open();
            session.drain_outputs();

            session.handle_frame(&auth_result(status));
            session.handle_close();

            let outputs = session.drain_outputs();
            assert_eq!(errors(&outputs), vec![expected]);
            assert_eq!(scheduled(&outputs), None);
            assert_eq!(session.state(), ConnectionState::Disconnected);
        }
    }

    #[test]
    fn test_reconnect_replays_large_registry_in_batches() {
        let mut session = session();
        let pairs: Vec<String> = (0..250).map(|i| format!("PAIR{}/USD", i)).collect();
        session.subscribe("trade", pairs.clone(), Arc::new(|_: &ChannelUpdate| {}));
        let mut session = connected(session);

        session.handle_close();
        session.handle_reconnect_timer();
        session.handle_open();
        session.drain_outputs();
        session.handle_frame(&auth_result(AuthStatus::Authenticated));

        let outputs = session.drain_outputs();
        let requests: Vec<serde_json::Value> = transmitted(&outputs)
            .iter()
            .map(|f| serde_json::from_str(f.as_text().unwrap()).unwrap())
            .collect();
        let sizes: Vec<usize> = requests
            .iter()
            .map(|r| r["pair"].as_array().unwrap().len())
            .collect();
        assert_eq!(sizes, vec![100, 100, 50]);

        let replayed: Vec<String> = requests
            .iter()
            .flat_map(|r| r["pair"].as_array().unwrap().clone())
            .map(|p| p.as_str().unwrap().to_string())
            .collect();
        assert_eq!(replayed, pairs);
    }

    #[test]
    fn test_heartbeat_is_silent() {
        let mut session = connected(session());
        session.handle_frame(&[1]);
        assert!(session.drain_outputs().is_empty());

        let mut session = session_with(ClientOptions::new());
        session.connect();
        session.handle_open();
        session.drain_outputs();
        session.handle_frame(&[1]);
        assert!(session.drain_outputs().is_empty());
        assert_eq!(session.state(), ConnectionState::Authenticating);
    }

    #[test]
    fn test_malformed_frame_reports_decode_error() {
        let mut session = connected(session());
        session.handle_frame(&[0xff, 0xff, 0xff]);

        let outputs = session.drain_outputs();
        let errs = errors(&outputs);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].name(), "PROTOBUF_ERROR");
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_data_before_auth_is_unexpected() {
        let mut session = session();
        session.connect();
        session.handle_open();
        session.drain_outputs();

        let bytes = StreamMessage::MarketUpdate(MarketUpdate {
            market_id: "1".to_string(),
            payload: vec![],
        })
        .encode();
        session.handle_frame(&bytes);

        let outputs = session.drain_outputs();
        assert_eq!(
            errors(&outputs),
            vec![StreamError::UnexpectedMessage("market update")]
        );
        assert_eq!(session.state(), ConnectionState::Authenticating);
    }

    #[test]
    fn test_auth_result_outside_authenticating_ignored() {
        let mut session = connected(session());
        session.handle_frame(&auth_result(AuthStatus::BadToken));
        assert!(session.drain_outputs().is_empty());
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_market_update_notified() {
        let mut session = connected(session());
        let update = MarketUpdate {
            market_id: "86".to_string(),
            payload: vec![1, 2, 3],
        };
        session.handle_frame(&StreamMessage::MarketUpdate(update.clone()).encode());

        let outputs = session.drain_outputs();
        assert!(matches!(
            &outputs[..],
            [Output::Notify(StreamEvent::MarketUpdate(u))] if *u == update
        ));
    }

    #[test]
    fn test_subscribe_before_connect_replayed_on_auth() {
        let mut session = session();
        session.subscribe("book", ["XBT/USD", "ETH/USD"], Arc::new(|_: &ChannelUpdate| {}));
        assert!(session.drain_outputs().is_empty());

        session.connect();
        session.handle_open();
        session.drain_outputs();
        session.handle_frame(&auth_result(AuthStatus::Authenticated));

        let outputs = session.drain_outputs();
        let frames = transmitted(&outputs);
        assert_eq!(frames.len(), 1);
        let request: serde_json::Value = serde_json::from_str(frames[0].as_text().unwrap()).unwrap();
        assert_eq!(request["subscription"]["name"], "book");
        assert_eq!(request["pair"], serde_json::json!(["XBT/USD", "ETH/USD"]));
    }

    #[test]
    fn test_subscribe_while_connected_sends_new_keys() {
        let mut session = connected(session());
        session.subscribe("trade", ["XBT/USD"], Arc::new(|_: &ChannelUpdate| {}));
        assert_eq!(transmitted(&session.drain_outputs()).len(), 1);

        session.subscribe("trade", ["XBT/USD"], Arc::new(|_: &ChannelUpdate| {}));
        assert!(transmitted(&session.drain_outputs()).is_empty());
    }

    #[test]
    fn test_pair_update_delivery() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let mut session = connected(session());
        session.subscribe(
            "ticker",
            ["XBT/USD"],
            Arc::new(move |u: &ChannelUpdate| seen_clone.lock().push(u.pair.clone())),
        );
        session.drain_outputs();

        session.handle_frame(&pair_update(serde_json::json!([3, {"c": "1"}, "ticker", "XBT/USD"])));
        session.handle_frame(&pair_update(serde_json::json!([3, {"c": "1"}, "ticker", "DOGE/USD"])));

        let outputs = session.drain_outputs();
        let raw = outputs
            .iter()
            .filter(|o| matches!(o, Output::Notify(StreamEvent::PairUpdate(_))))
            .count();
        assert_eq!(raw, 2);

        for output in outputs {
            if let Output::Deliver(delivery) = output {
                delivery.dispatch();
            }
        }
        assert_eq!(*seen.lock(), vec!["XBT/USD".to_string()]);
    }

    #[test]
    fn test_disconnect_suppresses_reconnect() {
        let mut session = connected(session());
        session.disconnect();
        let outputs = session.drain_outputs();
        assert!(matches!(&outputs[..], [Output::Close]));

        session.handle_close();
        let outputs = session.drain_outputs();
        assert_eq!(states(&outputs), vec![ConnectionState::Disconnected]);
        assert_eq!(scheduled(&outputs), None);

        // Idempotent
        session.disconnect();
        assert!(session.drain_outputs().is_empty());
    }

    #[test]
    fn test_disconnect_while_waiting_cancels_timer() {
        let mut session = connected(session());
        session.handle_close();
        session.drain_outputs();
        assert_eq!(session.state(), ConnectionState::WaitingToReconnect);

        session.disconnect();
        let outputs = session.drain_outputs();
        assert!(matches!(outputs[0], Output::CancelReconnect));
        assert_eq!(states(&outputs), vec![ConnectionState::Disconnected]);

        // A late timer does nothing
        session.handle_reconnect_timer();
        assert!(session.drain_outputs().is_empty());
    }

    #[test]
    fn test_disconnect_while_connecting_closes_on_open() {
        let mut session = session();
        session.connect();
        session.disconnect();
        session.drain_outputs();

        session.handle_open();
        let outputs = session.drain_outputs();
        assert!(matches!(&outputs[..], [Output::Close]));

        session.handle_close();
        let outputs = session.drain_outputs();
        assert_eq!(states(&outputs), vec![ConnectionState::Disconnected]);
        assert_eq!(scheduled(&outputs), None);
    }

    #[test]
    fn test_connect_clears_disconnect_flag() {
        let mut session = connected(session());
        session.disconnect();
        session.handle_close();
        session.drain_outputs();

        session.connect();
        session.handle_open();
        session.handle_frame(&auth_result(AuthStatus::Authenticated));
        session.handle_close();
        assert!(scheduled(&session.drain_outputs()).is_some());
    }

    #[test]
    fn test_connect_after_disconnect_reopens_on_close() {
        let mut session = connected(session());
        session.disconnect();
        session.connect();
        let outputs = session.drain_outputs();
        assert!(matches!(&outputs[..], [Output::Close]));

        session.handle_close();
        let outputs = session.drain_outputs();
        assert_eq!(
            states(&outputs),
            vec![ConnectionState::Disconnected, ConnectionState::Connecting]
        );
        assert_eq!(scheduled(&outputs), None);
        assert!(matches!(outputs.last(), Some(Output::Open)));
    }

    #[test]
    fn test_connect_during_auth_failure_close_reopens() {
        let mut session = session();
        session.connect();
        session.handle_open();
        session.handle_frame(&auth_result(AuthStatus::BadNonce));
        session.drain_outputs();
        assert_eq!(session.state(), ConnectionState::Disconnected);

        session.connect();
        assert!(session.drain_outputs().is_empty());

        session.handle_close();
        let outputs = session.drain_outputs();
        assert_eq!(states(&outputs), vec![ConnectionState::Connecting]);
        assert_eq!(scheduled(&outputs), None);
    }

    #[test]
    fn test_connect_while_active_is_noop() {
        let mut session = session();
        session.connect();
        session.drain_outputs();

        session.connect();
        assert!(session.drain_outputs().is_empty());
        assert_eq!(session.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_connect_while_waiting_reconnects_now() {
        let mut session = connected(session());
        session.handle_close();
        session.drain_outputs();

        session.connect();
        let outputs = session.drain_outputs();
        assert!(matches!(outputs[0], Output::CancelReconnect));
        assert_eq!(states(&outputs), vec![ConnectionState::Connecting]);
    }

    #[test]
    fn test_send_requires_connected() {
        let mut session = session();
        assert_eq!(
            session.send(Frame::Binary(vec![9])),
            Err(StreamError::NotConnected)
        );

        let mut session = connected(session);
        assert!(session.send(Frame::Binary(vec![9])).is_ok());
        assert_eq!(transmitted(&session.drain_outputs()).len(), 1);
    }

    #[test]
    fn test_transport_error_then_close() {
        let mut session = connected(session());
        session.handle_transport_error("connection reset");
        session.handle_close();

        let outputs = session.drain_outputs();
        assert_eq!(
            errors(&outputs),
            vec![StreamError::Transport("connection reset".to_string())]
        );
        assert_eq!(
            states(&outputs),
            vec![ConnectionState::Disconnected, ConnectionState::WaitingToReconnect]
        );
    }

    #[test]
    fn test_backoff_setters_apply_to_timer() {
        let mut session = session();
        session.set_backoff(false);
        session.set_reconnect_timeout(5).unwrap();
        assert!(session.set_max_reconnect_timeout(2).is_err());

        session.connect();
        for _ in 0..3 {
            session.handle_connect_error("refused");
            assert_eq!(scheduled(&session.drain_outputs()), Some(Duration::from_secs(5)));
            session.handle_reconnect_timer();
        }
    }
}
