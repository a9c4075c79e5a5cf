//! Subscription management
//!
//! Pair channels are multiplexed over the single stream connection. Each
//! [`Channel`] keeps a registry of subscribed keys and the listeners attached
//! to them; the [`Multiplexer`] owns every channel, routes inbound pair
//! updates and replays all registered keys whenever a connection becomes
//! live.

use crate::transport::Frame;
use cw_stream_types::PairUpdate;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Maximum number of pairs in one subscribe request
pub const MAX_PAIRS_PER_REQUEST: usize = 100;

/// Callback attached to a subscription key
pub type PairListener = Arc<dyn Fn(&ChannelUpdate) + Send + Sync>;

/// Outbound sink lent to the multiplexer while it sends requests
pub trait FrameSink {
    /// Queue a frame for transmission
    fn send_frame(&mut self, frame: Frame);
}

impl FrameSink for Vec<Frame> {
    fn send_frame(&mut self, frame: Frame) {
        self.push(frame);
    }
}

/// Pair update in the shape channel listeners receive
///
/// Positional layout: `[channel_id?, data.., channel_name, pair]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelUpdate {
    /// Numeric channel id, when the server sends one
    pub channel_id: Option<u64>,
    /// Channel name as sent (e.g. `book-10`)
    pub channel_name: String,
    /// Subscription key
    pub pair: String,
    /// Payload elements between the id and the channel name
    pub data: Vec<Value>,
}

impl ChannelUpdate {
    /// Normalise a raw update; `None` if it lacks a channel name or pair
    pub fn from_pair_update(update: &PairUpdate) -> Option<Self> {
        let pair = update.key()?.to_string();
        let channel_name = update.channel_name()?.to_string();

        let body = &update.elements[..update.elements.len() - 2];
        let (channel_id, data) = match body.split_first() {
            Some((first, rest)) if first.is_u64() => (first.as_u64(), rest.to_vec()),
            _ => (None, body.to_vec()),
        };

        Some(Self {
            channel_id,
            channel_name,
            pair,
            data,
        })
    }
}

/// Listeners selected for one update, invoked outside the session lock
pub struct Delivery {
    listeners: Vec<PairListener>,
    update: ChannelUpdate,
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("listeners", &self.listeners.len())
            .field("update", &self.update)
            .finish()
    }
}

impl Delivery {
    /// The update being delivered
    pub fn update(&self) -> &ChannelUpdate {
        &self.update
    }

    /// Number of listeners that will be called
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Returns true if no listener is attached
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Invoke every listener in registration order
    pub fn dispatch(self) {
        for listener in &self.listeners {
            listener(&self.update);
        }
    }
}

/// A named pair channel
pub struct Channel {
    name: String,
    options: Map<String, Value>,
    /// Registration order of keys
    keys: Vec<String>,
    listeners: HashMap<String, Vec<PairListener>>,
    /// Keys registered but not sent yet
    pending: Vec<String>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("keys", &self.keys)
            .field("pending", &self.pending)
            .finish()
    }
}

impl Channel {
    /// Create a channel without options
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_options(name, Map::new())
    }

    /// Create a channel whose options are merged into every subscribe request
    pub fn with_options(name: impl Into<String>, options: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            options,
            keys: Vec::new(),
            listeners: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Channel options
    pub fn options(&self) -> &Map<String, Value> {
        &self.options
    }

    /// Replace the channel options; applies to subsequent requests
    pub fn set_options(&mut self, options: Map<String, Value>) {
        self.options = options;
    }

    /// Registered keys in registration order
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Keys waiting to be sent
    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    /// Check if a key is registered
    pub fn is_registered(&self, key: &str) -> bool {
        self.listeners.contains_key(key)
    }

    /// Number of listeners attached to a key
    pub fn listener_count(&self, key: &str) -> usize {
        self.listeners.get(key).map_or(0, Vec::len)
    }

    /// Whether `channel_name` from an update belongs to this channel
    pub fn matches(&self, channel_name: &str) -> bool {
        channel_name == self.name
            || channel_name
                .strip_prefix(self.name.as_str())
                .is_some_and(|rest| rest.starts_with('-'))
    }

    /// Attach `listener` to each key
    ///
    /// Unknown keys are registered and queued for sending; keys already
    /// registered only gain the listener. Returns the number of new keys.
    pub fn subscribe<I, S>(&mut self, keys: I, listener: PairListener) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = 0;
        for key in keys {
            let key = key.into();
            match self.listeners.get_mut(&key) {
                Some(listeners) => listeners.push(listener.clone()),
                None => {
                    self.listeners.insert(key.clone(), vec![listener.clone()]);
                    self.keys.push(key.clone());
                    self.pending.push(key);
                    added += 1;
                }
            }
        }
        added
    }

    /// Send pending keys in batches; returns the number of requests sent
    pub fn flush(&mut self, sink: &mut dyn FrameSink) -> usize {
        if self.pending.is_empty() {
            return 0;
        }

        let pending = std::mem::take(&mut self.pending);
        let mut requests = 0;
        for batch in pending.chunks(MAX_PAIRS_PER_REQUEST) {
            sink.send_frame(Frame::Text(self.subscribe_request(batch).to_string()));
            requests += 1;
        }

        debug!(
            channel = %self.name,
            pairs = pending.len(),
            requests,
            "Sent subscribe requests"
        );
        requests
    }

    /// Mark every registered key pending and send them all
    pub fn on_reconnect(&mut self, sink: &mut dyn FrameSink) -> usize {
        self.pending = self.keys.clone();
        self.flush(sink)
    }

    /// Select the listeners for an update, if its key is registered
    pub fn on_message_update(&self, update: &PairUpdate) -> Option<Delivery> {
        let key = update.key()?;
        let Some(listeners) = self.listeners.get(key) else {
            trace!(channel = %self.name, pair = key, "Dropping update for unsubscribed pair");
            return None;
        };

        let update = ChannelUpdate::from_pair_update(update)?;
        Some(Delivery {
            listeners: listeners.clone(),
            update,
        })
    }

    /// Build one subscribe request for a batch of keys
    pub fn subscribe_request(&self, pairs: &[String]) -> Value {
        let mut subscription = Map::new();
        subscription.insert("name".to_string(), Value::String(self.name.clone()));
        subscription.extend(self.options.clone());

        json!({
            "event": "subscribe",
            "pair": pairs,
            "subscription": subscription,
        })
    }
}

/// Manages every pair channel for routing and reconnection replay
#[derive(Debug, Default)]
pub struct Multiplexer {
    channels: Vec<Channel>,
}

impl Multiplexer {
    /// Create an empty multiplexer
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a channel by name
    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// Get a channel by name, creating it without options if missing
    pub fn channel_mut(&mut self, name: &str) -> &mut Channel {
        let index = match self.channels.iter().position(|c| c.name == name) {
            Some(index) => index,
            None => {
                self.channels.push(Channel::new(name));
                self.channels.len() - 1
            }
        };
        &mut self.channels[index]
    }

    /// Create a channel with options, or replace an existing channel's options
    pub fn register_channel(&mut self, name: &str, options: Map<String, Value>) {
        self.channel_mut(name).set_options(options);
    }

    /// Get all channels
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Total number of registered keys
    pub fn count(&self) -> usize {
        self.channels.iter().map(|c| c.keys.len()).sum()
    }

    /// Subscribe keys on a channel; see [`Channel::subscribe`]
    pub fn subscribe<I, S>(&mut self, channel: &str, keys: I, listener: PairListener) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channel_mut(channel).subscribe(keys, listener)
    }

    /// Send pending keys of every channel
    pub fn flush(&mut self, sink: &mut dyn FrameSink) -> usize {
        self.channels.iter_mut().map(|c| c.flush(sink)).sum()
    }

    /// Replay every registered key on every channel
    pub fn on_reconnect(&mut self, sink: &mut dyn FrameSink) -> usize {
        self.channels.iter_mut().map(|c| c.on_reconnect(sink)).sum()
    }

    /// Route an update to the channel it names
    ///
    /// An exact name match is tried first, then every prefix match, until a
    /// channel holding the update's key is found.
    pub fn route(&self, update: &PairUpdate) -> Option<Delivery> {
        let channel_name = update.channel_name()?;
        let exact = self.channels.iter().filter(|c| c.name == channel_name);
        let prefixed = self
            .channels
            .iter()
            .filter(|c| c.name != channel_name && c.matches(channel_name));

        exact
            .chain(prefixed)
            .find_map(|c| c.on_message_update(update))
    }
}
