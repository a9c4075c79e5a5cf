//! Notification bus for connection lifecycle and data events
//!
//! Any number of listeners can be registered per event kind. Listeners run
//! synchronously on the connection driver, in registration order, and never
//! while the session lock is held, so they may call back into the client.
//!
//! # Example
//!
//! ```
//! use cw_stream::hooks::Hooks;
//!
//! let hooks = Hooks::new()
//!     .on_connect(|| println!("Connected"))
//!     .on_state_change(|state| println!("State: {}", state))
//!     .on_error(|err| eprintln!("Error: {}", err));
//! ```

use crate::events::{ConnectionState, StreamEvent};
use cw_stream_types::{MarketUpdate, PairUpdate, StreamError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Type aliases for hook callbacks
pub type LifecycleHook = Arc<dyn Fn() + Send + Sync>;
pub type StateHook = Arc<dyn Fn(ConnectionState) + Send + Sync>;
pub type ReconnectHook = Arc<dyn Fn(Duration) + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&StreamError) + Send + Sync>;
pub type MarketHook = Arc<dyn Fn(&MarketUpdate) + Send + Sync>;
pub type PairHook = Arc<dyn Fn(&PairUpdate) + Send + Sync>;

/// Notification hooks container
///
/// Keep callbacks fast; they block the connection loop while they run.
#[derive(Clone, Default)]
pub struct Hooks {
    on_connect: Vec<LifecycleHook>,
    on_disconnect: Vec<LifecycleHook>,
    on_state_change: Vec<StateHook>,
    on_reconnect_scheduled: Vec<ReconnectHook>,
    on_error: Vec<ErrorHook>,
    on_market_update: Vec<MarketHook>,
    on_pair_update: Vec<PairHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_connect", &self.on_connect.len())
            .field("on_disconnect", &self.on_disconnect.len())
            .field("on_state_change", &self.on_state_change.len())
            .field("on_reconnect_scheduled", &self.on_reconnect_scheduled.len())
            .field("on_error", &self.on_error.len())
            .field("on_market_update", &self.on_market_update.len())
            .field("on_pair_update", &self.on_pair_update.len())
            .finish()
    }
}

impl Hooks {
    /// Create a new empty hooks container
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for successful authentication
    ///
    /// Called each time the session reaches CONNECTED, reconnections included.
    pub fn on_connect<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_connect.push(Arc::new(f));
        self
    }

    /// Register a callback for closed connections
    pub fn on_disconnect<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_disconnect.push(Arc::new(f));
        self
    }

    /// Register a callback for state transitions
    pub fn on_state_change<F>(mut self, f: F) -> Self
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.on_state_change.push(Arc::new(f));
        self
    }

    /// Register a callback for scheduled reconnects, with the delay
    pub fn on_reconnect_scheduled<F>(mut self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.on_reconnect_scheduled.push(Arc::new(f));
        self
    }

    /// Register a callback for runtime errors
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        self.on_error.push(Arc::new(f));
        self
    }

    /// Register a callback for market updates
    pub fn on_market_update<F>(mut self, f: F) -> Self
    where
        F: Fn(&MarketUpdate) + Send + Sync + 'static,
    {
        self.on_market_update.push(Arc::new(f));
        self
    }

    /// Register a callback for raw pair updates
    ///
    /// Fires for every pair update, whether or not a channel listener
    /// picked it up.
    pub fn on_pair_update<F>(mut self, f: F) -> Self
    where
        F: Fn(&PairUpdate) + Send + Sync + 'static,
    {
        self.on_pair_update.push(Arc::new(f));
        self
    }

    /// Number of registered callbacks across all kinds
    pub fn len(&self) -> usize {
        self.on_connect.len()
            + self.on_disconnect.len()
            + self.on_state_change.len()
            + self.on_reconnect_scheduled.len()
            + self.on_error.len()
            + self.on_market_update.len()
            + self.on_pair_update.len()
    }

    /// Returns true if no callback is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every callback registered for the event's kind
    pub fn dispatch(&self, event: &StreamEvent) {
        match event {
            StreamEvent::StateChanged(state) => {
                for hook in &self.on_state_change {
                    hook(*state);
                }
            }
            StreamEvent::Connected => {
                for hook in &self.on_connect {
                    hook();
                }
            }
            StreamEvent::Disconnected => {
                for hook in &self.on_disconnect {
                    hook();
                }
            }
            StreamEvent::ReconnectScheduled { delay } => {
                for hook in &self.on_reconnect_scheduled {
                    hook(*delay);
                }
            }
            StreamEvent::Error(err) => {
                for hook in &self.on_error {
                    hook(err);
                }
            }
            StreamEvent::MarketUpdate(update) => {
                for hook in &self.on_market_update {
                    hook(update);
                }
            }
            StreamEvent::PairUpdate(update) => {
                for hook in &self.on_pair_update {
                    hook(update);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_multiple_listeners_in_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let first = calls.clone();
        let second = calls.clone();
        let hooks = Hooks::new()
            .on_connect(move || first.lock().push("first"))
            .on_connect(move || second.lock().push("second"));

        hooks.dispatch(&StreamEvent::Connected);
        assert_eq!(*calls.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_dispatch_routes_by_kind() {
        let errors = Arc::new(AtomicU32::new(0));
        let states = Arc::new(Mutex::new(Vec::new()));
        let errors_clone = errors.clone();
        let states_clone = states.clone();
        let hooks = Hooks::new()
            .on_error(move |_| {
                errors_clone.fetch_add(1, Ordering::SeqCst);
            })
            .on_state_change(move |state| states_clone.lock().push(state));

        hooks.dispatch(&StreamEvent::Error(StreamError::BadToken));
        hooks.dispatch(&StreamEvent::StateChanged(ConnectionState::Connecting));
        hooks.dispatch(&StreamEvent::Disconnected);

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(*states.lock(), vec![ConnectionState::Connecting]);
    }

    #[test]
    fn test_hooks_clone_shares_callbacks() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let hooks = Hooks::new().on_reconnect_scheduled(move |delay| {
            counter_clone.fetch_add(delay.as_secs() as u32, Ordering::SeqCst);
        });

        let cloned = hooks.clone();
        cloned.dispatch(&StreamEvent::ReconnectScheduled {
            delay: Duration::from_secs(4),
        });
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert_eq!(cloned.len(), 1);
    }

    #[test]
    fn test_hooks_default() {
        let hooks = Hooks::default();
        assert!(hooks.is_empty());
        // Should not panic when dispatching to empty hooks
        hooks.dispatch(&StreamEvent::Connected);
    }
}
