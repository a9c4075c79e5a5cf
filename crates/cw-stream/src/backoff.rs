//! Reconnection delay with optional exponential backoff

use std::time::Duration;

/// Smallest delay backoff doubles from
pub const MIN_DELAY: Duration = Duration::from_secs(1);

/// Reconnect delay policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay before the first reconnection attempt
    pub base_delay: Duration,
    /// Upper bound for the delay
    pub max_delay: Duration,
    /// Double the delay after every failed attempt
    pub exponential: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            exponential: true,
        }
    }
}

impl Backoff {
    /// Create a new policy with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set base delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable exponential growth
    pub fn with_exponential(mut self, exponential: bool) -> Self {
        self.exponential = exponential;
        self
    }

    /// Delay following `current`: `min(max(current, 1s) * 2, max_delay)`,
    /// or `current` unchanged when backoff is disabled.
    pub fn next_delay(&self, current: Duration) -> Duration {
        if !self.exponential {
            return current;
        }

        let doubled = current.max(MIN_DELAY).saturating_mul(2);
        doubled.min(self.max_delay)
    }
}

/// Mutable reconnect state owned by the session
#[derive(Debug, Clone)]
pub struct ReconnectTimer {
    policy: Backoff,
    current: Duration,
    disabled: bool,
}

impl ReconnectTimer {
    /// Create a timer starting at the policy's base delay
    pub fn new(policy: Backoff) -> Self {
        Self {
            current: policy.base_delay,
            policy,
            disabled: false,
        }
    }

    /// Delay the next scheduled reconnect will wait
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Get the policy
    pub fn policy(&self) -> &Backoff {
        &self.policy
    }

    /// Replace the policy; the current delay is clamped into the new bounds
    pub fn set_policy(&mut self, policy: Backoff) {
        self.policy = policy;
        self.current = self.current.clamp(policy.base_delay, policy.max_delay.max(policy.base_delay));
    }

    /// Take the delay for a reconnect about to be scheduled and advance the
    /// policy for the one after it
    pub fn advance(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.policy.next_delay(delay);
        delay
    }

    /// Back to the base delay; called whenever a connection is established
    pub fn reset(&mut self) {
        self.current = self.policy.base_delay;
    }

    /// Explicit disconnect requested
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Set by `disconnect`, cleared by `connect`
    pub fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
    }
}
