//! Reconnection policy with exponential backoff support.
//!
//! This module provides utilities for managing connection retries with
//! exponential backoff and an optional attempt budget.

use std::time::Duration;

/// Reconnection retry policy.
///
/// Controls how long to wait between reconnection attempts and how many
/// attempts to make before giving up.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Base reconnection interval
    pub base_interval: Duration,
    /// Maximum reconnection interval for exponential backoff.
    /// `Duration::ZERO` disables backoff and always uses the base interval.
    pub max_interval: Duration,
    /// Maximum number of attempts before surfacing a fatal error.
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(10),
            max_attempts: Some(10),
        }
    }
}

impl ReconnectPolicy {
    /// Set the base reconnection interval.
    #[must_use]
    pub fn with_base_interval(mut self, ivl: Duration) -> Self {
        self.base_interval = ivl;
        self
    }

    /// Set the maximum reconnection interval for exponential backoff.
    #[must_use]
    pub fn with_max_interval(mut self, max: Duration) -> Self {
        self.max_interval = max;
        self
    }

    /// Set the attempt budget. `None` retries forever.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_attempts = attempts;
        self
    }
}

/// Reconnection state tracker for managing connection attempts and backoff.
///
/// Tracks the number of reconnection attempts and calculates the
/// appropriate delay using exponential backoff.
///
/// # Example
///
/// ```rust
/// use longeron_core::backoff::{ReconnectPolicy, ReconnectState};
/// use std::time::Duration;
///
/// let policy = ReconnectPolicy::default()
///     .with_base_interval(Duration::from_millis(100))
///     .with_max_interval(Duration::from_secs(10));
///
/// let mut reconnect = ReconnectState::new(&policy);
///
/// // First attempt uses base interval
/// assert_eq!(reconnect.next_delay(), Duration::from_millis(100));
///
/// // Subsequent attempts use exponential backoff
/// assert_eq!(reconnect.next_delay(), Duration::from_millis(200));
/// assert_eq!(reconnect.next_delay(), Duration::from_millis(400));
///
/// // Reset on successful connection
/// reconnect.reset();
/// assert_eq!(reconnect.next_delay(), Duration::from_millis(100));
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectState {
    base_interval: Duration,
    max_interval: Duration,
    max_attempts: Option<u32>,
    /// Current reconnection attempt (0 = first attempt)
    attempt: u32,
    current_interval: Duration,
}

impl ReconnectState {
    /// Create a new reconnection state tracker from a policy.
    pub const fn new(policy: &ReconnectPolicy) -> Self {
        Self {
            base_interval: policy.base_interval,
            max_interval: policy.max_interval,
            max_attempts: policy.max_attempts,
            attempt: 0,
            current_interval: policy.base_interval,
        }
    }

    /// Whether the attempt budget has been consumed.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self.max_attempts, Some(max) if self.attempt >= max)
    }

    /// Get the delay for the next reconnection attempt.
    ///
    /// The delay doubles with each attempt until it reaches the policy's
    /// maximum interval. A zero maximum disables backoff entirely.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_interval;

        self.attempt += 1;
        if !self.max_interval.is_zero() {
            self.current_interval = self.base_interval * (1_u32 << self.attempt.min(10));
            if self.current_interval > self.max_interval {
                self.current_interval = self.max_interval;
            }
        }

        delay
    }

    /// Reset the reconnection state after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_interval = self.base_interval;
    }

    /// Get the current attempt number.
    #[inline]
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Get the current reconnection interval.
    #[inline]
    #[must_use]
    pub const fn current_interval(&self) -> Duration {
        self.current_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_ms: u64, max_ms: u64) -> ReconnectPolicy {
        ReconnectPolicy::default()
            .with_base_interval(Duration::from_millis(base_ms))
            .with_max_interval(Duration::from_millis(max_ms))
    }

    #[test]
    fn test_exponential_backoff() {
        let mut state = ReconnectState::new(&policy(100, 10_000));

        assert_eq!(state.next_delay(), Duration::from_millis(100));
        assert_eq!(state.attempt(), 1);

        assert_eq!(state.next_delay(), Duration::from_millis(200));
        assert_eq!(state.attempt(), 2);

        assert_eq!(state.next_delay(), Duration::from_millis(400));
        assert_eq!(state.attempt(), 3);

        assert_eq!(state.next_delay(), Duration::from_millis(800));
        assert_eq!(state.attempt(), 4);
    }

    #[test]
    fn test_max_interval_cap() {
        let mut state = ReconnectState::new(&policy(100, 500));

        assert_eq!(state.next_delay(), Duration::from_millis(100));
        assert_eq!(state.next_delay(), Duration::from_millis(200));
        assert_eq!(state.next_delay(), Duration::from_millis(400));

        // Should be capped at max
        assert_eq!(state.next_delay(), Duration::from_millis(500));
        assert_eq!(state.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_no_backoff_when_max_is_zero() {
        let mut state = ReconnectState::new(&policy(100, 0));

        assert_eq!(state.next_delay(), Duration::from_millis(100));
        assert_eq!(state.next_delay(), Duration::from_millis(100));
        assert_eq!(state.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_reset() {
        let mut state = ReconnectState::new(&policy(100, 10_000));

        state.next_delay();
        state.next_delay();
        state.next_delay();
        assert_eq!(state.attempt(), 3);

        state.reset();
        assert_eq!(state.attempt(), 0);
        assert_eq!(state.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_attempt_budget() {
        let policy = policy(10, 0).with_max_attempts(Some(2));
        let mut state = ReconnectState::new(&policy);

        assert!(!state.is_exhausted());
        state.next_delay();
        assert!(!state.is_exhausted());
        state.next_delay();
        assert!(state.is_exhausted());
    }

    #[test]
    fn test_unlimited_attempts() {
        let policy = policy(10, 0).with_max_attempts(None);
        let mut state = ReconnectState::new(&policy);

        for _ in 0..100 {
            state.next_delay();
        }
        assert!(!state.is_exhausted());
    }
}
