//! Command deadlines as explicit expiry timestamps.
//!
//! A deadline is checked at well-defined points (enqueue, pre-write)
//! rather than propagated implicitly. Expiry never interrupts a transport
//! write already in progress.

use std::time::{Duration, Instant};

/// Optional expiry timestamp attached to a command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// A deadline that never expires.
    pub const NONE: Self = Self(None);

    /// Deadline `timeout` from now.
    #[must_use]
    pub fn after(timeout: Duration) -> Self {
        Self(Some(Instant::now() + timeout))
    }

    /// Deadline at an absolute instant.
    #[must_use]
    pub const fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    /// Whether the deadline has already passed.
    #[must_use]
    pub fn is_elapsed(&self) -> bool {
        matches!(self.0, Some(t) if Instant::now() >= t)
    }

    /// Time left until expiry. `None` when the deadline never expires.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|t| t.saturating_duration_since(Instant::now()))
    }

    /// Whether any expiry is set at all.
    #[must_use]
    pub const fn is_some(&self) -> bool {
        self.0.is_some()
    }
}

impl From<Option<Duration>> for Deadline {
    fn from(timeout: Option<Duration>) -> Self {
        timeout.map_or(Self::NONE, Self::after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_never_elapses() {
        assert!(!Deadline::NONE.is_elapsed());
        assert_eq!(Deadline::NONE.remaining(), None);
    }

    #[test]
    fn past_deadline_is_elapsed() {
        let d = Deadline::after(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(1));
        assert!(d.is_elapsed());
        assert_eq!(d.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn future_deadline_is_pending() {
        let d = Deadline::after(Duration::from_secs(60));
        assert!(!d.is_elapsed());
        assert!(d.remaining().unwrap() > Duration::from_secs(59));
    }
}
