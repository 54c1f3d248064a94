//! Connection configuration options.
//!
//! These options control queue capacities, batching, reconnection, and
//! per-command defaults for a client connection.

use std::time::Duration;

use crate::backoff::ReconnectPolicy;
use crate::queue::OverflowPolicy;

/// Connection configuration options.
///
/// # Examples
///
/// ```
/// use longeron_core::options::ConnectOptions;
/// use std::time::Duration;
///
/// let opts = ConnectOptions::default()
///     .with_command_queue_capacity(256)
///     .with_default_deadline(Some(Duration::from_secs(5)));
/// ```
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Capacity of the bounded outbound command queue.
    ///
    /// Producers suspend when the queue is full, which bounds client
    /// memory when the broker or network is slow.
    pub command_queue_capacity: usize,

    /// Write-batch budget in bytes.
    ///
    /// The writer drains queued commands into its output buffer until the
    /// buffer reaches this size, then flushes the batch as one transport
    /// write.
    pub write_buffer_size: usize,

    /// Default capacity of each subscription's inbound message queue.
    pub subscription_capacity: usize,

    /// Default overflow policy for subscription queues.
    pub subscription_overflow: OverflowPolicy,

    /// Reconnection retry policy.
    pub reconnect: ReconnectPolicy,

    /// Default deadline applied to commands issued without one.
    /// `None` means commands wait indefinitely for the writer.
    pub default_deadline: Option<Duration>,

    /// Maximum time to wait for the initial transport connect.
    pub connect_timeout: Duration,

    /// Number of recycled commands retained per command kind.
    pub command_pool_capacity: usize,

    /// Optional client name reported during the connection handshake.
    pub name: Option<String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            command_queue_capacity: 1024,
            write_buffer_size: 8192,
            subscription_capacity: 1000,
            subscription_overflow: OverflowPolicy::Wait,
            reconnect: ReconnectPolicy::default(),
            default_deadline: None,
            connect_timeout: Duration::from_secs(10),
            command_pool_capacity: 64,
            name: None,
        }
    }
}

impl ConnectOptions {
    /// Create new options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the outbound command queue capacity.
    #[must_use]
    pub fn with_command_queue_capacity(mut self, capacity: usize) -> Self {
        self.command_queue_capacity = capacity;
        self
    }

    /// Set the write-batch budget in bytes.
    #[must_use]
    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Set the default subscription queue capacity.
    #[must_use]
    pub fn with_subscription_capacity(mut self, capacity: usize) -> Self {
        self.subscription_capacity = capacity;
        self
    }

    /// Set the default subscription overflow policy.
    #[must_use]
    pub fn with_subscription_overflow(mut self, policy: OverflowPolicy) -> Self {
        self.subscription_overflow = policy;
        self
    }

    /// Set the reconnection retry policy.
    #[must_use]
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set the default per-command deadline.
    #[must_use]
    pub fn with_default_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.default_deadline = deadline;
        self
    }

    /// Set the initial connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-kind command pool capacity.
    #[must_use]
    pub fn with_command_pool_capacity(mut self, capacity: usize) -> Self {
        self.command_pool_capacity = capacity;
        self
    }

    /// Set the client name reported to the broker.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = ConnectOptions::default();
        assert_eq!(opts.command_queue_capacity, 1024);
        assert_eq!(opts.write_buffer_size, 8192);
        assert_eq!(opts.subscription_capacity, 1000);
        assert_eq!(opts.subscription_overflow, OverflowPolicy::Wait);
        assert!(opts.default_deadline.is_none());
    }

    #[test]
    fn test_builder_pattern() {
        let opts = ConnectOptions::new()
            .with_command_queue_capacity(3)
            .with_subscription_overflow(OverflowPolicy::DropOldest)
            .with_default_deadline(Some(Duration::from_secs(2)))
            .with_name("worker-01");

        assert_eq!(opts.command_queue_capacity, 3);
        assert_eq!(opts.subscription_overflow, OverflowPolicy::DropOldest);
        assert_eq!(opts.default_deadline, Some(Duration::from_secs(2)));
        assert_eq!(opts.name.as_deref(), Some("worker-01"));
    }
}
