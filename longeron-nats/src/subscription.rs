//! Caller-side subscription handles.

use flume::Receiver;

use longeron_core::error::Result;
use longeron_core::queue::OverflowPolicy;

use crate::manager::SubscriptionManager;
use crate::message::Msg;

/// Per-subscription configuration.
///
/// Defaults come from the connection's [`ConnectOptions`]; anything set
/// here overrides them for this subscription only.
///
/// [`ConnectOptions`]: longeron_core::options::ConnectOptions
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Message queue capacity override.
    pub capacity: Option<usize>,
    /// Overflow policy override.
    pub overflow: Option<OverflowPolicy>,
    /// Complete the subscription after this many deliveries.
    pub max_msgs: Option<u64>,
}

impl SubscribeOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    #[must_use]
    pub fn with_overflow(mut self, policy: OverflowPolicy) -> Self {
        self.overflow = Some(policy);
        self
    }

    #[must_use]
    pub fn with_max_msgs(mut self, max: u64) -> Self {
        self.max_msgs = Some(max);
        self
    }
}

/// A live subscription.
///
/// Owns the receiving end of the subscription's bounded message queue;
/// the dispatch path owns the sending end. Dropping the handle removes the
/// subscription from routing and sends a best-effort unsubscribe.
pub struct Subscriber {
    sid: u64,
    subject: String,
    queue_group: Option<String>,
    rx: Receiver<Msg>,
    manager: SubscriptionManager,
    detached: bool,
}

impl Subscriber {
    pub(crate) fn new(
        sid: u64,
        subject: String,
        queue_group: Option<String>,
        rx: Receiver<Msg>,
        manager: SubscriptionManager,
    ) -> Self {
        Self {
            sid,
            subject,
            queue_group,
            rx,
            manager,
            detached: false,
        }
    }

    /// Subscription identifier on this connection.
    #[must_use]
    pub const fn sid(&self) -> u64 {
        self.sid
    }

    /// Subject pattern this subscription was created with.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Queue group, if any.
    #[must_use]
    pub fn queue_group(&self) -> Option<&str> {
        self.queue_group.as_deref()
    }

    /// Await the next message.
    ///
    /// Returns `None` once the subscription has completed (max messages
    /// reached, unsubscribed, or connection closed) and the queue is
    /// drained.
    pub async fn next(&mut self) -> Option<Msg> {
        self.rx.recv_async().await.ok()
    }

    /// Take a message without waiting.
    #[must_use]
    pub fn try_next(&self) -> Option<Msg> {
        self.rx.try_recv().ok()
    }

    /// Messages currently buffered.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    /// Remove the subscription from routing and tell the broker.
    ///
    /// # Errors
    ///
    /// Fails when the connection is already closed.
    pub async fn unsubscribe(mut self) -> Result<()> {
        self.detached = true;
        self.manager.unsubscribe(self.sid).await
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        if !self.detached {
            self.manager.forget(self.sid);
        }
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("sid", &self.sid)
            .field("subject", &self.subject)
            .field("queue_group", &self.queue_group)
            .field("queued", &self.rx.len())
            .finish()
    }
}
