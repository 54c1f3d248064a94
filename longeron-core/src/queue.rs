//! Bounded delivery queue with explicit overflow policy.
//!
//! Drop-oldest / drop-newest semantics are not universal across channel
//! implementations, so the policy is applied explicitly here on top of a
//! bounded flume channel instead of relying on any queue's default
//! full-queue behavior.
//!
//! The sending half is owned by a single dispatch path; the receiving half
//! is drained by the owning consumer. Under `DropOldest` the dispatcher
//! holds an extra receiver clone used only for eviction, which can only
//! ever make room for the incoming item, never starve the consumer.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Behavior when a bounded queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Suspend the producer until the consumer makes room.
    #[default]
    Wait,
    /// Evict the oldest queued item to admit the new one.
    DropOldest,
    /// Discard the new item.
    DropNewest,
}

/// Sending half of a bounded queue with an overflow policy.
pub struct PolicyQueue<T> {
    tx: flume::Sender<T>,
    /// Present only under `DropOldest`; holding a receiver clone for any
    /// other policy would keep the channel alive after the consumer left.
    evict_rx: Option<flume::Receiver<T>>,
    policy: OverflowPolicy,
    capacity: usize,
    dropped: AtomicU64,
}

/// Create a bounded queue of `capacity` items governed by `policy`.
///
/// Returns the policy-applying sender and a plain receiver for the
/// consumer. The receiver yields `Err` once the sender is dropped and the
/// queue is drained.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn bounded<T>(capacity: usize, policy: OverflowPolicy) -> (PolicyQueue<T>, flume::Receiver<T>) {
    assert!(capacity > 0, "queue capacity must be at least 1");
    let (tx, rx) = flume::bounded(capacity);
    let evict_rx = matches!(policy, OverflowPolicy::DropOldest).then(|| rx.clone());
    (
        PolicyQueue {
            tx,
            evict_rx,
            policy,
            capacity,
            dropped: AtomicU64::new(0),
        },
        rx,
    )
}

impl<T> PolicyQueue<T> {
    /// Deliver one item according to the overflow policy.
    ///
    /// Returns `true` if the item was queued, `false` if it was discarded
    /// (`DropNewest` on a full queue) or the consumer is gone.
    pub async fn deliver(&self, item: T) -> bool {
        match self.policy {
            OverflowPolicy::Wait => self.tx.send_async(item).await.is_ok(),
            OverflowPolicy::DropNewest => match self.tx.try_send(item) {
                Ok(()) => true,
                Err(flume::TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    trace!(capacity = self.capacity, "queue full, discarding newest");
                    false
                }
                Err(flume::TrySendError::Disconnected(_)) => false,
            },
            OverflowPolicy::DropOldest => {
                let evict_rx = self
                    .evict_rx
                    .as_ref()
                    .expect("DropOldest queues always hold an eviction receiver");
                let mut item = item;
                loop {
                    match self.tx.try_send(item) {
                        Ok(()) => return true,
                        Err(flume::TrySendError::Full(rejected)) => {
                            item = rejected;
                            if evict_rx.try_recv().is_ok() {
                                self.dropped.fetch_add(1, Ordering::Relaxed);
                                trace!(capacity = self.capacity, "queue full, evicted oldest");
                            }
                            // A racing consumer may have drained the slot
                            // already; either way there is room now.
                        }
                        Err(flume::TrySendError::Disconnected(_)) => return false,
                    }
                }
            }
        }
    }

    /// Queue capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// Whether the queue is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Number of items discarded by the overflow policy so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Overflow policy in effect.
    #[must_use]
    pub const fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn drop_oldest_keeps_newest() {
        let rt = compio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (q, rx) = bounded(3, OverflowPolicy::DropOldest);
            for i in 0..4u32 {
                assert!(q.deliver(i).await);
            }
            assert_eq!(q.dropped(), 1);

            let got: Vec<u32> = rx.drain().collect();
            assert_eq!(got, vec![1, 2, 3]);
        });
    }

    #[test]
    fn drop_newest_discards_incoming() {
        let rt = compio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (q, rx) = bounded(2, OverflowPolicy::DropNewest);
            assert!(q.deliver(1u32).await);
            assert!(q.deliver(2u32).await);
            assert!(!q.deliver(3u32).await);
            assert_eq!(q.dropped(), 1);

            let got: Vec<u32> = rx.drain().collect();
            assert_eq!(got, vec![1, 2]);
        });
    }

    #[test]
    fn wait_blocks_until_consumer_drains() {
        let rt = compio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (q, rx) = bounded(1, OverflowPolicy::Wait);
            assert!(q.deliver(1u32).await);

            // Queue is full: the second deliver must park.
            let second = q.deliver(2u32);
            futures::pin_mut!(second);
            assert!(
                compio::time::timeout(Duration::from_millis(50), &mut second)
                    .await
                    .is_err(),
                "deliver should block while the queue is full"
            );

            assert_eq!(rx.recv_async().await.unwrap(), 1);
            assert!(second.await);
            assert_eq!(rx.recv_async().await.unwrap(), 2);
        });
    }

    #[test]
    fn deliver_fails_once_consumer_is_gone() {
        let rt = compio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (q, rx) = bounded(1, OverflowPolicy::Wait);
            drop(rx);
            assert!(!q.deliver(1u32).await);
        });
    }
}
