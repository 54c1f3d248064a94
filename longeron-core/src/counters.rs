//! Per-connection statistics counters.
//!
//! Updated from multiple tasks (producers, writer loop, dispatch path), so
//! every field is atomic. Relaxed ordering is sufficient: the counters are
//! observational, never used for synchronization.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters shared by a connection's producers and loops.
#[derive(Debug, Default)]
pub struct ConnectionCounters {
    sent_bytes: AtomicU64,
    sent_messages: AtomicU64,
    received_messages: AtomicU64,
    pending_commands: AtomicU64,
    reconnects: AtomicU64,
}

impl ConnectionCounters {
    pub fn add_sent_bytes(&self, n: u64) {
        self.sent_bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_sent_messages(&self, n: u64) {
        self.sent_messages.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr_received_messages(&self) {
        self.received_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_pending(&self) {
        self.pending_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decr_pending(&self) {
        self.pending_commands.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn incr_reconnects(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn sent_messages(&self) -> u64 {
        self.sent_messages.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn received_messages(&self) -> u64 {
        self.received_messages.load(Ordering::Relaxed)
    }

    /// Commands accepted but not yet drained by the writer.
    #[must_use]
    pub fn pending_commands(&self) -> u64 {
        self.pending_commands.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_tracks_enqueue_and_drain() {
        let c = ConnectionCounters::default();
        c.incr_pending();
        c.incr_pending();
        c.decr_pending();
        assert_eq!(c.pending_commands(), 1);
    }

    #[test]
    fn byte_and_message_totals_accumulate() {
        let c = ConnectionCounters::default();
        c.add_sent_bytes(128);
        c.add_sent_bytes(64);
        c.add_sent_messages(3);
        assert_eq!(c.sent_bytes(), 192);
        assert_eq!(c.sent_messages(), 3);
    }
}
