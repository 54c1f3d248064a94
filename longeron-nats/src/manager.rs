//! Subscription routing and inbound dispatch.
//!
//! Maps subscription identifiers to live subscriptions and resolves
//! inbound frames against every matching subject pattern. A subject may
//! match more than one subscriber (overlapping wildcards); each match
//! receives its own copy of the message through its own bounded queue.
//!
//! Concurrency model: dispatch runs on the single read-path task; the
//! entry table itself is shared with subscribe/unsubscribe callers, so it
//! lives in a concurrent map. Matching entries are collected before any
//! queue delivery so no table lock is held across a suspension point.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use dashmap::DashMap;
use smallvec::SmallVec;
use tracing::{debug, trace};

use longeron_core::completion::Completion;
use longeron_core::counters::ConnectionCounters;
use longeron_core::deadline::Deadline;
use longeron_core::error::{LongeronError, Result};
use longeron_core::options::ConnectOptions;
use longeron_core::queue::{bounded, OverflowPolicy, PolicyQueue};
use longeron_core::subject::SubjectPattern;

use crate::command::{Command, CommandPool};
use crate::connection::ConnectionCore;
use crate::headers::HeaderMap;
use crate::message::Msg;
use crate::subscription::{SubscribeOptions, Subscriber};
use crate::writer::WriterState;

/// One framed inbound message as handed over by the read path.
#[derive(Debug)]
pub struct InboundFrame {
    pub subject: String,
    pub sid: u64,
    pub reply_to: Option<String>,
    pub headers: Option<HeaderMap>,
    pub payload: Bytes,
}

struct SubEntry {
    sid: u64,
    pattern: SubjectPattern,
    queue_group: Option<String>,
    queue: PolicyQueue<Msg>,
    /// Deliveries left before the subscription completes itself.
    remaining: Option<AtomicU64>,
}

struct ManagerInner {
    entries: DashMap<u64, Arc<SubEntry>>,
    next_sid: AtomicU64,
    writer: Arc<WriterState>,
    pool: Arc<CommandPool>,
    counters: Arc<ConnectionCounters>,
    default_capacity: usize,
    default_overflow: OverflowPolicy,
}

/// Shared handle to the subscription table.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<ManagerInner>,
}

impl SubscriptionManager {
    #[must_use]
    pub fn new(
        writer: Arc<WriterState>,
        pool: Arc<CommandPool>,
        counters: Arc<ConnectionCounters>,
        opts: &ConnectOptions,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                entries: DashMap::new(),
                next_sid: AtomicU64::new(1),
                writer,
                pool,
                counters,
                default_capacity: opts.subscription_capacity,
                default_overflow: opts.subscription_overflow,
            }),
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Create a routing entry and its bounded queue.
    ///
    /// The broker-side `SUB` command is the caller's responsibility; the
    /// entry is installed first so a frame arriving immediately after the
    /// flush still finds its subscription.
    ///
    /// # Errors
    ///
    /// Returns a protocol error for an invalid subject pattern.
    pub fn register(
        &self,
        subject: &str,
        queue_group: Option<&str>,
        options: &SubscribeOptions,
    ) -> Result<(u64, flume::Receiver<Msg>)> {
        let pattern = SubjectPattern::parse(subject)?;
        let sid = self.inner.next_sid.fetch_add(1, Ordering::Relaxed);

        let capacity = options.capacity.unwrap_or(self.inner.default_capacity);
        let overflow = options.overflow.unwrap_or(self.inner.default_overflow);
        let (queue, rx) = bounded(capacity, overflow);

        let entry = Arc::new(SubEntry {
            sid,
            pattern,
            queue_group: queue_group.map(str::to_string),
            queue,
            remaining: options.max_msgs.map(AtomicU64::new),
        });
        self.inner.entries.insert(sid, entry);
        trace!(sid, subject, "subscription registered");

        Ok((sid, rx))
    }

    /// Build the caller-side handle for a registered subscription.
    pub fn handle(
        &self,
        sid: u64,
        subject: String,
        queue_group: Option<String>,
        rx: flume::Receiver<Msg>,
    ) -> Subscriber {
        Subscriber::new(sid, subject, queue_group, rx, self.clone())
    }

    /// Remove a subscription from routing. Its queue completes once
    /// drained.
    pub fn remove(&self, sid: u64) -> bool {
        let removed = self.inner.entries.remove(&sid).is_some();
        if removed {
            trace!(sid, "subscription removed from routing");
        }
        removed
    }

    /// Remove from routing and tell the broker, awaiting the flush.
    ///
    /// # Errors
    ///
    /// Fails when the connection is already closed.
    pub async fn unsubscribe(&self, sid: u64) -> Result<()> {
        self.remove(sid);

        let completion = Completion::new();
        let mut cmd = self.inner.pool.rent_unsubscribe();
        cmd.sid = sid;
        cmd.completion = Some(completion.clone());

        if let Err(returned) = self.inner.writer.enqueue(Command::Unsubscribe(cmd)).await {
            self.inner.pool.recycle(returned);
            return Err(LongeronError::ConnectionClosed);
        }
        completion.wait().await
    }

    /// Drop-path cleanup: remove from routing and send a best-effort
    /// unsubscribe without blocking.
    pub(crate) fn forget(&self, sid: u64) {
        if !self.remove(sid) {
            return;
        }
        let mut cmd = self.inner.pool.rent_unsubscribe();
        cmd.sid = sid;
        if !self.inner.writer.try_enqueue(Command::Unsubscribe(cmd)) {
            trace!(sid, "queue full, skipping unsubscribe on drop");
        }
    }

    /// Route one inbound frame to every matching subscription.
    ///
    /// Respects each subscription's overflow policy: a `Wait` queue
    /// suspends this dispatch path until its consumer makes room, the drop
    /// policies never do.
    pub async fn dispatch(&self, frame: InboundFrame, connection: Weak<ConnectionCore>) {
        let mut matches: SmallVec<[Arc<SubEntry>; 4]> = SmallVec::new();
        for entry in self.inner.entries.iter() {
            if entry.pattern.matches(&frame.subject) {
                matches.push(Arc::clone(entry.value()));
            }
        }

        if matches.is_empty() {
            trace!(subject = %frame.subject, sid = frame.sid, "frame matched no subscription");
            return;
        }

        let length = frame.subject.len()
            + frame.reply_to.as_deref().map_or(0, str::len)
            + frame.headers.as_ref().map_or(0, HeaderMap::encoded_len)
            + frame.payload.len();

        let msg = Msg {
            subject: frame.subject,
            reply_to: frame.reply_to,
            headers: frame.headers,
            payload: frame.payload,
            length,
            connection,
        };

        // Constructed once above; each target gets a cheap refcounted copy.
        for entry in &matches {
            self.deliver(entry, msg.clone()).await;
        }
    }

    async fn deliver(&self, entry: &SubEntry, msg: Msg) {
        if let Some(remaining) = &entry.remaining {
            if remaining.load(Ordering::Acquire) == 0 {
                return;
            }
        }

        if !entry.queue.deliver(msg).await {
            return;
        }
        self.inner.counters.incr_received_messages();

        if let Some(remaining) = &entry.remaining {
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                debug!(sid = entry.sid, "subscription reached max messages");
                self.remove(entry.sid);
            }
        }
    }

    /// Stage `SUB` commands for every live subscription on the priority
    /// lane, used when a fresh transport comes up after a reconnect. A
    /// capped subscription also re-announces its remaining budget.
    pub fn stage_resubscribes(&self) {
        for entry in self.inner.entries.iter() {
            let mut cmd = self.inner.pool.rent_subscribe();
            cmd.sid = entry.sid;
            cmd.subject.push_str(entry.pattern.as_str());
            cmd.queue_group.clone_from(&entry.queue_group);
            cmd.deadline = Deadline::NONE;
            self.inner.writer.push_priority(Command::Subscribe(cmd));

            if let Some(remaining) = &entry.remaining {
                let left = remaining.load(Ordering::Acquire);
                if left > 0 {
                    let mut unsub = self.inner.pool.rent_unsubscribe();
                    unsub.sid = entry.sid;
                    unsub.max_msgs = Some(left);
                    self.inner.writer.push_priority(Command::Unsubscribe(unsub));
                }
            }
        }
    }

    /// Drop every subscription; their queues complete once drained.
    /// Used on fatal connection failure and explicit close.
    pub fn clear(&self) {
        self.inner.entries.clear();
    }
}
