//! Outbound command variants and their recycling pool.
//!
//! A command is rented from the pool when a caller issues an operation,
//! carried through the bounded command queue, serialized by the writer
//! loop, and returned to the pool once its completion handle has been
//! recorded. After return it is never touched again by anyone.

use bytes::Bytes;

use longeron_core::completion::Completion;
use longeron_core::deadline::Deadline;
use longeron_core::pool::{Pool, Recycle};

use crate::headers::HeaderMap;
use crate::proto::ProtocolWriter;

/// Connection handshake command, staged on the priority lane.
///
/// The handshake body is encoded at creation time so serialization can
/// never fail inside the writer loop.
#[derive(Default)]
pub struct ConnectCommand {
    pub body: Bytes,
    pub completion: Option<Completion>,
}

impl Recycle for ConnectCommand {
    fn recycle(&mut self) {
        self.body = Bytes::new();
        self.completion = None;
    }
}

/// Publish command carrying an opaque payload.
///
/// Typed publishes use the same layout: their value is encoded at enqueue
/// time and travels here as bytes.
#[derive(Default)]
pub struct PublishCommand {
    pub subject: String,
    pub reply_to: Option<String>,
    pub headers: Option<HeaderMap>,
    pub payload: Bytes,
    pub deadline: Deadline,
    pub completion: Option<Completion>,
}

impl Recycle for PublishCommand {
    fn recycle(&mut self) {
        self.subject.clear();
        self.reply_to = None;
        self.headers = None;
        self.payload = Bytes::new();
        self.deadline = Deadline::NONE;
        self.completion = None;
    }
}

#[derive(Default)]
pub struct SubscribeCommand {
    pub sid: u64,
    pub subject: String,
    pub queue_group: Option<String>,
    pub deadline: Deadline,
    pub completion: Option<Completion>,
}

impl Recycle for SubscribeCommand {
    fn recycle(&mut self) {
        self.sid = 0;
        self.subject.clear();
        self.queue_group = None;
        self.deadline = Deadline::NONE;
        self.completion = None;
    }
}

#[derive(Default)]
pub struct UnsubscribeCommand {
    pub sid: u64,
    pub max_msgs: Option<u64>,
    pub deadline: Deadline,
    pub completion: Option<Completion>,
}

impl Recycle for UnsubscribeCommand {
    fn recycle(&mut self) {
        self.sid = 0;
        self.max_msgs = None;
        self.deadline = Deadline::NONE;
        self.completion = None;
    }
}

/// Control reply to an inbound keep-alive ping.
#[derive(Default)]
pub struct PongCommand {
    pub completion: Option<Completion>,
}

impl Recycle for PongCommand {
    fn recycle(&mut self) {
        self.completion = None;
    }
}

/// Several publishes flushed as one unit.
///
/// Each member keeps its own deadline: an expired member is skipped during
/// serialization without aborting the rest of the batch.
#[derive(Default)]
pub struct BatchCommand {
    pub entries: Vec<PublishCommand>,
    pub deadline: Deadline,
    pub completion: Option<Completion>,
}

impl Recycle for BatchCommand {
    fn recycle(&mut self) {
        self.entries.clear();
        self.deadline = Deadline::NONE;
        self.completion = None;
    }
}

/// One unit of outbound work, discriminated by kind.
pub enum Command {
    Connect(Box<ConnectCommand>),
    Publish(Box<PublishCommand>),
    PublishValue(Box<PublishCommand>),
    Subscribe(Box<SubscribeCommand>),
    Unsubscribe(Box<UnsubscribeCommand>),
    Pong(Box<PongCommand>),
    Batch(Box<BatchCommand>),
}

impl Command {
    /// Whether the command's deadline has already passed.
    ///
    /// Checked by the writer immediately before serialization so no bytes
    /// are wasted on dead commands. The completion of a canceled command is
    /// resolved on the caller side, never here.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        match self {
            Self::Connect(_) | Self::Pong(_) => false,
            Self::Publish(c) | Self::PublishValue(c) => c.deadline.is_elapsed(),
            Self::Subscribe(c) => c.deadline.is_elapsed(),
            Self::Unsubscribe(c) => c.deadline.is_elapsed(),
            Self::Batch(c) => c.deadline.is_elapsed(),
        }
    }

    /// Serialize into the writer's output buffer.
    ///
    /// Returns the number of protocol frames written: one for most kinds,
    /// the count of non-expired members for a batch.
    pub fn write(&self, w: &mut ProtocolWriter<'_>) -> usize {
        match self {
            Self::Connect(c) => {
                w.write_connect(&c.body);
                1
            }
            Self::Publish(c) | Self::PublishValue(c) => {
                w.write_publish(
                    &c.subject,
                    c.reply_to.as_deref(),
                    c.headers.as_ref(),
                    &c.payload,
                );
                1
            }
            Self::Subscribe(c) => {
                w.write_subscribe(c.sid, &c.subject, c.queue_group.as_deref());
                1
            }
            Self::Unsubscribe(c) => {
                w.write_unsubscribe(c.sid, c.max_msgs);
                1
            }
            Self::Pong(_) => {
                w.write_pong();
                1
            }
            Self::Batch(c) => {
                let mut frames = 0;
                for entry in &c.entries {
                    if entry.deadline.is_elapsed() {
                        continue;
                    }
                    w.write_publish(
                        &entry.subject,
                        entry.reply_to.as_deref(),
                        entry.headers.as_ref(),
                        &entry.payload,
                    );
                    frames += 1;
                }
                frames
            }
        }
    }

    /// Detach the completion handle so the writer can resolve it after the
    /// command itself has gone back to the pool.
    pub fn take_completion(&mut self) -> Option<Completion> {
        match self {
            Self::Connect(c) => c.completion.take(),
            Self::Publish(c) | Self::PublishValue(c) => c.completion.take(),
            Self::Subscribe(c) => c.completion.take(),
            Self::Unsubscribe(c) => c.completion.take(),
            Self::Pong(c) => c.completion.take(),
            Self::Batch(c) => c.completion.take(),
        }
    }
}

/// Free-lists of recycled commands, one per command kind.
pub struct CommandPool {
    connect: Pool<ConnectCommand>,
    publish: Pool<PublishCommand>,
    publish_value: Pool<PublishCommand>,
    subscribe: Pool<SubscribeCommand>,
    unsubscribe: Pool<UnsubscribeCommand>,
    pong: Pool<PongCommand>,
    batch: Pool<BatchCommand>,
}

impl CommandPool {
    /// Create a pool retaining up to `capacity` commands per kind.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            connect: Pool::new(capacity),
            publish: Pool::new(capacity),
            publish_value: Pool::new(capacity),
            subscribe: Pool::new(capacity),
            unsubscribe: Pool::new(capacity),
            pong: Pool::new(capacity),
            batch: Pool::new(capacity),
        }
    }

    pub fn rent_connect(&self) -> Box<ConnectCommand> {
        self.connect.rent()
    }

    pub fn rent_publish(&self) -> Box<PublishCommand> {
        self.publish.rent()
    }

    pub fn rent_publish_value(&self) -> Box<PublishCommand> {
        self.publish_value.rent()
    }

    pub fn rent_subscribe(&self) -> Box<SubscribeCommand> {
        self.subscribe.rent()
    }

    pub fn rent_unsubscribe(&self) -> Box<UnsubscribeCommand> {
        self.unsubscribe.rent()
    }

    pub fn rent_pong(&self) -> Box<PongCommand> {
        self.pong.rent()
    }

    pub fn rent_batch(&self) -> Box<BatchCommand> {
        self.batch.rent()
    }

    /// Reset a command and return it to its kind's free-list.
    pub fn recycle(&self, command: Command) {
        match command {
            Command::Connect(c) => self.connect.give_back(c),
            Command::Publish(c) => self.publish.give_back(c),
            Command::PublishValue(c) => self.publish_value.give_back(c),
            Command::Subscribe(c) => self.subscribe.give_back(c),
            Command::Unsubscribe(c) => self.unsubscribe.give_back(c),
            Command::Pong(c) => self.pong.give_back(c),
            Command::Batch(c) => self.batch.give_back(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use std::time::Duration;

    #[test]
    fn publish_command_serializes_one_frame() {
        let mut cmd = PublishCommand::default();
        cmd.subject.push_str("orders.eu");
        cmd.payload = Bytes::from_static(b"hi");

        let mut buf = BytesMut::new();
        let frames = Command::Publish(Box::new(cmd)).write(&mut ProtocolWriter::new(&mut buf));
        assert_eq!(frames, 1);
        assert_eq!(&buf[..], b"PUB orders.eu 2\r\nhi\r\n");
    }

    #[test]
    fn batch_skips_expired_members() {
        let mut batch = BatchCommand::default();
        for (subject, expired) in [("a", false), ("b", true), ("c", false)] {
            let mut entry = PublishCommand::default();
            entry.subject.push_str(subject);
            entry.payload = Bytes::from_static(b"x");
            if expired {
                entry.deadline = Deadline::after(Duration::ZERO);
            }
            batch.entries.push(entry);
        }
        std::thread::sleep(Duration::from_millis(1));

        let mut buf = BytesMut::new();
        let frames = Command::Batch(Box::new(batch)).write(&mut ProtocolWriter::new(&mut buf));
        assert_eq!(frames, 2);
        assert_eq!(&buf[..], b"PUB a 1\r\nx\r\nPUB c 1\r\nx\r\n");
    }

    #[test]
    fn pool_recycles_per_kind() {
        let pool = CommandPool::new(8);

        let mut cmd = pool.rent_publish();
        cmd.subject.push_str("topic");
        cmd.completion = Some(Completion::new());
        pool.recycle(Command::Publish(cmd));

        let again = pool.rent_publish();
        assert!(again.subject.is_empty());
        assert!(again.completion.is_none());
    }

    #[test]
    fn take_completion_detaches_handle() {
        let mut cmd = PublishCommand::default();
        cmd.completion = Some(Completion::new());
        let mut command = Command::Publish(Box::new(cmd));

        let handle = command.take_completion();
        assert!(handle.is_some());
        assert!(command.take_completion().is_none());
    }

    #[test]
    fn deadline_marks_command_canceled() {
        let mut cmd = PublishCommand::default();
        cmd.deadline = Deadline::after(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(1));
        assert!(Command::Publish(Box::new(cmd)).is_canceled());

        let fresh = PublishCommand::default();
        assert!(!Command::Publish(Box::new(fresh)).is_canceled());
    }
}
