//! Connection lifecycle and the public client surface.
//!
//! One [`Client`] owns one broker connection: a bounded command queue
//! drained by a single writer loop, a read loop dispatching inbound frames
//! to subscriptions, and a supervisor task driving reconnection. Every
//! public operation consults the connection state first — work issued
//! before the connection is ready waits for it, and is never silently
//! dropped.

use std::io;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::FutureExt;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, trace, warn};

use longeron_core::backoff::ReconnectState;
use longeron_core::completion::Completion;
use longeron_core::counters::ConnectionCounters;
use longeron_core::deadline::Deadline;
use longeron_core::error::{LongeronError, Result};
use longeron_core::options::ConnectOptions;
use longeron_core::subject::valid_subject;

use crate::codec::{JsonCodec, PayloadCodec};
use crate::command::{Command, CommandPool, PublishCommand};
use crate::headers::HeaderMap;
use crate::manager::{InboundFrame, SubscriptionManager};
use crate::message::Msg;
use crate::proto::{ConnectInfo, Decoder, ServerInfo, ServerOp};
use crate::subscription::{SubscribeOptions, Subscriber};
use crate::transport::{Connector, TcpConnector, Transport, TransportReader};
use crate::writer::{WriterExit, WriterLoop, WriterState};

/// Grace period for flushing accepted work during an orderly close.
const CLOSE_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Connection lifecycle states. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

struct StateInner {
    current: ConnectionState,
    waiters: Vec<flume::Sender<ConnectionState>>,
}

/// Serialized state holder with wakeups for operations parked until the
/// connection is ready. Waiters are registered under the same lock that
/// guards the state, so a transition can never slip between the check and
/// the registration.
struct StateCell {
    inner: Mutex<StateInner>,
}

impl StateCell {
    fn new(initial: ConnectionState) -> Self {
        Self {
            inner: Mutex::new(StateInner {
                current: initial,
                waiters: Vec::new(),
            }),
        }
    }

    fn get(&self) -> ConnectionState {
        self.inner.lock().current
    }

    fn set(&self, next: ConnectionState) {
        let mut inner = self.inner.lock();
        if inner.current == ConnectionState::Closed {
            return; // terminal
        }
        trace!(from = ?inner.current, to = ?next, "connection state transition");
        inner.current = next;
        if matches!(next, ConnectionState::Open | ConnectionState::Closed) {
            for waiter in inner.waiters.drain(..) {
                let _ = waiter.send(next);
            }
        }
    }

    /// Wait until the connection is `Open` or `Closed`.
    async fn wait_ready(&self) -> ConnectionState {
        loop {
            let rx = {
                let mut inner = self.inner.lock();
                match inner.current {
                    state @ (ConnectionState::Open | ConnectionState::Closed) => return state,
                    _ => {
                        let (tx, rx) = flume::bounded(1);
                        inner.waiters.push(tx);
                        rx
                    }
                }
            };
            if let Ok(state) = rx.recv_async().await {
                return state;
            }
        }
    }
}

pub(crate) enum ConnEvent {
    /// The writer instance bound to the given transport epoch ended.
    WriterExited { epoch: u64, exit: WriterExit },
    /// The read loop bound to the given transport epoch observed a failure.
    ReaderFailed { epoch: u64, error: LongeronError },
    /// The user closed the connection.
    CloseRequested,
}

/// Shared state behind a [`Client`].
///
/// Inbound messages hold a weak reference to this to support replying;
/// everything else goes through the client handle.
pub struct ConnectionCore {
    opts: ConnectOptions,
    state: StateCell,
    writer: Arc<WriterState>,
    pool: Arc<CommandPool>,
    manager: SubscriptionManager,
    counters: Arc<ConnectionCounters>,
    server_info: Mutex<Option<ServerInfo>>,
    events_tx: flume::Sender<ConnEvent>,
}

impl ConnectionCore {
    /// Wait until the connection can accept the operation.
    async fn ready(&self) -> Result<()> {
        match self.state.get() {
            ConnectionState::Open => Ok(()),
            ConnectionState::Closed => Err(LongeronError::ConnectionClosed),
            _ => match self.state.wait_ready().await {
                ConnectionState::Open => Ok(()),
                _ => Err(LongeronError::ConnectionClosed),
            },
        }
    }

    /// Stage the `CONNECT` handshake command on the priority lane.
    fn stage_handshake(&self) -> Result<()> {
        let info = ConnectInfo {
            name: self.opts.name.clone(),
            ..ConnectInfo::default()
        };
        let body = serde_json::to_vec(&info)
            .map_err(|e| LongeronError::serialization(e.to_string()))?;

        let mut cmd = self.pool.rent_connect();
        cmd.body = Bytes::from(body);
        self.writer.push_priority(Command::Connect(cmd));
        Ok(())
    }

    /// Enqueue one publish and await its completion.
    pub(crate) async fn publish_parts(
        &self,
        subject: &str,
        reply_to: Option<String>,
        headers: Option<HeaderMap>,
        payload: Bytes,
        deadline: Option<Duration>,
    ) -> Result<()> {
        self.publish_kind(subject, reply_to, headers, payload, deadline, false)
            .await
    }

    async fn publish_kind(
        &self,
        subject: &str,
        reply_to: Option<String>,
        headers: Option<HeaderMap>,
        payload: Bytes,
        deadline: Option<Duration>,
        typed: bool,
    ) -> Result<()> {
        if !valid_subject(subject) {
            return Err(LongeronError::protocol(format!(
                "invalid publish subject '{subject}'"
            )));
        }
        self.ready().await?;

        let deadline = Deadline::from(deadline.or(self.opts.default_deadline));
        if deadline.is_elapsed() {
            return Err(LongeronError::Canceled);
        }

        let completion = Completion::new();
        let mut cmd = if typed {
            self.pool.rent_publish_value()
        } else {
            self.pool.rent_publish()
        };
        cmd.subject.push_str(subject);
        cmd.reply_to = reply_to;
        cmd.headers = headers;
        cmd.payload = payload;
        cmd.deadline = deadline;
        cmd.completion = Some(completion.clone());

        let command = if typed {
            Command::PublishValue(cmd)
        } else {
            Command::Publish(cmd)
        };
        if let Err(returned) = self.writer.enqueue(command).await {
            self.pool.recycle(returned);
            return Err(LongeronError::ConnectionClosed);
        }
        completion.wait_until(deadline).await
    }

    /// Resolve every pending and recovered completion as failed and drop
    /// all subscriptions.
    pub(crate) fn fail_all(&self, error: LongeronError) {
        // No writer will drain anything after this point; stop accepting.
        self.writer.request_shutdown();
        let shared = Arc::new(error);

        let carry = self.writer.take_carry();
        for completion in carry.completions {
            completion.set_failed(Arc::clone(&shared));
        }

        for mut command in self.writer.drain_all() {
            if let Some(completion) = command.take_completion() {
                completion.set_failed(Arc::clone(&shared));
            }
            self.pool.recycle(command);
        }

        self.manager.clear();
    }
}

/// Handle to one broker connection.
///
/// Cheap to clone; all clones share the same connection.
#[derive(Clone)]
pub struct Client {
    core: Arc<ConnectionCore>,
}

/// Per-publish options.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Reply subject for request/reply exchanges.
    pub reply_to: Option<String>,
    /// Headers to attach.
    pub headers: Option<HeaderMap>,
    /// Deadline override; falls back to the connection default.
    pub deadline: Option<Duration>,
}

impl PublishOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

impl Client {
    /// Connect to a broker over TCP.
    ///
    /// Accepts `host:port`, with an optional `nats://` prefix.
    ///
    /// # Errors
    ///
    /// Fails when the dial times out or is refused.
    pub async fn connect(addr: impl Into<String>, opts: ConnectOptions) -> Result<Self> {
        let addr = addr.into();
        let addr = addr.strip_prefix("nats://").unwrap_or(&addr).to_string();
        Self::connect_with(Box::new(TcpConnector::new(addr)), opts).await
    }

    /// Connect through a custom transport connector.
    ///
    /// The connector is retained and redialed on every reconnect attempt.
    ///
    /// # Errors
    ///
    /// Fails when the initial dial times out or errors.
    pub async fn connect_with(
        connector: Box<dyn Connector>,
        opts: ConnectOptions,
    ) -> Result<Self> {
        let counters = Arc::new(ConnectionCounters::default());
        let writer = Arc::new(WriterState::new(
            opts.command_queue_capacity,
            Arc::clone(&counters),
        ));
        let pool = Arc::new(CommandPool::new(opts.command_pool_capacity));
        let manager = SubscriptionManager::new(
            Arc::clone(&writer),
            Arc::clone(&pool),
            Arc::clone(&counters),
            &opts,
        );
        let (events_tx, events_rx) = flume::unbounded();

        let core = Arc::new(ConnectionCore {
            opts,
            state: StateCell::new(ConnectionState::Connecting),
            writer,
            pool,
            manager,
            counters,
            server_info: Mutex::new(None),
            events_tx,
        });

        let transport =
            compio::time::timeout(core.opts.connect_timeout, connector.connect())
                .await
                .map_err(|_| {
                    LongeronError::Io(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "connect timed out",
                    ))
                })?
                .map_err(LongeronError::Io)?;

        core.stage_handshake()?;
        compio::runtime::spawn(supervise(
            Arc::clone(&core),
            connector,
            transport,
            events_rx,
        ))
        .detach();
        core.state.set(ConnectionState::Open);

        Ok(Self { core })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.core.state.get()
    }

    /// Connection statistics.
    #[must_use]
    pub fn stats(&self) -> &ConnectionCounters {
        &self.core.counters
    }

    /// Broker handshake info, once received.
    #[must_use]
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.core.server_info.lock().clone()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriptions(&self) -> usize {
        self.core.manager.len()
    }

    /// Publish an opaque payload.
    ///
    /// Suspends while the command queue is full; resolves once the writer
    /// has flushed the frame.
    ///
    /// # Errors
    ///
    /// Fails on an invalid subject, elapsed deadline, or closed connection.
    pub async fn publish(&self, subject: &str, payload: impl Into<Bytes>) -> Result<()> {
        self.publish_with(subject, payload, PublishOptions::default())
            .await
    }

    /// Publish with reply subject, headers, or a deadline.
    ///
    /// # Errors
    ///
    /// Fails on an invalid subject, elapsed deadline, or closed connection.
    pub async fn publish_with(
        &self,
        subject: &str,
        payload: impl Into<Bytes>,
        options: PublishOptions,
    ) -> Result<()> {
        self.core
            .publish_kind(
                subject,
                options.reply_to,
                options.headers,
                payload.into(),
                options.deadline,
                false,
            )
            .await
    }

    /// Publish a typed value encoded with the default JSON codec.
    ///
    /// # Errors
    ///
    /// A value that fails to encode surfaces synchronously and is never
    /// queued.
    pub async fn publish_value<T>(&self, subject: &str, value: &T) -> Result<()>
    where
        JsonCodec: PayloadCodec<T>,
    {
        self.publish_value_with(subject, value, &JsonCodec, PublishOptions::default())
            .await
    }

    /// Publish a typed value with an explicit codec.
    ///
    /// # Errors
    ///
    /// A value that fails to encode surfaces synchronously and is never
    /// queued.
    pub async fn publish_value_with<T, C: PayloadCodec<T>>(
        &self,
        subject: &str,
        value: &T,
        codec: &C,
        options: PublishOptions,
    ) -> Result<()> {
        let payload = codec.encode(value)?;
        self.core
            .publish_kind(
                subject,
                options.reply_to,
                options.headers,
                payload,
                options.deadline,
                true,
            )
            .await
    }

    /// Publish several messages as one batched command; the writer emits
    /// them as consecutive frames in a single flush.
    ///
    /// # Errors
    ///
    /// Fails on the first invalid subject; nothing is enqueued then.
    pub async fn publish_batch<I, S, P>(&self, messages: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, P)>,
        S: AsRef<str>,
        P: Into<Bytes>,
    {
        let core = &self.core;
        core.ready().await?;

        let deadline = Deadline::from(core.opts.default_deadline);
        let mut batch = core.pool.rent_batch();
        for (subject, payload) in messages {
            let subject = subject.as_ref();
            if !valid_subject(subject) {
                core.pool.recycle(Command::Batch(batch));
                return Err(LongeronError::protocol(format!(
                    "invalid publish subject '{subject}'"
                )));
            }
            let mut entry = PublishCommand::default();
            entry.subject.push_str(subject);
            entry.payload = payload.into();
            entry.deadline = deadline;
            batch.entries.push(entry);
        }
        if batch.entries.is_empty() {
            core.pool.recycle(Command::Batch(batch));
            return Ok(());
        }

        let completion = Completion::new();
        batch.deadline = deadline;
        batch.completion = Some(completion.clone());
        if let Err(returned) = core.writer.enqueue(Command::Batch(batch)).await {
            core.pool.recycle(returned);
            return Err(LongeronError::ConnectionClosed);
        }
        completion.wait_until(deadline).await
    }

    /// Subscribe to a subject pattern.
    ///
    /// # Errors
    ///
    /// Fails on a malformed pattern or closed connection.
    pub async fn subscribe(&self, subject: &str) -> Result<Subscriber> {
        self.subscribe_with(subject, None, SubscribeOptions::default())
            .await
    }

    /// Subscribe with a queue group or per-subscription options.
    ///
    /// The routing entry is installed before the `SUB` command is flushed,
    /// so a message arriving immediately afterwards is not lost.
    ///
    /// # Errors
    ///
    /// Fails on a malformed pattern or closed connection.
    pub async fn subscribe_with(
        &self,
        subject: &str,
        queue_group: Option<&str>,
        options: SubscribeOptions,
    ) -> Result<Subscriber> {
        let core = &self.core;
        core.ready().await?;

        let (sid, rx) = core.manager.register(subject, queue_group, &options)?;
        let deadline = Deadline::from(core.opts.default_deadline);
        let completion = Completion::new();

        let mut cmd = core.pool.rent_subscribe();
        cmd.sid = sid;
        cmd.subject.push_str(subject);
        cmd.queue_group = queue_group.map(str::to_string);
        cmd.deadline = deadline;
        cmd.completion = Some(completion.clone());

        if let Err(returned) = core.writer.enqueue(Command::Subscribe(cmd)).await {
            core.pool.recycle(returned);
            core.manager.remove(sid);
            return Err(LongeronError::ConnectionClosed);
        }

        // Tell the broker to stop at the cap as well; the local counter is
        // authoritative for delivery.
        if let Some(max) = options.max_msgs {
            let mut unsub = core.pool.rent_unsubscribe();
            unsub.sid = sid;
            unsub.max_msgs = Some(max);
            if let Err(returned) = core.writer.enqueue(Command::Unsubscribe(unsub)).await {
                core.pool.recycle(returned);
            }
        }

        if let Err(err) = completion.wait_until(deadline).await {
            core.manager.remove(sid);
            return Err(err);
        }

        Ok(core.manager.handle(
            sid,
            subject.to_string(),
            queue_group.map(str::to_string),
            rx,
        ))
    }

    /// Publish a request and await a single reply on a unique inbox.
    ///
    /// # Errors
    ///
    /// Fails when the deadline elapses before a reply arrives.
    pub async fn request(&self, subject: &str, payload: impl Into<Bytes>) -> Result<Msg> {
        self.request_with(subject, payload, None).await
    }

    /// Request with an explicit deadline.
    ///
    /// # Errors
    ///
    /// Fails when the deadline elapses before a reply arrives.
    pub async fn request_with(
        &self,
        subject: &str,
        payload: impl Into<Bytes>,
        deadline: Option<Duration>,
    ) -> Result<Msg> {
        let deadline = deadline.or(self.core.opts.default_deadline);
        let overall = Deadline::from(deadline);
        let inbox = new_inbox();

        let mut sub = self
            .subscribe_with(&inbox, None, SubscribeOptions::new().with_max_msgs(1))
            .await?;

        self.publish_with(
            subject,
            payload,
            PublishOptions {
                reply_to: Some(inbox),
                headers: None,
                deadline,
            },
        )
        .await?;

        match overall.remaining() {
            None => sub.next().await.ok_or(LongeronError::SubscriptionClosed),
            Some(remaining) => match compio::time::timeout(remaining, sub.next()).await {
                Ok(Some(msg)) => Ok(msg),
                Ok(None) => Err(LongeronError::SubscriptionClosed),
                Err(_elapsed) => Err(LongeronError::Canceled),
            },
        }
    }

    /// Close the connection.
    ///
    /// Work already accepted by the writer is flushed best-effort within a
    /// grace period; everything unresolvable is failed explicitly. All
    /// subsequent operations are rejected immediately.
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature leaves room for drain errors.
    pub async fn close(&self) -> Result<()> {
        let core = &self.core;
        let previous = core.state.get();
        if previous == ConnectionState::Closed {
            return Ok(());
        }

        // Marker command: resolves once everything accepted before it has
        // been flushed.
        let marker = Completion::new();
        let mut staged = false;
        if previous == ConnectionState::Open {
            let mut pong = core.pool.rent_pong();
            pong.completion = Some(marker.clone());
            staged = core.writer.try_enqueue(Command::Pong(pong));
        }

        core.state.set(ConnectionState::Closed);
        core.writer.request_shutdown();
        let _ = core.events_tx.send(ConnEvent::CloseRequested);

        if staged {
            let _ = marker.wait_until(Deadline::after(CLOSE_DRAIN_GRACE)).await;
        }
        core.fail_all(LongeronError::ConnectionClosed);
        debug!("connection closed");
        Ok(())
    }
}

/// Generate a unique reply-subject for one request.
fn new_inbox() -> String {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(22)
        .map(char::from)
        .collect();
    format!("_INBOX.{token}")
}

/// Drives one connection: spawns writer/read loops per transport and
/// replaces the transport on failure, with backoff and an attempt budget.
async fn supervise(
    core: Arc<ConnectionCore>,
    connector: Box<dyn Connector>,
    first: Box<dyn Transport>,
    events_rx: flume::Receiver<ConnEvent>,
) {
    let mut epoch: u64 = 0;
    let mut transport = Some(first);

    while let Some(t) = transport.take() {
        let (tx_half, rx_half) = t.split();
        let (writer_stop_tx, writer_stop_rx) = flume::bounded::<()>(1);
        let (reader_stop_tx, reader_stop_rx) = flume::bounded::<()>(1);
        let this_epoch = epoch;

        let writer_loop = WriterLoop::new(
            Arc::clone(&core.writer),
            Arc::clone(&core.pool),
            tx_half,
            core.opts.write_buffer_size,
            writer_stop_rx,
        );
        let events = core.events_tx.clone();
        compio::runtime::spawn(async move {
            let exit = writer_loop.run().await;
            let _ = events.send(ConnEvent::WriterExited {
                epoch: this_epoch,
                exit,
            });
        })
        .detach();

        compio::runtime::spawn(read_loop(
            Arc::downgrade(&core),
            rx_half,
            core.events_tx.clone(),
            this_epoch,
            reader_stop_rx,
        ))
        .detach();

        // Wait for this transport instance to fail or for an orderly
        // close. After a close request the writer still owns the drain, so
        // keep waiting until it reports back.
        let mut closing = false;
        let mut writer_done = false;
        let failure = loop {
            match events_rx.recv_async().await {
                Err(_) => break None,
                Ok(ConnEvent::CloseRequested) => closing = true,
                Ok(ConnEvent::WriterExited { epoch: e, exit }) if e == this_epoch => {
                    writer_done = true;
                    match exit {
                        WriterExit::Disconnected(error) if !closing => break Some(error),
                        _ => break None,
                    }
                }
                Ok(ConnEvent::ReaderFailed { epoch: e, error }) if e == this_epoch && !closing => {
                    break Some(error)
                }
                Ok(_) => {} // stale instance
            }
        };

        drop(reader_stop_tx);
        let Some(error) = failure else {
            drop(writer_stop_tx);
            break;
        };
        drop(writer_stop_tx);

        // The next instance replays this one's carryover; it must not
        // start until the old writer has parked it.
        if !writer_done {
            loop {
                match events_rx.recv_async().await {
                    Err(_) => return,
                    Ok(ConnEvent::WriterExited { epoch: e, .. }) if e == this_epoch => break,
                    Ok(ConnEvent::CloseRequested) => {} // reconnect loop observes Closed
                    Ok(_) => {}
                }
            }
        }

        if core.state.get() == ConnectionState::Closed {
            break;
        }
        core.state.set(ConnectionState::Reconnecting);
        debug!(error = %error, "transport lost, reconnecting");

        let mut backoff = ReconnectState::new(&core.opts.reconnect);
        let next = loop {
            if backoff.is_exhausted() {
                warn!(attempts = backoff.attempt(), "reconnect attempts exhausted");
                core.fail_all(LongeronError::ReconnectExhausted {
                    attempts: backoff.attempt(),
                });
                core.state.set(ConnectionState::Closed);
                break None;
            }
            compio::time::sleep(backoff.next_delay()).await;
            if core.state.get() == ConnectionState::Closed {
                break None;
            }
            match connector.connect().await {
                Ok(t) => break Some(t),
                Err(e) => {
                    debug!(attempt = backoff.attempt(), error = %e, "reconnect attempt failed");
                }
            }
        };
        let Some(next) = next else { break };

        epoch += 1;
        core.counters.incr_reconnects();
        if let Err(e) = core.stage_handshake() {
            warn!(error = %e, "could not stage reconnect handshake");
        }
        core.manager.stage_resubscribes();
        core.state.set(ConnectionState::Open);
        transport = Some(next);
    }

    // Final sweep: anything the last writer could not flush is failed
    // explicitly, never left dangling.
    core.fail_all(LongeronError::ConnectionClosed);
    trace!("connection supervisor finished");
}

/// Reads transport chunks, decodes frames, and routes them.
async fn read_loop(
    core: Weak<ConnectionCore>,
    mut transport: Box<dyn TransportReader>,
    events: flume::Sender<ConnEvent>,
    epoch: u64,
    stop_rx: flume::Receiver<()>,
) {
    let mut decoder = Decoder::new();
    let mut buf = BytesMut::new();

    loop {
        let chunk = futures::select! {
            _ = stop_rx.recv_async().fuse() => return,
            chunk = transport.recv().fuse() => chunk,
        };

        let chunk = match chunk {
            Ok(chunk) if chunk.is_empty() => {
                let _ = events.send(ConnEvent::ReaderFailed {
                    epoch,
                    error: LongeronError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "transport EOF",
                    )),
                });
                return;
            }
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = events.send(ConnEvent::ReaderFailed {
                    epoch,
                    error: LongeronError::Io(e),
                });
                return;
            }
        };

        buf.extend_from_slice(&chunk);
        loop {
            match decoder.decode(&mut buf) {
                Ok(Some(op)) => {
                    if !handle_op(&core, op).await {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    // Stream is out of sync beyond recovery; treat like a
                    // transport failure so it reconnects cleanly.
                    warn!(error = %e, "unrecoverable protocol desync");
                    let _ = events.send(ConnEvent::ReaderFailed {
                        epoch,
                        error: e.into(),
                    });
                    return;
                }
            }
        }
    }
}

/// Route one decoded frame. Returns `false` once the connection is gone.
async fn handle_op(core: &Weak<ConnectionCore>, op: ServerOp) -> bool {
    let Some(core) = core.upgrade() else {
        return false;
    };

    match op {
        ServerOp::Msg {
            subject,
            sid,
            reply_to,
            headers,
            payload,
        } => {
            let frame = InboundFrame {
                subject,
                sid,
                reply_to,
                headers,
                payload,
            };
            let weak = Arc::downgrade(&core);
            core.manager.dispatch(frame, weak).await;
        }
        ServerOp::Info(info) => {
            debug!(server = %info.server_id, version = %info.version, "handshake info received");
            core.server_info.lock().replace(info);
        }
        ServerOp::Ping => {
            let pong = core.pool.rent_pong();
            if let Err(returned) = core.writer.enqueue(Command::Pong(pong)).await {
                core.pool.recycle(returned);
            }
        }
        ServerOp::Pong => trace!("pong received"),
        ServerOp::Ok => {}
        // Malformed or unexpected frames are logged and dropped; the
        // engine keeps running.
        ServerOp::Err(message) => warn!(%message, "broker reported an error"),
        ServerOp::Unknown(verb) => warn!(%verb, "unknown protocol verb dropped"),
    }
    true
}
