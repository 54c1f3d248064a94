//! Writer state and the pipelining writer loop.
//!
//! One writer loop instance runs per live transport. It is the only task
//! that touches the output buffer and the carryover lists, so those need a
//! lock only for the handover between successive instances across a
//! reconnect.
//!
//! Ordering contract: completions resolve in the exact order commands were
//! accepted from the queue, and bytes carried over a disconnect are
//! flushed before anything newly queued.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use flume::{Receiver, Sender};
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use longeron_core::completion::Completion;
use longeron_core::counters::ConnectionCounters;
use longeron_core::error::LongeronError;

use crate::command::{Command, CommandPool};
use crate::proto::ProtocolWriter;
use crate::transport::TransportWriter;

/// Recovery lists surviving a disconnect.
///
/// In-flight commands are carried in serialized form: the bytes that were
/// written into the output buffer but never confirmed by the transport,
/// together with their completion handles in acceptance order.
#[derive(Default)]
pub struct Carryover {
    pub buffer: BytesMut,
    pub completions: Vec<Completion>,
}

impl Carryover {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && self.completions.is_empty()
    }
}

/// Shared staging area between producers and the writer loop.
///
/// Owns the bounded command queue, the priority lane for handshake
/// commands, and the carryover lists populated when a flush fails.
pub struct WriterState {
    cmd_tx: Sender<Command>,
    cmd_rx: Receiver<Command>,
    priority: Mutex<Vec<Command>>,
    carry: Mutex<Carryover>,
    shutdown_tx: Sender<()>,
    shutdown_rx: Receiver<()>,
    closing: AtomicBool,
    counters: Arc<ConnectionCounters>,
}

impl WriterState {
    #[must_use]
    pub fn new(queue_capacity: usize, counters: Arc<ConnectionCounters>) -> Self {
        let (cmd_tx, cmd_rx) = flume::bounded(queue_capacity);
        let (shutdown_tx, shutdown_rx) = flume::bounded(1);
        Self {
            cmd_tx,
            cmd_rx,
            priority: Mutex::new(Vec::new()),
            carry: Mutex::new(Carryover::default()),
            shutdown_tx,
            shutdown_rx,
            closing: AtomicBool::new(false),
            counters,
        }
    }

    /// Enqueue a command, suspending while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns the command back when the connection is closing; a command
    /// accepted here would never drain.
    pub async fn enqueue(&self, command: Command) -> Result<(), Command> {
        if self.is_closing() {
            return Err(command);
        }
        self.counters.incr_pending();
        match self.cmd_tx.send_async(command).await {
            Ok(()) => Ok(()),
            Err(flume::SendError(command)) => {
                self.counters.decr_pending();
                Err(command)
            }
        }
    }

    /// Non-blocking enqueue used on cleanup paths (e.g. unsubscribe on
    /// drop). Returns `false` when the queue is full or closing.
    pub fn try_enqueue(&self, command: Command) -> bool {
        if self.is_closing() {
            return false;
        }
        match self.cmd_tx.try_send(command) {
            Ok(()) => {
                self.counters.incr_pending();
                true
            }
            Err(_) => false,
        }
    }

    /// Stage a handshake command on the priority lane. Drained first by
    /// the next writer instance, ahead of carryover and queued work.
    pub fn push_priority(&self, command: Command) {
        self.priority.lock().push(command);
    }

    /// Ask the current writer instance to drain accepted work and stop.
    pub fn request_shutdown(&self) {
        self.closing.store(true, Ordering::Release);
        let _ = self.shutdown_tx.try_send(());
    }

    /// Whether an orderly shutdown has been requested.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Commands accepted but not yet drained.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.cmd_rx.len()
    }

    /// Snapshot of the recovery lists: carried bytes and completions.
    #[must_use]
    pub fn carry_sizes(&self) -> (usize, usize) {
        let carry = self.carry.lock();
        (carry.buffer.len(), carry.completions.len())
    }

    pub(crate) fn take_priority(&self) -> Vec<Command> {
        std::mem::take(&mut *self.priority.lock())
    }

    pub(crate) fn take_carry(&self) -> Carryover {
        std::mem::take(&mut *self.carry.lock())
    }

    pub(crate) fn store_carry(&self, carry: Carryover) {
        *self.carry.lock() = carry;
    }

    /// Drain every command still queued or staged, without writing them.
    /// Used when the connection fails fatally.
    pub(crate) fn drain_all(&self) -> Vec<Command> {
        let mut commands = self.take_priority();
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            self.counters.decr_pending();
            commands.push(cmd);
        }
        commands
    }
}

enum Wake {
    Command(Option<Command>),
    Shutdown,
    Stop,
}

/// Why a writer instance stopped.
#[derive(Debug)]
pub enum WriterExit {
    /// Transport failure; recovery lists were captured for the next
    /// instance and reconnection should begin.
    Disconnected(LongeronError),
    /// Orderly shutdown after draining accepted work.
    Shutdown,
    /// Instance torn down by the connection supervisor (the read path saw
    /// the transport die first); staged work was carried over.
    Stopped,
}

/// The single task that drains the queue, serializes commands into the
/// shared output buffer, and flushes batches to the transport.
pub struct WriterLoop {
    state: Arc<WriterState>,
    pool: Arc<CommandPool>,
    counters: Arc<ConnectionCounters>,
    transport: Box<dyn TransportWriter>,
    budget: usize,
    /// Instance-scoped teardown signal: fires when the supervisor drops
    /// the sending half after the transport died elsewhere.
    stop_rx: Receiver<()>,
}

impl WriterLoop {
    #[must_use]
    pub fn new(
        state: Arc<WriterState>,
        pool: Arc<CommandPool>,
        transport: Box<dyn TransportWriter>,
        budget: usize,
        stop_rx: Receiver<()>,
    ) -> Self {
        let counters = Arc::clone(&state.counters);
        Self {
            state,
            pool,
            counters,
            transport,
            budget,
            stop_rx,
        }
    }

    /// Run to completion: until transport failure or orderly shutdown.
    pub async fn run(mut self) -> WriterExit {
        // Handshake commands first, as one contiguous write. On any error
        // here there is nothing to salvage on this transport.
        let staged = self.state.take_priority();
        if !staged.is_empty() {
            let mut buffer = BytesMut::new();
            let mut promises = Vec::new();
            let mut frames = 0u64;
            for cmd in staged {
                self.stage(cmd, &mut buffer, &mut promises, &mut frames, false);
            }
            debug!(bytes = buffer.len(), frames, "flushing priority lane");
            if let Err(err) = self.flush(&mut buffer).await {
                let shared = Arc::new(err);
                for promise in promises {
                    promise.set_failed(Arc::clone(&shared));
                }
                return WriterExit::Disconnected(LongeronError::Shared(shared));
            }
            self.counters.add_sent_messages(frames);
            for promise in promises {
                promise.set_result();
            }
        }

        // Re-absorb whatever a previous instance left behind. These bytes
        // go out before anything newly queued.
        let carry = self.state.take_carry();
        let mut buffer = carry.buffer;
        let mut promises = carry.completions;
        let mut frames = 0u64;
        if !buffer.is_empty() {
            debug!(
                bytes = buffer.len(),
                completions = promises.len(),
                "replaying carryover from previous writer"
            );
        }

        loop {
            if buffer.is_empty() && promises.is_empty() {
                let wake = futures::select! {
                    cmd = self.state.cmd_rx.recv_async().fuse() => Wake::Command(cmd.ok()),
                    _ = self.state.shutdown_rx.recv_async().fuse() => Wake::Shutdown,
                    _ = self.stop_rx.recv_async().fuse() => Wake::Stop,
                };
                match wake {
                    Wake::Command(Some(cmd)) => {
                        self.stage(cmd, &mut buffer, &mut promises, &mut frames, true);
                    }
                    Wake::Command(None) => return WriterExit::Shutdown,
                    Wake::Shutdown => {
                        return self.drain_and_exit(buffer, promises, frames).await;
                    }
                    Wake::Stop => {
                        // Orderly close still drains; a plain teardown
                        // only parks staged work for the next instance.
                        if self.state.is_closing() {
                            return self.drain_and_exit(buffer, promises, frames).await;
                        }
                        self.state.store_carry(Carryover {
                            buffer,
                            completions: promises,
                        });
                        return WriterExit::Stopped;
                    }
                }
            }

            // Fill the batch with whatever is ready, up to the byte budget.
            while buffer.len() < self.budget {
                match self.state.cmd_rx.try_recv() {
                    Ok(cmd) => self.stage(cmd, &mut buffer, &mut promises, &mut frames, true),
                    Err(_) => break,
                }
            }

            trace!(bytes = buffer.len(), frames, "flushing batch");
            match self.flush(&mut buffer).await {
                Ok(()) => {
                    self.counters.add_sent_messages(frames);
                    frames = 0;
                    // Resolve in acceptance order.
                    for promise in promises.drain(..) {
                        promise.set_result();
                    }
                }
                Err(err) => {
                    warn!(error = %err, "flush failed, capturing recovery lists");
                    self.state.store_carry(Carryover {
                        buffer: std::mem::take(&mut buffer),
                        completions: std::mem::take(&mut promises),
                    });
                    return WriterExit::Disconnected(err);
                }
            }
        }
    }

    /// Serialize one dequeued command into the buffer, record its promise,
    /// and return it to the pool.
    fn stage(
        &self,
        mut cmd: Command,
        buffer: &mut BytesMut,
        promises: &mut Vec<Completion>,
        frames: &mut u64,
        from_queue: bool,
    ) {
        if from_queue {
            self.counters.decr_pending();
        }

        if cmd.is_canceled() {
            // Deadline already passed: write no bytes. The caller side
            // resolves the completion as canceled.
            trace!("skipping expired command");
            self.pool.recycle(cmd);
            return;
        }

        *frames += cmd.write(&mut ProtocolWriter::new(buffer)) as u64;
        if let Some(promise) = cmd.take_completion() {
            promises.push(promise);
        }
        self.pool.recycle(cmd);
    }

    /// Flush the buffer to the transport, advancing over partial writes.
    async fn flush(&mut self, buffer: &mut BytesMut) -> Result<(), LongeronError> {
        while !buffer.is_empty() {
            let sent = self.transport.send(&buffer[..]).await?;
            if sent == 0 {
                return Err(LongeronError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "zero-byte write: socket closed",
                )));
            }
            self.counters.add_sent_bytes(sent as u64);
            buffer.advance(sent);
        }
        Ok(())
    }

    /// Orderly shutdown: accept what is already queued, flush it, resolve
    /// promises. Anything unflushable is left in the recovery lists for the
    /// connection to fail explicitly.
    async fn drain_and_exit(
        mut self,
        mut buffer: BytesMut,
        mut promises: Vec<Completion>,
        mut frames: u64,
    ) -> WriterExit {
        while let Ok(cmd) = self.state.cmd_rx.try_recv() {
            self.stage(cmd, &mut buffer, &mut promises, &mut frames, true);
        }

        match self.flush(&mut buffer).await {
            Ok(()) => {
                self.counters.add_sent_messages(frames);
                for promise in promises.drain(..) {
                    promise.set_result();
                }
            }
            Err(err) => {
                debug!(error = %err, "final drain flush failed");
                self.state.store_carry(Carryover {
                    buffer,
                    completions: promises,
                });
            }
        }
        WriterExit::Shutdown
    }
}
