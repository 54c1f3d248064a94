//! Single-assignment completion cells for asynchronous commands.
//!
//! Every asynchronous command carries exactly one [`Completion`]. The
//! writer loop (or deadline logic) resolves it exactly once; whichever
//! terminal transition fires first wins and subsequent calls are no-ops.
//!
//! The cell is an atomic state machine plus a capacity-1 channel, so the
//! resolving side never blocks and the awaiting side parks on the channel.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::deadline::Deadline;
use crate::error::{LongeronError, Result};

const PENDING: u8 = 0;
const COMPLETED: u8 = 1;
const CANCELED: u8 = 2;
const FAILED: u8 = 3;

/// Terminal state of a resolved command.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Command was flushed to the transport.
    Completed,
    /// Deadline elapsed before the writer flushed the command.
    Canceled,
    /// Command failed; the same error may be shared by many commands.
    Failed(Arc<LongeronError>),
}

impl Outcome {
    fn into_result(self) -> Result<()> {
        match self {
            Self::Completed => Ok(()),
            Self::Canceled => Err(LongeronError::Canceled),
            Self::Failed(err) => Err(LongeronError::Shared(err)),
        }
    }
}

struct Cell {
    state: AtomicU8,
    tx: flume::Sender<Outcome>,
    rx: flume::Receiver<Outcome>,
}

/// Awaitable single-resolution handle for one asynchronous command.
///
/// Cloning is cheap; clones observe the same resolution. The writer loop
/// holds a clone while the command is in flight, the caller holds one to
/// await the result.
#[derive(Clone)]
pub struct Completion {
    cell: Arc<Cell>,
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl Completion {
    /// Create a fresh pending completion.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = flume::bounded(1);
        Self {
            cell: Arc::new(Cell {
                state: AtomicU8::new(PENDING),
                tx,
                rx,
            }),
        }
    }

    fn transition(&self, to: u8, outcome: Outcome) -> bool {
        if self
            .cell
            .state
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        // Capacity-1 channel and exactly one winner: this cannot fail.
        let _ = self.cell.tx.try_send(outcome);
        true
    }

    /// Resolve as succeeded. Returns `false` if already resolved.
    pub fn set_result(&self) -> bool {
        self.transition(COMPLETED, Outcome::Completed)
    }

    /// Resolve as canceled. Returns `false` if already resolved.
    pub fn set_canceled(&self) -> bool {
        self.transition(CANCELED, Outcome::Canceled)
    }

    /// Resolve as failed. Returns `false` if already resolved.
    pub fn set_failed(&self, err: Arc<LongeronError>) -> bool {
        self.transition(FAILED, Outcome::Failed(err))
    }

    /// Whether a terminal transition has happened.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.cell.state.load(Ordering::Acquire) != PENDING
    }

    /// Await the resolution.
    pub async fn wait(&self) -> Result<()> {
        match self.cell.rx.recv_async().await {
            Ok(outcome) => outcome.into_result(),
            Err(_) => Err(LongeronError::ChannelRecv),
        }
    }

    /// Await the resolution, cancelling the command if `deadline` elapses
    /// first.
    ///
    /// The cancellation is caller-side: the writer skips the command when
    /// it observes the elapsed deadline, it never races the resolution. If
    /// the writer wins the race the actual outcome is returned instead.
    pub async fn wait_until(&self, deadline: Deadline) -> Result<()> {
        let Some(remaining) = deadline.remaining() else {
            return self.wait().await;
        };

        match compio::time::timeout(remaining, self.cell.rx.recv_async()).await {
            Ok(Ok(outcome)) => outcome.into_result(),
            Ok(Err(_)) => Err(LongeronError::ChannelRecv),
            Err(_elapsed) => {
                if self.set_canceled() {
                    Err(LongeronError::Canceled)
                } else {
                    // Lost the race: the writer resolved first.
                    self.wait().await
                }
            }
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.cell.state.load(Ordering::Acquire) {
            COMPLETED => "completed",
            CANCELED => "canceled",
            FAILED => "failed",
            _ => "pending",
        };
        f.debug_struct("Completion").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_terminal_transition_wins() {
        let c = Completion::new();
        assert!(c.set_result());
        assert!(!c.set_canceled());
        assert!(!c.set_failed(Arc::new(LongeronError::ConnectionClosed)));
        assert!(c.is_resolved());
    }

    #[test]
    fn wait_observes_success() {
        let c = Completion::new();
        let rt = compio::runtime::Runtime::new().unwrap();
        c.set_result();
        rt.block_on(async {
            assert!(c.wait().await.is_ok());
        });
    }

    #[test]
    fn wait_observes_failure() {
        let c = Completion::new();
        let shared = Arc::new(LongeronError::ReconnectExhausted { attempts: 3 });
        c.set_failed(shared);
        let rt = compio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let err = c.wait().await.unwrap_err();
            assert!(matches!(err, LongeronError::Shared(_)));
        });
    }

    #[test]
    fn deadline_cancels_pending_command() {
        let c = Completion::new();
        let rt = compio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let err = c
                .wait_until(Deadline::after(Duration::from_millis(10)))
                .await
                .unwrap_err();
            assert!(matches!(err, LongeronError::Canceled));
        });
        // The cell is now terminally canceled; the writer's resolution
        // becomes a no-op.
        assert!(!c.set_result());
    }

    #[test]
    fn resolution_beats_deadline() {
        let c = Completion::new();
        c.set_result();
        let rt = compio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            assert!(c
                .wait_until(Deadline::after(Duration::from_secs(5)))
                .await
                .is_ok());
        });
    }
}
