//! The operation queue: a mailbox of deferred closures for the loop thread.
//!
//! Any thread may [`push`](OperationQueue::push) an operation.  The push
//! appends under a mutex and then signals the loop through a [`Wake`]
//! implementation.  The loop thread's wake handler calls
//! [`drain`](OperationQueue::drain), which swaps the pending list for an empty
//! one while holding the mutex only for the swap, and then runs each drained
//! operation in submission order.
//!
//! # Coalesced wakes
//!
//! [`ChannelWaker`] sends at most one wake message per drain cycle.  The loop
//! must call [`ChannelWaker::rearm`] *before* draining; a push that lands after
//! the rearm sends a fresh wake, and a push that lands before it is picked up
//! by the drain that follows.  No operation can be stranded between the two.
//!
//! # Wake failures
//!
//! A failed wake leaves the operation queued.  It is delivered on the next
//! wake that does get through (or by the final drain at loop exit); the caller
//! logs the failure and carries on.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

/// Reasons a wake signal could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WakeError {
    /// The loop thread has stopped listening for wakes.
    #[error("loop thread is no longer receiving wake signals")]
    LoopGone,
}

/// Signals the loop thread that the queue has work.
#[cfg_attr(test, mockall::automock)]
pub trait Wake: Send + Sync {
    fn wake(&self) -> Result<(), WakeError>;
}

/// FIFO mailbox of operations awaiting execution on the loop thread.
pub struct OperationQueue<Op, W> {
    pending: Mutex<Vec<Op>>,
    waker: W,
}

impl<Op, W: Wake> OperationQueue<Op, W> {
    pub fn new(waker: W) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            waker,
        }
    }

    /// Appends `op` and wakes the loop.
    ///
    /// # Errors
    ///
    /// Returns the wake failure.  The operation is queued either way.
    pub fn push(&self, op: Op) -> Result<(), WakeError> {
        self.pending.lock().push(op);
        self.waker.wake()
    }

    /// Takes every queued operation, oldest first.
    pub fn drain(&self) -> Vec<Op> {
        mem::take(&mut *self.pending.lock())
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    pub fn waker(&self) -> &W {
        &self.waker
    }
}

/// Coalescing wake backed by a tokio unbounded channel.
///
/// The receiving half is awaited by the loop thread; awaiting it is the only
/// place the loop thread blocks.
pub struct ChannelWaker {
    tx: mpsc::UnboundedSender<()>,
    armed: AtomicBool,
}

impl ChannelWaker {
    /// Creates the waker and the receiver the loop awaits.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                armed: AtomicBool::new(true),
            },
            rx,
        )
    }

    /// Allows the next [`wake`](Wake::wake) to send a message.
    pub fn rearm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

impl Wake for ChannelWaker {
    fn wake(&self) -> Result<(), WakeError> {
        if !self.armed.swap(false, Ordering::SeqCst) {
            // A wake is already in flight for this drain cycle.
            return Ok(());
        }
        self.tx.send(()).map_err(|_| {
            self.armed.store(true, Ordering::SeqCst);
            WakeError::LoopGone
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
