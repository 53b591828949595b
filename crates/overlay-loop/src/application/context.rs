//! [`LoopContext`]: the explicit handle to one running event loop.
//!
//! There are no process-wide statics.  Every component that needs the loop
//! (connection handles, the interceptor, service hosting) is given a
//! `LoopContext` at construction.  Cloning is cheap; all clones refer to the
//! same loop.
//!
//! Components that must not keep the loop alive (connection handles, event
//! sinks) hold a non-owning reference instead and check liveness before every
//! use.
//!
//! # State machine
//!
//! ```text
//! Uninitialized ─▶ Initializing ─▶ Running ─▶ ClosingDown ─▶ Closed
//!                        │                                    ▲
//!                        └──────────── init failure ──────────┘
//! ```
//!
//! Once `Closed`, operations are not queued any more: they run immediately
//! on the calling thread against a closed reactor, so their callbacks fire
//! with [`OverlayError::LoopClosed`].

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use overlay_core::{OverlayError, ServiceDescriptor};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::application::queue::{ChannelWaker, OperationQueue};
use crate::application::reactor::{self, Reactor};
use crate::application::services::ServiceRegistry;

/// A deferred operation over the loop-thread state.
pub type Op = Box<dyn FnOnce(&mut Reactor) + Send + 'static>;

/// Lifecycle of a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopState {
    Uninitialized,
    Initializing,
    Running,
    ClosingDown,
    Closed,
}

impl LoopState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopState::Uninitialized => "uninitialized",
            LoopState::Initializing => "initializing",
            LoopState::Running => "running",
            LoopState::ClosingDown => "closing-down",
            LoopState::Closed => "closed",
        }
    }

    pub fn is_closed(&self) -> bool {
        *self == LoopState::Closed
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct LoopThread {
    id: ThreadId,
    name: String,
}

/// State shared by every clone of a [`LoopContext`].
pub struct LoopShared {
    queue: OperationQueue<Op, ChannelWaker>,
    state: Mutex<LoopState>,
    state_changed: Condvar,
    thread: OnceLock<LoopThread>,
    registry: ServiceRegistry,
    join: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to one event loop.
#[derive(Clone)]
pub struct LoopContext {
    shared: Arc<LoopShared>,
}

impl LoopContext {
    pub(crate) fn new(waker: ChannelWaker) -> Self {
        Self {
            shared: Arc::new(LoopShared {
                queue: OperationQueue::new(waker),
                state: Mutex::new(LoopState::Uninitialized),
                state_changed: Condvar::new(),
                thread: OnceLock::new(),
                registry: ServiceRegistry::new(),
                join: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn upgrade(weak: &Weak<LoopShared>) -> Option<Self> {
        weak.upgrade().map(|shared| Self { shared })
    }

    pub(crate) fn downgrade(&self) -> Weak<LoopShared> {
        Arc::downgrade(&self.shared)
    }

    pub(crate) fn queue(&self) -> &OperationQueue<Op, ChannelWaker> {
        &self.shared.queue
    }

    pub(crate) fn set_state(&self, next: LoopState) {
        let mut state = self.shared.state.lock();
        if *state != next {
            debug!("loop state {} -> {}", *state, next);
            *state = next;
            self.shared.state_changed.notify_all();
        }
    }

    /// Records the calling thread as the loop thread.  Called once, first
    /// thing on the loop thread.
    pub(crate) fn record_loop_thread(&self) {
        let current = thread::current();
        let name = current.name().unwrap_or("<unnamed>").to_string();
        let _ = self.shared.thread.set(LoopThread {
            id: current.id(),
            name,
        });
    }

    pub(crate) fn set_join_handle(&self, handle: JoinHandle<()>) {
        *self.shared.join.lock() = Some(handle);
    }

    /// Queues `op` unless the loop is closed.  Returns the op back when it
    /// was not queued.
    fn push_unless_closed(&self, op: Op) -> Result<(), Op> {
        // Holding the state lock across the push means the loop's final drain
        // (which runs after `Closed` is published) sees every op pushed here.
        let state = self.shared.state.lock();
        if state.is_closed() {
            return Err(op);
        }
        if let Err(e) = self.shared.queue.push(op) {
            warn!("loop wake failed, operation stays queued: {e}");
        }
        Ok(())
    }

    /// Queues `op` without trying to run it inline.  Returns `false` when the
    /// loop is closed and the op was dropped.
    pub(crate) fn enqueue(&self, op: Op) -> bool {
        self.push_unless_closed(op).is_ok()
    }

    /// Queues `op`; on a closed loop it runs immediately against a closed
    /// reactor instead.
    pub(crate) fn submit(&self, op: Op) {
        if let Err(op) = self.push_unless_closed(op) {
            reactor::run_detached(op);
        }
    }

    // ── Public API ────────────────────────────────────────────────────────────

    /// Runs `op` on the loop thread.
    ///
    /// On the loop thread itself `op` runs synchronously, unless another
    /// operation is already executing further up the stack; in that case it
    /// is queued behind the current batch.  From any other thread `op` is
    /// queued and the loop woken; this call never blocks on the loop.
    pub fn perform<F>(&self, op: F)
    where
        F: FnOnce(&mut Reactor) + Send + 'static,
    {
        let op = if self.is_loop_thread() {
            match reactor::run_inline(op) {
                Ok(()) => return,
                Err(op) => op,
            }
        } else {
            op
        };
        self.submit(Box::new(op));
    }

    /// Runs `op` on the loop thread after `delay`.
    pub fn perform_after<F>(&self, delay: Duration, op: F)
    where
        F: FnOnce(&mut Reactor) + Send + 'static,
    {
        self.perform(move |reactor| reactor.schedule(delay, Box::new(op)));
    }

    /// Asks the overlay whether `service` is available right now.
    ///
    /// `callback` fires exactly once, on the loop thread, with the service's
    /// descriptor or the reason it is unavailable.
    pub fn probe_service<F>(&self, service: &str, callback: F)
    where
        F: FnOnce(Result<ServiceDescriptor, OverlayError>) + Send + 'static,
    {
        let service = service.to_string();
        self.perform(move |reactor| reactor.probe(service, Box::new(callback)));
    }

    /// Requests a graceful shutdown, queued behind every earlier operation.
    pub fn shutdown(&self) {
        self.perform(Reactor::begin_shutdown);
    }

    /// Blocks until the loop is closed or `timeout` elapses.  Returns `true`
    /// if the loop is closed.
    ///
    /// Called off the loop thread, this also joins the loop thread.
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        {
            let mut state = self.shared.state.lock();
            while !state.is_closed() {
                if self
                    .shared
                    .state_changed
                    .wait_until(&mut state, deadline)
                    .timed_out()
                {
                    return state.is_closed();
                }
            }
        }
        if !self.is_loop_thread() {
            if let Some(handle) = self.shared.join.lock().take() {
                if handle.join().is_err() {
                    warn!("loop thread panicked during teardown");
                }
            }
        }
        true
    }

    pub fn state(&self) -> LoopState {
        *self.shared.state.lock()
    }

    /// `true` when called from this loop's thread.
    pub fn is_loop_thread(&self) -> bool {
        self.shared
            .thread
            .get()
            .is_some_and(|t| t.id == thread::current().id())
    }

    /// Name of the loop thread, once it has started.
    pub fn loop_thread_name(&self) -> Option<String> {
        self.shared.thread.get().map(|t| t.name.clone())
    }

    /// Service availability for this loop.
    pub fn registry(&self) -> &ServiceRegistry {
        &self.shared.registry
    }
}

impl fmt::Debug for LoopContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopContext")
            .field("state", &self.state())
            .field("thread", &self.loop_thread_name())
            .finish()
    }
}
