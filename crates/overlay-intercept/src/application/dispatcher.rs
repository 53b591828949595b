//! Delivers consumer notifications on the consumer's own thread.
//!
//! # How delivery works (for beginners)
//!
//! A consumer (the code that starts an intercepted request) lives on some
//! thread that runs its own little event loop, a [`ConsumerLoop`].  The loop
//! thread must call that consumer's callbacks *on the consumer thread*, and
//! must not start the next callback for a request before the previous one has
//! finished.
//!
//! ```text
//!  loop thread                               consumer thread
//!  ───────────                               ───────────────
//!  deliver(target, job)
//!    send Envelope ──── bounded channel ───▶ run_once(mode, ..)
//!    wait on rendezvous                        job()  (if mode matches)
//!    ◀────────────────── done ─────────────── signal
//!  DeliveryOutcome::Delivered
//! ```
//!
//! When the caller already is the consumer thread, the job runs inline.  A
//! job is only run while the consumer loop runs in one of the target's
//! modes; jobs for other modes wait in the loop's backlog.
//!
//! If a rendezvous timeout is configured and expires before the consumer
//! picks the job up, the job is abandoned and never runs.

use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// A run-loop mode the consumer can be running in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RunLoopMode {
    Default,
    /// Matches both `Default` and `Common`.
    Common,
    Custom(String),
}

impl RunLoopMode {
    /// `true` if a job targeted at `self` may run while the loop runs in
    /// `running`.
    pub fn admits(&self, running: &RunLoopMode) -> bool {
        match self {
            RunLoopMode::Common => matches!(running, RunLoopMode::Default | RunLoopMode::Common),
            other => other == running,
        }
    }
}

impl fmt::Display for RunLoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunLoopMode::Default => f.write_str("default"),
            RunLoopMode::Common => f.write_str("common"),
            RunLoopMode::Custom(name) => f.write_str(name),
        }
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

const WAITING: u8 = 0;
const RUNNING: u8 = 1;
const ABANDONED: u8 = 2;

struct Envelope {
    modes: Vec<RunLoopMode>,
    job: Job,
    state: Arc<AtomicU8>,
    done: SyncSender<()>,
}

impl Envelope {
    fn admitted_in(&self, mode: &RunLoopMode) -> bool {
        self.modes.iter().any(|m| m.admits(mode))
    }

    /// Runs the job unless the sender gave up on it.
    fn run(self) -> bool {
        if self
            .state
            .compare_exchange(WAITING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        (self.job)();
        let _ = self.done.send(());
        true
    }
}

struct ConsumerShared {
    thread: ThreadId,
    tx: SyncSender<Envelope>,
    alive: AtomicBool,
}

/// Cloneable, thread-safe address of one consumer thread.
#[derive(Clone)]
pub struct ConsumerHandle {
    shared: Arc<ConsumerShared>,
}

impl ConsumerHandle {
    /// `true` when called from the consumer thread.
    pub fn is_current(&self) -> bool {
        self.shared.thread == thread::current().id()
    }

    /// `false` once the consumer loop has been dropped.
    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("thread", &self.shared.thread)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// The consumer-side loop.  Bound to the thread that created it.
pub struct ConsumerLoop {
    rx: Receiver<Envelope>,
    backlog: VecDeque<Envelope>,
    shared: Arc<ConsumerShared>,
    _not_send: PhantomData<*const ()>,
}

/// Creates a consumer bound to the calling thread.  `capacity` bounds the
/// envelopes in flight towards it.
pub fn consumer_channel(capacity: usize) -> (ConsumerHandle, ConsumerLoop) {
    let (tx, rx) = mpsc::sync_channel(capacity.max(1));
    let shared = Arc::new(ConsumerShared {
        thread: thread::current().id(),
        tx,
        alive: AtomicBool::new(true),
    });
    (
        ConsumerHandle {
            shared: shared.clone(),
        },
        ConsumerLoop {
            rx,
            backlog: VecDeque::new(),
            shared,
            _not_send: PhantomData,
        },
    )
}

impl ConsumerLoop {
    /// Runs every job admitted in `mode` that is waiting, waiting up to
    /// `timeout` for the first one.  Returns the number of jobs run.
    pub fn run_once(&mut self, mode: &RunLoopMode, timeout: Duration) -> usize {
        let mut ran = self.run_backlog(mode);
        if ran > 0 {
            // Pick up anything else already queued without waiting.
            return ran + self.run_queued(mode, Duration::ZERO);
        }
        ran += self.run_queued(mode, timeout);
        ran
    }

    /// Runs admitted jobs until `done()` returns `true` or `deadline`
    /// passes.  Returns the final value of `done()`.
    pub fn run_until<F>(&mut self, mode: &RunLoopMode, deadline: Instant, mut done: F) -> bool
    where
        F: FnMut() -> bool,
    {
        while !done() {
            let Some(left) = deadline.checked_duration_since(Instant::now()) else {
                return done();
            };
            self.run_once(mode, left.min(Duration::from_millis(20)));
        }
        true
    }

    /// Jobs waiting for a different mode.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn handle(&self) -> ConsumerHandle {
        ConsumerHandle {
            shared: self.shared.clone(),
        }
    }

    fn run_backlog(&mut self, mode: &RunLoopMode) -> usize {
        let mut ran = 0;
        let mut kept = VecDeque::with_capacity(self.backlog.len());
        while let Some(envelope) = self.backlog.pop_front() {
            if envelope.admitted_in(mode) {
                ran += usize::from(envelope.run());
            } else {
                kept.push_back(envelope);
            }
        }
        self.backlog = kept;
        ran
    }

    fn run_queued(&mut self, mode: &RunLoopMode, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut ran = 0;
        loop {
            let wait = if ran == 0 {
                deadline.saturating_duration_since(Instant::now())
            } else {
                Duration::ZERO
            };
            let envelope = match self.rx.recv_timeout(wait) {
                Ok(envelope) => envelope,
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
            };
            if envelope.admitted_in(mode) {
                ran += usize::from(envelope.run());
            } else {
                self.backlog.push_back(envelope);
            }
        }
        ran
    }
}

impl Drop for ConsumerLoop {
    fn drop(&mut self) {
        self.shared.alive.store(false, Ordering::Release);
        if !self.backlog.is_empty() {
            debug!("consumer loop dropped with {} undelivered job(s)", self.backlog.len());
        }
    }
}

/// Where and in which modes a request's notifications are delivered.
#[derive(Debug, Clone)]
pub struct DeliveryTarget {
    pub consumer: ConsumerHandle,
    pub modes: Vec<RunLoopMode>,
}

impl DeliveryTarget {
    pub fn new(consumer: ConsumerHandle, modes: Vec<RunLoopMode>) -> Self {
        Self { consumer, modes }
    }

    /// Delivers in the default mode only.
    pub fn default_mode(consumer: ConsumerHandle) -> Self {
        Self::new(consumer, vec![RunLoopMode::Default])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Ran on the consumer thread; the caller waited for it.
    Delivered,
    /// The caller was the consumer thread; ran in place.
    Inline,
    /// The consumer loop is gone; the job did not run.
    ConsumerGone,
    /// The consumer did not pick the job up in time; it will not run.
    TimedOut,
}

/// Sends jobs to consumer threads and waits for them.
#[derive(Debug, Clone, Default)]
pub struct NotificationDispatcher {
    rendezvous_timeout: Option<Duration>,
}

impl NotificationDispatcher {
    pub fn new(rendezvous_timeout: Option<Duration>) -> Self {
        Self { rendezvous_timeout }
    }

    /// Runs `job` on `target`'s consumer thread and blocks until it has run.
    pub fn deliver<F>(&self, target: &DeliveryTarget, job: F) -> DeliveryOutcome
    where
        F: FnOnce() + Send + 'static,
    {
        let consumer = &target.consumer;
        if consumer.is_current() {
            job();
            return DeliveryOutcome::Inline;
        }
        if !consumer.is_alive() {
            return DeliveryOutcome::ConsumerGone;
        }

        let deadline = self.rendezvous_timeout.map(|t| Instant::now() + t);
        let state = Arc::new(AtomicU8::new(WAITING));
        let (done_tx, done_rx) = mpsc::sync_channel(1);
        let envelope = Envelope {
            modes: target.modes.clone(),
            job: Box::new(job),
            state: state.clone(),
            done: done_tx,
        };

        if let Err(outcome) = self.send(consumer, envelope, deadline) {
            return outcome;
        }

        let received = match deadline {
            None => done_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(deadline) => {
                done_rx.recv_timeout(deadline.saturating_duration_since(Instant::now()))
            }
        };
        match received {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(RecvTimeoutError::Disconnected) => DeliveryOutcome::ConsumerGone,
            Err(RecvTimeoutError::Timeout) => {
                if state
                    .compare_exchange(WAITING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    warn!("consumer did not run notification in time; abandoned");
                    return DeliveryOutcome::TimedOut;
                }
                // Already running: wait for it to finish.
                match done_rx.recv() {
                    Ok(()) => DeliveryOutcome::Delivered,
                    Err(_) => DeliveryOutcome::ConsumerGone,
                }
            }
        }
    }

    fn send(
        &self,
        consumer: &ConsumerHandle,
        envelope: Envelope,
        deadline: Option<Instant>,
    ) -> Result<(), DeliveryOutcome> {
        let tx = &consumer.shared.tx;
        let Some(deadline) = deadline else {
            return tx.send(envelope).map_err(|_| DeliveryOutcome::ConsumerGone);
        };
        let mut envelope = envelope;
        loop {
            match tx.try_send(envelope) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Disconnected(_)) => return Err(DeliveryOutcome::ConsumerGone),
                Err(TrySendError::Full(back)) => {
                    if Instant::now() >= deadline {
                        return Err(DeliveryOutcome::TimedOut);
                    }
                    envelope = back;
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
