//! The loop runner: owns the single event-loop thread.
//!
//! [`LoopRunner::start_async`] spawns a dedicated, named `std::thread`.  On it
//! a tokio current-thread runtime drives a `LocalSet`, and inside that the
//! loop:
//!
//! 1. records the thread identity in the [`LoopContext`],
//! 2. installs the [`Reactor`] in the thread-local slot,
//! 3. validates the identity and initialises the overlay,
//! 4. waits on the wake channel, drains the operation queue and runs each
//!    operation, until the overlay reports `ShutdownComplete` (or
//!    initialisation failed),
//! 5. fails everything still outstanding with `LoopClosed`, publishes
//!    `Closed`, and runs any operations that were queued in the meantime.
//!
//! Awaiting the wake channel is the only point where the loop thread blocks.
//! Timers scheduled with `perform_after` run as local tasks on the same
//! runtime while the loop waits.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use overlay_core::{Identity, OverlayError};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::LocalSet;
use tracing::{debug, error, info, warn};

use crate::application::context::{LoopContext, LoopState};
use crate::application::overlay::{EventSink, OverlayClient};
use crate::application::queue::ChannelWaker;
use crate::application::reactor::{self, InitCallback, Reactor};

/// Errors returned by [`LoopRunner`].
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("failed to spawn loop thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error(transparent)]
    Init(#[from] OverlayError),
    #[error("overlay did not finish initialising within {0:?}")]
    InitTimeout(Duration),
}

/// Runner settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Name given to the loop thread.
    pub thread_name: String,
    /// How long [`LoopRunner::start`] waits for the init callback.
    pub init_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            thread_name: "overlay-loop".to_string(),
            init_timeout: Duration::from_secs(30),
        }
    }
}

/// Starts event loops.
pub struct LoopRunner;

impl LoopRunner {
    /// Starts a loop and blocks until the overlay reports its init outcome.
    ///
    /// # Errors
    ///
    /// - [`LoopError::Spawn`] if the thread cannot be created.
    /// - [`LoopError::Init`] with [`OverlayError::Config`] for an invalid
    ///   identity, or the overlay's own init failure.  The loop is closed.
    /// - [`LoopError::InitTimeout`] if no outcome arrives in time.  A
    ///   shutdown has been requested.
    pub fn start<O>(
        config: LoopConfig,
        identity: Identity,
        overlay: O,
    ) -> Result<LoopContext, LoopError>
    where
        O: OverlayClient + 'static,
    {
        let timeout = config.init_timeout;
        let (tx, rx) = mpsc::sync_channel(1);
        let ctx = Self::start_async(config, identity, overlay, move |result| {
            let _ = tx.send(result);
        })?;

        match rx.recv_timeout(timeout) {
            Ok(Ok(())) => Ok(ctx),
            Ok(Err(e)) => {
                ctx.wait_closed(timeout);
                Err(LoopError::Init(e))
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("overlay init did not complete within {timeout:?}; shutting down");
                ctx.shutdown();
                Err(LoopError::InitTimeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(LoopError::Init(OverlayError::Init(
                "loop thread exited before reporting init".into(),
            ))),
        }
    }

    /// Starts a loop and returns its context immediately.
    ///
    /// `on_init` fires exactly once, on the loop thread, with the init
    /// outcome.
    ///
    /// # Errors
    ///
    /// Returns [`LoopError::Spawn`] if the thread cannot be created.
    pub fn start_async<O, F>(
        config: LoopConfig,
        identity: Identity,
        overlay: O,
        on_init: F,
    ) -> Result<LoopContext, LoopError>
    where
        O: OverlayClient + 'static,
        F: FnOnce(Result<(), OverlayError>) + Send + 'static,
    {
        let (waker, wake_rx) = ChannelWaker::channel();
        let ctx = LoopContext::new(waker);
        let thread_ctx = ctx.clone();
        let overlay: Box<dyn OverlayClient> = Box::new(overlay);
        let on_init: InitCallback = Box::new(on_init);

        let handle = std::thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run_loop(thread_ctx, identity, overlay, wake_rx, on_init))
            .map_err(LoopError::Spawn)?;
        ctx.set_join_handle(handle);

        info!("overlay loop thread '{}' started", config.thread_name);
        Ok(ctx)
    }
}

/// Body of the loop thread.
fn run_loop(
    ctx: LoopContext,
    identity: Identity,
    overlay: Box<dyn OverlayClient>,
    mut wake_rx: UnboundedReceiver<()>,
    on_init: InitCallback,
) {
    ctx.record_loop_thread();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to build loop runtime: {e}");
            ctx.set_state(LoopState::Closed);
            on_init(Err(OverlayError::Init(format!("runtime: {e}"))));
            for op in ctx.queue().drain() {
                reactor::run_detached(op);
            }
            return;
        }
    };

    let cell = Rc::new(RefCell::new(Reactor::new(overlay, ctx.downgrade(), on_init)));
    reactor::install(cell.clone());

    let local = LocalSet::new();
    local.block_on(&runtime, async {
        let events = EventSink::new(ctx.downgrade());
        run(&cell, |r| r.start(&identity, events));

        while !cell.borrow().exit_requested() {
            if wake_rx.recv().await.is_none() {
                break;
            }
            ctx.queue().waker().rearm();
            for op in ctx.queue().drain() {
                run(&cell, op);
            }
        }

        run(&cell, Reactor::teardown);
        let leftovers = ctx.queue().drain();
        if !leftovers.is_empty() {
            debug!("running {} operation(s) queued during shutdown", leftovers.len());
        }
        for op in leftovers {
            run(&cell, op);
        }
    });

    reactor::uninstall();
    info!("overlay loop thread exiting");
}

fn run<F>(cell: &RefCell<Reactor>, op: F)
where
    F: FnOnce(&mut Reactor),
{
    if reactor::run_on(cell, op).is_err() {
        error!("fault: reactor already borrowed at top of loop");
    }
}

