//! [`ConnectionHandle`]: one logical overlay connection, usable from any
//! thread.
//!
//! The handle itself holds no overlay state.  It carries a lazily assigned
//! [`HandleId`] into the reactor's connection table and a non-owning
//! reference to its loop.  Each method packages its arguments into an
//! operation and hands it to [`LoopContext::perform`]; the reactor does the
//! real work on the loop thread and reports back through the callbacks.
//!
//! | Method    | Callback(s)                                   |
//! |-----------|-----------------------------------------------|
//! | `dial`    | `on_connect` once, then `on_data` 0..n times  |
//! | `listen`  | `on_listen` once, then `on_client` per client |
//! | `accept`  | `on_connect` once, then `on_data` 0..n times  |
//! | `write`   | `on_write` once                               |
//!
//! If the loop is gone or closed, the callback fires immediately with
//! [`OverlayError::LoopClosed`].
//!
//! Handles are not closed on drop; call [`ConnectionHandle::close`].

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use bytes::Bytes;
use overlay_core::{HandleId, OverlayError};

use crate::application::context::{LoopContext, LoopShared};

/// Completion of a dial, accept or listen.
pub type ConnectCallback = Box<dyn FnOnce(Result<(), OverlayError>) + Send>;
/// Receives stream events on an established connection.
pub type DataCallback = Arc<dyn Fn(DataEvent) + Send + Sync>;
/// Receives each inbound client of a listener.
pub type ClientCallback = Arc<dyn Fn(ConnectionHandle) + Send + Sync>;
/// Completion of one write: bytes written or the failure.
pub type WriteCallback = Box<dyn FnOnce(Result<usize, OverlayError>) + Send>;

/// One stream event on an established connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataEvent {
    Data(Bytes),
    /// The peer finished sending.  Final event for the stream.
    Eof,
    Error(OverlayError),
}

/// Cross-thread handle to one logical overlay connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    cell: Arc<OnceLock<HandleId>>,
    ctx: Weak<LoopShared>,
}

impl ConnectionHandle {
    /// Creates an unbound handle on `ctx`.  It is registered with the
    /// reactor on first use.
    pub fn new(ctx: &LoopContext) -> Self {
        Self {
            cell: Arc::new(OnceLock::new()),
            ctx: ctx.downgrade(),
        }
    }

    /// Handle for a connection the reactor already registered.
    pub(crate) fn bound(id: HandleId, ctx: Weak<LoopShared>) -> Self {
        Self {
            cell: Arc::new(OnceLock::from(id)),
            ctx,
        }
    }

    /// Table id, once the handle has been used.
    pub fn id(&self) -> Option<HandleId> {
        self.cell.get().copied()
    }

    /// `true` while the owning loop exists and has not closed.
    pub fn is_alive(&self) -> bool {
        self.context().is_some_and(|ctx| !ctx.state().is_closed())
    }

    /// Context of the owning loop, if it still exists.
    pub fn context(&self) -> Option<LoopContext> {
        LoopContext::upgrade(&self.ctx)
    }

    /// Connects to `service`.
    ///
    /// Both callbacks are registered before the native dial, so a failure in
    /// the same stack frame still reaches `on_connect`.  A second dial while
    /// one is in flight fails with [`OverlayError::InvalidState`].
    pub fn dial<C, D>(&self, service: &str, on_connect: C, on_data: D)
    where
        C: FnOnce(Result<(), OverlayError>) + Send + 'static,
        D: Fn(DataEvent) + Send + Sync + 'static,
    {
        let Some(ctx) = self.context() else {
            on_connect(Err(OverlayError::LoopClosed));
            return;
        };
        let cell = self.cell.clone();
        let service = service.to_string();
        let on_data: DataCallback = Arc::new(on_data);
        ctx.perform(move |reactor| reactor.dial(&cell, service, Box::new(on_connect), on_data));
    }

    /// Binds `service`.  Each inbound client arrives as a new handle on
    /// `on_client` and must be accepted explicitly; this handle keeps
    /// listening.
    pub fn listen<L, A>(&self, service: &str, on_listen: L, on_client: A)
    where
        L: FnOnce(Result<(), OverlayError>) + Send + 'static,
        A: Fn(ConnectionHandle) + Send + Sync + 'static,
    {
        let Some(ctx) = self.context() else {
            on_listen(Err(OverlayError::LoopClosed));
            return;
        };
        let cell = self.cell.clone();
        let service = service.to_string();
        let on_client: ClientCallback = Arc::new(on_client);
        ctx.perform(move |reactor| reactor.listen(&cell, service, Box::new(on_listen), on_client));
    }

    /// Completes the server side of an inbound client handed to `on_client`.
    pub fn accept<C, D>(&self, on_connect: C, on_data: D)
    where
        C: FnOnce(Result<(), OverlayError>) + Send + 'static,
        D: Fn(DataEvent) + Send + Sync + 'static,
    {
        let Some(ctx) = self.context() else {
            on_connect(Err(OverlayError::LoopClosed));
            return;
        };
        let cell = self.cell.clone();
        let on_data: DataCallback = Arc::new(on_data);
        ctx.perform(move |reactor| reactor.accept(&cell, Box::new(on_connect), on_data));
    }

    /// Sends `data`.  The buffer is held until `on_write` fires.  Writes
    /// reach the peer in submission order.
    pub fn write<W>(&self, data: impl Into<Bytes>, on_write: W)
    where
        W: FnOnce(Result<usize, OverlayError>) + Send + 'static,
    {
        let Some(ctx) = self.context() else {
            on_write(Err(OverlayError::LoopClosed));
            return;
        };
        let cell = self.cell.clone();
        let data = data.into();
        ctx.perform(move |reactor| reactor.write(&cell, data, Box::new(on_write)));
    }

    /// Closes the connection.  Pending callbacks fire with
    /// [`OverlayError::Closed`].  Idempotent.
    pub fn close(&self) {
        if let Some(ctx) = self.context() {
            let cell = self.cell.clone();
            ctx.perform(move |reactor| reactor.close(&cell));
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id())
            .field("alive", &self.is_alive())
            .finish()
    }
}
