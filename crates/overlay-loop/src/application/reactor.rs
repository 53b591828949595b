//! Loop-thread state and overlay event dispatch.
//!
//! The [`Reactor`] owns everything that may only be touched on the loop
//! thread: the overlay client, the connection table, pending writes and
//! pending probes.  It lives in an `Rc<RefCell<_>>` installed in a
//! thread-local slot on the loop thread, so an operation submitted from the
//! loop thread can borrow it directly.
//!
//! # Callbacks run outside the borrow
//!
//! Operations never call user callbacks while the reactor is borrowed.  They
//! push them onto an outbox, and the code that borrowed the reactor runs the
//! outbox after releasing the borrow.  A callback may therefore call straight
//! back into [`LoopContext::perform`]; the nested operation runs inline.
//!
//! # Stale ids
//!
//! Overlay events carry the [`HandleId`] the reactor issued for the call.
//! An event whose id no longer resolves (the connection was closed in the
//! meantime, or the overlay misbehaved) is logged as a fault and dropped.
//! A user operation on a closed handle fails with [`OverlayError::Closed`].
//!
//! [`LoopContext::perform`]: crate::application::context::LoopContext::perform

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::{OnceLock, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use overlay_core::{HandleId, HandleTable, Identity, OverlayError, ServiceDescriptor, ServiceEvent};
use tracing::{debug, error, info, warn};

use crate::application::connection::{
    ClientCallback, ConnectCallback, ConnectionHandle, DataCallback, DataEvent, WriteCallback,
};
use crate::application::context::{LoopContext, LoopShared, LoopState, Op};
use crate::application::overlay::{
    EventSink, NoOverlay, OverlayClient, OverlayEvent, SessionId, WriteToken,
};

pub(crate) type InitCallback = Box<dyn FnOnce(Result<(), OverlayError>) + Send>;
pub(crate) type ProbeCallback = Box<dyn FnOnce(Result<ServiceDescriptor, OverlayError>) + Send>;
type Deferred = Box<dyn FnOnce() + 'static>;

thread_local! {
    static CURRENT: RefCell<Option<Rc<RefCell<Reactor>>>> = const { RefCell::new(None) };
}

/// Makes `reactor` the target of inline operations on this thread.
pub(crate) fn install(reactor: Rc<RefCell<Reactor>>) {
    CURRENT.with(|slot| *slot.borrow_mut() = Some(reactor));
}

pub(crate) fn uninstall() {
    CURRENT.with(|slot| slot.borrow_mut().take());
}

/// Runs `op` against this thread's reactor if one is installed and free.
pub(crate) fn run_inline<F>(op: F) -> Result<(), F>
where
    F: FnOnce(&mut Reactor),
{
    let Some(cell) = CURRENT.with(|slot| slot.borrow().clone()) else {
        return Err(op);
    };
    run_on(&cell, op)
}

/// Runs `op` against `cell`, then flushes the callbacks it produced.
///
/// Returns the op back if the reactor is already borrowed.
pub(crate) fn run_on<F>(cell: &RefCell<Reactor>, op: F) -> Result<(), F>
where
    F: FnOnce(&mut Reactor),
{
    let deferred = {
        let Ok(mut reactor) = cell.try_borrow_mut() else {
            return Err(op);
        };
        op(&mut *reactor);
        std::mem::take(&mut reactor.outbox)
    };
    for callback in deferred {
        callback();
    }
    Ok(())
}

/// Runs `op` on the calling thread against a closed reactor.
pub(crate) fn run_detached(op: Op) {
    let cell = RefCell::new(Reactor::detached());
    if run_on(&cell, op).is_err() {
        error!("fault: detached reactor was already borrowed");
    }
}

fn defer(outbox: &mut Vec<Deferred>, callback: impl FnOnce() + 'static) {
    outbox.push(Box::new(callback));
}

// ── Connection state ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Dialing,
    Binding,
    Listening,
    /// Produced by a listener; waiting for `accept`.
    Inbound,
    Accepting,
    Connected,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::Dialing => "dialing",
            Phase::Binding => "binding",
            Phase::Listening => "listening",
            Phase::Inbound => "awaiting accept",
            Phase::Accepting => "accepting",
            Phase::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// One write in flight; the buffer lives until the callback has fired.
struct WriteRequest {
    /// Submission order on the connection.  Slots are recycled, so the
    /// table order says nothing about it.
    seq: u64,
    buffer: Bytes,
    callback: WriteCallback,
}

/// An operation waiting for its delay.
struct Timer {
    due: Instant,
    op: Op,
    task: Option<tokio::task::AbortHandle>,
}

struct Connection {
    session: Option<SessionId>,
    phase: Phase,
    on_connect: Option<ConnectCallback>,
    on_listen: Option<ConnectCallback>,
    on_data: Option<DataCallback>,
    on_client: Option<ClientCallback>,
    writes: HandleTable<WriteRequest>,
    next_write: u64,
}

impl Connection {
    fn new(phase: Phase, session: Option<SessionId>) -> Self {
        Self {
            session,
            phase,
            on_connect: None,
            on_listen: None,
            on_data: None,
            on_client: None,
            writes: HandleTable::new(),
            next_write: 0,
        }
    }
}

// ── Reactor ───────────────────────────────────────────────────────────────────

/// Loop-thread state of one event loop.
pub struct Reactor {
    overlay: Box<dyn OverlayClient>,
    shared: Weak<LoopShared>,
    state: LoopState,
    connections: HandleTable<Connection>,
    probes: HandleTable<ProbeCallback>,
    timers: HandleTable<Timer>,
    on_init: Option<InitCallback>,
    outbox: Vec<Deferred>,
    exit: bool,
}

impl Reactor {
    pub(crate) fn new(
        overlay: Box<dyn OverlayClient>,
        shared: Weak<LoopShared>,
        on_init: InitCallback,
    ) -> Self {
        Self {
            overlay,
            shared,
            state: LoopState::Uninitialized,
            connections: HandleTable::new(),
            probes: HandleTable::new(),
            timers: HandleTable::new(),
            on_init: Some(on_init),
            outbox: Vec::new(),
            exit: false,
        }
    }

    /// A reactor for a loop that has already closed.
    pub(crate) fn detached() -> Self {
        Self {
            overlay: Box::new(NoOverlay),
            shared: Weak::new(),
            state: LoopState::Closed,
            connections: HandleTable::new(),
            probes: HandleTable::new(),
            timers: HandleTable::new(),
            on_init: None,
            outbox: Vec::new(),
            exit: true,
        }
    }

    // ── Introspection ─────────────────────────────────────────────────────────

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Number of live connections, including listeners.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Writes on `handle` that have not completed yet.
    pub fn pending_writes(&self, handle: &ConnectionHandle) -> usize {
        self.lookup(handle).map_or(0, |c| c.writes.len())
    }

    /// Bytes held by the pending writes on `handle`.
    pub fn pending_write_bytes(&self, handle: &ConnectionHandle) -> usize {
        self.lookup(handle)
            .map_or(0, |c| c.writes.iter().map(|(_, w)| w.buffer.len()).sum())
    }

    /// Probes waiting for a result.
    pub fn pending_probes(&self) -> usize {
        self.probes.len()
    }

    /// Delayed operations that have not run yet.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    fn lookup(&self, handle: &ConnectionHandle) -> Option<&Connection> {
        handle.id().and_then(|id| self.connections.get(id))
    }

    pub(crate) fn exit_requested(&self) -> bool {
        self.exit
    }

    fn context(&self) -> Option<LoopContext> {
        LoopContext::upgrade(&self.shared)
    }

    fn accepts_work(&self) -> bool {
        matches!(self.state, LoopState::Initializing | LoopState::Running)
    }

    fn set_state(&mut self, next: LoopState) {
        self.state = next;
        if let Some(ctx) = self.context() {
            ctx.set_state(next);
        }
    }

    /// Connection id for `cell`, registering a fresh idle connection the
    /// first time the handle is used.
    fn resolve(&mut self, cell: &OnceLock<HandleId>) -> HandleId {
        let connections = &mut self.connections;
        *cell.get_or_init(|| connections.insert(Connection::new(Phase::Idle, None)))
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Validates `identity` and initialises the overlay.
    pub(crate) fn start(&mut self, identity: &Identity, events: EventSink) {
        self.set_state(LoopState::Initializing);
        info!("initialising overlay for identity '{}'", identity.name);
        let result = identity
            .validate()
            .map_err(|e| OverlayError::Config(e.to_string()))
            .and_then(|()| self.overlay.init(identity, events));
        if let Err(e) = result {
            self.on_init_complete(Err(e));
        }
    }

    fn on_init_complete(&mut self, result: Result<(), OverlayError>) {
        if self.state != LoopState::Initializing {
            if self.on_init.is_none() {
                debug!("ignoring init completion while {}", self.state);
            } else {
                warn!("fault: init completion while {}", self.state);
            }
            return;
        }
        match &result {
            Ok(()) => {
                self.set_state(LoopState::Running);
                info!("overlay initialised");
            }
            Err(e) => {
                error!("overlay initialisation failed: {e}");
                self.exit = true;
            }
        }
        if let Some(callback) = self.on_init.take() {
            defer(&mut self.outbox, move || callback(result));
        }
    }

    /// Fails outstanding work and asks the overlay to close gracefully.
    pub(crate) fn begin_shutdown(&mut self) {
        if !self.accepts_work() {
            debug!("shutdown requested while {}", self.state);
            return;
        }
        info!("shutting down overlay loop");
        self.set_state(LoopState::ClosingDown);
        self.fail_outstanding(OverlayError::LoopClosed);
        self.overlay.shutdown();
    }

    /// Final cleanup once the loop has stopped waiting for wakes.
    ///
    /// Delayed operations still waiting run now, in due order, against the
    /// closed reactor.
    pub(crate) fn teardown(&mut self) {
        self.fail_outstanding(OverlayError::LoopClosed);
        self.overlay = Box::new(NoOverlay);
        self.set_state(LoopState::Closed);

        let mut timers: Vec<Timer> = self.timers.drain().into_iter().map(|(_, t)| t).collect();
        if !timers.is_empty() {
            debug!("running {} delayed operation(s) early: loop closed", timers.len());
        }
        timers.sort_by_key(|t| t.due);
        for Timer { op, task, .. } in timers {
            if let Some(task) = task {
                task.abort();
            }
            op(self);
        }
    }

    fn fail_outstanding(&mut self, error: OverlayError) {
        if let Some(callback) = self.on_init.take() {
            let e = error.clone();
            defer(&mut self.outbox, move || callback(Err(e)));
        }
        for (_, conn) in self.connections.drain() {
            self.release(conn, &error);
        }
        for (_, probe) in self.probes.drain() {
            let e = error.clone();
            defer(&mut self.outbox, move || probe(Err(e)));
        }
    }

    /// Closes the native session and fails every callback still pending on
    /// `conn`.
    fn release(&mut self, mut conn: Connection, error: &OverlayError) {
        if let Some(session) = conn.session.take() {
            self.overlay.close(session);
        }
        if let Some(callback) = conn.on_connect.take() {
            let e = error.clone();
            defer(&mut self.outbox, move || callback(Err(e)));
        }
        if let Some(callback) = conn.on_listen.take() {
            let e = error.clone();
            defer(&mut self.outbox, move || callback(Err(e)));
        }
        let mut writes: Vec<WriteRequest> =
            conn.writes.drain().into_iter().map(|(_, w)| w).collect();
        writes.sort_by_key(|w| w.seq);
        for write in writes {
            let e = error.clone();
            defer(&mut self.outbox, move || {
                let WriteRequest { buffer, callback, .. } = write;
                callback(Err(e));
                drop(buffer);
            });
        }
    }

    /// Runs `op` after `delay` on this loop.
    pub(crate) fn schedule(&mut self, delay: Duration, op: Op) {
        let ctx = match self.context() {
            Some(ctx) if !self.is_closed() => ctx,
            _ => {
                op(self);
                return;
            }
        };
        let timer = self.timers.insert(Timer {
            due: Instant::now() + delay,
            op,
            task: None,
        });
        let task = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            ctx.submit(Box::new(move |reactor: &mut Reactor| reactor.fire_timer(timer)));
        });
        if let Some(pending) = self.timers.get_mut(timer) {
            pending.task = Some(task.abort_handle());
        }
    }

    fn fire_timer(&mut self, timer: HandleId) {
        match self.timers.remove(timer) {
            Some(Timer { op, .. }) => op(self),
            None => debug!("timer {timer} already ran"),
        }
    }

    // ── Connection operations ─────────────────────────────────────────────────

    pub(crate) fn dial(
        &mut self,
        cell: &OnceLock<HandleId>,
        service: String,
        on_connect: ConnectCallback,
        on_data: DataCallback,
    ) {
        if !self.accepts_work() {
            defer(&mut self.outbox, move || on_connect(Err(OverlayError::LoopClosed)));
            return;
        }
        if service.is_empty() {
            defer(&mut self.outbox, move || {
                on_connect(Err(OverlayError::InvalidArgument(
                    "service name must not be empty".into(),
                )))
            });
            return;
        }
        let id = self.resolve(cell);
        let Some(conn) = self.connections.get_mut(id) else {
            defer(&mut self.outbox, move || on_connect(Err(OverlayError::Closed)));
            return;
        };
        if conn.phase != Phase::Idle {
            let e = OverlayError::InvalidState(format!("cannot dial while {}", conn.phase));
            defer(&mut self.outbox, move || on_connect(Err(e)));
            return;
        }

        // Callbacks are registered before the native call so that a failure
        // in this stack frame still reaches on_connect.
        conn.on_connect = Some(on_connect);
        conn.on_data = Some(on_data);
        conn.phase = Phase::Dialing;
        match self.overlay.dial(id, &service) {
            Ok(session) => {
                debug!("connection {id}: dialing '{service}' as {session}");
                conn.session = Some(session);
            }
            Err(e) => {
                debug!("connection {id}: dial '{service}' failed: {e}");
                conn.phase = Phase::Idle;
                conn.on_data = None;
                if let Some(callback) = conn.on_connect.take() {
                    defer(&mut self.outbox, move || callback(Err(e)));
                }
            }
        }
    }

    pub(crate) fn listen(
        &mut self,
        cell: &OnceLock<HandleId>,
        service: String,
        on_listen: ConnectCallback,
        on_client: ClientCallback,
    ) {
        if !self.accepts_work() {
            defer(&mut self.outbox, move || on_listen(Err(OverlayError::LoopClosed)));
            return;
        }
        if service.is_empty() {
            defer(&mut self.outbox, move || {
                on_listen(Err(OverlayError::InvalidArgument(
                    "service name must not be empty".into(),
                )))
            });
            return;
        }
        let id = self.resolve(cell);
        let Some(conn) = self.connections.get_mut(id) else {
            defer(&mut self.outbox, move || on_listen(Err(OverlayError::Closed)));
            return;
        };
        if conn.phase != Phase::Idle {
            let e = OverlayError::InvalidState(format!("cannot listen while {}", conn.phase));
            defer(&mut self.outbox, move || on_listen(Err(e)));
            return;
        }

        conn.on_listen = Some(on_listen);
        conn.on_client = Some(on_client);
        conn.phase = Phase::Binding;
        match self.overlay.listen(id, &service) {
            Ok(session) => {
                debug!("connection {id}: binding '{service}' as {session}");
                conn.session = Some(session);
            }
            Err(e) => {
                debug!("connection {id}: listen on '{service}' failed: {e}");
                conn.phase = Phase::Idle;
                conn.on_client = None;
                if let Some(callback) = conn.on_listen.take() {
                    defer(&mut self.outbox, move || callback(Err(e)));
                }
            }
        }
    }

    pub(crate) fn accept(
        &mut self,
        cell: &OnceLock<HandleId>,
        on_connect: ConnectCallback,
        on_data: DataCallback,
    ) {
        if !self.accepts_work() {
            defer(&mut self.outbox, move || on_connect(Err(OverlayError::LoopClosed)));
            return;
        }
        let id = self.resolve(cell);
        let Some(conn) = self.connections.get_mut(id) else {
            defer(&mut self.outbox, move || on_connect(Err(OverlayError::Closed)));
            return;
        };
        let (Phase::Inbound, Some(session)) = (conn.phase, conn.session) else {
            let e = OverlayError::InvalidState(format!("cannot accept while {}", conn.phase));
            defer(&mut self.outbox, move || on_connect(Err(e)));
            return;
        };

        conn.on_connect = Some(on_connect);
        conn.on_data = Some(on_data);
        conn.phase = Phase::Accepting;
        if let Err(e) = self.overlay.accept(session, id) {
            debug!("connection {id}: accept failed: {e}");
            conn.phase = Phase::Inbound;
            conn.on_data = None;
            if let Some(callback) = conn.on_connect.take() {
                defer(&mut self.outbox, move || callback(Err(e)));
            }
        }
    }

    pub(crate) fn write(&mut self, cell: &OnceLock<HandleId>, data: Bytes, on_write: WriteCallback) {
        if !self.accepts_work() {
            defer(&mut self.outbox, move || on_write(Err(OverlayError::LoopClosed)));
            return;
        }
        let id = self.resolve(cell);
        let Some(conn) = self.connections.get_mut(id) else {
            defer(&mut self.outbox, move || on_write(Err(OverlayError::Closed)));
            return;
        };
        let (Phase::Connected, Some(session)) = (conn.phase, conn.session) else {
            let e = OverlayError::InvalidState(format!("cannot write while {}", conn.phase));
            defer(&mut self.outbox, move || on_write(Err(e)));
            return;
        };

        let seq = conn.next_write;
        conn.next_write += 1;
        let write = conn.writes.insert(WriteRequest {
            seq,
            buffer: data.clone(),
            callback: on_write,
        });
        let token = WriteToken {
            connection: id,
            write,
        };
        if let Err(e) = self.overlay.write(session, token, data) {
            if let Some(WriteRequest { buffer, callback, .. }) = conn.writes.remove(write) {
                defer(&mut self.outbox, move || {
                    callback(Err(e));
                    drop(buffer);
                });
            }
        }
    }

    /// Closes the connection behind `cell`.  Closing twice is a no-op.
    pub(crate) fn close(&mut self, cell: &OnceLock<HandleId>) {
        if self.is_closed() {
            return;
        }
        let id = self.resolve(cell);
        if let Some(conn) = self.connections.remove(id) {
            debug!("connection {id}: closed ({})", conn.phase);
            self.release(conn, &OverlayError::Closed);
        }
    }

    pub(crate) fn probe(&mut self, service: String, callback: ProbeCallback) {
        if !self.accepts_work() {
            defer(&mut self.outbox, move || callback(Err(OverlayError::LoopClosed)));
            return;
        }
        if service.is_empty() {
            defer(&mut self.outbox, move || {
                callback(Err(OverlayError::InvalidArgument(
                    "service name must not be empty".into(),
                )))
            });
            return;
        }
        let probe = self.probes.insert(callback);
        if let Err(e) = self.overlay.probe_service(probe, &service) {
            if let Some(callback) = self.probes.remove(probe) {
                defer(&mut self.outbox, move || callback(Err(e)));
            }
        }
    }

    // ── Overlay events ────────────────────────────────────────────────────────

    pub(crate) fn handle_event(&mut self, event: OverlayEvent) {
        if self.is_closed() {
            debug!("dropping {event:?}: loop is closed");
            return;
        }
        // Connections were already released; late events for them are expected.
        if self.state == LoopState::ClosingDown && !matches!(event, OverlayEvent::ShutdownComplete) {
            debug!("dropping {event:?}: loop is closing down");
            return;
        }
        match event {
            OverlayEvent::InitComplete(result) => self.on_init_complete(result),
            OverlayEvent::Service(event) => self.on_service(event),
            OverlayEvent::Connected { connection, result } => self.on_connected(connection, result),
            OverlayEvent::Listening { connection, result } => self.on_listening(connection, result),
            OverlayEvent::InboundClient { listener, session } => {
                self.on_inbound_client(listener, session)
            }
            OverlayEvent::Data { connection, event } => self.on_data(connection, event),
            OverlayEvent::WriteComplete { token, result } => self.on_write_complete(token, result),
            OverlayEvent::ProbeResult { probe, result } => match self.probes.remove(probe) {
                Some(callback) => defer(&mut self.outbox, move || callback(result)),
                None => warn!("fault: result for unknown probe {probe}"),
            },
            OverlayEvent::ShutdownComplete => {
                debug!("overlay released all native handles");
                self.exit = true;
            }
        }
    }

    fn on_service(&mut self, event: ServiceEvent) {
        debug!("service '{}' {:?}", event.service.name, event.change);
        let Some(ctx) = self.context() else {
            return;
        };
        for listener in ctx.registry().apply(&event) {
            let event = event.clone();
            defer(&mut self.outbox, move || listener(&event));
        }
    }

    fn on_connected(&mut self, id: HandleId, result: Result<(), OverlayError>) {
        let Some(conn) = self.connections.get_mut(id) else {
            warn!("fault: connect result for unknown connection {id}");
            return;
        };
        match (conn.phase, &result) {
            (Phase::Dialing | Phase::Accepting, Ok(())) => conn.phase = Phase::Connected,
            (Phase::Dialing | Phase::Accepting, Err(e)) => {
                debug!("connection {id}: connect failed: {e}");
                conn.phase = Phase::Idle;
                conn.on_data = None;
                if let Some(session) = conn.session.take() {
                    self.overlay.close(session);
                }
            }
            (phase, _) => {
                warn!("fault: connect result for connection {id} while {phase}");
                return;
            }
        }
        if let Some(callback) = conn.on_connect.take() {
            defer(&mut self.outbox, move || callback(result));
        }
    }

    fn on_listening(&mut self, id: HandleId, result: Result<(), OverlayError>) {
        let Some(conn) = self.connections.get_mut(id) else {
            warn!("fault: listen result for unknown connection {id}");
            return;
        };
        if conn.phase != Phase::Binding {
            warn!("fault: listen result for connection {id} while {}", conn.phase);
            return;
        }
        match &result {
            Ok(()) => conn.phase = Phase::Listening,
            Err(e) => {
                debug!("connection {id}: listen failed: {e}");
                conn.phase = Phase::Idle;
                conn.on_client = None;
                if let Some(session) = conn.session.take() {
                    self.overlay.close(session);
                }
            }
        }
        if let Some(callback) = conn.on_listen.take() {
            defer(&mut self.outbox, move || callback(result));
        }
    }

    fn on_inbound_client(&mut self, listener: HandleId, session: SessionId) {
        let on_client = match self.connections.get(listener) {
            Some(conn) if conn.phase == Phase::Listening => conn.on_client.clone(),
            Some(conn) => {
                warn!("fault: inbound client for connection {listener} while {}", conn.phase);
                None
            }
            None => {
                warn!("fault: inbound client for unknown listener {listener}");
                None
            }
        };
        let Some(on_client) = on_client else {
            self.overlay.close(session);
            return;
        };
        let child = self
            .connections
            .insert(Connection::new(Phase::Inbound, Some(session)));
        debug!("connection {listener}: inbound client {session} as {child}");
        let handle = ConnectionHandle::bound(child, self.shared.clone());
        defer(&mut self.outbox, move || on_client(handle));
    }

    fn on_data(&mut self, id: HandleId, event: DataEvent) {
        let Some(conn) = self.connections.get(id) else {
            warn!("fault: data for unknown connection {id}");
            return;
        };
        let Some(on_data) = conn.on_data.clone().filter(|_| conn.phase == Phase::Connected) else {
            warn!("fault: data for connection {id} while {}", conn.phase);
            return;
        };
        defer(&mut self.outbox, move || on_data(event));
    }

    fn on_write_complete(&mut self, token: WriteToken, result: Result<usize, OverlayError>) {
        let request = self
            .connections
            .get_mut(token.connection)
            .and_then(|conn| conn.writes.remove(token.write));
        let Some(WriteRequest { buffer, callback, .. }) = request else {
            warn!(
                "fault: completion for unknown write {} on connection {}",
                token.write, token.connection
            );
            return;
        };
        defer(&mut self.outbox, move || {
            callback(result);
            drop(buffer);
        });
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("state", &self.state)
            .field("connections", &self.connections.len())
            .field("probes", &self.probes.len())
            .field("timers", &self.timers.len())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
