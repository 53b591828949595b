//! The port through which the loop drives the overlay network client.
//!
//! The overlay client (session establishment, service discovery, encrypted
//! transport) is an external collaborator.  The loop only needs the calls
//! listed on [`OverlayClient`] and the events listed on [`OverlayEvent`].
//!
//! # Per-call context
//!
//! A native overlay API hands back an opaque context pointer with every
//! callback.  Here the context is a typed [`HandleId`] issued by the
//! reactor's handle table: the overlay echoes it on every event, and the
//! reactor resolves it with a generation check.  An id that no longer
//! resolves is an invariant violation; the event is logged and dropped.
//!
//! # Threading
//!
//! Every [`OverlayClient`] method is called on the loop thread.  Events are
//! reported through an [`EventSink`], which always queues: an event emitted
//! from inside an overlay call is handled after that call returns, never
//! reentrantly.

use std::fmt;
use std::sync::Weak;

use bytes::Bytes;
use overlay_core::{HandleId, Identity, OverlayError, ServiceDescriptor, ServiceEvent};
use tracing::debug;

use crate::application::connection::DataEvent;
use crate::application::context::{LoopContext, LoopShared};

/// Overlay-native identifier of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Context echoed back with a write completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriteToken {
    pub connection: HandleId,
    pub write: HandleId,
}

/// Everything the overlay client reports back to the loop.
#[derive(Debug, Clone)]
pub enum OverlayEvent {
    /// Outcome of [`OverlayClient::init`].
    InitComplete(Result<(), OverlayError>),
    /// A service was added, changed or removed.
    Service(ServiceEvent),
    /// Outcome of a dial or an accept.
    Connected {
        connection: HandleId,
        result: Result<(), OverlayError>,
    },
    /// Outcome of a listen.
    Listening {
        connection: HandleId,
        result: Result<(), OverlayError>,
    },
    /// A remote client reached a listening connection.
    InboundClient {
        listener: HandleId,
        session: SessionId,
    },
    /// Bytes, end of stream or a stream error on an established connection.
    Data {
        connection: HandleId,
        event: DataEvent,
    },
    /// Outcome of one write.
    WriteComplete {
        token: WriteToken,
        result: Result<usize, OverlayError>,
    },
    /// Outcome of a service availability probe.
    ProbeResult {
        probe: HandleId,
        result: Result<ServiceDescriptor, OverlayError>,
    },
    /// The overlay released every native handle after [`OverlayClient::shutdown`].
    ShutdownComplete,
}

/// Operations the loop issues to the overlay client.
///
/// A synchronous `Err` means the call failed in the same stack frame; the
/// reactor reports it through the operation's callback.  Success means the
/// outcome will arrive later as an [`OverlayEvent`].
#[cfg_attr(test, mockall::automock)]
pub trait OverlayClient: Send {
    /// Establishes the overlay session with `identity`.  Completion is
    /// reported as [`OverlayEvent::InitComplete`].
    fn init(&mut self, identity: &Identity, events: EventSink) -> Result<(), OverlayError>;

    fn dial(&mut self, connection: HandleId, service: &str) -> Result<SessionId, OverlayError>;

    fn listen(&mut self, connection: HandleId, service: &str) -> Result<SessionId, OverlayError>;

    fn accept(&mut self, session: SessionId, connection: HandleId) -> Result<(), OverlayError>;

    fn write(
        &mut self,
        session: SessionId,
        token: WriteToken,
        data: Bytes,
    ) -> Result<(), OverlayError>;

    /// Releases a session.  No further events are expected for it.
    fn close(&mut self, session: SessionId);

    fn probe_service(&mut self, probe: HandleId, service: &str) -> Result<(), OverlayError>;

    /// Begins a graceful close; [`OverlayEvent::ShutdownComplete`] follows.
    fn shutdown(&mut self);
}

/// Queues overlay events onto the loop that owns this sink.
#[derive(Clone)]
pub struct EventSink {
    shared: Weak<LoopShared>,
}

impl EventSink {
    pub(crate) fn new(shared: Weak<LoopShared>) -> Self {
        Self { shared }
    }

    /// A sink that discards every event.
    pub fn disconnected() -> Self {
        Self {
            shared: Weak::new(),
        }
    }

    /// Queues `event` for handling on the loop thread.
    ///
    /// Events for a loop that has already closed are dropped.
    pub fn emit(&self, event: OverlayEvent) {
        let Some(ctx) = LoopContext::upgrade(&self.shared) else {
            debug!("dropping {event:?}: loop context is gone");
            return;
        };
        if !ctx.enqueue(Box::new(move |reactor| reactor.handle_event(event))) {
            debug!("dropping overlay event: loop is closed");
        }
    }

    /// `true` while the owning loop still accepts events.
    pub fn is_open(&self) -> bool {
        LoopContext::upgrade(&self.shared).is_some_and(|ctx| !ctx.state().is_closed())
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("open", &self.is_open())
            .finish()
    }
}

/// Stand-in overlay for a reactor that no longer owns one.
///
/// Every call fails with [`OverlayError::LoopClosed`].
pub(crate) struct NoOverlay;

impl OverlayClient for NoOverlay {
    fn init(&mut self, _identity: &Identity, _events: EventSink) -> Result<(), OverlayError> {
        Err(OverlayError::LoopClosed)
    }

    fn dial(&mut self, _connection: HandleId, _service: &str) -> Result<SessionId, OverlayError> {
        Err(OverlayError::LoopClosed)
    }

    fn listen(&mut self, _connection: HandleId, _service: &str) -> Result<SessionId, OverlayError> {
        Err(OverlayError::LoopClosed)
    }

    fn accept(&mut self, _session: SessionId, _connection: HandleId) -> Result<(), OverlayError> {
        Err(OverlayError::LoopClosed)
    }

    fn write(
        &mut self,
        _session: SessionId,
        _token: WriteToken,
        _data: Bytes,
    ) -> Result<(), OverlayError> {
        Err(OverlayError::LoopClosed)
    }

    fn close(&mut self, _session: SessionId) {}

    fn probe_service(&mut self, _probe: HandleId, _service: &str) -> Result<(), OverlayError> {
        Err(OverlayError::LoopClosed)
    }

    fn shutdown(&mut self) {}
}
