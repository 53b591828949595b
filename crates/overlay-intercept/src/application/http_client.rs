//! HTTP/1.1 over overlay connections, with idle keep-alive reuse.
//!
//! An [`OverlayHttpClient`] belongs to one intercept (one service, one
//! origin).  Each exchange either reuses an idle connection to the service or
//! dials a new one, writes the encoded request, and feeds every chunk the
//! service sends back into a [`ResponseParser`].  Parsed milestones reach the
//! caller as [`ExchangeEvent`]s.
//!
//! A connection's data callback is fixed when it is dialed, so each
//! connection is wrapped in a `Link` whose slot holds the exchange currently
//! using it.  When a response ends and the server allows it, the link goes
//! back to the idle pool; a timer scheduled with `perform_after` closes it if
//! nobody picks it up within the idle timeout.
//!
//! The origin may be `https`: the overlay connection is already mutually
//! authenticated and encrypted, so the request is sent as plain HTTP/1.1.
//!
//! All methods are meant to run on the loop thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use overlay_core::{
    FailurePhase, HttpError, HttpRequest, OriginKey, OverlayError, RequestFailure,
    ResponseEvent, ResponseHead, ResponseParser,
};
use overlay_loop::{ConnectionHandle, DataEvent, LoopContext};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::config::InterceptorConfig;

/// One milestone of an exchange, in order: `Head`, `Data`*, then `End`, or
/// `Failed` at any point.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeEvent {
    Head(ResponseHead),
    Data(Bytes),
    End,
    Failed(RequestFailure),
}

impl From<ResponseEvent> for ExchangeEvent {
    fn from(event: ResponseEvent) -> Self {
        match event {
            ResponseEvent::Head(head) => ExchangeEvent::Head(head),
            ResponseEvent::Data(bytes) => ExchangeEvent::Data(bytes),
            ResponseEvent::End => ExchangeEvent::End,
        }
    }
}

pub type ExchangeCallback = Arc<dyn Fn(ExchangeEvent) + Send + Sync>;

fn protocol_error(e: HttpError) -> OverlayError {
    OverlayError::Protocol(e.to_string())
}

// ── Link ──────────────────────────────────────────────────────────────────────

struct Exchange {
    id: u64,
    parser: ResponseParser,
    on_event: ExchangeCallback,
}

/// What happens to a link after a stream event.
enum After {
    Keep,
    Reuse,
    Close,
}

/// One overlay connection and the exchange currently using it.
struct Link {
    handle: ConnectionHandle,
    exchange: Mutex<Option<Exchange>>,
    closed: AtomicBool,
}

impl Link {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.handle.close();
        }
    }

    /// Writes the request bytes of exchange `id`; a write failure fails it.
    fn send(self: &Arc<Self>, id: u64, bytes: Bytes) {
        let link = self.clone();
        self.handle.write(bytes, move |result| {
            if let Err(e) = result {
                link.fail(id, FailurePhase::Send, e);
            }
        });
    }

    /// Fails exchange `id` if it is still attached, and closes the
    /// connection.
    fn fail(&self, id: u64, phase: FailurePhase, error: OverlayError) {
        let exchange = {
            let mut slot = self.exchange.lock();
            match slot.as_ref() {
                Some(e) if e.id == id => slot.take(),
                _ => None,
            }
        };
        let Some(exchange) = exchange else {
            return;
        };
        self.close();
        (exchange.on_event)(ExchangeEvent::Failed(RequestFailure::new(phase, error)));
    }

    /// Feeds one stream event to the attached exchange.  Returns the events
    /// to report, who to report them to, and what to do with the link.
    fn on_stream(&self, event: DataEvent) -> (Vec<ExchangeEvent>, Option<ExchangeCallback>, After) {
        let mut slot = self.exchange.lock();
        let Some(exchange) = slot.as_mut() else {
            // Anything arriving on an idle connection means it cannot be reused.
            return (Vec::new(), None, After::Close);
        };
        let eof = matches!(event, DataEvent::Eof);
        let parsed = match event {
            DataEvent::Data(bytes) => exchange.parser.feed(&bytes).map_err(protocol_error),
            DataEvent::Eof => exchange.parser.finish_eof().map_err(protocol_error),
            DataEvent::Error(e) => Err(e),
        };
        let on_event = exchange.on_event.clone();

        match parsed {
            Ok(events) => {
                let events: Vec<ExchangeEvent> = events.into_iter().map(Into::into).collect();
                if exchange.parser.is_complete() {
                    let reuse = !eof && exchange.parser.keep_alive();
                    *slot = None;
                    (events, Some(on_event), if reuse { After::Reuse } else { After::Close })
                } else {
                    (events, Some(on_event), After::Keep)
                }
            }
            Err(error) => {
                let phase = if exchange.parser.head_received() {
                    FailurePhase::Body
                } else {
                    FailurePhase::Headers
                };
                *slot = None;
                let failed = ExchangeEvent::Failed(RequestFailure::new(phase, error));
                (vec![failed], Some(on_event), After::Close)
            }
        }
    }
}

// ── Exchange handle ───────────────────────────────────────────────────────────

/// Lets the owner of an exchange cancel it.
#[derive(Clone)]
pub struct ExchangeHandle {
    link: Option<Arc<Link>>,
    exchange: u64,
}

impl ExchangeHandle {
    fn detached() -> Self {
        Self {
            link: None,
            exchange: 0,
        }
    }

    /// `true` while the exchange is still waiting for its response.
    pub fn is_active(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.exchange.lock().as_ref().map(|e| e.id) == Some(self.exchange))
    }

    /// Detaches the exchange and closes its connection.  No further events
    /// are reported.  Does nothing once the exchange has finished.
    pub fn cancel(&self) {
        let Some(link) = &self.link else {
            return;
        };
        let detached = {
            let mut slot = link.exchange.lock();
            match slot.as_ref() {
                Some(e) if e.id == self.exchange => slot.take(),
                _ => None,
            }
        };
        if detached.is_some() {
            link.close();
        }
    }
}

impl std::fmt::Debug for ExchangeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeHandle")
            .field("exchange", &self.exchange)
            .field("active", &self.is_active())
            .finish()
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

struct Idle {
    link: Arc<Link>,
    since: Instant,
    token: u64,
}

#[derive(Default)]
struct Pool {
    idle: Vec<Idle>,
    next_token: u64,
    retired: bool,
}

/// HTTP client for one intercepted service.
pub struct OverlayHttpClient {
    service: String,
    origin: OriginKey,
    idle_timeout: Duration,
    max_header_bytes: usize,
    pool: Mutex<Pool>,
    next_exchange: AtomicU64,
    me: Weak<OverlayHttpClient>,
}

impl OverlayHttpClient {
    pub fn new(service: &str, origin: OriginKey, config: &InterceptorConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            service: service.to_string(),
            origin,
            idle_timeout: config.idle_timeout,
            max_header_bytes: config.max_header_bytes,
            pool: Mutex::new(Pool::default()),
            next_exchange: AtomicU64::new(1),
            me: me.clone(),
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn origin(&self) -> &OriginKey {
        &self.origin
    }

    /// Idle keep-alive connections waiting for reuse.
    pub fn idle_connections(&self) -> usize {
        self.pool.lock().idle.len()
    }

    /// Starts one exchange.  `on_event` fires on the loop thread.
    pub fn send(
        &self,
        ctx: &LoopContext,
        request: HttpRequest,
        on_event: ExchangeCallback,
    ) -> ExchangeHandle {
        let bytes = match request.encode(true) {
            Ok(bytes) => bytes,
            Err(e) => {
                on_event(ExchangeEvent::Failed(RequestFailure::new(
                    FailurePhase::Dispatch,
                    OverlayError::InvalidArgument(e.to_string()),
                )));
                return ExchangeHandle::detached();
            }
        };
        let id = self.next_exchange.fetch_add(1, Ordering::Relaxed);
        let exchange = Exchange {
            id,
            parser: ResponseParser::new(&request.method).with_max_header_bytes(self.max_header_bytes),
            on_event,
        };
        trace!("{}: {} {} ({} bytes)", self.origin, request.method, request.uri, bytes.len());

        let link = match self.take_idle() {
            Some(link) => {
                debug!("{}: reusing keep-alive connection", self.origin);
                *link.exchange.lock() = Some(exchange);
                link.send(id, bytes);
                link
            }
            None => self.connect(ctx, id, exchange, bytes),
        };
        ExchangeHandle {
            link: Some(link),
            exchange: id,
        }
    }

    /// Closes every idle connection and stops pooling new ones.  Exchanges in
    /// flight run to completion; their connections are closed afterwards.
    pub fn retire(&self) {
        let idle = {
            let mut pool = self.pool.lock();
            pool.retired = true;
            std::mem::take(&mut pool.idle)
        };
        if !idle.is_empty() {
            debug!("{}: closing {} idle connection(s)", self.origin, idle.len());
        }
        for entry in idle {
            entry.link.close();
        }
    }

    fn connect(&self, ctx: &LoopContext, id: u64, exchange: Exchange, bytes: Bytes) -> Arc<Link> {
        let link = Arc::new(Link {
            handle: ConnectionHandle::new(ctx),
            exchange: Mutex::new(Some(exchange)),
            closed: AtomicBool::new(false),
        });
        debug!("{}: dialing service '{}'", self.origin, self.service);

        let on_connect = {
            let link = link.clone();
            move |result: Result<(), OverlayError>| match result {
                Ok(()) => link.send(id, bytes),
                Err(e) => link.fail(id, FailurePhase::Connect, e),
            }
        };
        let on_data = {
            let link = link.clone();
            let client = self.me.clone();
            move |event: DataEvent| {
                let (events, on_event, after) = link.on_stream(event);
                match after {
                    After::Keep => {}
                    After::Reuse => match client.upgrade() {
                        Some(client) => client.release(&link),
                        None => link.close(),
                    },
                    After::Close => {
                        link.close();
                        if let Some(client) = client.upgrade() {
                            client.forget(&link);
                        }
                    }
                }
                if let Some(on_event) = on_event {
                    for event in events {
                        on_event(event);
                    }
                }
            }
        };
        link.handle.dial(&self.service, on_connect, on_data);
        link
    }

    /// Most recently idled connection still within the idle timeout.
    fn take_idle(&self) -> Option<Arc<Link>> {
        let mut expired = Vec::new();
        let found = {
            let mut pool = self.pool.lock();
            let mut found = None;
            while let Some(entry) = pool.idle.pop() {
                if entry.since.elapsed() < self.idle_timeout && !entry.link.is_closed() {
                    found = Some(entry.link);
                    break;
                }
                expired.push(entry.link);
            }
            found
        };
        for link in expired {
            link.close();
        }
        found
    }

    /// Returns a finished link to the pool and schedules its expiry.
    fn release(&self, link: &Arc<Link>) {
        let token = {
            let mut pool = self.pool.lock();
            if pool.retired || link.is_closed() {
                None
            } else {
                pool.next_token += 1;
                let token = pool.next_token;
                pool.idle.push(Idle {
                    link: link.clone(),
                    since: Instant::now(),
                    token,
                });
                Some(token)
            }
        };
        let Some(token) = token else {
            link.close();
            return;
        };
        let Some(ctx) = link.handle.context() else {
            return;
        };
        let client = self.me.clone();
        ctx.perform_after(self.idle_timeout, move |_| {
            if let Some(client) = client.upgrade() {
                client.expire(token);
            }
        });
    }

    fn expire(&self, token: u64) {
        let expired = {
            let mut pool = self.pool.lock();
            pool.idle
                .iter()
                .position(|e| e.token == token)
                .map(|i| pool.idle.remove(i))
        };
        if let Some(entry) = expired {
            debug!("{}: idle connection expired", self.origin);
            entry.link.close();
        }
    }

    fn forget(&self, link: &Arc<Link>) {
        self.pool.lock().idle.retain(|e| !Arc::ptr_eq(&e.link, link));
    }
}

impl std::fmt::Debug for OverlayHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayHttpClient")
            .field("service", &self.service)
            .field("origin", &self.origin)
            .field("idle", &self.idle_connections())
            .finish()
    }
}
