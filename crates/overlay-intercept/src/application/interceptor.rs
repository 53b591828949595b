//! The interception surface: decide which requests go over the overlay, run
//! them on the loop thread and report back on the consumer's thread.
//!
//! `start_loading` only records the request and queues a dispatch operation;
//! the request moves to `Dispatched` when that operation runs on the loop
//! thread.  Every exchange event is translated into one [`RequestClient`]
//! call and handed to the [`NotificationDispatcher`].
//!
//! When a service goes away, its intercepts leave the table at once.
//! Requests already dispatched through them run to completion.  Requests
//! still queued fail with [`FailurePhase::Dispatch`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use overlay_core::{FailurePhase, HttpRequest, OverlayError, RequestFailure, ServiceEvent};
use overlay_loop::{ListenerId, LoopContext};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::application::dispatcher::{DeliveryOutcome, DeliveryTarget, NotificationDispatcher};
use crate::application::http_client::{ExchangeEvent, ExchangeHandle};
use crate::application::table::{Intercept, InterceptTable};
use crate::domain::config::InterceptorConfig;
use crate::domain::error::InterceptError;
use crate::domain::notification::RequestClient;
use crate::domain::request::{RequestId, RequestLifecycle, RequestState};

struct Entry {
    lifecycle: RequestLifecycle,
    client: Arc<dyn RequestClient>,
    target: DeliveryTarget,
    intercept: Arc<Intercept>,
    request: Option<HttpRequest>,
    exchange: Option<ExchangeHandle>,
    cancelled: Arc<AtomicBool>,
}

/// Where one notification goes.
struct Delivery {
    client: Arc<dyn RequestClient>,
    target: DeliveryTarget,
    cancelled: Arc<AtomicBool>,
}

impl Entry {
    fn delivery(&self) -> Delivery {
        Delivery {
            client: self.client.clone(),
            target: self.target.clone(),
            cancelled: self.cancelled.clone(),
        }
    }
}

pub struct Interceptor {
    ctx: LoopContext,
    config: InterceptorConfig,
    table: InterceptTable,
    dispatcher: NotificationDispatcher,
    requests: Mutex<HashMap<RequestId, Entry>>,
    listener: Mutex<Option<ListenerId>>,
    installed: AtomicBool,
    me: Weak<Interceptor>,
}

impl Interceptor {
    /// Builds the table from the services available now and follows every
    /// later service event.
    pub fn install(ctx: &LoopContext, config: InterceptorConfig) -> Arc<Self> {
        let interceptor = Arc::new_cyclic(|me| Self {
            ctx: ctx.clone(),
            dispatcher: NotificationDispatcher::new(config.rendezvous_timeout),
            config,
            table: InterceptTable::new(),
            requests: Mutex::new(HashMap::new()),
            listener: Mutex::new(None),
            installed: AtomicBool::new(true),
            me: me.clone(),
        });

        let weak = Arc::downgrade(&interceptor);
        let seeded = interceptor.table.seed(|| {
            let (id, snapshot) = ctx.registry().subscribe(move |event| {
                if let Some(interceptor) = weak.upgrade() {
                    interceptor.on_service(event);
                }
            });
            *interceptor.listener.lock() = Some(id);
            snapshot
        });
        info!(
            "interceptor installed: {seeded} service(s), {} origin(s)",
            interceptor.table.len()
        );
        interceptor
    }

    /// `true` if `request` would be loaded over the overlay.
    pub fn can_handle(&self, request: &HttpRequest) -> bool {
        self.installed.load(Ordering::Acquire)
            && request
                .origin()
                .is_ok_and(|origin| self.table.can_intercept(&origin))
    }

    /// Starts loading `request` over the overlay.  Notifications for it are
    /// delivered to `client` through `target`.
    ///
    /// # Errors
    ///
    /// All errors mean the caller should load the request the normal way:
    /// [`InterceptError::NotIntercepted`] when no intercept matches,
    /// [`InterceptError::InvalidOrigin`] for a URI without a usable origin and
    /// [`InterceptError::Uninstalled`] after [`uninstall`](Self::uninstall).
    pub fn start_loading(
        &self,
        request: HttpRequest,
        client: Arc<dyn RequestClient>,
        target: DeliveryTarget,
    ) -> Result<RequestId, InterceptError> {
        if !self.installed.load(Ordering::Acquire) {
            return Err(InterceptError::Uninstalled);
        }
        let origin = request.origin()?;
        let intercept = self
            .table
            .lookup(&origin)
            .ok_or_else(|| InterceptError::NotIntercepted(origin.clone()))?;

        let id = RequestId::new();
        debug!("request {id}: {} {} via '{}'", request.method, origin, intercept.service());
        self.requests.lock().insert(
            id,
            Entry {
                lifecycle: RequestLifecycle::new(),
                client,
                target,
                intercept,
                request: Some(request),
                exchange: None,
                cancelled: Arc::new(AtomicBool::new(false)),
            },
        );

        let me = self.me.clone();
        self.ctx.perform(move |_| {
            if let Some(interceptor) = me.upgrade() {
                interceptor.dispatch(id);
            }
        });
        Ok(id)
    }

    /// Cancels a request.  Once this returns on the request's consumer
    /// thread, no further notification for it runs.  Returns `false` if the
    /// request already finished or is unknown.
    pub fn stop_loading(&self, id: RequestId) -> bool {
        let Some(mut entry) = self.requests.lock().remove(&id) else {
            return false;
        };
        entry.cancelled.store(true, Ordering::Release);
        if let Err(e) = entry.lifecycle.cancel() {
            warn!("fault: request {id}: {e}");
        }
        if let Some(exchange) = entry.exchange.take() {
            self.ctx.perform(move |_| exchange.cancel());
        }
        debug!("request {id}: cancelled");
        true
    }

    /// Requests waiting for their dispatch operation.
    pub fn pending_count(&self) -> usize {
        self.count_in(RequestState::Queued)
    }

    /// Requests dispatched and not yet finished.
    pub fn active_count(&self) -> usize {
        self.count_in(RequestState::Dispatched)
    }

    /// Stops intercepting.  Requests already started run to completion.
    pub fn uninstall(&self) {
        if !self.installed.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(id) = self.listener.lock().take() {
            self.ctx.registry().unregister(id);
        }
        retire(self.table.clear());
        info!("interceptor uninstalled");
    }

    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Acquire)
    }

    pub fn table(&self) -> &InterceptTable {
        &self.table
    }

    pub fn config(&self) -> &InterceptorConfig {
        &self.config
    }

    // ── Loop-thread side ──────────────────────────────────────────────────────

    fn on_service(&self, event: &ServiceEvent) {
        if !self.is_installed() {
            return;
        }
        retire(self.table.apply(event));
    }

    fn dispatch(&self, id: RequestId) {
        let (request, intercept) = {
            let mut requests = self.requests.lock();
            // Gone means cancelled before it got here.
            let Some(entry) = requests.get_mut(&id) else {
                return;
            };
            if !self.table.is_current(&entry.intercept) {
                let service = entry.intercept.service().to_string();
                drop(requests);
                let failure = RequestFailure::new(
                    FailurePhase::Dispatch,
                    OverlayError::ServiceUnavailable(service),
                );
                self.finish(id, ExchangeEvent::Failed(failure));
                return;
            }
            if let Err(e) = entry.lifecycle.dispatch() {
                warn!("fault: request {id}: {e}");
                return;
            }
            let Some(request) = entry.request.take() else {
                return;
            };
            (request, entry.intercept.clone())
        };

        let me = self.me.clone();
        let handle = intercept.client(&self.config).send(
            &self.ctx,
            request,
            Arc::new(move |event| {
                if let Some(interceptor) = me.upgrade() {
                    interceptor.on_exchange_event(id, event);
                }
            }),
        );

        match self.requests.lock().get_mut(&id) {
            Some(entry) => entry.exchange = Some(handle),
            // Cancelled or finished while sending.
            None => handle.cancel(),
        }
    }

    fn on_exchange_event(&self, id: RequestId, event: ExchangeEvent) {
        match event {
            ExchangeEvent::End | ExchangeEvent::Failed(_) => self.finish(id, event),
            ExchangeEvent::Head(_) | ExchangeEvent::Data(_) => {
                let delivery = match self.requests.lock().get(&id) {
                    Some(entry) => entry.delivery(),
                    None => return,
                };
                if !self.deliver(id, delivery, event) {
                    self.abandon(id);
                }
            }
        }
    }

    /// Moves the request to its terminal state and reports it.
    fn finish(&self, id: RequestId, event: ExchangeEvent) {
        let Some(mut entry) = self.requests.lock().remove(&id) else {
            return;
        };
        let moved = match &event {
            ExchangeEvent::End => entry.lifecycle.complete(),
            _ => entry.lifecycle.fail(),
        };
        if let Err(e) = moved {
            warn!("fault: request {id}: {e}");
        }
        match &event {
            ExchangeEvent::Failed(failure) => debug!("request {id}: {failure}"),
            _ => debug!("request {id}: finished"),
        }
        self.deliver(id, entry.delivery(), event);
    }

    /// Runs the notification for `event` on the consumer thread.  Returns
    /// `false` if the consumer could not take it.
    fn deliver(&self, id: RequestId, delivery: Delivery, event: ExchangeEvent) -> bool {
        let Delivery {
            client,
            target,
            cancelled,
        } = delivery;
        let outcome = self.dispatcher.deliver(&target, move || {
            if cancelled.load(Ordering::Acquire) {
                return;
            }
            match event {
                ExchangeEvent::Head(head) => client.did_receive_response(id, &head),
                ExchangeEvent::Data(data) => client.did_load_data(id, &data),
                ExchangeEvent::End => client.did_finish_loading(id),
                ExchangeEvent::Failed(failure) => client.did_fail(id, &failure),
            }
        });
        match outcome {
            DeliveryOutcome::Delivered | DeliveryOutcome::Inline => true,
            DeliveryOutcome::ConsumerGone | DeliveryOutcome::TimedOut => {
                warn!("request {id}: notification not delivered ({outcome:?})");
                false
            }
        }
    }

    /// Drops a request whose consumer stopped taking notifications.
    fn abandon(&self, id: RequestId) {
        let Some(mut entry) = self.requests.lock().remove(&id) else {
            return;
        };
        entry.cancelled.store(true, Ordering::Release);
        let _ = entry.lifecycle.cancel();
        if let Some(exchange) = entry.exchange.take() {
            exchange.cancel();
        }
        debug!("request {id}: abandoned");
    }

    fn count_in(&self, state: RequestState) -> usize {
        self.requests
            .lock()
            .values()
            .filter(|e| e.lifecycle.state() == state)
            .count()
    }
}

/// Closes the idle connections of intercepts that left the table.
fn retire(removed: Vec<Arc<Intercept>>) {
    for intercept in removed {
        if let Some(client) = intercept.existing_client() {
            client.retire();
        }
    }
}

impl Drop for Interceptor {
    fn drop(&mut self) {
        if let Some(id) = self.listener.get_mut().take() {
            self.ctx.registry().unregister(id);
        }
    }
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("installed", &self.is_installed())
            .field("table", &self.table)
            .field("requests", &self.requests.lock().len())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
