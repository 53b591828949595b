//! Service availability registry.
//!
//! The overlay client reports service add/update/remove events on the loop
//! thread.  The reactor applies each event here and then invokes every
//! registered listener, in registration order, once the reactor borrow is
//! released.  The name → state map can be read from any thread.
//!
//! [`subscribe`](ServiceRegistry::subscribe) registers a listener and returns
//! the currently available services as one atomic step: every event is
//! either reflected in the snapshot or delivered to the listener, never both
//! and never neither.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use overlay_core::{ServiceChange, ServiceDescriptor, ServiceEvent, ServiceState};
use parking_lot::{Mutex, RwLock};

/// Listener invoked on the loop thread for every service event.
pub type ServiceListener = Arc<dyn Fn(&ServiceEvent) + Send + Sync>;

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Record {
    state: ServiceState,
    descriptor: ServiceDescriptor,
}

/// Per-loop map of service name to reachability, plus its listeners.
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Record>>,
    listeners: Mutex<Vec<(ListenerId, ServiceListener)>>,
    next_id: AtomicU64,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Adds a listener for all future events.
    pub fn register<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ServiceEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Adds a listener and returns the services available at that instant.
    pub fn subscribe<F>(&self, listener: F) -> (ListenerId, Vec<ServiceDescriptor>)
    where
        F: Fn(&ServiceEvent) + Send + Sync + 'static,
    {
        // Lock order is services -> listeners, as in `apply`.
        let services = self.services.read();
        let id = self.register(listener);
        (id, available_in(&services))
    }

    /// Removes a listener.  An event already being fanned out may still
    /// reach it once.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn state(&self, name: &str) -> ServiceState {
        self.services
            .read()
            .get(name)
            .map_or(ServiceState::Unknown, |r| r.state)
    }

    /// Descriptor of `name` while it is available.
    pub fn descriptor(&self, name: &str) -> Option<ServiceDescriptor> {
        self.services
            .read()
            .get(name)
            .filter(|r| r.state == ServiceState::Available)
            .map(|r| r.descriptor.clone())
    }

    /// Every available service, sorted by name.
    pub fn available(&self) -> Vec<ServiceDescriptor> {
        available_in(&self.services.read())
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Records `event` and returns the listeners to notify, in registration
    /// order.
    pub(crate) fn apply(&self, event: &ServiceEvent) -> Vec<ServiceListener> {
        let mut services = self.services.write();
        let state = match event.change {
            ServiceChange::Added | ServiceChange::Changed => ServiceState::Available,
            ServiceChange::Removed => ServiceState::Unavailable,
        };
        services.insert(
            event.service.name.clone(),
            Record {
                state,
                descriptor: event.service.clone(),
            },
        );
        let listeners = self.listeners.lock();
        listeners.iter().map(|(_, l)| l.clone()).collect()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.services.read().len())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

fn available_in(services: &HashMap<String, Record>) -> Vec<ServiceDescriptor> {
    let mut out: Vec<_> = services
        .values()
        .filter(|r| r.state == ServiceState::Available)
        .map(|r| r.descriptor.clone())
        .collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
