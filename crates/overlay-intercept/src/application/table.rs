//! The interception table: origin key → intercept.
//!
//! Lookups ([`can_intercept`](InterceptTable::can_intercept),
//! [`lookup`](InterceptTable::lookup)) take a shared lock and never create
//! entries.  Entries change only through [`apply`](InterceptTable::apply),
//! which the interceptor calls for every service event:
//!
//! | Event                                  | Effect                             |
//! |----------------------------------------|------------------------------------|
//! | added/changed with an intercept address | http and https entries for it      |
//! | changed to a different address          | old entries replaced               |
//! | added/changed without an address        | the service's entries removed      |
//! | removed                                | the service's entries removed      |
//!
//! Each entry's HTTP client is created on first dispatch, on the loop thread.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use overlay_core::{OriginKey, ServiceChange, ServiceDescriptor, ServiceEvent};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::application::http_client::OverlayHttpClient;
use crate::domain::config::InterceptorConfig;

/// One origin routed to an overlay service.
pub struct Intercept {
    service: String,
    origin: OriginKey,
    client: OnceLock<Arc<OverlayHttpClient>>,
}

impl Intercept {
    fn new(service: &str, origin: OriginKey) -> Self {
        Self {
            service: service.to_string(),
            origin,
            client: OnceLock::new(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn origin(&self) -> &OriginKey {
        &self.origin
    }

    /// The HTTP client, created on first use.
    pub fn client(&self, config: &InterceptorConfig) -> Arc<OverlayHttpClient> {
        self.client
            .get_or_init(|| OverlayHttpClient::new(&self.service, self.origin.clone(), config))
            .clone()
    }

    /// The HTTP client if a request has already used it.
    pub fn existing_client(&self) -> Option<Arc<OverlayHttpClient>> {
        self.client.get().cloned()
    }
}

impl fmt::Debug for Intercept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Intercept")
            .field("service", &self.service)
            .field("origin", &self.origin)
            .field("client", &self.client.get().is_some())
            .finish()
    }
}

type Entries = HashMap<OriginKey, Arc<Intercept>>;

#[derive(Default)]
pub struct InterceptTable {
    entries: RwLock<Entries>,
}

impl InterceptTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_intercept(&self, origin: &OriginKey) -> bool {
        self.entries.read().contains_key(origin)
    }

    pub fn lookup(&self, origin: &OriginKey) -> Option<Arc<Intercept>> {
        self.entries.read().get(origin).cloned()
    }

    /// `true` while `intercept` is still the entry for its origin.
    pub fn is_current(&self, intercept: &Arc<Intercept>) -> bool {
        self.entries
            .read()
            .get(intercept.origin())
            .is_some_and(|e| Arc::ptr_eq(e, intercept))
    }

    /// Applies one service event.  Returns the entries it removed.
    pub fn apply(&self, event: &ServiceEvent) -> Vec<Arc<Intercept>> {
        apply_locked(&mut self.entries.write(), event)
    }

    /// Applies `services` as additions while holding the table lock across
    /// `snapshot`, so an event processed concurrently lands after the seed.
    pub fn seed<F>(&self, snapshot: F) -> usize
    where
        F: FnOnce() -> Vec<ServiceDescriptor>,
    {
        let mut entries = self.entries.write();
        let services = snapshot();
        for service in &services {
            apply_locked(&mut entries, &ServiceEvent::added(service.clone()));
        }
        services.len()
    }

    /// Removes every entry of `service`.
    pub fn remove_service(&self, service: &str) -> Vec<Arc<Intercept>> {
        remove_locked(&mut self.entries.write(), service)
    }

    /// Removes everything.
    pub fn clear(&self) -> Vec<Arc<Intercept>> {
        self.entries.write().drain().map(|(_, e)| e).collect()
    }

    /// Every intercepted origin, sorted.
    pub fn origins(&self) -> Vec<OriginKey> {
        let mut origins: Vec<_> = self.entries.read().keys().cloned().collect();
        origins.sort();
        origins
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl fmt::Debug for InterceptTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptTable")
            .field("origins", &self.origins())
            .finish()
    }
}

fn apply_locked(entries: &mut Entries, event: &ServiceEvent) -> Vec<Arc<Intercept>> {
    let service = &event.service;
    let address = match event.change {
        ServiceChange::Removed => None,
        ServiceChange::Added | ServiceChange::Changed => service.intercept.as_ref(),
    };
    let Some(address) = address else {
        return remove_locked(entries, &service.name);
    };

    let keys = OriginKey::both_schemes(&address.hostname, address.port);
    let unchanged = keys
        .iter()
        .all(|k| entries.get(k).is_some_and(|e| e.service() == service.name));
    if unchanged {
        return Vec::new();
    }

    let mut removed = remove_locked(entries, &service.name);
    for key in keys {
        let intercept = Arc::new(Intercept::new(&service.name, key.clone()));
        if let Some(previous) = entries.insert(key.clone(), intercept) {
            debug!("{key}: taken over from service '{}'", previous.service());
            removed.push(previous);
        }
        info!("intercepting {key} via service '{}'", service.name);
    }
    removed
}

fn remove_locked(entries: &mut Entries, service: &str) -> Vec<Arc<Intercept>> {
    let keys: Vec<OriginKey> = entries
        .iter()
        .filter(|(_, e)| e.service() == service)
        .map(|(k, _)| k.clone())
        .collect();
    let removed: Vec<_> = keys.iter().filter_map(|k| entries.remove(k)).collect();
    if !removed.is_empty() {
        info!("stopped intercepting {} origin(s) of service '{service}'", removed.len());
    }
    removed
}

// ── Tests ─────────────────────────────────────────────────────────────────────
