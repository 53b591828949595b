//! In-process overlay used by tests and the demo.
//!
//! A [`LoopbackNetwork`] stands in for the overlay fabric: it holds the
//! published services, the bound listeners and every session.  Each loop
//! attaches through its own [`LoopbackOverlay`] client, so one network can
//! connect several loops (or one loop to itself).
//!
//! Behaviour mirrors what the loop expects from a real overlay client:
//!
//! - dialing an unpublished service fails synchronously;
//! - dialing a published service nobody listens on fails asynchronously with
//!   `ConnectionRefused`;
//! - a dial completes only when the listening side accepts the inbound
//!   client;
//! - each write is delivered to the peer and then completed, in order;
//! - closing one side delivers `Eof` to the other.
//!
//! Failure injection: [`fail_next_init`](LoopbackNetwork::fail_next_init)
//! and [`hold_writes`](LoopbackNetwork::hold_writes) /
//! [`release_writes`](LoopbackNetwork::release_writes).

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use overlay_core::{HandleId, Identity, OverlayError, ServiceDescriptor, ServiceEvent};
use parking_lot::Mutex;
use tracing::debug;

use crate::application::connection::DataEvent;
use crate::application::overlay::{EventSink, OverlayClient, OverlayEvent, SessionId, WriteToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    /// Dialer waiting for the accept, or inbound client not yet accepted.
    Pending,
    Established,
    Listening,
}

struct Session {
    client: u64,
    connection: Option<HandleId>,
    peer: Option<SessionId>,
    state: SessionState,
}

struct Binding {
    client: u64,
    connection: HandleId,
    session: SessionId,
}

struct HeldWrite {
    session: SessionId,
    token: WriteToken,
    data: Bytes,
}

#[derive(Default)]
struct Net {
    services: BTreeMap<String, ServiceDescriptor>,
    clients: HashMap<u64, EventSink>,
    next_client: u64,
    listeners: HashMap<String, Binding>,
    sessions: HashMap<SessionId, Session>,
    next_session: u64,
    fail_init: Option<OverlayError>,
    holding: bool,
    held: Vec<HeldWrite>,
}

impl Net {
    fn emit(&self, client: u64, event: OverlayEvent) {
        match self.clients.get(&client) {
            Some(sink) => sink.emit(event),
            None => debug!("loopback: client {client} is detached, dropping {event:?}"),
        }
    }

    fn broadcast(&self, event: &ServiceEvent) {
        for sink in self.clients.values() {
            sink.emit(OverlayEvent::Service(event.clone()));
        }
    }

    fn new_session(&mut self, session: Session) -> SessionId {
        self.next_session += 1;
        let id = SessionId(self.next_session);
        self.sessions.insert(id, session);
        id
    }

    fn deliver(&mut self, write: HeldWrite) {
        let HeldWrite {
            session,
            token,
            data,
        } = write;
        let Some(writer) = self.sessions.get(&session) else {
            return;
        };
        let writer_client = writer.client;
        let target = writer
            .peer
            .and_then(|peer| self.sessions.get(&peer))
            .filter(|peer| peer.state == SessionState::Established)
            .and_then(|peer| peer.connection.map(|c| (peer.client, c)));
        match target {
            Some((client, connection)) => {
                let len = data.len();
                self.emit(
                    client,
                    OverlayEvent::Data {
                        connection,
                        event: DataEvent::Data(data),
                    },
                );
                self.emit(
                    writer_client,
                    OverlayEvent::WriteComplete {
                        token,
                        result: Ok(len),
                    },
                );
            }
            None => self.emit(
                writer_client,
                OverlayEvent::WriteComplete {
                    token,
                    result: Err(OverlayError::Closed),
                },
            ),
        }
    }

    fn close_session(&mut self, id: SessionId) {
        let Some(session) = self.sessions.remove(&id) else {
            return;
        };
        self.held.retain(|w| w.session != id);
        if session.state == SessionState::Listening {
            self.listeners.retain(|_, b| b.session != id);
        }
        let Some(peer_id) = session.peer else {
            return;
        };
        let Some(peer) = self.sessions.get_mut(&peer_id) else {
            return;
        };
        peer.peer = None;
        let (client, connection, state) = (peer.client, peer.connection, peer.state);
        match (state, connection) {
            (SessionState::Established, Some(connection)) => self.emit(
                client,
                OverlayEvent::Data {
                    connection,
                    event: DataEvent::Eof,
                },
            ),
            // The dialer is still waiting for an accept that will never come.
            (SessionState::Pending, Some(connection)) => self.emit(
                client,
                OverlayEvent::Connected {
                    connection,
                    result: Err(OverlayError::ConnectionRefused(
                        "inbound client closed before accept".into(),
                    )),
                },
            ),
            _ => {}
        }
    }
}

/// Shared in-process overlay fabric.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    inner: Arc<Mutex<Net>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new overlay client attached to this network.
    pub fn client(&self) -> LoopbackOverlay {
        let mut net = self.inner.lock();
        net.next_client += 1;
        LoopbackOverlay {
            net: self.clone(),
            client: net.next_client,
        }
    }

    /// Adds or replaces a service and announces it to every client.
    pub fn publish(&self, service: ServiceDescriptor) {
        let mut net = self.inner.lock();
        let event = match net.services.insert(service.name.clone(), service.clone()) {
            Some(_) => ServiceEvent::changed(service),
            None => ServiceEvent::added(service),
        };
        net.broadcast(&event);
    }

    /// Removes a service and announces the removal.  Returns `false` if it
    /// was not published.
    ///
    /// Existing sessions to the service stay up.
    pub fn withdraw(&self, name: &str) -> bool {
        let mut net = self.inner.lock();
        let Some(service) = net.services.remove(name) else {
            return false;
        };
        net.listeners.remove(name);
        net.broadcast(&ServiceEvent::removed(service));
        true
    }

    pub fn services(&self) -> Vec<ServiceDescriptor> {
        self.inner.lock().services.values().cloned().collect()
    }

    /// Makes the next client `init` report `error`.
    pub fn fail_next_init(&self, error: OverlayError) {
        self.inner.lock().fail_init = Some(error);
    }

    /// Queues writes instead of delivering them.
    pub fn hold_writes(&self) {
        self.inner.lock().holding = true;
    }

    /// Delivers every held write in submission order and stops holding.
    pub fn release_writes(&self) {
        let mut net = self.inner.lock();
        net.holding = false;
        for write in std::mem::take(&mut net.held) {
            net.deliver(write);
        }
    }

    pub fn held_writes(&self) -> usize {
        self.inner.lock().held.len()
    }

    /// Open sessions across every client, listeners included.
    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }
}

impl fmt::Debug for LoopbackNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let net = self.inner.lock();
        f.debug_struct("LoopbackNetwork")
            .field("services", &net.services.len())
            .field("clients", &net.clients.len())
            .field("sessions", &net.sessions.len())
            .finish()
    }
}

/// One overlay client attached to a [`LoopbackNetwork`].
pub struct LoopbackOverlay {
    net: LoopbackNetwork,
    client: u64,
}

impl LoopbackOverlay {
    pub fn network(&self) -> &LoopbackNetwork {
        &self.net
    }
}

impl fmt::Debug for LoopbackOverlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackOverlay")
            .field("client", &self.client)
            .finish()
    }
}

impl OverlayClient for LoopbackOverlay {
    fn init(&mut self, identity: &Identity, events: EventSink) -> Result<(), OverlayError> {
        let mut net = self.net.inner.lock();
        if let Some(error) = net.fail_init.take() {
            events.emit(OverlayEvent::InitComplete(Err(error)));
            return Ok(());
        }
        debug!("loopback: client {} is '{}'", self.client, identity.name);
        events.emit(OverlayEvent::InitComplete(Ok(())));
        for service in net.services.values() {
            events.emit(OverlayEvent::Service(ServiceEvent::added(service.clone())));
        }
        net.clients.insert(self.client, events);
        Ok(())
    }

    fn dial(&mut self, connection: HandleId, service: &str) -> Result<SessionId, OverlayError> {
        let mut net = self.net.inner.lock();
        if !net.services.contains_key(service) {
            return Err(OverlayError::ServiceUnavailable(service.to_string()));
        }
        let binding = net
            .listeners
            .get(service)
            .map(|b| (b.client, b.connection));
        let session = net.new_session(Session {
            client: self.client,
            connection: Some(connection),
            peer: None,
            state: SessionState::Pending,
        });

        match binding {
            Some((server_client, listener)) => {
                let inbound = net.new_session(Session {
                    client: server_client,
                    connection: None,
                    peer: Some(session),
                    state: SessionState::Pending,
                });
                if let Some(s) = net.sessions.get_mut(&session) {
                    s.peer = Some(inbound);
                }
                net.emit(
                    server_client,
                    OverlayEvent::InboundClient {
                        listener,
                        session: inbound,
                    },
                );
            }
            None => net.emit(
                self.client,
                OverlayEvent::Connected {
                    connection,
                    result: Err(OverlayError::ConnectionRefused(service.to_string())),
                },
            ),
        }
        Ok(session)
    }

    fn listen(&mut self, connection: HandleId, service: &str) -> Result<SessionId, OverlayError> {
        let mut net = self.net.inner.lock();
        let Some(descriptor) = net.services.get(service) else {
            return Err(OverlayError::ServiceUnavailable(service.to_string()));
        };
        let result = if !descriptor.permissions.bind {
            Err(OverlayError::ServiceUnavailable(format!(
                "{service} (bind not permitted)"
            )))
        } else if net.listeners.contains_key(service) {
            Err(OverlayError::InvalidState(format!(
                "service '{service}' is already bound"
            )))
        } else {
            Ok(())
        };

        let session = net.new_session(Session {
            client: self.client,
            connection: Some(connection),
            peer: None,
            state: if result.is_ok() {
                SessionState::Listening
            } else {
                SessionState::Pending
            },
        });
        if result.is_ok() {
            net.listeners.insert(
                service.to_string(),
                Binding {
                    client: self.client,
                    connection,
                    session,
                },
            );
        }
        net.emit(self.client, OverlayEvent::Listening { connection, result });
        Ok(session)
    }

    fn accept(&mut self, session: SessionId, connection: HandleId) -> Result<(), OverlayError> {
        let mut net = self.net.inner.lock();
        let peer_id = match net.sessions.get_mut(&session) {
            Some(s) if s.state == SessionState::Pending && s.peer.is_some() => {
                s.connection = Some(connection);
                s.state = SessionState::Established;
                s.peer
            }
            _ => None,
        };
        let dialer = peer_id.and_then(|id| net.sessions.get_mut(&id)).and_then(|peer| {
            peer.state = SessionState::Established;
            peer.connection.map(|c| (peer.client, c))
        });
        let Some((dialer_client, dialer_connection)) = dialer else {
            return Err(OverlayError::Closed);
        };

        net.emit(
            dialer_client,
            OverlayEvent::Connected {
                connection: dialer_connection,
                result: Ok(()),
            },
        );
        net.emit(
            self.client,
            OverlayEvent::Connected {
                connection,
                result: Ok(()),
            },
        );
        Ok(())
    }

    fn write(
        &mut self,
        session: SessionId,
        token: WriteToken,
        data: Bytes,
    ) -> Result<(), OverlayError> {
        let mut net = self.net.inner.lock();
        match net.sessions.get(&session) {
            Some(s) if s.state == SessionState::Established && s.peer.is_some() => {}
            _ => return Err(OverlayError::Closed),
        }
        let write = HeldWrite {
            session,
            token,
            data,
        };
        if net.holding {
            net.held.push(write);
        } else {
            net.deliver(write);
        }
        Ok(())
    }

    fn close(&mut self, session: SessionId) {
        self.net.inner.lock().close_session(session);
    }

    fn probe_service(&mut self, probe: HandleId, service: &str) -> Result<(), OverlayError> {
        let net = self.net.inner.lock();
        let result = net
            .services
            .get(service)
            .cloned()
            .ok_or_else(|| OverlayError::ServiceUnavailable(service.to_string()));
        net.emit(self.client, OverlayEvent::ProbeResult { probe, result });
        Ok(())
    }

    fn shutdown(&mut self) {
        let mut net = self.net.inner.lock();
        let owned: Vec<SessionId> = net
            .sessions
            .iter()
            .filter(|(_, s)| s.client == self.client)
            .map(|(id, _)| *id)
            .collect();
        for id in owned {
            net.close_session(id);
        }
        if let Some(sink) = net.clients.remove(&self.client) {
            sink.emit(OverlayEvent::ShutdownComplete);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
