//! Overlay services and the events that announce their availability.
//!
//! A *service* is a named endpoint exposed by the overlay network.  The
//! overlay client tells the bridge when services appear, change or disappear;
//! the bridge keeps a name → [`ServiceState`] map and fans each
//! [`ServiceEvent`] out to registered listeners.
//!
//! A service may carry two optional configurations:
//!
//! - [`InterceptAddress`] – the `hostname:port` under which applications
//!   address the service over HTTP(S).  The interception table creates its
//!   entries from this.
//! - [`HostConfig`] – a local TCP target that inbound overlay clients of the
//!   service are forwarded to when this identity hosts the service.

use serde::{Deserialize, Serialize};

/// What this identity is allowed to do with a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Permissions {
    pub dial: bool,
    pub bind: bool,
}

impl Permissions {
    pub fn dial_only() -> Self {
        Self {
            dial: true,
            bind: false,
        }
    }

    pub fn dial_and_bind() -> Self {
        Self {
            dial: true,
            bind: true,
        }
    }
}

/// Hostname and port an application uses to reach an intercepted service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptAddress {
    pub hostname: String,
    pub port: u16,
}

/// Local TCP target for a hosted service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Only `"tcp"` is forwarded.
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub address: String,
    pub port: u16,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

/// Description of one overlay service as reported by the overlay client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intercept: Option<InterceptAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<HostConfig>,
}

impl ServiceDescriptor {
    /// A dial-only service with no configuration attached.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            permissions: Permissions::dial_only(),
            intercept: None,
            host: None,
        }
    }

    pub fn with_intercept(mut self, hostname: impl Into<String>, port: u16) -> Self {
        self.intercept = Some(InterceptAddress {
            hostname: hostname.into(),
            port,
        });
        self
    }

    pub fn with_host(mut self, host: HostConfig) -> Self {
        self.host = Some(host);
        self
    }

    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }
}

/// Kind of change reported for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceChange {
    Added,
    Changed,
    Removed,
}

/// Current reachability of a service as tracked by the registry watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    Available,
    Unavailable,
    /// No event has been seen for this name.
    Unknown,
}

/// One service add/update/remove notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEvent {
    pub service: ServiceDescriptor,
    pub change: ServiceChange,
}

impl ServiceEvent {
    pub fn added(service: ServiceDescriptor) -> Self {
        Self {
            service,
            change: ServiceChange::Added,
        }
    }

    pub fn changed(service: ServiceDescriptor) -> Self {
        Self {
            service,
            change: ServiceChange::Changed,
        }
    }

    pub fn removed(service: ServiceDescriptor) -> Self {
        Self {
            service,
            change: ServiceChange::Removed,
        }
    }

    /// Reachability implied by this event.
    pub fn state(&self) -> ServiceState {
        match self.change {
            ServiceChange::Added | ServiceChange::Changed => ServiceState::Available,
            ServiceChange::Removed => ServiceState::Unavailable,
        }
    }
}
