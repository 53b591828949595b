//! # overlay-core
//!
//! Shared library for overlay-bridge containing the domain types that flow
//! between the loop thread, the interception layer and application threads,
//! plus the HTTP/1.1 wire codec used to carry intercepted requests over
//! overlay connections.
//!
//! This crate has no dependencies on threads, sockets or async runtimes.
//!
//! # Architecture overview
//!
//! overlay-bridge lets application threads drive a single-threaded event loop
//! owned by an overlay network client, and routes matching HTTP(S) requests
//! over overlay connections instead of the OS network stack.  This crate is the
//! shared foundation.  It defines:
//!
//! - **`domain`** – Opaque identifiers ([`HandleId`] from the generation-checked
//!   [`HandleTable`]), request origins ([`OriginKey`]), service descriptors and
//!   events, the identity material consumed at startup, and the status
//!   taxonomy ([`OverlayError`], [`RequestFailure`]).
//!
//! - **`http`** – A request encoder and an incremental response parser that
//!   understands `Content-Length`, `chunked` and close-delimited bodies.

pub mod domain;
pub mod http;

pub use domain::error::OverlayError;
pub use domain::failure::{FailurePhase, RequestFailure};
pub use domain::handle::{HandleId, HandleTable};
pub use domain::identity::{Credentials, Identity, IdentityError};
pub use domain::origin::{OriginError, OriginKey, Scheme};
pub use domain::service::{
    HostConfig, InterceptAddress, Permissions, ServiceChange, ServiceDescriptor, ServiceEvent,
    ServiceState,
};
pub use http::request::HttpRequest;
pub use http::response::{HttpError, ResponseEvent, ResponseHead, ResponseParser};
