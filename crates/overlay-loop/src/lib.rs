//! # overlay-loop
//!
//! Owns the one thread that may touch the overlay client and everything the
//! overlay client owns, and gives every other thread a safe way in.
//!
//! # Threading model (for beginners)
//!
//! The overlay client is driven by a single-threaded event loop.  Its
//! sessions, pending writes and probes may only be touched from that loop's
//! thread.  Application threads therefore never call the overlay directly.
//! They submit *operations* (closures over the loop-thread state) through a
//! [`LoopContext`]:
//!
//! ```text
//!  app thread ──perform(op)──▶ OperationQueue ──wake──▶ loop thread
//!                                                        │ drain, run ops
//!  app thread ◀──callback──────────────────────────────── │ overlay events
//! ```
//!
//! Calling [`LoopContext::perform`] on the loop thread itself runs the
//! operation immediately.  Every result travels back through a callback,
//! never as a synchronous return value on the calling thread.
//!
//! # Layers
//!
//! - **`application`** – The queue, the context, the loop-thread
//!   [`Reactor`], connection handles, the service registry and the
//!   [`OverlayClient`] port the overlay collaborator implements.
//! - **`infrastructure`** – The loop runner (thread + tokio runtime), the
//!   in-process loopback overlay, credential stores and TCP service hosting.

pub mod application;
pub mod infrastructure;

pub use application::connection::{
    ClientCallback, ConnectCallback, ConnectionHandle, DataCallback, DataEvent, WriteCallback,
};
pub use application::context::{LoopContext, LoopState};
pub use application::overlay::{EventSink, OverlayClient, OverlayEvent, SessionId, WriteToken};
pub use application::reactor::Reactor;
pub use application::services::{ListenerId, ServiceRegistry};
pub use infrastructure::credentials::{
    CredentialError, CredentialStore, FileCredentialStore, MemoryCredentialStore,
};
pub use infrastructure::host::ServiceHost;
pub use infrastructure::loopback::{LoopbackNetwork, LoopbackOverlay};
pub use infrastructure::runner::{LoopConfig, LoopError, LoopRunner};
