//! Application layer of the loop crate.
//!
//! Everything here is runtime-agnostic: no threads are spawned and no
//! sockets are opened.  The infrastructure layer supplies the thread, the
//! tokio runtime and the overlay implementation.
//!
//! # Sub-modules
//!
//! - **`queue`**      – Mutex-protected mailbox of deferred operations plus
//!   the coalescing wake signal.
//! - **`context`**    – [`context::LoopContext`], the explicit handle passed to
//!   every component; `perform`, shutdown and state tracking.
//! - **`reactor`**    – Loop-thread state: connection table, probes, pending
//!   writes, and overlay event dispatch.
//! - **`connection`** – [`connection::ConnectionHandle`], the cross-thread face
//!   of one logical overlay connection.
//! - **`services`**   – Service availability registry and broadcast listeners.
//! - **`overlay`**    – The [`overlay::OverlayClient`] port and the events it
//!   reports back.

pub mod connection;
pub mod context;
pub mod overlay;
pub mod queue;
pub mod reactor;
pub mod services;
