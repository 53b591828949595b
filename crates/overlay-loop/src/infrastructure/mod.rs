//! Infrastructure layer for the loop crate.
//!
//! Contains the pieces that touch the OS: the loop thread and its tokio
//! runtime, the file system credential store, TCP forwarding for hosted
//! services, and the in-process loopback overlay.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `overlay_core`, but MUST NOT be imported by the `application` layer.

pub mod credentials;
pub mod host;
pub mod loopback;
pub mod runner;
