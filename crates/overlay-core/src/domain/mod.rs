//! Pure domain types shared by every overlay-bridge crate.
//!
//! Nothing in here performs I/O, spawns threads or touches the event loop.
//! Types that cross the loop-thread boundary are `Send` and, where they are
//! fanned out to several callbacks, `Clone`.

pub mod error;
pub mod failure;
pub mod handle;
pub mod identity;
pub mod origin;
pub mod service;
