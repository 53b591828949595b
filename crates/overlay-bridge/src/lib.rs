//! # overlay-bridge
//!
//! Front end for the overlay event loop and the request interceptor:
//! configuration loading, identity resolution and the demo walkthrough used
//! by the `overlay-bridge` binary.

pub mod config;
pub mod demo;
pub mod identity;
