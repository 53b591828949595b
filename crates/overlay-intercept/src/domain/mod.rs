//! Domain layer: request lifecycle, the consumer notification protocol,
//! configuration and errors.  No threads or I/O.

pub mod config;
pub mod error;
pub mod notification;
pub mod request;
