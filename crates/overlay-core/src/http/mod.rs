//! HTTP/1.1 wire codec for requests carried over overlay connections.
//!
//! The overlay connection is a plain byte stream, so an intercepted request is
//! serialised by [`request::HttpRequest::encode`] and the peer's reply is fed
//! chunk by chunk into a [`response::ResponseParser`], which yields a head,
//! zero or more body pieces and a terminal end marker.

pub mod request;
pub mod response;

pub use request::HttpRequest;
pub use response::{HttpError, ResponseEvent, ResponseHead, ResponseParser};
