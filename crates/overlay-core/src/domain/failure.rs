//! Uniform failure representation for intercepted requests.
//!
//! The overlay can fail an HTTP exchange at several points: before a request
//! is dispatched, while the overlay connection is being established, while
//! the request bytes are written, while waiting for the response head, or in
//! the middle of the body.  Some TLS failures never produce a body callback at
//! all, only a failed head.  Rather than inferring the stage from which
//! callback happened to fire, every failure carries an explicit
//! [`FailurePhase`].

use std::fmt;

use crate::domain::error::OverlayError;

/// Stage of an HTTP exchange at which a failure was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePhase {
    /// The request never left the queue (no intercept, loop closed).
    Dispatch,
    /// The overlay connection could not be established.
    Connect,
    /// The request bytes could not be written.
    Send,
    /// No complete response head was received.
    Headers,
    /// The response head arrived but the body did not complete.
    Body,
}

impl FailurePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePhase::Dispatch => "dispatch",
            FailurePhase::Connect => "connect",
            FailurePhase::Send => "send",
            FailurePhase::Headers => "headers",
            FailurePhase::Body => "body",
        }
    }

    /// `true` once the consumer may already have seen a response head.
    pub fn after_response_head(&self) -> bool {
        matches!(self, FailurePhase::Body)
    }
}

impl fmt::Display for FailurePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed HTTP exchange: the phase plus the underlying status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFailure {
    pub phase: FailurePhase,
    pub error: OverlayError,
}

impl RequestFailure {
    pub fn new(phase: FailurePhase, error: OverlayError) -> Self {
        Self { phase, error }
    }

    /// Negative status code of the underlying error.
    pub fn code(&self) -> i32 {
        self.error.code()
    }
}

impl fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request failed during {}: {}", self.phase, self.error)
    }
}

impl std::error::Error for RequestFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
