//! Lifecycle of one intercepted request.
//!
//! ```text
//! Queued ──dispatch──▶ Dispatched ──complete──▶ Completed
//!   │                      │
//!   │                      └──────fail──────▶ Failed
//!   ├──────────fail───────────────────────────▶ Failed      (dispatch phase)
//!   └──────────cancel─────────── (either) ───▶ Cancelled
//! ```
//!
//! `Queued → Dispatched` only happens on the loop thread, when the dispatch
//! operation runs.  Terminal states never change again.

use std::fmt;

use uuid::Uuid;

use crate::domain::error::InterceptError;

/// Identifies one intercepted request for its whole life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first group is enough to tell requests apart in logs.
        let s = self.0.to_string();
        f.write_str(&s[..8])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    Queued,
    Dispatched,
    Completed,
    Failed,
    Cancelled,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Queued => "queued",
            RequestState::Dispatched => "dispatched",
            RequestState::Completed => "completed",
            RequestState::Failed => "failed",
            RequestState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::Failed | RequestState::Cancelled
        )
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Guards the transitions of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLifecycle {
    state: RequestState,
}

impl RequestLifecycle {
    pub fn new() -> Self {
        Self {
            state: RequestState::Queued,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn dispatch(&mut self) -> Result<(), InterceptError> {
        self.transition(RequestState::Dispatched, |s| s == RequestState::Queued)
    }

    pub fn complete(&mut self) -> Result<(), InterceptError> {
        self.transition(RequestState::Completed, |s| s == RequestState::Dispatched)
    }

    /// Valid from `Queued` (the request could not be dispatched) and from
    /// `Dispatched`.
    pub fn fail(&mut self) -> Result<(), InterceptError> {
        self.transition(RequestState::Failed, |s| !s.is_terminal())
    }

    pub fn cancel(&mut self) -> Result<(), InterceptError> {
        self.transition(RequestState::Cancelled, |s| !s.is_terminal())
    }

    fn transition(
        &mut self,
        to: RequestState,
        allowed: impl Fn(RequestState) -> bool,
    ) -> Result<(), InterceptError> {
        if !allowed(self.state) {
            return Err(InterceptError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}

impl Default for RequestLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
