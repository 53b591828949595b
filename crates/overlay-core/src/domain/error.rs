//! Status taxonomy shared by the loop, the connection handles and the
//! interception layer.
//!
//! Every cross-thread signal in overlay-bridge is a callback carrying either a
//! success value or an [`OverlayError`]; nothing is thrown across the
//! loop-thread boundary.  The error is therefore `Clone` (one close fans out
//! to every pending write) and carries a stable negative [`code`] for logs and
//! foreign callers.
//!
//! [`code`]: OverlayError::code

use thiserror::Error;

/// Error reported by the overlay collaborator or by the bridge itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverlayError {
    /// Startup configuration is unusable (bad controller URL, missing
    /// credential material).  Fatal to startup, never retried by the core.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The overlay client failed to initialise.
    #[error("overlay initialisation failed: {0}")]
    Init(String),

    /// The named service is not known or not permitted for this identity.
    #[error("service '{0}' is not available")]
    ServiceUnavailable(String),

    /// The service exists but nobody accepted the connection.
    #[error("connection to service '{0}' was refused")]
    ConnectionRefused(String),

    /// The connection was closed before the operation completed.
    #[error("connection closed")]
    Closed,

    /// The operation did not complete in time.
    #[error("operation timed out")]
    Timeout,

    /// The operation is not valid in the handle's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A caller-supplied argument was rejected before reaching the overlay.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The loop has shut down; no further work is accepted.
    #[error("event loop is closed")]
    LoopClosed,

    /// The peer sent bytes that do not form a valid HTTP response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Transport-level failure reported by the overlay (TLS, routing, ...).
    #[error("transport error: {0}")]
    Transport(String),
}

impl OverlayError {
    /// Stable negative status code for this error kind.
    ///
    /// | Variant              | Code |
    /// |----------------------|------|
    /// | `Config`             | -1   |
    /// | `Init`               | -2   |
    /// | `ServiceUnavailable` | -3   |
    /// | `ConnectionRefused`  | -4   |
    /// | `Closed`             | -5   |
    /// | `Timeout`            | -6   |
    /// | `InvalidState`       | -7   |
    /// | `InvalidArgument`    | -8   |
    /// | `LoopClosed`         | -9   |
    /// | `Protocol`           | -10  |
    /// | `Transport`          | -11  |
    pub fn code(&self) -> i32 {
        match self {
            OverlayError::Config(_) => -1,
            OverlayError::Init(_) => -2,
            OverlayError::ServiceUnavailable(_) => -3,
            OverlayError::ConnectionRefused(_) => -4,
            OverlayError::Closed => -5,
            OverlayError::Timeout => -6,
            OverlayError::InvalidState(_) => -7,
            OverlayError::InvalidArgument(_) => -8,
            OverlayError::LoopClosed => -9,
            OverlayError::Protocol(_) => -10,
            OverlayError::Transport(_) => -11,
        }
    }

    /// `true` for errors that belong to the startup configuration category.
    pub fn is_config(&self) -> bool {
        matches!(self, OverlayError::Config(_))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
