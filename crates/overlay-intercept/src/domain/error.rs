use overlay_core::{OriginError, OriginKey};
use thiserror::Error;

use crate::domain::request::RequestState;

/// Errors returned by the interception surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterceptError {
    /// No intercept matches the request's origin.  The caller should load it
    /// the normal way.
    #[error("no intercept for {0}")]
    NotIntercepted(OriginKey),
    #[error("request has no interceptable origin: {0}")]
    InvalidOrigin(#[from] OriginError),
    #[error("interceptor has been uninstalled")]
    Uninstalled,
    #[error("invalid request transition {from} -> {to}")]
    InvalidTransition { from: RequestState, to: RequestState },
}

impl InterceptError {
    /// `true` when the caller should fall back to non-intercepted handling.
    pub fn is_fallback(&self) -> bool {
        matches!(
            self,
            InterceptError::NotIntercepted(_)
                | InterceptError::InvalidOrigin(_)
                | InterceptError::Uninstalled
        )
    }
}
