use std::time::Duration;

use overlay_core::http::response::DEFAULT_MAX_HEADER_BYTES;

/// Interceptor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptorConfig {
    /// How long an idle keep-alive overlay connection stays open for reuse.
    pub idle_timeout: Duration,
    /// Upper bound on waiting for the consumer thread to run one
    /// notification.  `None` waits indefinitely.
    pub rendezvous_timeout: Option<Duration>,
    /// Largest response head accepted.
    pub max_header_bytes: usize,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            rendezvous_timeout: None,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
        }
    }
}
