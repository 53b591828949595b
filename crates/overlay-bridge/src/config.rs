//! TOML configuration for the bridge.
//!
//! ```toml
//! [identity]
//! name = "edge"
//! controller_url = "https://controller.example"
//! credentials_dir = "/etc/overlay-bridge/identities"
//!
//! [loop]
//! thread_name = "overlay-loop"
//! init_timeout_secs = 30
//!
//! [intercept]
//! idle_timeout_secs = 30
//! rendezvous_timeout_ms = 2000
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Every field has a default, applied through `#[serde(default = "...")]`
//! helpers, so a partial file (or no file at all) still yields a complete
//! configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use overlay_core::http::response::DEFAULT_MAX_HEADER_BYTES;
use overlay_intercept::InterceptorConfig;
use overlay_loop::LoopConfig;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub identity: IdentitySection,
    #[serde(default, rename = "loop")]
    pub event_loop: LoopSection,
    #[serde(default)]
    pub intercept: InterceptSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Who this process is on the overlay and where its credentials live.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct IdentitySection {
    #[serde(default = "default_identity_name")]
    pub name: String,
    #[serde(default = "default_controller_url")]
    pub controller_url: String,
    /// Root of the per-identity credential directories.
    #[serde(default = "default_credentials_dir")]
    pub credentials_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoopSection {
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InterceptSection {
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Absent means wait for the consumer indefinitely.
    #[serde(default)]
    pub rendezvous_timeout_ms: Option<u64>,
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingSection {
    /// Default `tracing` filter when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_identity_name() -> String {
    "edge".to_string()
}
fn default_controller_url() -> String {
    "https://controller.local".to_string()
}
fn default_credentials_dir() -> PathBuf {
    PathBuf::from("identities")
}
fn default_thread_name() -> String {
    "overlay-loop".to_string()
}
fn default_init_timeout_secs() -> u64 {
    30
}
fn default_idle_timeout_secs() -> u64 {
    30
}
fn default_max_header_bytes() -> usize {
    DEFAULT_MAX_HEADER_BYTES
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for IdentitySection {
    fn default() -> Self {
        Self {
            name: default_identity_name(),
            controller_url: default_controller_url(),
            credentials_dir: default_credentials_dir(),
        }
    }
}

impl Default for LoopSection {
    fn default() -> Self {
        Self {
            thread_name: default_thread_name(),
            init_timeout_secs: default_init_timeout_secs(),
        }
    }
}

impl Default for InterceptSection {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            rendezvous_timeout_ms: None,
            max_header_bytes: default_max_header_bytes(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML, [`ConfigError::Invalid`] for
    /// values out of range.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, returning the defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] for file-system errors other than "not found",
    /// otherwise as [`from_toml`](Self::from_toml).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity.name.trim().is_empty() {
            return Err(ConfigError::Invalid("identity.name must not be empty".into()));
        }
        if self.event_loop.thread_name.trim().is_empty() {
            return Err(ConfigError::Invalid("loop.thread_name must not be empty".into()));
        }
        if self.event_loop.init_timeout_secs == 0 {
            return Err(ConfigError::Invalid("loop.init_timeout_secs must be positive".into()));
        }
        if self.intercept.max_header_bytes == 0 {
            return Err(ConfigError::Invalid("intercept.max_header_bytes must be positive".into()));
        }
        Ok(())
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            thread_name: self.event_loop.thread_name.clone(),
            init_timeout: Duration::from_secs(self.event_loop.init_timeout_secs),
        }
    }

    pub fn interceptor_config(&self) -> InterceptorConfig {
        InterceptorConfig {
            idle_timeout: Duration::from_secs(self.intercept.idle_timeout_secs),
            rendezvous_timeout: self.intercept.rendezvous_timeout_ms.map(Duration::from_millis),
            max_header_bytes: self.intercept.max_header_bytes,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
