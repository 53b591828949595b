//! Credential stores: where an identity's certificate material comes from.
//!
//! The file store reads one directory per identity:
//!
//! ```text
//! <root>/<name>/cert.pem   client certificate chain (required)
//! <root>/<name>/key.pem    private key (required)
//! <root>/<name>/ca.pem     trust anchors (optional)
//! ```
//!
//! The store only loads bytes.  Structural checks happen in
//! [`Identity::validate`](overlay_core::Identity::validate) when the loop
//! starts.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use overlay_core::Credentials;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no credentials stored for identity '{0}'")]
    NotFound(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A source of credentials, keyed by identity name.
pub trait CredentialStore: Send + Sync {
    fn load(&self, name: &str) -> Result<Credentials, CredentialError>;
}

// ── File store ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    root: PathBuf,
}

impl FileCredentialStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the files for `name`.
    pub fn identity_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

fn read(path: PathBuf) -> Result<Vec<u8>, CredentialError> {
    std::fs::read(&path).map_err(|source| CredentialError::Io { path, source })
}

fn read_string(path: PathBuf) -> Result<String, CredentialError> {
    std::fs::read_to_string(&path).map_err(|source| CredentialError::Io { path, source })
}

impl CredentialStore for FileCredentialStore {
    fn load(&self, name: &str) -> Result<Credentials, CredentialError> {
        let dir = self.identity_dir(name);
        if name.is_empty() || !dir.is_dir() {
            return Err(CredentialError::NotFound(name.to_string()));
        }
        let certificate = read(dir.join("cert.pem"))?;
        let private_key = read_string(dir.join("key.pem"))?;
        let ca_path = dir.join("ca.pem");
        let ca_pool = if ca_path.exists() {
            Some(read_string(ca_path)?)
        } else {
            None
        };
        debug!("loaded credentials for '{name}' from {}", dir.display());
        Ok(Credentials {
            certificate,
            private_key,
            ca_pool,
        })
    }
}

// ── Memory store ──────────────────────────────────────────────────────────────

/// Credentials held in memory, for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: RwLock<HashMap<String, Credentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `credentials` under `name`, replacing any earlier entry.
    pub fn insert(&self, name: impl Into<String>, credentials: Credentials) {
        self.entries.write().insert(name.into(), credentials);
    }

    pub fn remove(&self, name: &str) -> bool {
        self.entries.write().remove(name).is_some()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self, name: &str) -> Result<Credentials, CredentialError> {
        self.entries
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CredentialError::NotFound(name.to_string()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
