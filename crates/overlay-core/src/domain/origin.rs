//! Normalised request origins.
//!
//! The interception table is keyed by the externally observable origin of a
//! request: `scheme://host:port`.  Two spellings of the same origin must map
//! to the same key, so [`OriginKey`] normalises on construction:
//!
//! - the host is lower-cased and a trailing `.` is dropped,
//! - an absent port is replaced by the scheme's default (80 / 443).
//!
//! ```rust
//! use overlay_core::OriginKey;
//!
//! let a: OriginKey = "https://Foo.Example/index.html".parse().unwrap();
//! let b: OriginKey = "https://foo.example:443".parse().unwrap();
//! assert_eq!(a, b);
//! assert_eq!(a.to_string(), "https://foo.example:443");
//! ```

use std::fmt;
use std::str::FromStr;

use http::Uri;
use thiserror::Error;

/// Errors produced while deriving an [`OriginKey`] from a URL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OriginError {
    #[error("url '{0}' could not be parsed")]
    Unparseable(String),
    #[error("url '{0}' has no scheme")]
    MissingScheme(String),
    #[error("scheme '{0}' cannot be intercepted")]
    UnsupportedScheme(String),
    #[error("url '{0}' has no host")]
    MissingHost(String),
}

/// The two schemes the interception layer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = OriginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("http") {
            Ok(Scheme::Http)
        } else if s.eq_ignore_ascii_case("https") {
            Ok(Scheme::Https)
        } else {
            Err(OriginError::UnsupportedScheme(s.to_string()))
        }
    }
}

/// Normalised `scheme://host:port` key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OriginKey {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl OriginKey {
    /// Builds a key from parts, normalising the host.
    pub fn new(scheme: Scheme, host: &str, port: u16) -> Self {
        Self {
            scheme,
            host: normalise_host(host),
            port,
        }
    }

    /// Derives the origin of an absolute request URI.
    ///
    /// # Errors
    ///
    /// Returns [`OriginError`] when the URI has no scheme, an unsupported
    /// scheme, or no host.
    pub fn from_uri(uri: &Uri) -> Result<Self, OriginError> {
        let scheme_str = uri
            .scheme_str()
            .ok_or_else(|| OriginError::MissingScheme(uri.to_string()))?;
        let scheme: Scheme = scheme_str.parse()?;
        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| OriginError::MissingHost(uri.to_string()))?;
        let port = uri.port_u16().unwrap_or_else(|| scheme.default_port());
        Ok(Self::new(scheme, host, port))
    }

    /// The http and https keys for one `host:port`, in that order.
    ///
    /// An intercepted service is reachable under either scheme, so the table
    /// always creates both.
    pub fn both_schemes(host: &str, port: u16) -> [OriginKey; 2] {
        [
            OriginKey::new(Scheme::Http, host, port),
            OriginKey::new(Scheme::Https, host, port),
        ]
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host` or `host:port`, omitting the scheme's default port.
    ///
    /// This is the form expected in an HTTP/1.1 `Host` header.
    pub fn authority(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for OriginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl FromStr for OriginKey {
    type Err = OriginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uri: Uri = s
            .parse()
            .map_err(|_| OriginError::Unparseable(s.to_string()))?;
        Self::from_uri(&uri)
    }
}

fn normalise_host(host: &str) -> String {
    host.trim_end_matches('.').to_ascii_lowercase()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
