//! Outbound HTTP/1.1 requests.
//!
//! An [`HttpRequest`] is the externally observed request as the application
//! built it: an absolute URI, a method, headers and a fully buffered body.
//! [`HttpRequest::encode`] turns it into origin-form wire bytes, e.g.
//!
//! ```text
//! GET /v1/items?page=2 HTTP/1.1\r\n
//! host: api.example\r\n
//! connection: keep-alive\r\n
//! \r\n
//! ```
//!
//! Framing headers are owned by the encoder: a caller-supplied
//! `Content-Length`, `Transfer-Encoding` or `Connection` header is replaced,
//! because the body is always sent with an exact length.

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, Uri};

use crate::domain::origin::{OriginError, OriginKey};

/// Headers the encoder writes itself and never copies from the caller.
const HOP_BY_HOP: [HeaderName; 5] = [
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::TE,
    header::UPGRADE,
];

/// One HTTP request with a fully buffered body.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(uri: Uri) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Normalised origin used to look up an intercept.
    ///
    /// # Errors
    ///
    /// Returns [`OriginError`] for relative or non-http(s) URIs.
    pub fn origin(&self) -> Result<OriginKey, OriginError> {
        OriginKey::from_uri(&self.uri)
    }

    /// Serialises the request in origin form.
    ///
    /// `keep_alive` selects the `Connection` header value.  A `Host` header is
    /// derived from the URI unless the caller supplied one.
    ///
    /// # Errors
    ///
    /// Returns [`OriginError`] when the URI has no usable origin, since the
    /// `Host` header could not be produced.
    pub fn encode(&self, keep_alive: bool) -> Result<Bytes, OriginError> {
        let origin = self.origin()?;
        let target = self
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("/");

        let mut buf = BytesMut::with_capacity(256 + self.body.len());
        buf.put_slice(self.method.as_str().as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(target.as_bytes());
        buf.put_slice(b" HTTP/1.1\r\n");

        if !self.headers.contains_key(header::HOST) {
            put_header(&mut buf, header::HOST.as_str(), origin.authority().as_bytes());
        }
        for (name, value) in &self.headers {
            if HOP_BY_HOP.contains(name) {
                continue;
            }
            put_header(&mut buf, name.as_str(), value.as_bytes());
        }

        if !self.body.is_empty() || method_expects_body(&self.method) {
            put_header(
                &mut buf,
                header::CONTENT_LENGTH.as_str(),
                self.body.len().to_string().as_bytes(),
            );
        }
        let connection: &[u8] = if keep_alive { b"keep-alive" } else { b"close" };
        put_header(&mut buf, header::CONNECTION.as_str(), connection);
        buf.put_slice(b"\r\n");
        buf.put_slice(&self.body);

        Ok(buf.freeze())
    }
}

fn method_expects_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

fn put_header(buf: &mut BytesMut, name: &str, value: &[u8]) {
    buf.put_slice(name.as_bytes());
    buf.put_slice(b": ");
    buf.put_slice(value);
    buf.put_slice(b"\r\n");
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_str(req: &HttpRequest, keep_alive: bool) -> String {
        String::from_utf8(req.encode(keep_alive).unwrap().to_vec()).unwrap()
    }

    #[test]
    fn test_get_uses_origin_form_and_derives_host() {
        // Arrange
        let req = HttpRequest::get("https://api.example/v1/items?page=2".parse().unwrap());

        // Act
        let wire = encode_str(&req, true);

        // Assert
        assert!(wire.starts_with("GET /v1/items?page=2 HTTP/1.1\r\n"));
        assert!(wire.contains("host: api.example\r\n"));
        assert!(wire.contains("connection: keep-alive\r\n"));
        assert!(!wire.contains("content-length"));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_non_default_port_appears_in_host() {
        let req = HttpRequest::get("http://api.example:8080".parse().unwrap());
        let wire = encode_str(&req, false);
        assert!(wire.starts_with("GET / HTTP/1.1\r\n"));
        assert!(wire.contains("host: api.example:8080\r\n"));
        assert!(wire.contains("connection: close\r\n"));
    }

    #[test]
    fn test_body_gets_exact_content_length() {
        // Arrange: caller supplied a stale length and chunked encoding
        let req = HttpRequest::new(Method::POST, "https://api.example/upload".parse().unwrap())
            .with_header(header::CONTENT_LENGTH, HeaderValue::from_static("999"))
            .with_header(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"))
            .with_body("hello");

        // Act
        let wire = encode_str(&req, true);

        // Assert
        assert!(wire.contains("content-length: 5\r\n"));
        assert!(!wire.contains("999"));
        assert!(!wire.contains("chunked"));
        assert!(wire.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn test_empty_post_sends_zero_length() {
        let req = HttpRequest::new(Method::POST, "https://api.example/ping".parse().unwrap());
        assert!(encode_str(&req, true).contains("content-length: 0\r\n"));
    }

    #[test]
    fn test_caller_host_header_is_kept() {
        let req = HttpRequest::get("https://api.example/".parse().unwrap())
            .with_header(header::HOST, HeaderValue::from_static("virtual.example"));
        let wire = encode_str(&req, true);
        assert!(wire.contains("host: virtual.example\r\n"));
        assert_eq!(wire.matches("host:").count(), 1);
    }

    #[test]
    fn test_relative_uri_cannot_be_encoded() {
        let req = HttpRequest::get("/relative".parse().unwrap());
        assert!(req.encode(true).is_err());
    }
}
