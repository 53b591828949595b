//! Incremental HTTP/1.1 response parser.
//!
//! Overlay data arrives in arbitrary slices, so the parser is push based:
//! each [`ResponseParser::feed`] call appends bytes and returns whatever
//! [`ResponseEvent`]s became complete.  The sequence for one response is
//! always
//!
//! ```text
//! Head, Data*, End
//! ```
//!
//! Body framing follows RFC 9112 §6.3, in priority order:
//!
//! 1. `HEAD` requests and `1xx`/`204`/`304` responses have no body.
//! 2. `Transfer-Encoding: chunked` (trailers are read and discarded).
//! 3. `Content-Length`.
//! 4. Otherwise the body runs until the peer closes; call
//!    [`ResponseParser::finish_eof`] when the stream ends.
//!
//! Interim `1xx` responses (e.g. `100 Continue`) are skipped silently.

use bytes::{Buf, Bytes, BytesMut};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode, Version};
use thiserror::Error;

/// Default cap on the size of a response head.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 64 * 1024;

/// Longest chunk-size line accepted (hex digits plus extensions).
const MAX_CHUNK_LINE: usize = 1024;

/// Errors produced while parsing a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    #[error("response head exceeds {limit} bytes")]
    HeadersTooLarge { limit: usize },
    #[error("malformed status line: {0}")]
    MalformedStatusLine(String),
    #[error("malformed header line: {0}")]
    MalformedHeader(String),
    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),
    #[error("invalid chunk size line: {0}")]
    InvalidChunkSize(String),
    #[error("stream ended before the response was complete")]
    UnexpectedEof,
}

/// Status line and headers of a response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// Declared `Content-Length`, if present and valid.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok())
    }

    fn has_token(&self, name: HeaderName, token: &str) -> bool {
        self.headers.get_all(name).iter().any(|v| {
            v.to_str()
                .map(|s| s.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
                .unwrap_or(false)
        })
    }
}

/// One parsing milestone.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEvent {
    Head(ResponseHead),
    Data(Bytes),
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chunk {
    Size,
    Data(u64),
    DataEnd,
    Trailers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Head,
    Length(u64),
    Chunked(Chunk),
    UntilClose,
    Done,
}

/// Push parser for a single response on a connection.
#[derive(Debug)]
pub struct ResponseParser {
    buf: BytesMut,
    state: State,
    head_request: bool,
    max_header_bytes: usize,
    persistent: bool,
}

impl ResponseParser {
    /// Creates a parser for the response to a request sent with `method`.
    pub fn new(method: &Method) -> Self {
        Self {
            buf: BytesMut::new(),
            state: State::Head,
            head_request: *method == Method::HEAD,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            persistent: false,
        }
    }

    pub fn with_max_header_bytes(mut self, limit: usize) -> Self {
        self.max_header_bytes = limit;
        self
    }

    /// `true` once the `End` event has been produced.
    pub fn is_complete(&self) -> bool {
        self.state == State::Done
    }

    /// `true` when the head has been parsed and body bytes may follow.
    pub fn head_received(&self) -> bool {
        self.state != State::Head
    }

    /// Whether the connection may carry another request once this response
    /// is complete.
    pub fn keep_alive(&self) -> bool {
        self.is_complete() && self.persistent && self.buf.is_empty()
    }

    /// Appends `data` and returns every event it completed.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError`] on malformed input.  The parser is unusable
    /// afterwards.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<ResponseEvent>, HttpError> {
        self.buf.extend_from_slice(data);
        let mut events = Vec::new();

        loop {
            let progressed = match self.state {
                State::Head => self.parse_head(&mut events)?,
                State::Length(remaining) => {
                    let piece = self.take_body(remaining);
                    let left = remaining - piece.len() as u64;
                    if !piece.is_empty() {
                        events.push(ResponseEvent::Data(piece));
                    }
                    if left == 0 {
                        self.finish(&mut events);
                        true
                    } else {
                        self.state = State::Length(left);
                        false
                    }
                }
                State::Chunked(chunk) => self.parse_chunked(chunk, &mut events)?,
                State::UntilClose => {
                    if !self.buf.is_empty() {
                        let piece = self.buf.split().freeze();
                        events.push(ResponseEvent::Data(piece));
                    }
                    false
                }
                State::Done => false,
            };
            if !progressed {
                break;
            }
        }

        Ok(events)
    }

    /// Signals that the peer closed the stream.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::UnexpectedEof`] unless the body was
    /// close-delimited or already complete.
    pub fn finish_eof(&mut self) -> Result<Vec<ResponseEvent>, HttpError> {
        match self.state {
            State::UntilClose => {
                let mut events = Vec::new();
                if !self.buf.is_empty() {
                    events.push(ResponseEvent::Data(self.buf.split().freeze()));
                }
                self.persistent = false;
                self.finish(&mut events);
                Ok(events)
            }
            State::Done => Ok(Vec::new()),
            _ => Err(HttpError::UnexpectedEof),
        }
    }

    // ── Head ──────────────────────────────────────────────────────────────────

    fn parse_head(&mut self, events: &mut Vec<ResponseEvent>) -> Result<bool, HttpError> {
        let Some(end) = find(&self.buf, b"\r\n\r\n") else {
            if self.buf.len() > self.max_header_bytes {
                return Err(HttpError::HeadersTooLarge {
                    limit: self.max_header_bytes,
                });
            }
            return Ok(false);
        };
        if end > self.max_header_bytes {
            return Err(HttpError::HeadersTooLarge {
                limit: self.max_header_bytes,
            });
        }

        let raw = self.buf.split_to(end + 4);
        let text = std::str::from_utf8(&raw[..end])
            .map_err(|_| HttpError::MalformedStatusLine("head is not valid UTF-8".into()))?;
        let mut lines = text.split("\r\n");
        let (version, status) = parse_status_line(lines.next().unwrap_or_default())?;

        let mut headers = HeaderMap::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| HttpError::MalformedHeader(line.to_string()))?;
            let name = HeaderName::from_bytes(name.trim().as_bytes())
                .map_err(|_| HttpError::MalformedHeader(line.to_string()))?;
            let value = HeaderValue::from_str(value.trim())
                .map_err(|_| HttpError::MalformedHeader(line.to_string()))?;
            headers.append(name, value);
        }

        // Interim response: wait for the final one.
        if status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS {
            return Ok(true);
        }

        let head = ResponseHead {
            status,
            version,
            headers,
        };
        self.persistent = match version {
            Version::HTTP_10 => head.has_token(header::CONNECTION, "keep-alive"),
            _ => !head.has_token(header::CONNECTION, "close"),
        };

        let next = if self.head_request
            || status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED
        {
            State::Length(0)
        } else if head.has_token(header::TRANSFER_ENCODING, "chunked") {
            State::Chunked(Chunk::Size)
        } else if let Some(value) = head.headers.get(header::CONTENT_LENGTH) {
            let len = value
                .to_str()
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
                .ok_or_else(|| {
                    HttpError::InvalidContentLength(String::from_utf8_lossy(value.as_bytes()).into())
                })?;
            State::Length(len)
        } else {
            self.persistent = false;
            State::UntilClose
        };

        events.push(ResponseEvent::Head(head));
        self.state = next;
        Ok(true)
    }

    // ── Body ──────────────────────────────────────────────────────────────────

    fn take_body(&mut self, remaining: u64) -> Bytes {
        let n = usize::try_from(remaining)
            .unwrap_or(usize::MAX)
            .min(self.buf.len());
        self.buf.split_to(n).freeze()
    }

    fn parse_chunked(
        &mut self,
        chunk: Chunk,
        events: &mut Vec<ResponseEvent>,
    ) -> Result<bool, HttpError> {
        match chunk {
            Chunk::Size => {
                let Some(eol) = find(&self.buf, b"\r\n") else {
                    if self.buf.len() > MAX_CHUNK_LINE {
                        return Err(HttpError::InvalidChunkSize("line too long".into()));
                    }
                    return Ok(false);
                };
                let line = self.buf.split_to(eol + 2);
                let text = String::from_utf8_lossy(&line[..eol]);
                let digits = text.split(';').next().unwrap_or_default().trim();
                let size = u64::from_str_radix(digits, 16)
                    .map_err(|_| HttpError::InvalidChunkSize(text.to_string()))?;
                self.state = if size == 0 {
                    State::Chunked(Chunk::Trailers)
                } else {
                    State::Chunked(Chunk::Data(size))
                };
                Ok(true)
            }
            Chunk::Data(remaining) => {
                let piece = self.take_body(remaining);
                let left = remaining - piece.len() as u64;
                let progressed = !piece.is_empty();
                if progressed {
                    events.push(ResponseEvent::Data(piece));
                }
                self.state = if left == 0 {
                    State::Chunked(Chunk::DataEnd)
                } else {
                    State::Chunked(Chunk::Data(left))
                };
                Ok(left == 0 || (progressed && !self.buf.is_empty()))
            }
            Chunk::DataEnd => {
                if self.buf.len() < 2 {
                    return Ok(false);
                }
                if &self.buf[..2] != b"\r\n" {
                    return Err(HttpError::InvalidChunkSize(
                        "chunk data not followed by CRLF".into(),
                    ));
                }
                self.buf.advance(2);
                self.state = State::Chunked(Chunk::Size);
                Ok(true)
            }
            Chunk::Trailers => {
                let Some(eol) = find(&self.buf, b"\r\n") else {
                    if self.buf.len() > self.max_header_bytes {
                        return Err(HttpError::HeadersTooLarge {
                            limit: self.max_header_bytes,
                        });
                    }
                    return Ok(false);
                };
                self.buf.advance(eol + 2);
                if eol == 0 {
                    self.finish(events);
                }
                Ok(true)
            }
        }
    }

    fn finish(&mut self, events: &mut Vec<ResponseEvent>) {
        events.push(ResponseEvent::End);
        self.state = State::Done;
    }
}

fn parse_status_line(line: &str) -> Result<(Version, StatusCode), HttpError> {
    let mut parts = line.splitn(3, ' ');
    let version = match parts.next() {
        Some("HTTP/1.1") => Version::HTTP_11,
        Some("HTTP/1.0") => Version::HTTP_10,
        _ => return Err(HttpError::MalformedStatusLine(line.to_string())),
    };
    let status = parts
        .next()
        .and_then(|code| StatusCode::from_bytes(code.as_bytes()).ok())
        .ok_or_else(|| HttpError::MalformedStatusLine(line.to_string()))?;
    Ok((version, status))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
