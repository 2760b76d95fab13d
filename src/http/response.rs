//! Wire form of a finished exchange.
//!
//! The transport turns each [`BufferedExchange`](super::BufferedExchange) into
//! a [`Response`] once dispatch returns. It also builds a few on its own (413,
//! 400, a 500 when the dispatch task dies) without going through the engine.

use bytes::{BufMut, Bytes, BytesMut};

use super::{ContentKind, Headers, StatusCode};

/// Headers computed at serialization time, never copied from the exchange.
const FRAMING_HEADERS: [&str; 3] = ["content-length", "connection", "transfer-encoding"];

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use frontline::http::{Response, StatusCode};
///
/// let bytes = Response::plain(StatusCode::BadRequest, "Bad Request")
///     .keep_alive(false)
///     .into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
/// assert!(text.contains("Connection: close\r\n"));
/// assert!(text.ends_with("Content-Length: 11\r\n\r\nBad Request"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    keep_alive: bool,
    head_only: bool,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            keep_alive: true,
            head_only: false,
        }
    }

    /// A UTF-8 `text/plain` response.
    pub fn plain(status: StatusCode, message: impl Into<String>) -> Self {
        let mut response = Self::new(status).with_body(message.into());
        response
            .headers
            .set("Content-Type", ContentKind::Text.with_utf8_charset());
        response
    }

    /// Copies `headers`, minus the framing ones (`Content-Length`,
    /// `Connection`, `Transfer-Encoding`), which [`into_bytes`](Self::into_bytes)
    /// writes itself.
    #[must_use]
    pub fn with_headers(mut self, headers: &Headers) -> Self {
        for (name, value) in headers.iter() {
            if FRAMING_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)) {
                continue;
            }
            self.headers.insert(name, value);
        }
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Answers a `HEAD`: the headers, `Content-Length` included, describe the
    /// body, but the body itself is not written.
    #[must_use]
    pub fn head_only(mut self) -> Self {
        self.head_only = true;
        self
    }

    /// Serializes the status line, the headers and the body.
    ///
    /// `Connection` and `Content-Length` are always written last, and a
    /// non-empty body without a `Content-Type` is sent as `application/octet-stream`.
    pub fn into_bytes(mut self) -> BytesMut {
        let content_length = self.body.len();
        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers.set("Content-Type", "application/octet-stream");
        }

        let written_body = if self.head_only { 0 } else { content_length };
        let mut buf = BytesMut::with_capacity(128 + self.headers.len() * 64 + written_body);

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );
        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }
        let connection = if self.keep_alive { "keep-alive" } else { "close" };
        buf.put(format!("Connection: {connection}\r\n").as_bytes());
        buf.put(format!("Content-Length: {content_length}\r\n\r\n").as_bytes());

        if !self.head_only {
            buf.put(self.body);
        }
        buf
    }
}
