//! The transport-facing contract of the dispatch engine.
//!
//! An [`Exchange`] is one inbound request/response pair as seen by the engine.
//! Any transport that can expose the request data and the handful of response
//! primitives below can drive [`Engine`](crate::dispatch::Engine).
//!
//! [`BufferedExchange`] is the in-memory implementation used by the tokio
//! transport and by tests: it records everything written so the transport can
//! serialize it once dispatch returns.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use super::{Headers, Method, Request, Response, StatusCode};

/// Errors raised by the response primitives of an [`Exchange`].
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("the response is already closed")]
    Closed,

    #[error("I/O error while writing the response: {0}")]
    Io(#[from] std::io::Error),
}

/// One inbound HTTP exchange, shared between the transport and the engine.
///
/// Methods take `&self`: implementations own their synchronization, so the
/// engine can keep an `Arc<dyn Exchange>` for last-resort handling while the
/// request context holds another.
///
/// # Contract
///
/// - The status and headers are frozen by the first [`write_bytes`](Self::write_bytes)
///   ("headers sent"); later calls to [`set_status`](Self::set_status) and
///   [`set_header`](Self::set_header) are ignored.
/// - [`end`](Self::end) closes the response. Writing after that fails with
///   [`ExchangeError::Closed`].
pub trait Exchange: Send + Sync {
    /// The request method.
    fn method(&self) -> Method;

    /// The full request URL, e.g. `http://localhost:8080/users/42?x=1`.
    fn full_url(&self) -> String;

    /// The request headers.
    fn request_headers(&self) -> Headers;

    /// The request body.
    fn request_body(&self) -> Bytes;

    /// Sets the response status.
    fn set_status(&self, status: StatusCode);

    /// Replaces all values of a response header.
    fn set_header(&self, name: &str, values: &[String]);

    /// Sends the status and headers if not already done, then writes `bytes`.
    fn write_bytes(&self, bytes: &[u8]) -> Result<(), ExchangeError>;

    /// Terminates the response.
    fn end(&self);

    /// `true` once the status line and headers are committed.
    fn is_headers_sent(&self) -> bool;

    /// `true` once [`end`](Self::end) was called.
    fn is_closed(&self) -> bool;
}

#[derive(Debug)]
struct ResponseState {
    status: StatusCode,
    headers: Headers,
    body: BytesMut,
    headers_sent: bool,
    closed: bool,
    end_calls: usize,
}

/// An [`Exchange`] that buffers the whole response in memory.
///
/// # Examples
///
/// ```
/// use frontline::http::{BufferedExchange, Exchange, Method, StatusCode};
///
/// let exchange = BufferedExchange::new(Method::Get, "http://localhost/hello");
/// exchange.set_status(StatusCode::Created);
/// exchange.write_bytes(b"hi").unwrap();
/// exchange.end();
///
/// assert_eq!(exchange.status(), StatusCode::Created);
/// assert_eq!(exchange.body_string(), "hi");
/// assert!(exchange.is_closed());
/// ```
#[derive(Debug)]
pub struct BufferedExchange {
    method: Method,
    full_url: String,
    headers: Headers,
    body: Bytes,
    state: Mutex<ResponseState>,
}

impl BufferedExchange {
    /// Creates an exchange for `method` on `full_url` with no headers and no body.
    pub fn new(method: Method, full_url: impl Into<String>) -> Self {
        Self {
            method,
            full_url: full_url.into(),
            headers: Headers::new(),
            body: Bytes::new(),
            state: Mutex::new(ResponseState {
                status: StatusCode::Ok,
                headers: Headers::new(),
                body: BytesMut::new(),
                headers_sent: false,
                closed: false,
                end_calls: 0,
            }),
        }
    }

    /// Builds an exchange from a parsed wire request.
    ///
    /// The full URL is rebuilt from `scheme`, the `Host` header (or
    /// `fallback_authority` when absent) and the request target.
    pub fn from_request(request: &Request, scheme: &str, fallback_authority: &str) -> Self {
        let authority = request.headers().get("host").unwrap_or(fallback_authority);
        let full_url = format!("{scheme}://{authority}{}", request.target());

        let mut exchange = Self::new(request.method().clone(), full_url);
        exchange.headers = request.headers().clone();
        exchange.body = request.body().clone();
        exchange
    }

    /// Adds a request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// The response status written so far.
    pub fn status(&self) -> StatusCode {
        self.state.lock().status
    }

    /// The first value of a response header.
    pub fn response_header(&self, name: &str) -> Option<String> {
        self.state.lock().headers.get(name).map(str::to_owned)
    }

    /// All response headers.
    pub fn response_headers(&self) -> Headers {
        self.state.lock().headers.clone()
    }

    /// The response body written so far.
    pub fn body(&self) -> Bytes {
        self.state.lock().body.clone().freeze()
    }

    /// The response body as (lossy) UTF-8.
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.state.lock().body).into_owned()
    }

    /// How many times [`Exchange::end`] was called, including no-op calls on a
    /// closed response.
    pub fn end_calls(&self) -> usize {
        self.state.lock().end_calls
    }

    /// Converts what was written into a wire [`Response`]. A `HEAD` keeps the
    /// headers of the body it does not send.
    pub fn to_response(&self, keep_alive: bool, include_body: bool) -> Response {
        let state = self.state.lock();
        let response = Response::new(state.status)
            .with_headers(&state.headers)
            .with_body(Bytes::copy_from_slice(&state.body))
            .keep_alive(keep_alive);
        if include_body {
            response
        } else {
            response.head_only()
        }
    }
}

impl Exchange for BufferedExchange {
    fn method(&self) -> Method {
        self.method.clone()
    }

    fn full_url(&self) -> String {
        self.full_url.clone()
    }

    fn request_headers(&self) -> Headers {
        self.headers.clone()
    }

    fn request_body(&self) -> Bytes {
        self.body.clone()
    }

    fn set_status(&self, status: StatusCode) {
        let mut state = self.state.lock();
        if state.headers_sent {
            debug!(status = status.as_u16(), "headers already sent, status ignored");
            return;
        }
        state.status = status;
    }

    fn set_header(&self, name: &str, values: &[String]) {
        let mut state = self.state.lock();
        if state.headers_sent {
            debug!(header = name, "headers already sent, header ignored");
            return;
        }
        state.headers.remove(name);
        for value in values {
            state.headers.insert(name, value.as_str());
        }
    }

    fn write_bytes(&self, bytes: &[u8]) -> Result<(), ExchangeError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ExchangeError::Closed);
        }
        state.headers_sent = true;
        state.body.extend_from_slice(bytes);
        Ok(())
    }

    fn end(&self) {
        let mut state = self.state.lock();
        state.end_calls += 1;
        state.headers_sent = true;
        state.closed = true;
    }

    fn is_headers_sent(&self) -> bool {
        self.state.lock().headers_sent
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_frozen_after_first_write() {
        let ex = BufferedExchange::new(Method::Get, "http://localhost/");
        ex.set_status(StatusCode::Accepted);
        ex.set_header("X-One", &["1".to_owned()]);
        ex.write_bytes(b"abc").unwrap();
        ex.set_status(StatusCode::NotFound);
        ex.set_header("X-Two", &["2".to_owned()]);

        assert!(ex.is_headers_sent());
        assert_eq!(ex.status(), StatusCode::Accepted);
        assert_eq!(ex.response_header("x-one").as_deref(), Some("1"));
        assert_eq!(ex.response_header("x-two"), None);
    }

    #[test]
    fn write_after_end_fails() {
        let ex = BufferedExchange::new(Method::Get, "http://localhost/");
        ex.end();
        assert!(matches!(ex.write_bytes(b"late"), Err(ExchangeError::Closed)));
        assert_eq!(ex.end_calls(), 1);
    }

    #[test]
    fn from_request_rebuilds_full_url() {
        let raw = b"GET /a/b?x=1 HTTP/1.1\r\nHost: example.com:8080\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        let ex = BufferedExchange::from_request(&req, "http", "127.0.0.1:1");
        assert_eq!(ex.full_url(), "http://example.com:8080/a/b?x=1");
    }

    #[test]
    fn to_response_reframes_the_written_body() {
        let ex = BufferedExchange::new(Method::Get, "http://localhost/");
        ex.set_header("Content-Length", &["2".to_owned()]);
        ex.write_bytes(b"ok").unwrap();
        let bytes = ex.to_response(true, true).into_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(text.matches("Content-Length").count(), 1);
        assert!(text.ends_with("\r\n\r\nok"));

        let head = ex.to_response(true, false).into_bytes();
        let text = String::from_utf8(head.to_vec()).unwrap();
        assert!(text.ends_with("Content-Length: 2\r\n\r\n"));
    }
}
