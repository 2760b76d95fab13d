//! The response facet of a context.
//!
//! Output is buffered until [`ResponseWriter::flush`] or [`ResponseWriter::end`]
//! commits it to the exchange. Until then the status, the headers and the body
//! can all be reset.

use std::sync::Arc;

use bytes::BytesMut;
use serde::Serialize;
use tracing::{debug, warn};

use crate::http::{ContentKind, Exchange, ExchangeError, Headers, StatusCode};

/// Buffered response of one exchange.
pub struct ResponseWriter {
    exchange: Arc<dyn Exchange>,
    status: StatusCode,
    headers: Headers,
    buffer: BytesMut,
    cookies: Vec<String>,
}

impl ResponseWriter {
    pub(crate) fn new(exchange: Arc<dyn Exchange>) -> Self {
        Self {
            exchange,
            status: StatusCode::Ok,
            headers: Headers::new(),
            buffer: BytesMut::new(),
            cookies: Vec::new(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        if self.is_headers_sent() {
            debug!(status = status.as_u16(), "headers already sent, status not changed");
        }
        self.status = status;
    }

    /// Replaces every value of `name`.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// Appends a value to `name`.
    pub fn add_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    pub fn remove_header(&mut self, name: &str) -> bool {
        self.headers.remove(name)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Stages a `Set-Cookie` header.
    pub fn set_cookie(&mut self, name: &str, value: &str) {
        self.cookies.push(format!("{name}={value}; Path=/"));
    }

    /// The staged `Set-Cookie` values.
    pub fn cookies(&self) -> &[String] {
        &self.cookies
    }

    /// Bytes buffered and not yet flushed.
    pub fn buffered_body(&self) -> &[u8] {
        &self.buffer
    }

    /// Appends raw bytes, setting `Content-Type` when given.
    pub fn send_bytes(&mut self, bytes: &[u8], content_type: Option<&str>) {
        if let Some(content_type) = content_type {
            self.set_header("Content-Type", content_type);
        }
        self.buffer.extend_from_slice(bytes);
    }

    pub fn send_plain_text(&mut self, text: impl AsRef<str>) {
        let content_type = ContentKind::Text.with_utf8_charset();
        self.send_bytes(text.as_ref().as_bytes(), Some(&content_type));
    }

    pub fn send_html(&mut self, html: impl AsRef<str>) {
        let content_type = ContentKind::Html.with_utf8_charset();
        self.send_bytes(html.as_ref().as_bytes(), Some(&content_type));
    }

    pub fn send_json<T: Serialize>(&mut self, value: &T) -> Result<(), serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        let content_type = ContentKind::Json.with_utf8_charset();
        self.send_bytes(&body, Some(&content_type));
        Ok(())
    }

    /// Sets the status and the `Location` header. Nothing is sent yet.
    pub fn redirect(&mut self, location: &str, status: StatusCode) {
        self.set_status(status);
        self.set_header("Location", location);
    }

    /// Commits the status, the headers and the buffered bytes to the exchange,
    /// then closes it when `end` is set.
    ///
    /// Ending before anything was sent means the buffer is the whole body, so
    /// `Content-Length` is set from it. Writing to a closed exchange is
    /// skipped, not reported.
    pub fn flush(&mut self, end: bool) -> Result<(), ExchangeError> {
        if self.exchange.is_closed() {
            if !self.buffer.is_empty() {
                debug!(bytes = self.buffer.len(), "response already closed, output dropped");
            }
            self.buffer.clear();
            return Ok(());
        }

        if !self.exchange.is_headers_sent() {
            if end {
                self.headers.set("Content-Length", self.buffer.len().to_string());
            }
            self.commit_headers();
        }

        let pending = self.buffer.split();
        if !pending.is_empty() || !self.exchange.is_headers_sent() {
            self.exchange.write_bytes(&pending)?;
        }

        if end {
            self.exchange.end();
        }
        Ok(())
    }

    /// Flushes and closes the response. A no-op when it is already closed.
    pub fn end(&mut self) {
        if self.exchange.is_closed() {
            return;
        }
        if let Err(e) = self.flush(true) {
            warn!(error = %e, "failed to flush the response");
            if !self.exchange.is_closed() {
                self.exchange.end();
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.exchange.is_closed()
    }

    pub fn is_headers_sent(&self) -> bool {
        self.exchange.is_headers_sent()
    }

    /// Drops buffered output, headers and status, and the staged cookies when
    /// `reset_cookies` is set. Once headers are sent only the buffer can go;
    /// the rest is logged and kept.
    pub fn reset_everything(&mut self, reset_cookies: bool) {
        self.buffer.clear();
        if self.is_headers_sent() {
            warn!("response headers already sent, only the buffer was reset");
            return;
        }
        self.status = StatusCode::Ok;
        self.headers.clear();
        if reset_cookies {
            self.cookies.clear();
        }
    }

    fn commit_headers(&self) {
        self.exchange.set_status(self.status);

        let mut names: Vec<&str> = Vec::new();
        for (name, _) in self.headers.iter() {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                names.push(name);
            }
        }
        for name in names {
            let mut values: Vec<String> = self.headers.get_all(name).map(str::to_owned).collect();
            if name.eq_ignore_ascii_case("set-cookie") {
                values.extend(self.cookies.iter().cloned());
            }
            self.exchange.set_header(name, &values);
        }
        if !self.cookies.is_empty() && !self.headers.contains("set-cookie") {
            self.exchange.set_header("Set-Cookie", &self.cookies);
        }
    }
}
