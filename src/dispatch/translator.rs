//! Error bodies.
//!
//! Renders a message in the format the client prefers: `{"error": ...}` for
//! JSON, `<response><error>...</error></response>` for XML, `<pre>...</pre>` for
//! HTML and the raw message otherwise. Every body is UTF-8.

use bytes::Bytes;

use crate::context::ResponseWriter;
use crate::http::{ContentKind, Exchange, ExchangeError, StatusCode};

/// Message of the last-resort response. Never localized, never detailed.
pub const LAST_RESORT_MESSAGE: &str = "An error occurred.";

/// The error body for `message` in `kind`.
///
/// ```
/// use frontline::dispatch::translator::error_body;
/// use frontline::http::ContentKind;
///
/// assert_eq!(&error_body(ContentKind::Json, "nope")[..], br#"{"error":"nope"}"#);
/// assert_eq!(&error_body(ContentKind::Html, "a<b")[..], b"<pre>a&lt;b</pre>");
/// ```
pub fn error_body(kind: ContentKind, message: &str) -> Bytes {
    match kind {
        ContentKind::Json => {
            let body = serde_json::json!({ "error": message });
            Bytes::from(body.to_string())
        }
        ContentKind::Xml => Bytes::from(format!(
            "<response><error>{}</error></response>",
            escape_markup(message)
        )),
        ContentKind::Html => Bytes::from(format!("<pre>{}</pre>", escape_markup(message))),
        ContentKind::Text => Bytes::copy_from_slice(message.as_bytes()),
    }
}

/// Buffers an error body with its status and content type, without sending
/// it. `Content-Length` is left to the final flush.
pub fn write_error(
    response: &mut ResponseWriter,
    kind: ContentKind,
    status: StatusCode,
    message: &str,
) {
    let body = error_body(kind, message);
    response.set_status(status);
    response.send_bytes(&body, Some(&kind.with_utf8_charset()));
}

/// Writes an error body and ends the response.
///
/// Does nothing when the response is already closed, so a response is never
/// rendered twice.
pub fn render_error(
    response: &mut ResponseWriter,
    kind: ContentKind,
    status: StatusCode,
    message: &str,
) -> Result<(), ExchangeError> {
    if response.is_closed() {
        return Ok(());
    }
    write_error(response, kind, status, message);
    response.flush(true)
}

/// Ends `exchange` with a bare 500, bypassing the context entirely.
pub fn write_last_resort(exchange: &dyn Exchange) {
    if exchange.is_closed() {
        return;
    }
    if !exchange.is_headers_sent() {
        exchange.set_status(StatusCode::InternalServerError);
        exchange.set_header("Content-Type", &[ContentKind::Text.with_utf8_charset()]);
        exchange.set_header("Content-Length", &[LAST_RESORT_MESSAGE.len().to_string()]);
        if let Err(e) = exchange.write_bytes(LAST_RESORT_MESSAGE.as_bytes()) {
            tracing::error!(error = %e, "failed to write the last-resort response");
        }
    }
    exchange.end();
}

fn escape_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
