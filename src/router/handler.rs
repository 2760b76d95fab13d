//! Handlers and the outcomes they report to the dispatch engine.
//!
//! A handler is a synchronous function over the request context. It returns a
//! [`Flow`] telling the engine how to continue, or a [`HandlerError`] that sends
//! the exchange through exception handling.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use crate::http::StatusCode;

/// Type-erased handler stored in the route table.
///
/// Handlers are kept behind an `Arc` so routing results can be cloned cheaply
/// and shared between concurrent exchanges.
pub type Handler<C> = Arc<dyn Fn(&mut C) -> HandlerResult + Send + Sync + 'static>;

/// What a handler returns.
pub type HandlerResult = Result<Flow, HandlerError>;

/// How the engine continues after a handler returns successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Run the next handler of the chain.
    Continue,
    /// Re-route the exchange to another URL on the server side.
    Forward(Forward),
    /// Answer with a redirection and stop the chain.
    Redirect(Redirect),
    /// Stop the chain; the response is finalized as it is.
    SkipRemaining,
    /// Switch to not-found routing.
    NotFound(NotFound),
}

impl Flow {
    /// Forwards to `url`, resetting the response first.
    pub fn forward(url: impl Into<String>) -> Self {
        Flow::Forward(Forward::to(url))
    }

    /// Temporary (302) redirect to `url`.
    pub fn redirect(url: impl Into<String>) -> Self {
        Flow::Redirect(Redirect::to(url))
    }

    /// Not-found with the default message, resetting the response first.
    pub fn not_found() -> Self {
        Flow::NotFound(NotFound::new())
    }
}

/// A server-side forward request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forward {
    pub(crate) url: String,
    pub(crate) reset_response: bool,
    pub(crate) message: Option<String>,
}

impl Forward {
    /// Forward to `url`: absolute (`https://host/path`) or relative to the
    /// current scheme, host and port (`/path?query`).
    pub fn to(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reset_response: true,
            message: None,
        }
    }

    /// Keep what was buffered so far instead of resetting the response.
    #[must_use]
    pub fn keep_response(mut self) -> Self {
        self.reset_response = false;
        self
    }

    /// A message made available to the handlers of the new route.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn resets_response(&self) -> bool {
        self.reset_response
    }
}

/// Kind of a flash message carried by a redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashKind {
    Success,
    Warning,
    Error,
}

impl FlashKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// A message shown once on the page a redirect leads to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashMessage {
    pub kind: FlashKind,
    pub text: String,
}

/// A client redirection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub(crate) url: String,
    pub(crate) status: StatusCode,
    pub(crate) flash: Option<FlashMessage>,
}

impl Redirect {
    /// Temporary (302) redirect to `url`.
    pub fn to(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: StatusCode::Found,
            flash: None,
        }
    }

    /// Use 301.
    #[must_use]
    pub fn permanently(mut self) -> Self {
        self.status = StatusCode::MovedPermanently;
        self
    }

    /// Use another 3xx status. Non-redirection codes are ignored.
    #[must_use]
    pub fn status(mut self, status: StatusCode) -> Self {
        if status.is_redirection() {
            self.status = status;
        }
        self
    }

    /// Attach a flash message to the redirect.
    #[must_use]
    pub fn flash(mut self, kind: FlashKind, text: impl Into<String>) -> Self {
        self.flash = Some(FlashMessage {
            kind,
            text: text.into(),
        });
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn flash_message(&self) -> Option<&FlashMessage> {
        self.flash.as_ref()
    }
}

/// A request to switch to not-found routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotFound {
    pub(crate) message: Option<String>,
    pub(crate) reset_response: bool,
}

impl Default for NotFound {
    fn default() -> Self {
        Self::new()
    }
}

impl NotFound {
    pub fn new() -> Self {
        Self {
            message: None,
            reset_response: true,
        }
    }

    /// A public message the not-found handler shows instead of the default one.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Keep what was buffered so far.
    #[must_use]
    pub fn keep_response(mut self) -> Self {
        self.reset_response = false;
        self
    }
}

enum Visibility {
    /// The message is safe to show to the client.
    Public(String),
    /// Internal failure; only a generic message reaches the client.
    Private(Box<dyn StdError + Send + Sync>),
}

/// The error type handlers return.
///
/// `HandlerError` does not implement [`std::error::Error`] itself, which lets
/// any error type convert into it with `?`:
///
/// ```
/// use frontline::router::{Flow, HandlerError, HandlerResult};
///
/// fn parse_id(raw: &str) -> HandlerResult {
///     let _id: u32 = raw.parse()?; // ParseIntError becomes a private error
///     Ok(Flow::Continue)
/// }
///
/// let err = parse_id("abc").unwrap_err();
/// assert!(!err.is_public());
/// ```
pub struct HandlerError {
    visibility: Visibility,
    status: Option<StatusCode>,
    reset_response: bool,
}

impl HandlerError {
    /// An error whose message is shown to the client with `status`.
    pub fn public(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            visibility: Visibility::Public(message.into()),
            status: Some(status),
            reset_response: true,
        }
    }

    /// An internal error. The client sees a generic message and a 500.
    pub fn private(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            visibility: Visibility::Private(source.into()),
            status: None,
            reset_response: true,
        }
    }

    /// Shorthand for a private error built from text.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::private(message.into())
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_owned()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        Self::msg(format!("handler panicked: {detail}"))
    }

    /// Declare the status the response should carry.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Do not reset the response before exception handling.
    #[must_use]
    pub fn without_reset(mut self) -> Self {
        self.reset_response = false;
        self
    }

    pub fn is_public(&self) -> bool {
        matches!(self.visibility, Visibility::Public(_))
    }

    /// The declared status, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn resets_response(&self) -> bool {
        self.reset_response
    }

    /// The public message, or the display of the private source.
    pub fn message(&self) -> String {
        match &self.visibility {
            Visibility::Public(message) => message.clone(),
            Visibility::Private(source) => source.to_string(),
        }
    }

    /// The private source error, if any.
    pub fn source(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match &self.visibility {
            Visibility::Public(_) => None,
            Visibility::Private(source) => Some(source.as_ref()),
        }
    }

    /// The message followed by every `caused by` in the source chain.
    pub fn details(&self) -> String {
        let mut out = self.message();
        let mut next = self.source().and_then(|source| source.source());
        while let Some(cause) = next {
            out.push_str("\ncaused by: ");
            out.push_str(&cause.to_string());
            next = cause.source();
        }
        out
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerError")
            .field("public", &self.is_public())
            .field("status", &self.status)
            .field("message", &self.message())
            .field("reset_response", &self.reset_response)
            .finish()
    }
}

impl<E> From<E> for HandlerError
where
    E: StdError + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self::private(err)
    }
}
