//! CORS filter.

use std::sync::Arc;

use crate::context::RequestContext;
use crate::http::{Method, StatusCode};
use crate::router::{Flow, Handler};

/// Cross-Origin Resource Sharing policy, registered with [`Router::cors`].
///
/// - Requests without an `Origin`, or with an origin outside the allow-list,
///   pass through unchanged.
/// - `OPTIONS` preflights are answered with `204 No Content` and the
///   `Access-Control-*` headers; the rest of the chain is skipped.
/// - Other requests get the `Access-Control-*` headers and continue.
/// - A specific (non-wildcard) origin also adds `Vary: Origin`.
///
/// ```
/// use frontline::filters::Cors;
///
/// let cors = Cors::new()
///     .allow_origin("https://example.com")
///     .allow_method("PATCH")
///     .allow_header("X-Request-ID")
///     .max_age(600);
/// ```
///
/// [`Router::cors`]: crate::router::Router::cors
#[derive(Debug, Clone)]
pub struct Cors {
    allowed_origins: Vec<String>,
    allowed_methods: Vec<String>,
    allowed_headers: Vec<String>,
    max_age: u32,
}

impl Default for Cors {
    fn default() -> Self {
        Self::new()
    }
}

impl Cors {
    /// Permissive defaults: every origin, `GET`/`POST`/`PUT`/`DELETE`,
    /// `Content-Type` and `Authorization`, one hour of preflight caching.
    pub fn new() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: vec![
                "GET".to_string(),
                "POST".to_string(),
                "PUT".to_string(),
                "DELETE".to_string(),
            ],
            allowed_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
            max_age: 3600,
        }
    }

    /// Only the given origins; replaces the `*` default.
    #[must_use]
    pub fn only_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origins.push(origin.into());
        self
    }

    #[must_use]
    pub fn allow_method(mut self, method: impl Into<String>) -> Self {
        self.allowed_methods.push(method.into());
        self
    }

    #[must_use]
    pub fn allow_header(mut self, header: impl Into<String>) -> Self {
        self.allowed_headers.push(header.into());
        self
    }

    /// `Access-Control-Max-Age` of preflight answers, in seconds.
    #[must_use]
    pub fn max_age(mut self, seconds: u32) -> Self {
        self.max_age = seconds;
        self
    }

    fn allowed_origin(&self, origin: &str) -> Option<String> {
        if self.allowed_origins.iter().any(|o| o == "*") {
            Some("*".to_owned())
        } else if self.allowed_origins.iter().any(|o| o == origin) {
            Some(origin.to_owned())
        } else {
            None
        }
    }

    pub(crate) fn into_filter<C: RequestContext>(self) -> Handler<C> {
        let methods = self.allowed_methods.join(", ");
        let headers = self.allowed_headers.join(", ");

        Arc::new(move |ctx: &mut C| {
            let Some(origin) = ctx.request().header("origin").map(str::to_owned) else {
                return Ok(Flow::Continue);
            };
            let Some(allow_origin) = self.allowed_origin(&origin) else {
                return Ok(Flow::Continue);
            };
            let is_preflight = ctx.request().method() == &Method::Options;
            let is_wildcard = allow_origin == "*";

            let response = ctx.response_mut();
            response.set_header("Access-Control-Allow-Origin", allow_origin);
            response.set_header("Access-Control-Allow-Methods", methods.as_str());
            response.set_header("Access-Control-Allow-Headers", headers.as_str());
            if !is_wildcard {
                response.add_header("Vary", "Origin");
            }

            if is_preflight {
                response.set_header("Access-Control-Max-Age", self.max_age.to_string());
                response.set_status(StatusCode::NoContent);
                return Ok(Flow::SkipRemaining);
            }
            Ok(Flow::Continue)
        })
    }
}
