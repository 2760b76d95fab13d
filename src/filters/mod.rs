//! Built-in filters.
//!
//! Filters are ordinary handlers registered at a non-zero position. This module
//! provides the ones the framework ships with:
//!
//! - [`request_logging`]: one `info` line per exchange with method, path, status and duration.
//! - [`cache_headers`]: a `Cache-Control` header for dynamic routes.
//! - [`redirect_rule`]: the handler behind [`Router::redirect`].
//! - [`Cors`]: CORS headers and preflight answers, see [`Router::cors`].

use std::sync::Arc;
use std::time::Instant;

use crate::context::RequestContext;
use crate::http::StatusCode;
use crate::router::{Flow, Handler, PathParams, Redirect, RouteError, Router};
use crate::statics::CacheConfig;

pub mod cors;

pub use cors::Cors;

/// Position of the timing filter of [`request_logging`].
pub const REQUEST_LOG_BEFORE_POSITION: i32 = -10_000;
/// Position of the logging filter of [`request_logging`].
pub const REQUEST_LOG_AFTER_POSITION: i32 = 10_000;

/// Start time of the exchange, stored in the context extensions.
#[derive(Debug, Clone, Copy)]
pub struct RequestStart(pub Instant);

/// Registers a filter pair logging method, path, status and duration of each
/// exchange whose chain runs to completion.
pub fn request_logging<C: RequestContext>(router: &Router<C>) -> Result<(), RouteError> {
    router
        .all_paths()
        .pos(REQUEST_LOG_BEFORE_POSITION)
        .all_routing_types()
        .save(|ctx: &mut C| {
            ctx.extensions_mut().insert(RequestStart(Instant::now()));
            Ok(Flow::Continue)
        })?;
    router
        .all_paths()
        .pos(REQUEST_LOG_AFTER_POSITION)
        .all_routing_types()
        .save(|ctx: &mut C| {
            let duration = ctx.extensions().get::<RequestStart>().map(|s| s.0.elapsed());
            tracing::info!(
                method = %ctx.request().method(),
                path = ctx.request().path(),
                status = ctx.response().status().as_u16(),
                ?duration,
                "request handled"
            );
            Ok(Flow::Continue)
        })
}

/// A filter setting `Cache-Control` from `cache`.
pub fn cache_headers<C: RequestContext>(cache: CacheConfig) -> Handler<C> {
    let value = cache.header_value();
    Arc::new(move |ctx: &mut C| {
        ctx.response_mut().set_header("Cache-Control", value.clone());
        Ok(Flow::Continue)
    })
}

/// The handler of a redirect rule: redirects to `destination` with its
/// placeholders replaced by the parameters the old path captured.
pub fn redirect_rule<C: RequestContext>(destination: String, status: StatusCode) -> Handler<C> {
    Arc::new(move |ctx: &mut C| {
        let url = fill_placeholders(&destination, ctx.request().path_params());
        Ok(Flow::Redirect(Redirect::to(url).status(status)))
    })
}

/// Replaces `${name}` and `*{name}` with the value of `name` in `params`.
///
/// ```
/// use frontline::filters::fill_placeholders;
/// use frontline::router::PathParams;
///
/// let mut params = PathParams::new();
/// params.insert("id", "42");
/// params.insert("rest", "a/b");
/// assert_eq!(fill_placeholders("/new/${id}/*{rest}", &params), "/new/42/a/b");
/// ```
pub fn fill_placeholders(template: &str, params: &PathParams) -> String {
    let mut out = template.to_owned();
    for (name, value) in params.iter() {
        out = out
            .replace(&format!("${{{name}}}"), value)
            .replace(&format!("*{{{name}}}"), value);
    }
    out
}
