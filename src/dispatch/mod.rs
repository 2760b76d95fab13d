//! The front controller.
//!
//! [`Engine::handle`] drives one exchange through routing, the handler chain
//! and, when needed, not-found routing and exception handling:
//!
//! ```text
//! ROUTING ──► HANDLING ──► done
//!    ▲           │ Forward          re-route to another URL (bounded)
//!    └───────────┤ NotFound         not-found routing
//!                │ Redirect         headers written, chain stops
//!                │ SkipRemaining    chain stops
//!                └ Err              exception routing ─► default handler ─► last resort
//! ```
//!
//! Whatever happens, the response is ended exactly once and the request
//! variables are cleared before `handle` returns.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, debug_span, error, warn};
use url::Url;

use crate::context::{ContextError, ContextFactory, RequestContext, Variable, VariableKey};
use crate::dictionary::{DefaultDictionary, Dictionary, MessageKey};
use crate::http::{Exchange, StatusCode};
use crate::router::{
    FlashMessage, Flow, Forward, Handler, HandlerError, HandlerResult, NotFound, Redirect,
    RouteError, Router, RoutingResult, RoutingType,
};

pub mod translator;

/// Errors that escape [`Engine::handle`]. They point at a broken route table
/// or transport, not at a single bad request; the client still gets a 500.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to create the request context: {0}")]
    Context(#[from] ContextError),

    #[error("no not-found route matched, even after registering the default one")]
    NotFoundRouteMissing,

    #[error("failed to register the default not-found route: {0}")]
    DefaultNotFoundRoute(#[from] RouteError),

    #[error("more than {max} forwards for one exchange (last target `{url}`)")]
    ForwardLimitExceeded { max: u32, url: String },

    #[error("exception handling failed: {0}")]
    LastResort(String),
}

/// Why a chain stopped early.
enum Failure {
    Handler(HandlerError),
    Fatal(DispatchError),
}

impl From<HandlerError> for Failure {
    fn from(err: HandlerError) -> Self {
        Failure::Handler(err)
    }
}

impl From<DispatchError> for Failure {
    fn from(err: DispatchError) -> Self {
        Failure::Fatal(err)
    }
}

/// What the state machine does next.
enum Step<C> {
    Run(RoutingResult<C>),
    Forward(Forward),
    NotFound(NotFound),
    Done,
}

/// Dispatches exchanges to the routes of a [`Router`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use frontline::config::EngineConfig;
/// use frontline::context::{DefaultContext, DefaultContextFactory, RequestContext};
/// use frontline::dispatch::Engine;
/// use frontline::http::{BufferedExchange, Method, StatusCode};
/// use frontline::router::{Flow, Router};
///
/// let router = Arc::new(Router::new(Arc::new(EngineConfig::default())));
/// router.get("/hello").save(|ctx: &mut DefaultContext| {
///     ctx.response_mut().send_plain_text("hi");
///     Ok(Flow::Continue)
/// })?;
///
/// let engine = Engine::new(router, DefaultContextFactory);
/// let exchange = Arc::new(BufferedExchange::new(Method::Get, "http://localhost/hello"));
/// engine.handle(exchange.clone())?;
///
/// assert_eq!(exchange.status(), StatusCode::Ok);
/// assert_eq!(exchange.body_string(), "hi");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Engine<F: ContextFactory> {
    router: Arc<Router<F::Context>>,
    factory: F,
    dictionary: Arc<dyn Dictionary>,
    default_not_found_registered: Mutex<bool>,
}

impl<F: ContextFactory> Engine<F> {
    pub fn new(router: Arc<Router<F::Context>>, factory: F) -> Self {
        Self {
            router,
            factory,
            dictionary: Arc::new(DefaultDictionary::new()),
            default_not_found_registered: Mutex::new(false),
        }
    }

    /// Uses `dictionary` for the messages shown to clients.
    #[must_use]
    pub fn with_dictionary(mut self, dictionary: Arc<dyn Dictionary>) -> Self {
        self.dictionary = dictionary;
        self
    }

    pub fn router(&self) -> &Arc<Router<F::Context>> {
        &self.router
    }

    /// Handles one exchange. The response is always ended when this returns.
    pub fn handle(&self, exchange: Arc<dyn Exchange>) -> Result<(), DispatchError> {
        let span = debug_span!(
            "dispatch",
            method = %exchange.method(),
            url = %exchange.full_url()
        );
        let _entered = span.enter();

        let mut ctx = match self.factory.create(Arc::clone(&exchange)) {
            Ok(ctx) => ctx,
            Err(e) => {
                error!(error = %e, "failed to create the request context");
                translator::write_last_resort(exchange.as_ref());
                return Err(e.into());
            }
        };

        let outcome = match self.dispatch(&mut ctx) {
            Ok(()) => Ok(()),
            Err(Failure::Handler(err)) => self.handle_exception(&mut ctx, exchange.as_ref(), err),
            Err(Failure::Fatal(err)) => {
                error!(error = %err, "dispatch failed");
                let generic = HandlerError::msg(err.to_string());
                match self.default_exception(&mut ctx, exchange.as_ref(), &generic) {
                    Ok(()) => Err(err),
                    Err(last_resort) => {
                        error!(error = %last_resort, "could not render the dispatch failure");
                        Err(err)
                    }
                }
            }
        };

        ctx.variables_mut().clear();
        if !exchange.is_closed() {
            ctx.response_mut().end();
        }
        outcome
    }

    fn dispatch(&self, ctx: &mut F::Context) -> Result<(), Failure> {
        let start = match self.router.route(ctx.request(), RoutingType::Normal) {
            Some(routing) => Step::Run(routing),
            None => Step::NotFound(NotFound::new()),
        };
        self.drive(ctx, start)
    }

    /// Runs the state machine from `step` until a chain completes.
    fn drive(&self, ctx: &mut F::Context, mut step: Step<F::Context>) -> Result<(), Failure> {
        loop {
            step = match step {
                Step::Run(routing) => self.run_chain(ctx, routing)?,
                Step::Forward(forward) => self.forward(ctx, forward)?,
                Step::NotFound(not_found) => self.not_found(ctx, not_found)?,
                Step::Done => return Ok(()),
            };
        }
    }

    fn run_chain(
        &self,
        ctx: &mut F::Context,
        routing: RoutingResult<F::Context>,
    ) -> Result<Step<F::Context>, Failure> {
        let routing = Arc::new(routing);
        ctx.variables_mut()
            .set(VariableKey::RoutingResult, Variable::Routing(Arc::clone(&routing)));

        for step in routing.handler_matches() {
            ctx.variables_mut().set(
                VariableKey::RouteHandlerMatch,
                Variable::HandlerMatch(Arc::new(step.clone())),
            );
            ctx.request_mut().set_path_params(step.params().clone());

            match invoke(step.handler(), ctx)? {
                Flow::Continue => {}
                Flow::SkipRemaining => {
                    debug!(route = step.route_path(), "remaining handlers skipped");
                    return Ok(Step::Done);
                }
                Flow::Forward(forward) => return Ok(Step::Forward(forward)),
                Flow::Redirect(redirect) => {
                    self.redirect(ctx, redirect);
                    return Ok(Step::Done);
                }
                Flow::NotFound(not_found) => return Ok(Step::NotFound(not_found)),
            }
        }
        Ok(Step::Done)
    }

    fn forward(
        &self,
        ctx: &mut F::Context,
        forward: Forward,
    ) -> Result<Step<F::Context>, Failure> {
        let max = self.router.config().route_forwarding_max;
        let count = ctx.variables().forwarded_count() + 1;
        if count > max {
            error!(max, url = %forward.url, "forward limit exceeded");
            return Err(DispatchError::ForwardLimitExceeded {
                max,
                url: forward.url,
            }
            .into());
        }

        let target =
            resolve_forward_url(ctx.request().url(), &forward.url).map_err(HandlerError::from)?;
        if forward.reset_response {
            ctx.response_mut().reset_everything(true);
        }

        let variables = ctx.variables_mut();
        variables.set(VariableKey::ForwardedCount, Variable::Count(count));
        variables.set(VariableKey::ForwardUrl, Variable::Text(target.to_string()));
        match forward.message {
            Some(message) => variables.set(VariableKey::ForwardMessage, Variable::Text(message)),
            None => {
                variables.remove(VariableKey::ForwardMessage);
            }
        }
        variables.remove(VariableKey::IsNotFoundRoute);

        debug!(url = %target, count, "forwarding");
        ctx.request_mut().forward_to(target);

        Ok(match self.router.route(ctx.request(), RoutingType::Normal) {
            Some(routing) => Step::Run(routing),
            None => Step::NotFound(NotFound::new().keep_response()),
        })
    }

    fn redirect(&self, ctx: &mut F::Context, redirect: Redirect) {
        let response = ctx.response_mut();
        if response.is_headers_sent() {
            error!(url = %redirect.url, "headers already sent, redirect ignored");
            return;
        }

        let location = match &redirect.flash {
            Some(flash) => with_flash_param(
                &redirect.url,
                &self.router.config().flash_message_param,
                flash,
            ),
            None => redirect.url.clone(),
        };

        response.reset_everything(false);
        response.redirect(&location, redirect.status);
        if let Err(e) = response.flush(true) {
            warn!(error = %e, url = %location, "failed to send the redirect");
        }
    }

    fn not_found(
        &self,
        ctx: &mut F::Context,
        not_found: NotFound,
    ) -> Result<Step<F::Context>, Failure> {
        if ctx.variables().is_not_found_route() {
            let message = not_found
                .message
                .unwrap_or_else(|| self.dictionary.message(MessageKey::RouteNotFound));
            return Err(HandlerError::public(StatusCode::NotFound, message).into());
        }

        if not_found.reset_response {
            ctx.response_mut().reset_everything(true);
        }
        let variables = ctx.variables_mut();
        if let Some(message) = not_found.message {
            variables.set(VariableKey::NotFoundPublicMessage, Variable::Text(message));
        }
        variables.set(VariableKey::IsNotFoundRoute, Variable::Flag(true));
        ctx.response_mut().set_status(StatusCode::NotFound);

        debug!(path = ctx.request().path(), "not-found routing");
        Ok(Step::Run(self.not_found_routing(ctx)?))
    }

    fn not_found_routing(
        &self,
        ctx: &F::Context,
    ) -> Result<RoutingResult<F::Context>, DispatchError> {
        if let Some(routing) = self.router.route(ctx.request(), RoutingType::NotFound) {
            return Ok(routing);
        }

        // Held until the default route is in the table, so concurrent misses
        // see it on their second lookup.
        let mut registered = self.default_not_found_registered.lock();
        if !*registered {
            debug!("no not-found route, registering the default one");
            self.router
                .not_found(default_not_found_handler::<F::Context>(Arc::clone(
                    &self.dictionary,
                )))?;
            *registered = true;
        }
        drop(registered);
        if let Some(routing) = self.router.route(ctx.request(), RoutingType::NotFound) {
            return Ok(routing);
        }

        error!(path = ctx.request().path(), "no not-found route");
        Err(DispatchError::NotFoundRouteMissing)
    }

    fn handle_exception(
        &self,
        ctx: &mut F::Context,
        exchange: &dyn Exchange,
        err: HandlerError,
    ) -> Result<(), DispatchError> {
        if err.is_public() {
            debug!(error = %err, status = ?err.status(), "public error");
        } else {
            error!(error = %err.details(), "handler failed");
        }

        let err = Arc::new(err);
        let variables = ctx.variables_mut();
        if let Some(original) = variables.routing_result().cloned() {
            variables.set(VariableKey::OriginalRoutingResult, Variable::Routing(original));
        }
        variables.set(VariableKey::IsExceptionHandling, Variable::Flag(true));
        variables.set(VariableKey::IsNotFoundRoute, Variable::Flag(false));
        variables.set(VariableKey::Exception, Variable::Error(Arc::clone(&err)));

        if err.resets_response() {
            ctx.response_mut().reset_everything(false);
        }
        ctx.response_mut()
            .set_status(err.status().unwrap_or(StatusCode::InternalServerError));

        if let Some(routing) = self.router.route(ctx.request(), RoutingType::Exception) {
            match self.drive(ctx, Step::Run(routing)) {
                Ok(()) => return Ok(()),
                Err(Failure::Handler(custom)) => {
                    error!(
                        error = %custom.details(),
                        original = %err,
                        "custom exception handler failed, using the default one"
                    );
                }
                Err(Failure::Fatal(fatal)) => {
                    error!(
                        error = %fatal,
                        original = %err,
                        "custom exception handling failed, using the default one"
                    );
                }
            }
        }

        self.default_exception(ctx, exchange, &err)
    }

    /// Renders `err` in the client's preferred format: the public message, or
    /// the generic dictionary message for private errors.
    fn default_exception(
        &self,
        ctx: &mut F::Context,
        exchange: &dyn Exchange,
        err: &HandlerError,
    ) -> Result<(), DispatchError> {
        if exchange.is_closed() {
            warn!(error = %err, "response already closed, error not rendered");
            return Ok(());
        }
        if exchange.is_headers_sent() {
            warn!(error = %err, "response headers already sent, error not rendered");
            return Ok(());
        }

        let mut message = if err.is_public() {
            err.message()
        } else {
            self.dictionary.message(MessageKey::ExceptionDefault)
        };
        if self.router.config().debug_enabled {
            message.push_str("\n\nDebug info :\n\n");
            message.push_str(&err.details());
        }

        let status = err.status().unwrap_or(StatusCode::InternalServerError);
        let kind = ctx.request().content_type_best_match();
        let response = ctx.response_mut();
        if err.resets_response() {
            response.reset_everything(false);
        }

        if let Err(e) = translator::render_error(response, kind, status, &message) {
            error!(error = %e, original = %err, "default exception handling failed");
            translator::write_last_resort(exchange);
            return Err(DispatchError::LastResort(e.to_string()));
        }
        Ok(())
    }
}

/// Calls `handler`, turning a panic into a private error.
fn invoke<C>(handler: &Handler<C>, ctx: &mut C) -> HandlerResult {
    match panic::catch_unwind(AssertUnwindSafe(|| handler(ctx))) {
        Ok(result) => result,
        Err(payload) => Err(HandlerError::from_panic(payload)),
    }
}

/// The not-found handler registered when the application has none.
fn default_not_found_handler<C: RequestContext>(
    dictionary: Arc<dyn Dictionary>,
) -> impl Fn(&mut C) -> HandlerResult + Send + Sync + 'static {
    move |ctx: &mut C| {
        let message = match ctx.variables().not_found_message() {
            Some(message) => message.to_owned(),
            None => dictionary.message(MessageKey::RouteNotFound),
        };
        let kind = ctx.request().content_type_best_match();
        translator::write_error(ctx.response_mut(), kind, StatusCode::NotFound, &message);
        Ok(Flow::Continue)
    }
}

/// Resolves a forward target against the current URL. Only a target with a
/// scheme is absolute; a leading `//` is read as a path, not as a
/// scheme-relative URL.
fn resolve_forward_url(current: &Url, raw: &str) -> Result<Url, url::ParseError> {
    let raw = raw.trim();
    match Url::parse(raw) {
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let path = raw.trim_start_matches('/');
            current.join(&format!("/{path}"))
        }
        parsed => parsed,
    }
}

/// Appends `param=kind:text` to `url`, keeping any fragment last.
fn with_flash_param(url: &str, param: &str, flash: &FlashMessage) -> String {
    let (base, fragment) = match url.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (url, None),
    };
    let value: String = url::form_urlencoded::byte_serialize(
        format!("{}:{}", flash.kind.as_str(), flash.text).as_bytes(),
    )
    .collect();
    let separator = if base.contains('?') { '&' } else { '?' };
    let mut out = format!("{base}{separator}{param}={value}");
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

#[cfg(test)]
mod tests;
