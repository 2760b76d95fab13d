//! Request routing: map URL patterns, HTTP methods and routing types to handler chains.
//!
//! A [`Router`] holds three kinds of entries:
//!
//! | Kind              | Registered with                         | Position |
//! |-------------------|-----------------------------------------|----------|
//! | Main route        | [`Router::get`], [`Router::post`], ...  | `0`      |
//! | Before filter     | [`Router::before`], `.pos(-n)`          | `< 0`    |
//! | After filter      | [`Router::after`], `.pos(n)`            | `> 0`    |
//! | Static resource   | [`Router::file`], [`Router::dir`]       | `0`      |
//!
//! For a request, [`Router::route`] picks one main route (static resources
//! first, then the most specific pattern, the latest registration winning
//! ties) and builds the chain: matching before filters by position, the inline
//! filters and main handler of the route, then matching after filters by
//! position. Filters at the same position keep their registration order.
//!
//! Routes are stored in a copy-on-write table: matching reads a snapshot
//! without locking, and registration (even from a running handler) swaps in a
//! new table.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::EngineConfig;
use crate::context::{RequestContext, RequestData};
use crate::filters::{self, Cors};
use crate::http::{ContentKind, Method, StatusCode};
use crate::statics::{self, ResourceKind, StaticResource, StaticResourceBuilder};

pub mod handler;
pub mod pattern;

pub use handler::{
    FlashKind, FlashMessage, Flow, Forward, Handler, HandlerError, HandlerResult, NotFound,
    Redirect,
};
pub use pattern::{PathParams, PathPattern, PatternError, Specificity, default_aliases};

/// Default position of [`Router::before`] filters.
pub const DEFAULT_BEFORE_POSITION: i32 = -10;
/// Default position of [`Router::after`] filters.
pub const DEFAULT_AFTER_POSITION: i32 = 10;
/// Position of CORS filters.
pub const CORS_FILTER_POSITION: i32 = -200;
/// Position of redirect rules, ahead of every other filter.
pub const REDIRECT_RULE_POSITION: i32 = -1000;

/// Which traffic a route serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingType {
    /// Regular traffic.
    Normal,
    /// Requests no normal route matched.
    NotFound,
    /// Exception handling.
    Exception,
}

/// The HTTP methods a route answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodFilter {
    All,
    Only(Vec<Method>),
}

impl MethodFilter {
    pub fn matches(&self, method: &Method) -> bool {
        match self {
            MethodFilter::All => true,
            MethodFilter::Only(methods) => methods.contains(method),
        }
    }
}

/// Registration errors. Raised eagerly so a bad route table never reaches dispatch.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid route path `{path}`: {source}")]
    Pattern {
        path: String,
        #[source]
        source: PatternError,
    },

    #[error("a route already uses the id `{0}`; ids must be unique")]
    DuplicateId(String),

    #[error("invalid static resource `{url}`: {reason}")]
    StaticResource { url: String, reason: String },

    #[error("invalid pattern alias `{alias}`: {reason}")]
    InvalidAlias { alias: String, reason: String },
}

/// A registered route.
pub struct Route<C> {
    pub(crate) id: Option<String>,
    pub(crate) methods: MethodFilter,
    pub(crate) pattern: PathPattern,
    pub(crate) routing_types: Vec<RoutingType>,
    pub(crate) position: i32,
    pub(crate) handler: Handler<C>,
    pub(crate) before: Vec<Handler<C>>,
    pub(crate) after: Vec<Handler<C>>,
    pub(crate) accept: Vec<ContentKind>,
    pub(crate) skip_resources: bool,
    pub(crate) resource: Option<Arc<StaticResource>>,
    pub(crate) seq: u64,
}

impl<C> Route<C> {
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The normalized path pattern, `*` for routes registered without a path.
    pub fn path(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn position(&self) -> i32 {
        self.position
    }

    pub fn methods(&self) -> &MethodFilter {
        &self.methods
    }

    pub fn routing_types(&self) -> &[RoutingType] {
        &self.routing_types
    }

    pub fn is_static_resource(&self) -> bool {
        self.resource.is_some()
    }

    fn applies(&self, routing_type: RoutingType, method: &Method, accept: ContentKind) -> bool {
        self.routing_types.contains(&routing_type)
            && self.methods.matches(method)
            && (self.accept.is_empty() || self.accept.contains(&accept))
    }
}

impl<C> fmt::Debug for Route<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("id", &self.id)
            .field("methods", &self.methods)
            .field("path", &self.pattern.as_str())
            .field("routing_types", &self.routing_types)
            .field("position", &self.position)
            .field("static_resource", &self.resource.is_some())
            .finish()
    }
}

/// One step of a handler chain: a handler and the parameters its route captured.
pub struct RouteHandlerMatch<C> {
    route: Arc<Route<C>>,
    handler: Handler<C>,
    params: PathParams,
    position: i32,
}

impl<C> Clone for RouteHandlerMatch<C> {
    fn clone(&self) -> Self {
        Self {
            route: Arc::clone(&self.route),
            handler: Arc::clone(&self.handler),
            params: self.params.clone(),
            position: self.position,
        }
    }
}

impl<C> RouteHandlerMatch<C> {
    fn new(route: &Arc<Route<C>>, handler: &Handler<C>, params: PathParams, position: i32) -> Self {
        Self {
            route: Arc::clone(route),
            handler: Arc::clone(handler),
            params,
            position,
        }
    }

    pub fn route(&self) -> &Route<C> {
        &self.route
    }

    pub fn route_id(&self) -> Option<&str> {
        self.route.id()
    }

    pub fn route_path(&self) -> &str {
        self.route.path()
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Negative for before filters, `0` for the main handler, positive for after filters.
    pub fn position(&self) -> i32 {
        self.position
    }

    pub(crate) fn handler(&self) -> &Handler<C> {
        &self.handler
    }
}

/// The chain to run for a request.
pub struct RoutingResult<C> {
    routing_type: RoutingType,
    matches: Vec<RouteHandlerMatch<C>>,
    main_index: usize,
}

impl<C> Clone for RoutingResult<C> {
    fn clone(&self) -> Self {
        Self {
            routing_type: self.routing_type,
            matches: self.matches.clone(),
            main_index: self.main_index,
        }
    }
}

impl<C> fmt::Debug for RoutingResult<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingResult")
            .field("routing_type", &self.routing_type)
            .field("path", &self.path())
            .field("handlers", &self.matches.len())
            .finish()
    }
}

impl<C> RoutingResult<C> {
    pub fn routing_type(&self) -> RoutingType {
        self.routing_type
    }

    pub fn handler_matches(&self) -> &[RouteHandlerMatch<C>] {
        &self.matches
    }

    /// The match of the main route.
    pub fn main_match(&self) -> &RouteHandlerMatch<C> {
        &self.matches[self.main_index]
    }

    /// Path pattern of the main route.
    pub fn path(&self) -> &str {
        self.main_match().route_path()
    }

    pub fn is_static_resource(&self) -> bool {
        self.main_match().route().is_static_resource()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Everything needed to register a route.
pub(crate) struct NewRoute<C> {
    pub(crate) id: Option<String>,
    pub(crate) methods: MethodFilter,
    pub(crate) path: Option<String>,
    pub(crate) routing_types: Vec<RoutingType>,
    pub(crate) position: i32,
    pub(crate) handler: Handler<C>,
    pub(crate) before: Vec<Handler<C>>,
    pub(crate) after: Vec<Handler<C>>,
    pub(crate) accept: Vec<ContentKind>,
    pub(crate) skip_resources: bool,
    pub(crate) resource: Option<Arc<StaticResource>>,
}

struct RouteTable<C> {
    routes: Vec<Arc<Route<C>>>,
    aliases: HashMap<String, String>,
}

impl<C> Clone for RouteTable<C> {
    fn clone(&self) -> Self {
        Self {
            routes: self.routes.clone(),
            aliases: self.aliases.clone(),
        }
    }
}

impl<C> RouteTable<C> {
    fn new() -> Self {
        Self {
            routes: Vec::new(),
            aliases: default_aliases(),
        }
    }

    /// Finds the static resource serving `path`: an exact file match first,
    /// then the directory with the longest prefix. The latest registration wins
    /// between entries of the same kind.
    fn resolve_static(
        &self,
        path: &str,
        cache_buster_prefix: &str,
        case_sensitive: bool,
    ) -> Option<(Arc<Route<C>>, PathParams)> {
        let decoded = percent_decode_str(path).decode_utf8_lossy().into_owned();
        let busted = statics::strip_cache_busters(&decoded, cache_buster_prefix);

        let mut file: Option<&Arc<Route<C>>> = None;
        let mut dir: Option<(&Arc<Route<C>>, usize, String)> = None;

        for route in &self.routes {
            let Some(resource) = &route.resource else {
                continue;
            };
            let candidate = if resource.cache_bust {
                busted.as_str()
            } else {
                decoded.as_str()
            };
            let candidate = trim_trailing_slash(candidate);

            match resource.kind {
                ResourceKind::File => {
                    if same_path(candidate, &resource.url, case_sensitive) {
                        file = Some(route);
                    }
                }
                ResourceKind::Dir => {
                    if let Some(rest) = dir_remainder(candidate, &resource.url, case_sensitive) {
                        let len = resource.url.len();
                        if dir.as_ref().is_none_or(|(_, best, _)| len >= *best) {
                            dir = Some((route, len, rest.to_owned()));
                        }
                    }
                }
            }
        }

        if let Some(route) = file {
            return Some((Arc::clone(route), PathParams::new()));
        }
        dir.and_then(|(route, _, rest)| {
            let resource = route.resource.as_ref()?;
            let mut params = PathParams::new();
            params.insert(resource.splat.clone(), rest);
            Some((Arc::clone(route), params))
        })
    }

    fn filters(
        &self,
        before: bool,
        routing_type: RoutingType,
        request: &RequestData,
        accept: ContentKind,
        is_resource: bool,
    ) -> Vec<(&Arc<Route<C>>, PathParams)> {
        let mut found: Vec<(&Arc<Route<C>>, PathParams)> = self
            .routes
            .iter()
            .filter(|r| r.resource.is_none())
            .filter(|r| if before { r.position < 0 } else { r.position > 0 })
            .filter(|r| !(is_resource && r.skip_resources))
            .filter(|r| r.applies(routing_type, request.method(), accept))
            .filter_map(|r| r.pattern.matches(request.path()).map(|params| (r, params)))
            .collect();
        found.sort_by_key(|(r, _)| (r.position, r.seq));
        found
    }
}

fn trim_trailing_slash(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

fn same_path(a: &str, b: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        a.eq_ignore_ascii_case(b)
    }
}

fn dir_remainder<'p>(path: &'p str, prefix: &str, case_sensitive: bool) -> Option<&'p str> {
    if prefix == "/" {
        return Some(path.trim_start_matches('/'));
    }
    let head = path.get(..prefix.len())?;
    if !same_path(head, prefix, case_sensitive) {
        return None;
    }
    let rest = &path[prefix.len()..];
    if rest.is_empty() {
        Some("")
    } else {
        rest.strip_prefix('/')
    }
}

/// The route registry shared by every exchange.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use frontline::config::EngineConfig;
/// use frontline::context::{DefaultContext, RequestContext};
/// use frontline::router::{Flow, Router};
///
/// let router: Router<DefaultContext> = Router::new(Arc::new(EngineConfig::default()));
///
/// router.get("/users/${id:<N>}").save(|ctx: &mut DefaultContext| {
///     let id = ctx.request().path_param("id").unwrap_or_default().to_owned();
///     ctx.response_mut().send_plain_text(id);
///     Ok(Flow::Continue)
/// })?;
///
/// router.before(|_ctx: &mut DefaultContext| Ok(Flow::Continue))?;
/// assert_eq!(router.len(), 2);
/// # Ok::<(), frontline::router::RouteError>(())
/// ```
pub struct Router<C> {
    config: Arc<EngineConfig>,
    table: ArcSwap<RouteTable<C>>,
    write_lock: Mutex<()>,
    seq: AtomicU64,
}

impl<C: RequestContext> Router<C> {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            config,
            table: ArcSwap::from_pointee(RouteTable::new()),
            write_lock: Mutex::new(()),
            seq: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn get(&self, path: impl Into<String>) -> RouteBuilder<'_, C> {
        self.methods(path, [Method::Get])
    }

    pub fn post(&self, path: impl Into<String>) -> RouteBuilder<'_, C> {
        self.methods(path, [Method::Post])
    }

    pub fn put(&self, path: impl Into<String>) -> RouteBuilder<'_, C> {
        self.methods(path, [Method::Put])
    }

    pub fn delete(&self, path: impl Into<String>) -> RouteBuilder<'_, C> {
        self.methods(path, [Method::Delete])
    }

    pub fn patch(&self, path: impl Into<String>) -> RouteBuilder<'_, C> {
        self.methods(path, [Method::Patch])
    }

    pub fn options(&self, path: impl Into<String>) -> RouteBuilder<'_, C> {
        self.methods(path, [Method::Options])
    }

    pub fn head(&self, path: impl Into<String>) -> RouteBuilder<'_, C> {
        self.methods(path, [Method::Head])
    }

    pub fn trace(&self, path: impl Into<String>) -> RouteBuilder<'_, C> {
        self.methods(path, [Method::Trace])
    }

    /// A route answering every method.
    pub fn all(&self, path: impl Into<String>) -> RouteBuilder<'_, C> {
        RouteBuilder::new(self, Some(path.into()), MethodFilter::All)
    }

    /// A route on every path, the root included, answering every method.
    /// Mostly useful for filters.
    pub fn all_paths(&self) -> RouteBuilder<'_, C> {
        RouteBuilder::new(self, None, MethodFilter::All)
    }

    /// A route answering the given methods.
    pub fn methods(
        &self,
        path: impl Into<String>,
        methods: impl IntoIterator<Item = Method>,
    ) -> RouteBuilder<'_, C> {
        let methods = MethodFilter::Only(methods.into_iter().collect());
        RouteBuilder::new(self, Some(path.into()), methods)
    }

    /// A before filter on every path.
    pub fn before<F>(&self, handler: F) -> Result<(), RouteError>
    where
        F: Fn(&mut C) -> HandlerResult + Send + Sync + 'static,
    {
        RouteBuilder::new(self, None, MethodFilter::All)
            .pos(DEFAULT_BEFORE_POSITION)
            .save(handler)
    }

    /// A before filter on the paths matching `path`.
    pub fn before_on<F>(&self, path: impl Into<String>, handler: F) -> Result<(), RouteError>
    where
        F: Fn(&mut C) -> HandlerResult + Send + Sync + 'static,
    {
        self.all(path).pos(DEFAULT_BEFORE_POSITION).save(handler)
    }

    /// An after filter on every path.
    pub fn after<F>(&self, handler: F) -> Result<(), RouteError>
    where
        F: Fn(&mut C) -> HandlerResult + Send + Sync + 'static,
    {
        RouteBuilder::new(self, None, MethodFilter::All)
            .pos(DEFAULT_AFTER_POSITION)
            .save(handler)
    }

    /// An after filter on the paths matching `path`.
    pub fn after_on<F>(&self, path: impl Into<String>, handler: F) -> Result<(), RouteError>
    where
        F: Fn(&mut C) -> HandlerResult + Send + Sync + 'static,
    {
        self.all(path).pos(DEFAULT_AFTER_POSITION).save(handler)
    }

    /// The same handler as a before and as an after filter on every path.
    pub fn before_and_after<F>(&self, handler: F) -> Result<(), RouteError>
    where
        F: Fn(&mut C) -> HandlerResult + Send + Sync + 'static,
    {
        let handler: Handler<C> = Arc::new(handler);
        RouteBuilder::new(self, None, MethodFilter::All)
            .pos(DEFAULT_BEFORE_POSITION)
            .save_handler(Arc::clone(&handler))?;
        RouteBuilder::new(self, None, MethodFilter::All)
            .pos(DEFAULT_AFTER_POSITION)
            .save_handler(handler)
    }

    /// The handler run when no normal route matches.
    pub fn not_found<F>(&self, handler: F) -> Result<(), RouteError>
    where
        F: Fn(&mut C) -> HandlerResult + Send + Sync + 'static,
    {
        RouteBuilder::new(self, None, MethodFilter::All)
            .not_found()
            .save(handler)
    }

    /// The handler run when a handler fails.
    pub fn exception<F>(&self, handler: F) -> Result<(), RouteError>
    where
        F: Fn(&mut C) -> HandlerResult + Send + Sync + 'static,
    {
        RouteBuilder::new(self, None, MethodFilter::All)
            .exception()
            .save(handler)
    }

    /// A static file served at `url`.
    pub fn file(&self, url: impl Into<String>) -> StaticResourceBuilder<'_, C> {
        StaticResourceBuilder::new(self, ResourceKind::File, url.into())
    }

    /// A static directory served under `url` (`/prefix` or `/prefix/*{name}`).
    pub fn dir(&self, url: impl Into<String>) -> StaticResourceBuilder<'_, C> {
        StaticResourceBuilder::new(self, ResourceKind::Dir, url.into())
    }

    /// A redirect rule from `old_path`, permanent unless changed.
    pub fn redirect(&self, old_path: impl Into<String>) -> RedirectRuleBuilder<'_, C> {
        RedirectRuleBuilder {
            router: self,
            from: old_path.into(),
            status: StatusCode::MovedPermanently,
        }
    }

    /// CORS headers and preflight answers on every path.
    pub fn cors(&self, cors: Cors) -> Result<(), RouteError> {
        self.cors_route(None, cors)
    }

    /// CORS headers and preflight answers on the paths matching `path`.
    pub fn cors_on(&self, path: impl Into<String>, cors: Cors) -> Result<(), RouteError> {
        self.cors_route(Some(path.into()), cors)
    }

    fn cors_route(&self, path: Option<String>, cors: Cors) -> Result<(), RouteError> {
        RouteBuilder::new(self, path, MethodFilter::All)
            .pos(CORS_FILTER_POSITION)
            .found()
            .not_found()
            .save_handler(cors.into_filter())
    }

    /// Registers `${name:<alias>}` as a shorthand for `regex`.
    pub fn add_pattern_alias(
        &self,
        alias: impl Into<String>,
        regex: impl Into<String>,
    ) -> Result<(), RouteError> {
        let alias = alias.into();
        let regex = regex.into();
        if let Err(e) = regex::Regex::new(&regex) {
            return Err(RouteError::InvalidAlias {
                alias,
                reason: e.to_string(),
            });
        }
        self.update(|table| {
            table.aliases.insert(alias, regex);
            Ok(())
        })
    }

    /// Removes every route with this id. Returns whether one was found.
    pub fn remove_route(&self, id: &str) -> bool {
        self.update(|table| {
            let before = table.routes.len();
            table.routes.retain(|r| r.id.as_deref() != Some(id));
            Ok(table.routes.len() < before)
        })
        .unwrap_or(false)
    }

    /// Removes every route, filter and static resource.
    pub fn remove_all_routes(&self) {
        let _ = self.update(|table| {
            table.routes.clear();
            Ok(())
        });
    }

    pub fn route_by_id(&self, id: &str) -> Option<Arc<Route<C>>> {
        self.table
            .load()
            .routes
            .iter()
            .find(|r| r.id.as_deref() == Some(id))
            .cloned()
    }

    /// A snapshot of every registered route in registration order.
    pub fn routes(&self) -> Vec<Arc<Route<C>>> {
        self.table.load().routes.clone()
    }

    pub fn len(&self) -> usize {
        self.table.load().routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds the chain for `request` and `routing_type`, or `None` when no
    /// main route matches.
    pub fn route(&self, request: &RequestData, routing_type: RoutingType) -> Option<RoutingResult<C>> {
        let table = self.table.load();
        let method = request.method();
        let path = request.path();
        let accept = request.content_type_best_match();

        let mut main = None;
        if routing_type == RoutingType::Normal && matches!(method, Method::Get | Method::Head) {
            main = table.resolve_static(
                path,
                &self.config.cache_buster_prefix,
                self.config.routes_case_sensitive,
            );
        }
        let is_resource = main.is_some();

        if main.is_none() {
            let mut best: Option<((Specificity, u64), &Arc<Route<C>>, PathParams)> = None;
            for route in table.routes.iter() {
                if route.position != 0 || route.resource.is_some() {
                    continue;
                }
                if !route.applies(routing_type, method, accept) {
                    continue;
                }
                let Some(params) = route.pattern.matches(path) else {
                    continue;
                };
                let rank = (route.pattern.specificity(), route.seq);
                if best.as_ref().is_none_or(|(current, _, _)| rank > *current) {
                    best = Some((rank, route, params));
                }
            }
            main = best.map(|(_, route, params)| (Arc::clone(route), params));
        }

        let Some((main_route, main_params)) = main else {
            debug!(method = %method, path, ?routing_type, "no main route");
            return None;
        };

        let mut matches = Vec::new();
        for (route, params) in table.filters(true, routing_type, request, accept, is_resource) {
            matches.push(RouteHandlerMatch::new(route, &route.handler, params, route.position));
        }
        for filter in &main_route.before {
            matches.push(RouteHandlerMatch::new(&main_route, filter, main_params.clone(), -1));
        }
        let main_index = matches.len();
        matches.push(RouteHandlerMatch::new(
            &main_route,
            &main_route.handler,
            main_params.clone(),
            0,
        ));
        for filter in &main_route.after {
            matches.push(RouteHandlerMatch::new(&main_route, filter, main_params.clone(), 1));
        }
        for (route, params) in table.filters(false, routing_type, request, accept, is_resource) {
            matches.push(RouteHandlerMatch::new(route, &route.handler, params, route.position));
        }

        debug!(
            method = %method,
            path,
            ?routing_type,
            route = main_route.path(),
            handlers = matches.len(),
            "route matched"
        );

        Some(RoutingResult {
            routing_type,
            matches,
            main_index,
        })
    }

    pub(crate) fn register(&self, new: NewRoute<C>) -> Result<(), RouteError> {
        let case_sensitive = self.config.routes_case_sensitive;
        self.update(|table| {
            if let Some(id) = &new.id {
                if table.routes.iter().any(|r| r.id.as_ref() == Some(id)) {
                    return Err(RouteError::DuplicateId(id.clone()));
                }
            }

            let pattern = match &new.path {
                None => PathPattern::any(),
                Some(path) => PathPattern::parse(path, &table.aliases, case_sensitive).map_err(
                    |source| RouteError::Pattern {
                        path: path.clone(),
                        source,
                    },
                )?,
            };

            let seq = self.seq.fetch_add(1, Ordering::Relaxed);
            debug!(path = pattern.as_str(), position = new.position, seq, "route registered");
            table.routes.push(Arc::new(Route {
                id: new.id,
                methods: new.methods,
                pattern,
                routing_types: new.routing_types,
                position: new.position,
                handler: new.handler,
                before: new.before,
                after: new.after,
                accept: new.accept,
                skip_resources: new.skip_resources,
                resource: new.resource,
                seq,
            }));
            Ok(())
        })
    }

    fn update<R>(
        &self,
        mutate: impl FnOnce(&mut RouteTable<C>) -> Result<R, RouteError>,
    ) -> Result<R, RouteError> {
        let _guard = self.write_lock.lock();
        let current = self.table.load_full();
        let mut next = RouteTable::clone(&current);
        let out = mutate(&mut next)?;
        self.table.store(Arc::new(next));
        Ok(out)
    }
}

/// Builder returned by [`Router::get`] and friends. Nothing is registered
/// until [`save`](Self::save).
#[must_use = "a route is only registered by `save`"]
pub struct RouteBuilder<'r, C: RequestContext> {
    router: &'r Router<C>,
    path: Option<String>,
    methods: MethodFilter,
    id: Option<String>,
    position: i32,
    routing_types: Vec<RoutingType>,
    before: Vec<Handler<C>>,
    after: Vec<Handler<C>>,
    accept: Vec<ContentKind>,
    skip_resources: bool,
}

impl<'r, C: RequestContext> RouteBuilder<'r, C> {
    fn new(router: &'r Router<C>, path: Option<String>, methods: MethodFilter) -> Self {
        Self {
            router,
            path,
            methods,
            id: None,
            position: 0,
            routing_types: Vec::new(),
            before: Vec::new(),
            after: Vec::new(),
            accept: Vec::new(),
            skip_resources: false,
        }
    }

    /// A unique id, usable with [`Router::remove_route`].
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// `0` for a main route, negative for a before filter, positive for an after filter.
    pub fn pos(mut self, position: i32) -> Self {
        self.position = position;
        self
    }

    /// An inline before filter, run with the route's parameters.
    pub fn before<F>(mut self, filter: F) -> Self
    where
        F: Fn(&mut C) -> HandlerResult + Send + Sync + 'static,
    {
        self.before.push(Arc::new(filter));
        self
    }

    /// An inline after filter, run with the route's parameters.
    pub fn after<F>(mut self, filter: F) -> Self
    where
        F: Fn(&mut C) -> HandlerResult + Send + Sync + 'static,
    {
        self.after.push(Arc::new(filter));
        self
    }

    pub fn found(self) -> Self {
        self.routing_type(RoutingType::Normal)
    }

    pub fn not_found(self) -> Self {
        self.routing_type(RoutingType::NotFound)
    }

    pub fn exception(self) -> Self {
        self.routing_type(RoutingType::Exception)
    }

    pub fn all_routing_types(self) -> Self {
        self.found().not_found().exception()
    }

    fn routing_type(mut self, routing_type: RoutingType) -> Self {
        if !self.routing_types.contains(&routing_type) {
            self.routing_types.push(routing_type);
        }
        self
    }

    /// Only serve requests whose preferred format is `kind`. Repeatable.
    pub fn accept(mut self, kind: ContentKind) -> Self {
        if !self.accept.contains(&kind) {
            self.accept.push(kind);
        }
        self
    }

    /// For filters: do not run on static resource requests.
    pub fn skip_resources(mut self) -> Self {
        self.skip_resources = true;
        self
    }

    /// Registers the route with `handler`.
    pub fn save<F>(self, handler: F) -> Result<(), RouteError>
    where
        F: Fn(&mut C) -> HandlerResult + Send + Sync + 'static,
    {
        self.save_handler(Arc::new(handler))
    }

    pub(crate) fn save_handler(self, handler: Handler<C>) -> Result<(), RouteError> {
        let routing_types = if !self.routing_types.is_empty() {
            self.routing_types
        } else if self.position == 0 {
            vec![RoutingType::Normal]
        } else {
            self.router.config.filter_default_routing_types.clone()
        };

        self.router.register(NewRoute {
            id: self.id,
            methods: self.methods,
            path: self.path,
            routing_types,
            position: self.position,
            handler,
            before: self.before,
            after: self.after,
            accept: self.accept,
            skip_resources: self.skip_resources,
            resource: None,
        })
    }
}

/// Builder returned by [`Router::redirect`].
#[must_use = "a redirect rule is only registered by `to`"]
pub struct RedirectRuleBuilder<'r, C: RequestContext> {
    router: &'r Router<C>,
    from: String,
    status: StatusCode,
}

impl<C: RequestContext> RedirectRuleBuilder<'_, C> {
    /// Use 302 instead of 301.
    pub fn temporarily(mut self) -> Self {
        self.status = StatusCode::Found;
        self
    }

    /// Registers the rule. `${name}` and `*{name}` placeholders in
    /// `destination` are replaced with the parameters captured from the old path.
    pub fn to(self, destination: impl Into<String>) -> Result<(), RouteError> {
        RouteBuilder::new(self.router, Some(self.from), MethodFilter::All)
            .pos(REDIRECT_RULE_POSITION)
            .found()
            .not_found()
            .save_handler(filters::redirect_rule(destination.into(), self.status))
    }
}
