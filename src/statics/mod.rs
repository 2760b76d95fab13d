//! Static resources: files and directories served ahead of dynamic routes.
//!
//! A resource is registered through [`Router::file`] or [`Router::dir`] and
//! backed either by the resource root (`classpath`) or by the filesystem.
//! Filesystem resources may have a generator: when the backing file does not
//! exist yet, the generator produces the response and its body is saved to the
//! backing path, so later requests are served from disk.
//!
//! ```no_run
//! use std::sync::Arc;
//! use frontline::config::EngineConfig;
//! use frontline::context::{DefaultContext, RequestContext};
//! use frontline::router::{Flow, Router};
//!
//! let router: Router<DefaultContext> = Router::new(Arc::new(EngineConfig::default()));
//! router.dir("/assets").classpath("/public").cache(86_400).save()?;
//! router
//!     .file("/generated/report.txt")
//!     .path_relative("var/report.txt")
//!     .save_generator(|ctx: &mut DefaultContext| {
//!         ctx.response_mut().send_plain_text("expensive report");
//!         Ok(Flow::Continue)
//!     })?;
//! # Ok::<(), frontline::router::RouteError>(())
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::context::RequestContext;
use crate::http::negotiation::mime_for_path;
use crate::http::{Method, StatusCode};
use crate::router::{
    Flow, Handler, HandlerError, HandlerResult, MethodFilter, NewRoute, NotFound, PathPattern,
    RouteError, Router, RoutingType,
};

/// Path parameter holding the remainder of a directory request when the
/// directory URL declares no splat.
pub const DEFAULT_DIR_PARAM: &str = "path";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    File,
    Dir,
}

/// Where the bytes of a resource come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingKind {
    /// Relative to the configured resource root.
    Classpath,
    /// A filesystem path, absolute or relative to the application root.
    Filesystem,
}

/// `Cache-Control` settings of a static resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub seconds: u32,
    pub cdn_seconds: Option<u32>,
    pub private: bool,
}

impl CacheConfig {
    pub fn new(seconds: u32) -> Self {
        Self {
            seconds,
            cdn_seconds: None,
            private: false,
        }
    }

    /// The `Cache-Control` header value.
    ///
    /// ```
    /// use frontline::statics::CacheConfig;
    ///
    /// let cache = CacheConfig { seconds: 60, cdn_seconds: Some(600), private: false };
    /// assert_eq!(cache.header_value(), "public, max-age=60, s-maxage=600");
    /// assert_eq!(CacheConfig::new(0).header_value(), "no-cache, no-store, must-revalidate");
    /// ```
    pub fn header_value(&self) -> String {
        if self.seconds == 0 {
            return "no-cache, no-store, must-revalidate".to_owned();
        }
        let scope = if self.private { "private" } else { "public" };
        let mut value = format!("{scope}, max-age={}", self.seconds);
        if let Some(cdn) = self.cdn_seconds {
            value.push_str(&format!(", s-maxage={cdn}"));
        }
        value
    }
}

/// A registered static resource.
#[derive(Debug)]
pub struct StaticResource {
    pub(crate) kind: ResourceKind,
    /// Normalized URL of a file, or URL prefix of a directory.
    pub(crate) url: String,
    pub(crate) splat: String,
    pub(crate) backing_kind: BackingKind,
    pub(crate) backing: PathBuf,
    pub(crate) cache: CacheConfig,
    pub(crate) cache_bust: bool,
    pub(crate) generated: bool,
}

impl StaticResource {
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn backing_kind(&self) -> BackingKind {
        self.backing_kind
    }

    pub fn backing_path(&self) -> &Path {
        &self.backing
    }

    pub fn cache(&self) -> CacheConfig {
        self.cache
    }

    pub fn is_cache_bust(&self) -> bool {
        self.cache_bust
    }

    pub fn has_generator(&self) -> bool {
        self.generated
    }
}

/// Builder returned by [`Router::file`] and [`Router::dir`].
#[must_use = "a static resource is only registered by `save` or `save_generator`"]
pub struct StaticResourceBuilder<'r, C: RequestContext> {
    router: &'r Router<C>,
    kind: ResourceKind,
    url: String,
    id: Option<String>,
    backing: Option<(BackingKind, PathBuf)>,
    cache_seconds: Option<u32>,
    cdn_seconds: Option<u32>,
    cache_private: bool,
    cache_bust: bool,
}

impl<'r, C: RequestContext> StaticResourceBuilder<'r, C> {
    pub(crate) fn new(router: &'r Router<C>, kind: ResourceKind, url: String) -> Self {
        Self {
            router,
            kind,
            url,
            id: None,
            backing: None,
            cache_seconds: None,
            cdn_seconds: None,
            cache_private: false,
            cache_bust: false,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Backed by `path` under the configured resource root.
    pub fn classpath(mut self, path: impl AsRef<str>) -> Self {
        let relative = path.as_ref().trim_start_matches('/');
        let backing = self.router.config().resource_root.join(relative);
        self.backing = Some((BackingKind::Classpath, backing));
        self
    }

    /// Backed by an absolute filesystem path.
    pub fn path_absolute(mut self, path: impl Into<PathBuf>) -> Self {
        self.backing = Some((BackingKind::Filesystem, path.into()));
        self
    }

    /// Backed by a filesystem path relative to the application root.
    pub fn path_relative(mut self, path: impl AsRef<str>) -> Self {
        let relative = path.as_ref().trim_start_matches('/');
        let backing = self.router.config().app_root.join(relative);
        self.backing = Some((BackingKind::Filesystem, backing));
        self
    }

    /// `max-age`, in seconds.
    pub fn cache(mut self, seconds: u32) -> Self {
        self.cache_seconds = Some(seconds);
        self
    }

    /// `private` instead of `public`.
    pub fn cache_private(mut self) -> Self {
        self.cache_private = true;
        self
    }

    /// `s-maxage`, in seconds.
    pub fn cache_cdn(mut self, seconds: u32) -> Self {
        self.cdn_seconds = Some(seconds);
        self
    }

    /// Strip cache-buster codes from request paths before matching.
    pub fn cache_bust(mut self, enabled: bool) -> Self {
        self.cache_bust = enabled;
        self
    }

    /// Registers the resource.
    pub fn save(self) -> Result<(), RouteError> {
        self.register(None)
    }

    /// Registers the resource with a generator run while the backing file
    /// does not exist.
    pub fn save_generator<F>(self, generator: F) -> Result<(), RouteError>
    where
        F: Fn(&mut C) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(Some(Arc::new(generator)))
    }

    fn register(self, generator: Option<Handler<C>>) -> Result<(), RouteError> {
        let invalid = |reason: &str| RouteError::StaticResource {
            url: self.url.clone(),
            reason: reason.to_owned(),
        };

        let pattern = PathPattern::parse(&self.url, &HashMap::new(), true).map_err(|source| {
            RouteError::Pattern {
                path: self.url.clone(),
                source,
            }
        })?;
        let (url, splat) = match self.kind {
            ResourceKind::File => {
                if !pattern.is_literal() {
                    return Err(invalid("a file URL can't contain parameters"));
                }
                (pattern.as_str().to_owned(), DEFAULT_DIR_PARAM.to_owned())
            }
            ResourceKind::Dir => {
                if pattern.has_params() {
                    return Err(invalid(
                        "a directory URL can only end with a splat parameter",
                    ));
                }
                match pattern.splat_name() {
                    Some(name) => (pattern.splat_prefix(), name.to_owned()),
                    None => (pattern.as_str().to_owned(), DEFAULT_DIR_PARAM.to_owned()),
                }
            }
        };

        let Some((backing_kind, backing)) = self.backing.clone() else {
            return Err(invalid("no backing path (classpath, path_absolute or path_relative)"));
        };
        if generator.is_some() && backing_kind == BackingKind::Classpath {
            return Err(invalid("a generator needs a filesystem backing path"));
        }
        if generator.is_none() {
            let exists = match self.kind {
                ResourceKind::File => backing.is_file(),
                ResourceKind::Dir => backing.is_dir(),
            };
            if !exists {
                return Err(invalid(&format!(
                    "backing path {} does not exist",
                    backing.display()
                )));
            }
        }

        let resource = Arc::new(StaticResource {
            kind: self.kind,
            url,
            splat,
            backing_kind,
            backing,
            cache: CacheConfig {
                seconds: self
                    .cache_seconds
                    .unwrap_or(self.router.config().static_cache_seconds),
                cdn_seconds: self.cdn_seconds,
                private: self.cache_private,
            },
            cache_bust: self.cache_bust,
            generated: generator.is_some(),
        });

        let persist = self.router.config().write_generated_resources;
        let served = Arc::clone(&resource);
        let handler: Handler<C> =
            Arc::new(move |ctx: &mut C| serve(ctx, &served, generator.as_ref(), persist));

        self.router.register(NewRoute {
            id: self.id,
            methods: MethodFilter::Only(vec![Method::Get, Method::Head]),
            path: Some(self.url),
            routing_types: vec![RoutingType::Normal],
            position: 0,
            handler,
            before: Vec::new(),
            after: Vec::new(),
            accept: Vec::new(),
            skip_resources: false,
            resource: Some(resource),
        })
    }
}

/// Removes cache-buster codes (`<prefix><digits>_`) from `path`.
///
/// ```
/// use frontline::statics::strip_cache_busters;
///
/// assert_eq!(strip_cache_busters("/css/cb_1234_main.css", "cb_"), "/css/main.css");
/// assert_eq!(strip_cache_busters("/cb_x/cb_.css", "cb_"), "/cb_x/cb_.css");
/// ```
pub fn strip_cache_busters(path: &str, prefix: &str) -> String {
    if prefix.is_empty() {
        return path.to_owned();
    }
    let mut out = String::with_capacity(path.len());
    let mut rest = path;
    while let Some(pos) = rest.find(prefix) {
        let after = &rest[pos + prefix.len()..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 && after.as_bytes().get(digits) == Some(&b'_') {
            out.push_str(&rest[..pos]);
            rest = &after[digits + 1..];
        } else {
            out.push_str(&rest[..pos + prefix.len()]);
            rest = after;
        }
    }
    out.push_str(rest);
    out
}

fn forbidden() -> HandlerError {
    HandlerError::public(StatusCode::Forbidden, "Forbidden")
}

fn serve<C: RequestContext>(
    ctx: &mut C,
    resource: &StaticResource,
    generator: Option<&Handler<C>>,
    persist: bool,
) -> HandlerResult {
    let target = match resource.kind {
        ResourceKind::File => resource.backing.clone(),
        ResourceKind::Dir => {
            let relative = ctx.request().path_param(&resource.splat).unwrap_or("").to_owned();
            if relative.trim_matches('/').is_empty() {
                // The root maps to the directory itself: nothing to persist.
                return match generator {
                    Some(generator) => generator(ctx),
                    None => Err(forbidden()),
                };
            }
            confine(&resource.backing, &relative)?
        }
    };

    if target.is_dir() {
        return Err(forbidden());
    }
    if target.is_file() {
        return send_file(ctx, resource, &target);
    }

    let Some(generator) = generator else {
        debug!(path = %target.display(), "static resource not found");
        return Ok(Flow::NotFound(NotFound::new()));
    };

    let flow = generator(ctx)?;
    if persist {
        save_generated(ctx, &target);
    }
    Ok(flow)
}

/// Joins `relative` onto `root`, refusing any path that leaves `root`.
fn confine(root: &Path, relative: &str) -> Result<PathBuf, HandlerError> {
    let escape = || HandlerError::msg(format!("path traversal attempt: {relative}"));

    let mut depth = 0_usize;
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => depth = depth.checked_sub(1).ok_or_else(escape)?,
            Component::RootDir | Component::Prefix(_) => return Err(escape()),
        }
    }

    let target = root.join(relative);
    if let (Ok(root), Ok(resolved)) = (root.canonicalize(), target.canonicalize()) {
        if !resolved.starts_with(&root) {
            return Err(escape());
        }
    }
    Ok(target)
}

fn send_file<C: RequestContext>(
    ctx: &mut C,
    resource: &StaticResource,
    path: &Path,
) -> HandlerResult {
    let bytes = fs::read(path)?;
    let response = ctx.response_mut();
    response.set_header("Cache-Control", resource.cache.header_value());
    response.send_bytes(&bytes, Some(mime_for_path(path)));
    Ok(Flow::Continue)
}

fn save_generated<C: RequestContext>(ctx: &C, target: &Path) {
    let response = ctx.response();
    if response.is_headers_sent() {
        info!(path = %target.display(), "generator flushed the response, resource not saved");
        return;
    }
    if response.status() != StatusCode::Ok {
        debug!(
            path = %target.display(),
            status = response.status().as_u16(),
            "generated response is not a 200, resource not saved"
        );
        return;
    }
    if let Err(e) = write_atomically(target, response.buffered_body()) {
        warn!(path = %target.display(), error = %e, "failed to save generated resource");
    }
}

fn write_atomically(target: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut file = tempfile::NamedTempFile::new_in(parent)?;
    file.write_all(bytes)?;
    file.persist(target).map_err(|e| e.error)?;
    Ok(())
}
