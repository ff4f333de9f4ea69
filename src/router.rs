//! Route registration.
//!
//! One radix tree per HTTP method, O(path-length) lookup. Build the router
//! once at startup, then hand it to [`Server::serve`](crate::Server::serve)
//! or turn it into a [`Dispatcher`] yourself. Every registration method
//! takes and returns `self`, so registrations chain naturally and nothing can
//! be registered once requests are being served.

use std::path::PathBuf;
use std::sync::Arc;

use http::Method;

use crate::config::RouterConfig;
use crate::context::Context;
use crate::dispatch::Dispatcher;
use crate::error::{MatchError, RouteError};
use crate::fs::{FILEPATH, StaticDir};
use crate::group::Group;
use crate::handler::{BoxedHandler, Handler, HandlerChain, PanicHandler};
use crate::middleware::{Interceptor, Interceptors};
use crate::params::Params;
use crate::path::join_path;
use crate::tree::RouteTree;

/// The methods [`Router::any`] registers.
pub(crate) const ANY: [Method; 9] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::PATCH,
    Method::HEAD,
    Method::OPTIONS,
    Method::CONNECT,
    Method::TRACE,
];

// ── Route table ───────────────────────────────────────────────────────────────

/// The per-method trees, in the order their methods were first registered.
#[derive(Default)]
pub(crate) struct Routes {
    trees: Vec<(Method, RouteTree<BoxedHandler>)>,
}

impl Routes {
    pub(crate) fn tree(&self, method: &Method) -> Option<&RouteTree<BoxedHandler>> {
        self.trees.iter().find(|(m, _)| m == method).map(|(_, t)| t)
    }

    fn insert(&mut self, method: Method, pattern: &str, handler: BoxedHandler) -> Result<(), RouteError> {
        let idx = match self.trees.iter().position(|(m, _)| *m == method) {
            Some(idx) => idx,
            None => {
                self.trees.push((method, RouteTree::new()));
                self.trees.len() - 1
            }
        };
        self.trees[idx].1.insert(pattern, handler)
    }

    pub(crate) fn lookup(&self, method: &Method, path: &str) -> Result<(&BoxedHandler, Params), MatchError> {
        let tree = self.tree(method).ok_or(MatchError { tsr: false })?;
        let mut params = Params::new();
        let handler = tree.get_value(path, &mut params)?;
        Ok((handler, params))
    }

    /// The `Allow` header value for `path`, or an empty string when no
    /// other method matches. `*` lists every registered method.
    pub(crate) fn allowed(&self, path: &str, req_method: &Method) -> String {
        let mut allow: Vec<&str> = Vec::new();
        let mut params = Params::new();

        for (method, tree) in &self.trees {
            if *method == Method::OPTIONS {
                continue;
            }
            if path == "*" {
                allow.push(method.as_str());
                continue;
            }
            if method == req_method {
                continue;
            }
            if tree.get_value(path, &mut params).is_ok() {
                allow.push(method.as_str());
            }
        }

        if allow.is_empty() {
            return String::new();
        }
        allow.push(Method::OPTIONS.as_str());
        allow.join(", ")
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

/// The application router.
///
/// Patterns are literal segments, `:name` parameters matching one segment,
/// and a final `*name` catch-all matching the rest of the path:
///
/// ```rust
/// use wend::{Router, sync_fn};
///
/// let app = Router::new()
///     .get("/users/:id", sync_fn(|ctx| {
///         let id = ctx.param("id").unwrap_or_default().to_owned();
///         ctx.write_string(id);
///     }))
///     .get("/static/*filepath", sync_fn(|ctx| ctx.write_string("file")));
/// ```
///
/// # Panics
///
/// Registration panics on an invalid or conflicting pattern. Routes are
/// fixed at startup, so a bad table fails before the first request.
pub struct Router {
    pub(crate) routes: Routes,
    pub(crate) global: Interceptors,
    pub(crate) not_found: Option<BoxedHandler>,
    pub(crate) method_not_allowed: Option<BoxedHandler>,
    pub(crate) global_options: Option<BoxedHandler>,
    pub(crate) panic_handler: Option<PanicHandler>,
    pub(crate) config: RouterConfig,
}

impl Router {
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    pub fn with_config(config: RouterConfig) -> Self {
        Self {
            routes: Routes::default(),
            global: Interceptors::default(),
            not_found: None,
            method_not_allowed: None,
            global_options: None,
            panic_handler: None,
            config,
        }
    }

    // ── Registration ──────────────────────────────────────────────────────

    /// Registers `handler` for `method` and `pattern`.
    pub fn on(self, method: Method, pattern: &str, handler: impl Handler) -> Self {
        self.chain(method, pattern, vec![handler.into_boxed_handler()])
    }

    /// Registers a chain of handlers run in order until one writes a status.
    pub fn chain(mut self, method: Method, pattern: &str, steps: Vec<BoxedHandler>) -> Self {
        let group = Interceptors::default();
        self.register(method, pattern, steps, &group);
        self
    }

    pub fn get(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, pattern, handler)
    }

    pub fn post(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, pattern, handler)
    }

    pub fn put(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::PUT, pattern, handler)
    }

    pub fn delete(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::DELETE, pattern, handler)
    }

    pub fn patch(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::PATCH, pattern, handler)
    }

    pub fn head(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::HEAD, pattern, handler)
    }

    pub fn options(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::OPTIONS, pattern, handler)
    }

    pub fn connect(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::CONNECT, pattern, handler)
    }

    pub fn trace(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::TRACE, pattern, handler)
    }

    /// Registers `handler` for all nine standard methods.
    pub fn any(self, pattern: &str, handler: impl Handler) -> Self {
        let handler = handler.into_boxed_handler();
        ANY.iter().fold(self, |router, method| {
            router.chain(method.clone(), pattern, vec![Arc::clone(&handler)])
        })
    }

    /// Serves the files below `dir` for `GET` requests under `prefix`.
    ///
    /// Registers `prefix/*filepath`. The captured path is cleaned before it
    /// is joined to `dir`, so `..` cannot climb out of the directory.
    ///
    /// ```rust,no_run
    /// use wend::Router;
    ///
    /// // GET /assets/css/site.css reads ./public/css/site.css
    /// let app = Router::new().static_dir("/assets", "./public");
    /// ```
    pub fn static_dir(self, prefix: &str, dir: impl Into<PathBuf>) -> Self {
        let pattern = join_path(prefix, &format!("/*{FILEPATH}"));
        self.get(&pattern, StaticDir::new(dir))
    }

    /// Registers routes under `base` with their own interceptors.
    ///
    /// ```rust
    /// use wend::{Router, sync_fn};
    ///
    /// let app = Router::new().group("/api", |api| {
    ///     api.get("/health", sync_fn(|ctx| ctx.write_string("ok")));
    ///     api.group("/v1", |v1| {
    ///         v1.get("/users/:id", sync_fn(|ctx| ctx.write_string("user")));
    ///     });
    /// });
    /// ```
    pub fn group(mut self, base: &str, build: impl FnOnce(&mut Group<'_>)) -> Self {
        let mut group = Group::new(&mut self, base);
        build(&mut group);
        self
    }

    /// Adds an interceptor around every route registered after this call.
    pub fn intercept(mut self, interceptor: impl Interceptor) -> Self {
        self.global.push(Arc::new(interceptor));
        self
    }

    /// Wraps the chain in the global and `group` interceptors and inserts it.
    pub(crate) fn register(&mut self, method: Method, pattern: &str, mut steps: Vec<BoxedHandler>, group: &Interceptors) {
        if steps.is_empty() {
            panic!("invalid route `{pattern}`: {}", RouteError::EmptyChain { path: pattern.to_owned() });
        }

        let handler = if steps.len() == 1 {
            steps.remove(0)
        } else {
            HandlerChain::new(steps).into_boxed_handler()
        };

        let mut interceptors = self.global.clone();
        interceptors.extend(group);
        let handler = interceptors.wrap(handler);

        self.routes
            .insert(method, pattern, handler)
            .unwrap_or_else(|e| panic!("invalid route `{pattern}`: {e}"));
    }

    // ── Fallbacks ─────────────────────────────────────────────────────────

    /// Replaces the default `404 page not found` reply.
    pub fn not_found(mut self, handler: impl Handler) -> Self {
        self.not_found = Some(handler.into_boxed_handler());
        self
    }

    /// Replaces the default `405 Method Not Allowed` reply. The `Allow`
    /// header is already set when the handler runs.
    pub fn method_not_allowed(mut self, handler: impl Handler) -> Self {
        self.method_not_allowed = Some(handler.into_boxed_handler());
        self
    }

    /// Runs after an automatic `OPTIONS` reply has set the `Allow` header.
    pub fn global_options(mut self, handler: impl Handler) -> Self {
        self.global_options = Some(handler.into_boxed_handler());
        self
    }

    /// Called with the panic payload when a handler panics. The response is
    /// cleared before the call.
    pub fn panic_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut Context, &(dyn std::any::Any + Send)) + Send + Sync + 'static,
    {
        self.panic_handler = Some(Arc::new(handler));
        self
    }

    // ── Configuration ─────────────────────────────────────────────────────

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn redirect_trailing_slash(mut self, on: bool) -> Self {
        self.config.redirect_trailing_slash = on;
        self
    }

    pub fn redirect_fixed_path(mut self, on: bool) -> Self {
        self.config.redirect_fixed_path = on;
        self
    }

    pub fn handle_method_not_allowed(mut self, on: bool) -> Self {
        self.config.handle_method_not_allowed = on;
        self
    }

    pub fn handle_options(mut self, on: bool) -> Self {
        self.config.handle_options = on;
        self
    }

    pub fn max_idle_contexts(mut self, n: usize) -> Self {
        self.config.max_idle_contexts = n;
        self
    }

    // ── Lookup ────────────────────────────────────────────────────────────

    /// Looks up the handler registered for `method` and `path` without
    /// running it. On a miss, [`MatchError::tsr`] tells whether the path
    /// with or without a trailing slash would match.
    pub fn lookup(&self, method: &Method, path: &str) -> Result<(&BoxedHandler, Params), MatchError> {
        self.routes.lookup(method, path)
    }

    /// The `Allow` header value for `path` as seen by a `method` request.
    /// Empty when no other method matches.
    pub fn allowed(&self, path: &str, method: &Method) -> String {
        self.routes.allowed(path, method)
    }

    /// Freezes the routes into a [`Dispatcher`].
    pub fn into_dispatcher(self) -> Dispatcher {
        Dispatcher::new(self)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
