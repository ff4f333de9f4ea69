//! Route groups.

use std::path::PathBuf;
use std::sync::Arc;

use http::Method;

use crate::fs::{FILEPATH, StaticDir};
use crate::handler::{BoxedHandler, Handler};
use crate::middleware::{Interceptor, Interceptors};
use crate::path::join_path;
use crate::router::Router;

/// Routes sharing a base path and a list of interceptors.
///
/// Created by [`Router::group`] or [`Group::group`]. Group interceptors wrap
/// inside the global ones, and a nested group's interceptors wrap inside its
/// parent's. Like global interceptors, they only apply to routes registered
/// after they are added.
pub struct Group<'r> {
    router: &'r mut Router,
    base: String,
    interceptors: Interceptors,
}

impl<'r> Group<'r> {
    pub(crate) fn new(router: &'r mut Router, base: &str) -> Self {
        Self { router, base: base.to_owned(), interceptors: Interceptors::default() }
    }

    /// The base path patterns in this group are joined to.
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn intercept(&mut self, interceptor: impl Interceptor) -> &mut Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// A nested group under `base`, inheriting this group's interceptors.
    pub fn group(&mut self, base: &str, build: impl FnOnce(&mut Group<'_>)) -> &mut Self {
        let mut nested = Group {
            router: &mut *self.router,
            base: join_path(&self.base, base),
            interceptors: self.interceptors.clone(),
        };
        build(&mut nested);
        self
    }

    pub fn on(&mut self, method: Method, pattern: &str, handler: impl Handler) -> &mut Self {
        self.chain(method, pattern, vec![handler.into_boxed_handler()])
    }

    pub fn chain(&mut self, method: Method, pattern: &str, steps: Vec<BoxedHandler>) -> &mut Self {
        let full = join_path(&self.base, pattern);
        self.router.register(method, &full, steps, &self.interceptors);
        self
    }

    pub fn get(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.on(Method::GET, pattern, handler)
    }

    pub fn post(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.on(Method::POST, pattern, handler)
    }

    pub fn put(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.on(Method::PUT, pattern, handler)
    }

    pub fn delete(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.on(Method::DELETE, pattern, handler)
    }

    pub fn patch(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.on(Method::PATCH, pattern, handler)
    }

    pub fn head(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.on(Method::HEAD, pattern, handler)
    }

    pub fn options(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.on(Method::OPTIONS, pattern, handler)
    }

    pub fn connect(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.on(Method::CONNECT, pattern, handler)
    }

    pub fn trace(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.on(Method::TRACE, pattern, handler)
    }

    /// Registers `handler` for all nine standard methods.
    pub fn any(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        let handler = handler.into_boxed_handler();
        for method in crate::router::ANY {
            self.chain(method, pattern, vec![Arc::clone(&handler)]);
        }
        self
    }

    /// See [`Router::static_dir`]. `prefix` is joined to the group's base.
    pub fn static_dir(&mut self, prefix: &str, dir: impl Into<PathBuf>) -> &mut Self {
        let pattern = join_path(prefix, &format!("/*{FILEPATH}"));
        self.get(&pattern, StaticDir::new(dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::sync_fn;

    #[test]
    fn nested_groups_join_paths() {
        let router = Router::new().group("/api", |api| {
            api.get("/health", sync_fn(|_| {}));
            api.group("v1/", |v1| {
                v1.get("/users/:id", sync_fn(|_| {})).post("/users/", sync_fn(|_| {}));
            });
        });

        assert!(router.lookup(&Method::GET, "/api/health").is_ok());
        let (_, params) = router.lookup(&Method::GET, "/api/v1/users/7").unwrap();
        assert_eq!(params.get("id"), Some("7"));
        assert!(router.lookup(&Method::POST, "/api/v1/users/").is_ok());
    }

    #[test]
    fn group_any_covers_all_methods() {
        let router = Router::new().group("/g", |g| {
            g.any("/x", sync_fn(|_| {}));
        });
        assert!(router.lookup(&Method::TRACE, "/g/x").is_ok());
        assert!(router.lookup(&Method::CONNECT, "/g/x").is_ok());
    }

    #[test]
    fn static_dir_mounts_under_base() {
        let router = Router::new().group("/g", |g| {
            g.static_dir("files", "/srv/www");
        });
        let (_, params) = router.lookup(&Method::GET, "/g/files/css/a.css").unwrap();
        assert_eq!(params.get(FILEPATH), Some("css/a.css"));
        assert!(router.lookup(&Method::HEAD, "/g/files/css/a.css").is_err());
    }
}
