//! Request dispatch.
//!
//! # The fallback ladder
//!
//! For every request the dispatcher tries, in order:
//!
//! 1. the handler registered for the method and path;
//! 2. a redirect to the same path with the trailing slash added or removed,
//!    when only that variant has a route;
//! 3. a redirect to the cleaned, case-corrected path, when that has a route;
//! 4. for `OPTIONS`, an automatic reply with an `Allow` header;
//! 5. `405 Method Not Allowed` with an `Allow` header, when another method
//!    matches the path;
//! 6. `404 page not found`.
//!
//! Matching runs on the percent-decoded path, so parameters arrive decoded.
//! Redirect targets are written back percent-encoded.
//!
//! Redirects use `301` for `GET` and `307` for everything else, so the
//! client repeats the original method and body. Steps 2 and 3 are skipped
//! for `CONNECT` and for the root path.
//!
//! # Panics
//!
//! The whole ladder runs under `catch_unwind`. A panicking handler never
//! takes the connection down: the partial response is discarded and the
//! panic handler (or a plain `500`) answers instead. The context goes back to
//! the pool either way, because release is tied to the guard's `Drop`.

use std::any::Any;
use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;

use bytes::Bytes;
use futures::FutureExt;
use http::header::ALLOW;
use http::{HeaderValue, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::config::{RouterConfig, ServerConfig};
use crate::context::Context;
use crate::error::MatchError;
use crate::handler::{BoxedHandler, PanicHandler};
use crate::params::Params;
use crate::path::clean_path;
use crate::pool::ContextPool;
use crate::request::Request;
use crate::response::Response;
use crate::router::{Router, Routes};

/// A frozen [`Router`] ready to serve requests.
///
/// Cheap to share behind an `Arc`; all state except the context pool is
/// read-only.
pub struct Dispatcher {
    routes: Routes,
    pool: ContextPool,
    not_found: Option<BoxedHandler>,
    method_not_allowed: Option<BoxedHandler>,
    global_options: Option<BoxedHandler>,
    panic_handler: Option<PanicHandler>,
    config: RouterConfig,
}

impl Dispatcher {
    pub(crate) fn new(router: Router) -> Self {
        Self {
            routes: router.routes,
            pool: ContextPool::new(router.config.max_idle_contexts),
            not_found: router.not_found,
            method_not_allowed: router.method_not_allowed,
            global_options: router.global_options,
            panic_handler: router.panic_handler,
            config: router.config,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// The context pool requests are served from.
    pub fn pool(&self) -> &ContextPool {
        &self.pool
    }

    /// See [`Router::lookup`].
    pub fn lookup(&self, method: &Method, path: &str) -> Result<(&BoxedHandler, Params), MatchError> {
        self.routes.lookup(method, path)
    }

    /// See [`Router::allowed`].
    pub fn allowed(&self, path: &str, method: &Method) -> String {
        self.routes.allowed(path, method)
    }

    /// Routes one buffered request and returns the buffered response.
    pub async fn dispatch(&self, req: Request) -> Response {
        self.dispatch_until(req, None).await
    }

    async fn dispatch_until(&self, req: Request, deadline: Option<Instant>) -> Response {
        let mut ctx = self.pool.acquire(req);
        if let Some(deadline) = deadline {
            ctx.set_deadline(deadline);
        }

        let outcome = AssertUnwindSafe(self.route(&mut ctx)).catch_unwind().await;
        if let Err(payload) = outcome {
            self.recover(&mut ctx, payload);
        }

        ctx.take_response()
    }

    /// Serves a hyper request: collects the body within the read timeout,
    /// dispatches within the write timeout and converts the response.
    ///
    /// Usable as the body of a `hyper::service::service_fn` when embedding
    /// the dispatcher in a server of your own.
    pub async fn serve_http<B>(
        &self,
        req: http::Request<B>,
        remote_addr: Option<SocketAddr>,
        config: &ServerConfig,
    ) -> Result<http::Response<Full<Bytes>>, Infallible>
    where
        B: Body<Data = Bytes>,
        B::Error: fmt::Display,
    {
        let (parts, body) = req.into_parts();

        let collected = match config.read_timeout {
            Some(limit) => match tokio::time::timeout(limit, body.collect()).await {
                Ok(res) => res,
                Err(_) => {
                    warn!(method = %parts.method, path = parts.uri.path(), "request body read timed out");
                    return Ok(Response::plain(StatusCode::REQUEST_TIMEOUT, "request timeout").into_http());
                }
            },
            None => body.collect().await,
        };
        let body = match collected {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(method = %parts.method, path = parts.uri.path(), "malformed request body: {e}");
                return Ok(Response::plain(StatusCode::BAD_REQUEST, "bad request").into_http());
            }
        };

        let method = parts.method.clone();
        let path = parts.uri.path().to_owned();
        let mut req = Request::from_parts(parts, body);
        if let Some(addr) = remote_addr {
            req = req.with_remote_addr(addr);
        }

        let res = match config.write_timeout {
            Some(limit) => {
                let deadline = Instant::now() + limit;
                match tokio::time::timeout_at(deadline, self.dispatch_until(req, Some(deadline))).await {
                    Ok(res) => res,
                    Err(_) => {
                        warn!(%method, %path, "handler timed out");
                        Response::plain(StatusCode::SERVICE_UNAVAILABLE, "service unavailable")
                    }
                }
            }
            None => self.dispatch(req).await,
        };

        Ok(res.into_http())
    }

    async fn route(&self, ctx: &mut Context) {
        let method = ctx.method().clone();
        let path = ctx.path().to_owned();

        if let Some(tree) = self.routes.tree(&method) {
            match tree.get_value(&path, &mut ctx.params) {
                Ok(handler) => {
                    handler.call(ctx).await;
                    return;
                }
                Err(miss) if method != Method::CONNECT && path != "/" => {
                    if miss.tsr() && self.config.redirect_trailing_slash {
                        let raw = ctx.request().raw_path();
                        let target = match raw.strip_suffix('/') {
                            Some(trimmed) => trimmed.to_owned(),
                            None => format!("{raw}/"),
                        };
                        debug!(%method, %path, %target, "trailing slash redirect");
                        redirect(ctx, &method, &target);
                        return;
                    }

                    if self.config.redirect_fixed_path {
                        let fixed = tree.find_case_insensitive_path(
                            &clean_path(&path),
                            self.config.redirect_trailing_slash,
                        );
                        if let Some(fixed) = fixed {
                            let target = utf8_percent_encode(&fixed, PATH).to_string();
                            debug!(%method, %path, %target, "fixed path redirect");
                            redirect(ctx, &method, &target);
                            return;
                        }
                    }
                }
                Err(_) => {}
            }
        }

        if method == Method::OPTIONS && self.config.handle_options {
            if let Some(allow) = self.allow_header(&path, &method) {
                ctx.set_header(ALLOW, allow);
                if let Some(handler) = &self.global_options {
                    handler.call(ctx).await;
                }
                return;
            }
        } else if self.config.handle_method_not_allowed {
            if let Some(allow) = self.allow_header(&path, &method) {
                debug!(%method, %path, "method not allowed");
                ctx.set_header(ALLOW, allow);
                match &self.method_not_allowed {
                    Some(handler) => handler.call(ctx).await,
                    None => ctx.write_plain(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"),
                }
                return;
            }
        }

        match &self.not_found {
            Some(handler) => handler.call(ctx).await,
            None => ctx.write_plain(StatusCode::NOT_FOUND, "404 page not found"),
        }
    }

    fn allow_header(&self, path: &str, method: &Method) -> Option<HeaderValue> {
        let allow = self.routes.allowed(path, method);
        if allow.is_empty() {
            return None;
        }
        HeaderValue::from_str(&allow).ok()
    }

    fn recover(&self, ctx: &mut Context, payload: Box<dyn Any + Send>) {
        error!(
            method = %ctx.method(),
            path = ctx.path(),
            "handler panicked: {}",
            panic_message(payload.as_ref())
        );
        ctx.reset_response();

        let Some(handler) = &self.panic_handler else {
            ctx.write_plain(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
            return;
        };

        let nested = std::panic::catch_unwind(AssertUnwindSafe(|| (**handler)(ctx, payload.as_ref())));
        if let Err(again) = nested {
            error!("panic handler panicked: {}", panic_message(again.as_ref()));
            ctx.reset_response();
            ctx.write_plain(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
        }
    }
}

/// Bytes escaped when a decoded path goes back into a `Location` header.
const PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn redirect(ctx: &mut Context, method: &Method, target: &str) {
    let status = if *method == Method::GET {
        StatusCode::MOVED_PERMANENTLY
    } else {
        StatusCode::TEMPORARY_REDIRECT
    };
    let location = match ctx.request().query() {
        Some(query) => format!("{target}?{query}"),
        None => target.to_owned(),
    };
    ctx.redirect(status, &location);
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
