//! Interceptors.
//!
//! An interceptor turns the next handler into a replacement handler. The
//! replacement may run logic before calling `next`, call `next` and then
//! post-process, or skip `next` entirely to short-circuit the request.
//!
//! ```rust
//! use std::sync::Arc;
//! use wend::{BoxedHandler, Context, Handler, Router, handler_fn, sync_fn};
//!
//! fn stamp(next: BoxedHandler) -> BoxedHandler {
//!     Arc::new(handler_fn(move |ctx: &mut Context| {
//!         let next = next.clone();
//!         Box::pin(async move {
//!             ctx.set_field("stamped", true);
//!             next.call(ctx).await;
//!         })
//!     }))
//! }
//!
//! let app = Router::new()
//!     .intercept(stamp)
//!     .get("/", sync_fn(|ctx| ctx.write_string("ok")));
//! ```
//!
//! # Composition order
//!
//! Interceptors are applied when a route is registered. Global interceptors
//! are outermost, then each enclosing group's interceptors from the outside
//! in, then the route's handler chain. Within one list, the first interceptor
//! added is the outermost. An interceptor added after a route was registered
//! does not affect that route.
//!
//! Built-in interceptors:
//! - [`trace::Trace`]: one log line per request with method, path, status, latency
//! - [`ratelimit::RateLimiter`]: token-bucket admission control
//! - [`circuitbreaker::CircuitBreaker`]: fail fast while a route keeps failing

pub mod circuitbreaker;
pub mod ratelimit;
pub mod trace;

use std::sync::Arc;

use crate::handler::BoxedHandler;

/// A transform from "next handler" to "replacement handler".
pub trait Interceptor: Send + Sync + 'static {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler;
}

impl<F> Interceptor for F
where
    F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
{
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        self(next)
    }
}

/// An ordered list of interceptors, first entry outermost.
#[derive(Clone, Default)]
pub(crate) struct Interceptors {
    list: Vec<Arc<dyn Interceptor>>,
}

impl Interceptors {
    pub(crate) fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.list.push(interceptor);
    }

    pub(crate) fn extend(&mut self, other: &Interceptors) {
        self.list.extend(other.list.iter().cloned());
    }

    /// Folds the list around `handler`, innermost first.
    pub(crate) fn wrap(&self, handler: BoxedHandler) -> BoxedHandler {
        self.list.iter().rev().fold(handler, |next, i| i.wrap(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::handler::{Handler, handler_fn};

    fn tag(name: &'static str) -> impl Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static {
        move |next: BoxedHandler| -> BoxedHandler {
            Arc::new(handler_fn(move |ctx: &mut Context| {
                let next = next.clone();
                Box::pin(async move {
                    let before = ctx.field("order").unwrap_or_default().to_owned();
                    ctx.set_field("order", format!("{before}>{name}"));
                    next.call(ctx).await;
                    let after = ctx.field("order").unwrap_or_default().to_owned();
                    ctx.set_field("order", format!("{after}<{name}"));
                })
            }))
        }
    }

    #[tokio::test]
    async fn first_added_is_outermost() {
        let mut list = Interceptors::default();
        list.push(Arc::new(tag("global")));
        list.push(Arc::new(tag("group")));

        let route = handler_fn(|ctx: &mut Context| {
            Box::pin(async move {
                let before = ctx.field("order").unwrap_or_default().to_owned();
                ctx.set_field("order", format!("{before}>route"));
            })
        });

        let wrapped = list.wrap(route.into_boxed_handler());
        let mut ctx = Context::new();
        wrapped.call(&mut ctx).await;

        assert_eq!(ctx.field("order"), Some(">global>group>route<group<global"));
    }
}
