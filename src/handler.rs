//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! The router holds handlers of many concrete types in one tree per method,
//! so they are stored as trait objects (`Arc<dyn Handler>`). A handler
//! borrows the request's [`Context`] mutably for as long as its future runs,
//! which is why the returned future carries the context's lifetime:
//!
//! ```text
//! fn hello(ctx: &mut Context) -> BoxFuture<'_> { … }   ← user writes this
//!        ↓ router.get("/", hello)
//! hello.into_boxed_handler()                          ← Handler blanket impl
//!        ↓  stored as BoxedHandler = Arc<dyn Handler>
//! handler.call(&mut ctx)  at request time             ← one vtable dispatch
//! ```
//!
//! Closures cannot name the lifetime in their own signature, so they go
//! through [`handler_fn`], which pins the signature down for the compiler:
//!
//! ```rust
//! use wend::{Context, handler_fn};
//!
//! let greet = handler_fn(|ctx: &mut Context| Box::pin(async move {
//!     ctx.write_string("hello");
//! }));
//! ```
//!
//! Handlers that never await can use [`sync_fn`] instead.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;

/// A heap-allocated, type-erased handler future borrowing the context.
pub type BoxFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// A heap-allocated, type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn Handler>;

/// Called with the context and the panic payload when a handler panics.
pub type PanicHandler = Arc<dyn Fn(&mut Context, &(dyn Any + Send)) + Send + Sync>;

// ── Handler trait ─────────────────────────────────────────────────────────────

/// Implemented by everything that can serve a request.
///
/// Satisfied automatically by any function or closure with the signature
/// `for<'a> Fn(&'a mut Context) -> BoxFuture<'a>`. Implement it directly
/// for handlers that carry state.
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a>;

    fn into_boxed_handler(self) -> BoxedHandler
    where
        Self: Sized,
    {
        Arc::new(self)
    }
}

impl<F> Handler for F
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a> {
        self(ctx)
    }
}

/// Fixes a closure's signature so it satisfies [`Handler`].
pub fn handler_fn<F>(f: F) -> F
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a> + Send + Sync + 'static,
{
    f
}

// ── Synchronous handlers ──────────────────────────────────────────────────────

/// Wraps a synchronous closure as a [`Handler`].
///
/// ```rust
/// use wend::{Router, sync_fn};
///
/// let app = Router::new().get("/ping", sync_fn(|ctx| ctx.write_string("pong")));
/// ```
pub fn sync_fn<F>(f: F) -> SyncHandler<F>
where
    F: Fn(&mut Context) + Send + Sync + 'static,
{
    SyncHandler(f)
}

/// See [`sync_fn`].
pub struct SyncHandler<F>(F);

impl<F> Handler for SyncHandler<F>
where
    F: Fn(&mut Context) + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a> {
        (self.0)(ctx);
        Box::pin(std::future::ready(()))
    }
}

// ── Handler chains ────────────────────────────────────────────────────────────

/// An ordered sequence of handlers registered for one route.
///
/// Steps run strictly in registration order. Before each step after the
/// first, the context's written flag is checked: once a step has written a
/// status, the remaining steps are skipped.
#[derive(Clone)]
pub struct HandlerChain {
    steps: Arc<[BoxedHandler]>,
}

impl HandlerChain {
    pub fn new(steps: Vec<BoxedHandler>) -> Self {
        Self { steps: steps.into() }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub async fn run(&self, ctx: &mut Context) {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 && ctx.written() {
                return;
            }
            step.call(ctx).await;
        }
    }
}

impl Handler for HandlerChain {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a> {
        Box::pin(self.run(ctx))
    }
}
