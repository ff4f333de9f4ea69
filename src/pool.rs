//! Context pool.
//!
//! Allocating a [`Context`] costs several heap allocations (parameter list,
//! header map, body buffer). The pool keeps released contexts and hands them
//! out again, so a warmed-up server allocates no contexts at steady state.
//!
//! # Release is tied to `Drop`
//!
//! [`ContextPool::acquire`] returns a [`PooledContext`] guard. The guard
//! returns its context to the pool when dropped: after a normal return, an
//! early return, a panic that unwinds through the request future, or the
//! request future itself being dropped mid-flight.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::context::Context;
use crate::request::Request;

/// A thread-safe pool of reusable contexts.
pub struct ContextPool {
    idle: Mutex<Vec<Box<Context>>>,
    max_idle: usize,
    allocated: AtomicUsize,
}

impl ContextPool {
    /// A pool that keeps at most `max_idle` released contexts. Contexts
    /// released beyond that are dropped.
    pub fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
            allocated: AtomicUsize::new(0),
        }
    }

    /// Takes an idle context (or allocates one) and binds `req` into it.
    pub fn acquire(&self, req: Request) -> PooledContext<'_> {
        let reused = self.idle.lock().pop();
        let mut ctx = reused.unwrap_or_else(|| {
            self.allocated.fetch_add(1, Ordering::Relaxed);
            Box::new(Context::new())
        });
        ctx.bind(req);
        PooledContext { pool: self, ctx: Some(ctx) }
    }

    /// Resets `ctx` and keeps it for reuse.
    pub fn release(&self, mut ctx: Box<Context>) {
        ctx.reset();

        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(ctx);
            return;
        }
        drop(idle);

        self.allocated.fetch_sub(1, Ordering::Relaxed);
    }

    /// Number of contexts currently alive, idle or in use.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Number of contexts waiting in the pool.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }
}

impl Default for ContextPool {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// A context on loan from a [`ContextPool`]. Returns itself on drop.
pub struct PooledContext<'p> {
    pool: &'p ContextPool,
    ctx: Option<Box<Context>>,
}

impl Deref for PooledContext<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        // Only `Drop` empties the slot.
        self.ctx.as_deref().unwrap_or_else(|| unreachable!("pooled context used after release"))
    }
}

impl DerefMut for PooledContext<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        self.ctx.as_deref_mut().unwrap_or_else(|| unreachable!("pooled context used after release"))
    }
}

impl Drop for PooledContext<'_> {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.pool.release(ctx);
        }
    }
}
