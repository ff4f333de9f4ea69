//! Token-bucket rate limiting.
//!
//! Tokens are replenished continuously at a fixed rate up to the bucket's
//! burst capacity. [`RateLimiter::allow`] never waits. [`RateLimiter::wait`]
//! suspends until a token is available or the given scope completes.
//!
//! As an [`Interceptor`] the limiter admits a request only when a token is
//! available and otherwise answers `429 Too Many Requests` without calling
//! the wrapped handler.

use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::warn;

use crate::cancel::CancelScope;
use crate::context::Context;
use crate::error::ContextError;
use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::middleware::Interceptor;

/// A shared token bucket. Clones share the same bucket.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

struct Inner {
    bucket: Mutex<Bucket>,
    /// Tokens added per second.
    rate: f64,
    burst: f64,
    rejection: StatusCode,
}

struct Bucket {
    tokens: f64,
    last: Instant,
}

impl RateLimiter {
    /// `per_second` tokens per second with room for a single token, so
    /// requests are admitted evenly spaced.
    ///
    /// # Panics
    ///
    /// Panics if `per_second` is zero.
    pub fn new(per_second: u32) -> Self {
        Self::with_burst(per_second, 1)
    }

    /// `per_second` tokens per second, holding at most `burst` tokens. The
    /// bucket starts full.
    ///
    /// # Panics
    ///
    /// Panics if `per_second` or `burst` is zero.
    pub fn with_burst(per_second: u32, burst: u32) -> Self {
        assert!(per_second > 0, "rate limiter needs a positive rate");
        assert!(burst > 0, "rate limiter needs a positive burst");

        let burst = f64::from(burst);
        Self {
            inner: Arc::new(Inner {
                bucket: Mutex::new(Bucket { tokens: burst, last: Instant::now() }),
                rate: f64::from(per_second),
                burst,
                rejection: StatusCode::TOO_MANY_REQUESTS,
            }),
        }
    }

    /// Status written when the interceptor rejects a request.
    /// Defaults to `429 Too Many Requests`.
    ///
    /// Call before the limiter is cloned or installed.
    pub fn rejection_status(mut self, status: StatusCode) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.rejection = status;
        }
        self
    }

    /// Takes one token if available.
    pub fn allow(&self) -> bool {
        self.allow_n(1)
    }

    /// Takes `n` tokens if all of them are available; takes none otherwise.
    pub fn allow_n(&self, n: u32) -> bool {
        self.take(f64::from(n)).is_ok()
    }

    /// Waits for one token. Returns the scope's error if it completes first.
    pub async fn wait(&self, scope: &CancelScope) -> Result<(), ContextError> {
        self.wait_n(scope, 1).await
    }

    /// Waits for `n` tokens, taking them one at a time so `n` may exceed the
    /// burst. Tokens already taken are not returned when the scope completes.
    pub async fn wait_n(&self, scope: &CancelScope, n: u32) -> Result<(), ContextError> {
        for _ in 0..n {
            loop {
                if let Some(err) = scope.err() {
                    return Err(err);
                }
                let delay = match self.take(1.0) {
                    Ok(()) => break,
                    Err(delay) => delay,
                };
                tokio::select! {
                    err = scope.done() => return Err(err),
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
        Ok(())
    }

    /// Takes `n` tokens, or returns how long until they would be available.
    fn take(&self, n: f64) -> Result<(), Duration> {
        let mut bucket = self.inner.bucket.lock();

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.inner.rate).min(self.inner.burst);
        bucket.last = now;

        if bucket.tokens >= n {
            bucket.tokens -= n;
            return Ok(());
        }
        Err(Duration::from_secs_f64((n - bucket.tokens) / self.inner.rate))
    }
}

impl Interceptor for RateLimiter {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(Admit { limiter: self.clone(), next })
    }
}

struct Admit {
    limiter: RateLimiter,
    next: BoxedHandler,
}

impl Handler for Admit {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a> {
        Box::pin(async move {
            if !self.limiter.allow() {
                warn!(method = %ctx.method(), path = ctx.path(), "rate limit exceeded");
                ctx.write_status(self.limiter.inner.rejection);
                return;
            }
            self.next.call(ctx).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::sync_fn;

    #[test]
    fn burst_then_reject() {
        let limiter = RateLimiter::with_burst(1, 3);
        assert!(limiter.allow());
        assert!(limiter.allow_n(2));
        assert!(!limiter.allow());
    }

    #[test]
    fn allow_n_is_all_or_nothing() {
        let limiter = RateLimiter::with_burst(1, 2);
        assert!(!limiter.allow_n(3));
        assert!(limiter.allow_n(2));
    }

    #[tokio::test]
    async fn wait_blocks_until_refill() {
        let limiter = RateLimiter::new(50);
        let scope = CancelScope::new();
        assert!(limiter.allow());

        let start = std::time::Instant::now();
        limiter.wait(&scope).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn wait_n_returns_on_cancel() {
        let limiter = RateLimiter::new(1);
        let scope = CancelScope::new();
        assert!(limiter.allow());

        let waiting = {
            let scope = scope.clone();
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.wait_n(&scope, 5).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        scope.cancel();

        assert_eq!(waiting.await.unwrap(), Err(ContextError::Canceled));
    }

    #[tokio::test]
    async fn interceptor_rejects_without_calling_next() {
        let limiter = RateLimiter::new(1).rejection_status(StatusCode::SERVICE_UNAVAILABLE);
        let handler = limiter.wrap(sync_fn(|ctx| ctx.write_string("ok")).into_boxed_handler());

        let mut ctx = Context::new();
        handler.call(&mut ctx).await;
        assert_eq!(ctx.take_response().status(), StatusCode::OK);

        let mut ctx = Context::new();
        handler.call(&mut ctx).await;
        let res = ctx.take_response();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(res.body().is_empty());
    }
}
