//! Circuit breaker.
//!
//! # States
//! - Closed: calls pass through; failures are counted
//! - Open: calls fail fast without running
//! - Half-Open: a limited number of trial calls decide whether to close again
//!
//! # Transitions
//! ```text
//! Closed    → Open:      consecutive failures reach `failure_threshold`
//! Open      → Half-Open: `open_timeout` has elapsed
//! Half-Open → Closed:    consecutive successes reach `success_threshold`
//! Half-Open → Open:      any trial fails
//! ```
//!
//! Every transition starts a new generation with zeroed counters. Results
//! reported for an older generation are ignored. In the closed state the
//! counters are also cleared every `interval`, when one is set, so failures
//! are counted over a rolling window.

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::context::Context;
use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::middleware::Interceptor;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Closed,
    HalfOpen,
    Open,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::HalfOpen => "half-open",
            Self::Open => "open",
        })
    }
}

/// Counters for the current generation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub consecutive_successes: u64,
    pub consecutive_failures: u64,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests += 1;
    }

    fn on_success(&mut self) {
        self.total_successes += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }
}

/// Thresholds that drive the state machine.
#[derive(Clone, Debug)]
pub struct Policy {
    /// Consecutive failures that open a closed breaker.
    pub failure_threshold: u64,
    /// Consecutive trial successes that close a half-open breaker.
    pub success_threshold: u64,
    /// Trial calls admitted concurrently while half-open.
    pub max_half_open: u64,
    /// How long the breaker stays open before probing.
    pub open_timeout: Duration,
    /// Rolling window for closed-state counters. `None` never clears them.
    pub interval: Option<Duration>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            max_half_open: 1,
            open_timeout: Duration::from_secs(60),
            interval: None,
        }
    }
}

/// Why [`CircuitBreaker::execute`] did not return the call's own result.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BreakerError<E> {
    #[error("circuit breaker is open")]
    Open,

    #[error("too many requests while the circuit breaker is half-open")]
    TooManyRequests,

    #[error("{0}")]
    Inner(E),
}

/// A named circuit breaker. Clones share the same state.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    policy: Policy,
    machine: Mutex<Machine>,
}

struct Machine {
    state: State,
    generation: u64,
    counts: Counts,
    expiry: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, policy: Policy) -> Self {
        let expiry = policy.interval.map(|i| Instant::now() + i);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                policy,
                machine: Mutex::new(Machine {
                    state: State::Closed,
                    generation: 0,
                    counts: Counts::default(),
                    expiry,
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> State {
        let mut m = self.inner.machine.lock();
        self.refresh(&mut m, Instant::now());
        m.state
    }

    pub fn counts(&self) -> Counts {
        let mut m = self.inner.machine.lock();
        self.refresh(&mut m, Instant::now());
        m.counts
    }

    /// Runs `f` if the breaker admits it and records the outcome.
    pub fn execute<T, E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<T, BreakerError<E>> {
        let permit = self.admit()?;
        let res = f();
        permit.finish(res.is_ok());
        res.map_err(BreakerError::Inner)
    }

    /// Async form of [`execute`](CircuitBreaker::execute). A future dropped
    /// before completion counts as a failure.
    pub async fn execute_async<T, E, F>(&self, fut: F) -> Result<T, BreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let permit = self.admit()?;
        let res = fut.await;
        permit.finish(res.is_ok());
        res.map_err(BreakerError::Inner)
    }

    fn admit<E>(&self) -> Result<Permit<'_>, BreakerError<E>> {
        let mut m = self.inner.machine.lock();
        self.refresh(&mut m, Instant::now());

        match m.state {
            State::Open => return Err(BreakerError::Open),
            State::HalfOpen if m.counts.requests >= self.inner.policy.max_half_open => {
                return Err(BreakerError::TooManyRequests);
            }
            _ => {}
        }

        m.counts.on_request();
        Ok(Permit { breaker: self, generation: m.generation, finished: false })
    }

    fn record(&self, generation: u64, success: bool) {
        let mut m = self.inner.machine.lock();
        let now = Instant::now();
        self.refresh(&mut m, now);
        if m.generation != generation {
            return;
        }

        let policy = &self.inner.policy;
        if success {
            m.counts.on_success();
            if m.state == State::HalfOpen && m.counts.consecutive_successes >= policy.success_threshold {
                self.transition(&mut m, State::Closed, now);
            }
        } else {
            m.counts.on_failure();
            match m.state {
                State::Closed if m.counts.consecutive_failures >= policy.failure_threshold => {
                    self.transition(&mut m, State::Open, now);
                }
                State::HalfOpen => self.transition(&mut m, State::Open, now),
                _ => {}
            }
        }
    }

    /// Applies time-driven transitions.
    fn refresh(&self, m: &mut Machine, now: Instant) {
        let expired = m.expiry.is_some_and(|at| now >= at);
        match m.state {
            State::Closed if expired => self.new_generation(m, now),
            State::Open if expired => self.transition(m, State::HalfOpen, now),
            _ => {}
        }
    }

    fn transition(&self, m: &mut Machine, to: State, now: Instant) {
        if m.state == to {
            return;
        }
        let from = m.state;
        m.state = to;
        self.new_generation(m, now);

        match to {
            State::Open => warn!(breaker = %self.inner.name, %from, %to, "circuit breaker opened"),
            _ => info!(breaker = %self.inner.name, %from, %to, "circuit breaker state changed"),
        }
    }

    fn new_generation(&self, m: &mut Machine, now: Instant) {
        m.generation += 1;
        m.counts = Counts::default();
        m.expiry = match m.state {
            State::Closed => self.inner.policy.interval.map(|i| now + i),
            State::Open => Some(now + self.inner.policy.open_timeout),
            State::HalfOpen => None,
        };
    }
}

/// An admitted call. Reports a failure on drop unless finished.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    finished: bool,
}

impl Permit<'_> {
    fn finish(mut self, success: bool) {
        self.finished = true;
        self.breaker.record(self.generation, success);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.breaker.record(self.generation, false);
        }
    }
}

// ── Interceptor ───────────────────────────────────────────────────────────────

/// Wrapped handlers are rejected with `503 Service Unavailable` while the
/// breaker is open. A `5xx` response, a panic or a dropped request counts as
/// a failure.
impl Interceptor for CircuitBreaker {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(Guarded { breaker: self.clone(), next })
    }
}

struct Guarded {
    breaker: CircuitBreaker,
    next: BoxedHandler,
}

impl Handler for Guarded {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a> {
        Box::pin(async move {
            let permit = match self.breaker.admit::<Infallible>() {
                Ok(permit) => permit,
                Err(e) => {
                    warn!(breaker = %self.breaker.name(), path = ctx.path(), "{e}");
                    ctx.write_status(StatusCode::SERVICE_UNAVAILABLE);
                    return;
                }
            };

            self.next.call(ctx).await;
            let failed = ctx.response_status().is_some_and(|s| s.is_server_error());
            permit.finish(!failed);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{handler_fn, sync_fn};

    fn policy() -> Policy {
        Policy {
            failure_threshold: 2,
            success_threshold: 2,
            max_half_open: 2,
            open_timeout: Duration::from_millis(30),
            interval: None,
        }
    }

    fn fail(cb: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        cb.execute(|| Err("boom"))
    }

    fn succeed(cb: &CircuitBreaker) -> Result<u32, BreakerError<&'static str>> {
        cb.execute(|| Ok(1))
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let cb = CircuitBreaker::new("db", policy());
        assert_eq!(fail(&cb), Err(BreakerError::Inner("boom")));
        assert_eq!(succeed(&cb), Ok(1));
        assert_eq!(fail(&cb), Err(BreakerError::Inner("boom")));
        assert_eq!(cb.state(), State::Closed);

        assert_eq!(fail(&cb), Err(BreakerError::Inner("boom")));
        assert_eq!(cb.state(), State::Open);
        assert_eq!(succeed(&cb), Err(BreakerError::Open));
    }

    #[tokio::test]
    async fn half_open_successes_close_the_breaker() {
        let cb = CircuitBreaker::new("db", policy());
        let _ = fail(&cb);
        let _ = fail(&cb);
        assert_eq!(cb.state(), State::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cb.state(), State::HalfOpen);

        assert_eq!(succeed(&cb), Ok(1));
        assert_eq!(cb.state(), State::HalfOpen);
        assert_eq!(succeed(&cb), Ok(1));
        assert_eq!(cb.state(), State::Closed);
        assert_eq!(cb.counts(), Counts::default());
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new("db", policy());
        let _ = fail(&cb);
        let _ = fail(&cb);
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(fail(&cb), Err(BreakerError::Inner("boom")));
        assert_eq!(cb.state(), State::Open);
    }

    #[test]
    fn half_open_limits_concurrent_trials() {
        let cb = CircuitBreaker::new("db", Policy { max_half_open: 1, ..policy() });
        {
            let mut m = cb.inner.machine.lock();
            cb.transition(&mut m, State::HalfOpen, Instant::now());
        }

        let nested = cb.execute(|| succeed(&cb));
        assert_eq!(nested, Err(BreakerError::Inner(BreakerError::TooManyRequests)));
        assert_eq!(cb.state(), State::Open);
    }

    #[tokio::test]
    async fn dropped_call_counts_as_failure() {
        let cb = CircuitBreaker::new("db", Policy { failure_threshold: 1, ..policy() });
        {
            let fut = cb.execute_async(std::future::pending::<Result<(), ()>>());
            let _ = tokio::time::timeout(Duration::from_millis(5), fut).await;
        }
        assert_eq!(cb.state(), State::Open);
    }

    #[tokio::test]
    async fn interceptor_counts_server_errors() {
        let cb = CircuitBreaker::new("api", Policy { failure_threshold: 1, ..policy() });
        let failing = cb.wrap(sync_fn(|ctx| ctx.write_status(StatusCode::BAD_GATEWAY)).into_boxed_handler());
        let healthy = cb.wrap(
            handler_fn(|ctx| Box::pin(async move { ctx.write_string("ok") })).into_boxed_handler(),
        );

        let mut ctx = Context::new();
        failing.call(&mut ctx).await;
        assert_eq!(ctx.take_response().status(), StatusCode::BAD_GATEWAY);
        assert_eq!(cb.state(), State::Open);

        let mut ctx = Context::new();
        healthy.call(&mut ctx).await;
        assert_eq!(ctx.take_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
