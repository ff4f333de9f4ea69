//! Cancellation scopes.
//!
//! Every [`Context`](crate::Context) carries a [`CancelScope`]. A scope
//! completes when it is cancelled explicitly, when its deadline passes, or
//! when any ancestor scope completes. Completion is observed either by polling
//! [`err`](CancelScope::err) or by awaiting [`done`](CancelScope::done).
//!
//! Scopes are cheap to clone and `'static`, so background tasks can hold one
//! after the request that created it has returned.

use std::sync::Arc;
use std::time::Duration;

use futures::future::select_all;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::ContextError;

/// A node in a tree of cancellation scopes.
#[derive(Clone)]
pub struct CancelScope {
    inner: Arc<Inner>,
}

struct Inner {
    state: watch::Sender<Option<ContextError>>,
    parent: Option<CancelScope>,
    /// Earliest deadline along the ancestor chain.
    deadline: Option<Instant>,
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelScope {
    /// A root scope: no parent and no deadline.
    pub fn new() -> Self {
        Self::build(None, None)
    }

    fn build(parent: Option<CancelScope>, deadline: Option<Instant>) -> Self {
        let (state, _) = watch::channel(None);
        Self { inner: Arc::new(Inner { state, parent, deadline }) }
    }

    /// A child scope that completes with this one.
    pub fn child(&self) -> Self {
        Self::build(Some(self.clone()), self.inner.deadline)
    }

    /// A child scope that also completes at `deadline`.
    ///
    /// The child never outlives its parent's deadline: the earlier of the
    /// two applies.
    pub fn child_with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.inner.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Self::build(Some(self.clone()), Some(deadline))
    }

    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        self.child_with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Cancels this scope and, through it, every descendant.
    /// Cancelling an already completed scope has no effect.
    pub fn cancel(&self) {
        self.complete(ContextError::Canceled);
    }

    /// Records `err` unless the scope already completed. Returns the reason
    /// that stuck.
    fn complete(&self, err: ContextError) -> ContextError {
        let mut stuck = err;
        self.inner.state.send_if_modified(|state| match state {
            Some(existing) => {
                stuck = *existing;
                false
            }
            None => {
                *state = Some(err);
                true
            }
        });
        stuck
    }

    /// Why the scope completed, or `None` while it is still live.
    pub fn err(&self) -> Option<ContextError> {
        let mut scope = Some(self);
        while let Some(s) = scope {
            if let Some(err) = *s.inner.state.borrow() {
                return Some(err);
            }
            scope = s.inner.parent.as_ref();
        }

        match self.inner.deadline {
            Some(at) if Instant::now() >= at => Some(self.complete(ContextError::DeadlineExceeded)),
            _ => None,
        }
    }

    /// Resolves once the scope completes.
    pub async fn done(&self) -> ContextError {
        // Subscribe before the first check so a cancel landing in between is
        // still seen as a change.
        let mut receivers: Vec<_> = self.ancestry().map(|s| s.inner.state.subscribe()).collect();

        loop {
            if let Some(err) = self.err() {
                return err;
            }

            let changed = select_all(receivers.iter_mut().map(|rx| Box::pin(rx.changed())));
            match self.inner.deadline {
                Some(at) => {
                    tokio::select! {
                        _ = changed => {}
                        () = tokio::time::sleep_until(at) => {}
                    }
                }
                None => {
                    changed.await;
                }
            }
        }
    }

    fn ancestry(&self) -> impl Iterator<Item = &CancelScope> {
        std::iter::successors(Some(self), |s| s.inner.parent.as_ref())
    }
}

/// Cancels the scope it was created with.
///
/// Dropping the handle does not cancel anything.
#[derive(Clone)]
pub struct CancelHandle {
    scope: CancelScope,
}

impl CancelHandle {
    pub(crate) fn new(scope: CancelScope) -> Self {
        Self { scope }
    }

    pub fn cancel(&self) {
        self.scope.cancel();
    }
}
