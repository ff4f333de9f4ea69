//! Request logging.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{Level, event};

use crate::context::Context;
use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::middleware::Interceptor;

/// Emits one event per request after the wrapped handler returns: method,
/// path, status and latency. `5xx` responses are logged at `ERROR`, `4xx` at
/// `WARN`, everything else at `INFO`.
///
/// ```rust
/// use wend::{Router, middleware::trace::Trace};
///
/// let app = Router::new().intercept(Trace::new());
/// ```
#[derive(Clone, Default)]
pub struct Trace {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Also log the request's logging fields.
    with_fields: bool,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Include the fields set with [`Context::set_field`] in each event.
    pub fn with_fields(self) -> Self {
        Self { inner: Arc::new(Inner { with_fields: true }) }
    }
}

impl Interceptor for Trace {
    fn wrap(&self, next: BoxedHandler) -> BoxedHandler {
        Arc::new(Traced { trace: self.clone(), next })
    }
}

struct Traced {
    trace: Trace,
    next: BoxedHandler,
}

impl Handler for Traced {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a> {
        Box::pin(async move {
            let start = Instant::now();
            self.next.call(ctx).await;
            let latency = start.elapsed();

            // Nothing written yet means the server will answer 200.
            let status = ctx.response_status().map_or(200, |s| s.as_u16());
            let method = ctx.method().clone();
            let path = ctx.path();
            let fields = self.trace.inner.with_fields.then(|| ctx.log_fields().to_string());
            let fields = fields.as_deref().unwrap_or("");

            match status {
                500.. => event!(Level::ERROR, %method, path, status, ?latency, fields, "request"),
                400..=499 => event!(Level::WARN, %method, path, status, ?latency, fields, "request"),
                _ => event!(Level::INFO, %method, path, status, ?latency, fields, "request"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;
    use crate::handler::sync_fn;

    #[tokio::test]
    async fn passes_response_through() {
        let handler = Trace::new()
            .with_fields()
            .wrap(sync_fn(|ctx| {
                ctx.set_field("user", 7);
                ctx.write_status(StatusCode::ACCEPTED);
            })
            .into_boxed_handler());

        let mut ctx = Context::new();
        handler.call(&mut ctx).await;

        assert_eq!(ctx.field("user"), Some("7"));
        assert_eq!(ctx.take_response().status(), StatusCode::ACCEPTED);
    }
}
