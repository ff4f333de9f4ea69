//! # wend
//!
//! An embeddable HTTP request router: a radix tree per method, pooled
//! request contexts and a fixed fallback policy for everything that does not
//! match exactly.
//!
//! ## What you get
//!
//! - Routing in O(path-length) with `:name` parameters and `*name`
//!   catch-alls. Conflicting patterns are rejected at startup.
//! - Trailing-slash and case-correcting redirects, automatic `OPTIONS`
//!   replies, `405 Method Not Allowed` with an `Allow` header.
//! - Interceptors around all routes, a group of routes, or a single route.
//! - Static directories mounted under a prefix with [`Router::static_dir`].
//! - Panic containment: a panicking handler answers `500` and the server
//!   keeps going.
//! - Graceful shutdown on SIGTERM / Ctrl-C or through a [`ShutdownHandle`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use wend::{BoxFuture, Context, Router, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Router::new()
//!         .get("/users/:id", get_user)
//!         .post("/users", create_user);
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//!
//! fn get_user(ctx: &mut Context) -> BoxFuture<'_> {
//!     Box::pin(async move {
//!         let id = ctx.param("id").unwrap_or("unknown").to_owned();
//!         let _ = ctx.json(&serde_json::json!({ "id": id }));
//!     })
//! }
//!
//! fn create_user(ctx: &mut Context) -> BoxFuture<'_> {
//!     Box::pin(async move {
//!         if ctx.request().body().is_empty() {
//!             ctx.write_status(http::StatusCode::BAD_REQUEST);
//!             return;
//!         }
//!         ctx.set_header(http::header::LOCATION, http::HeaderValue::from_static("/users/99"));
//!         ctx.write_status(http::StatusCode::CREATED);
//!     })
//! }
//! ```

mod cancel;
mod config;
mod context;
mod dispatch;
mod error;
mod fs;
mod group;
mod handler;
mod params;
mod path;
mod pool;
mod request;
mod response;
mod router;
mod server;
mod tree;

pub mod middleware;

pub use cancel::{CancelHandle, CancelScope};
pub use config::{RouterConfig, ServerConfig};
pub use context::{Context, Scoped};
pub use dispatch::Dispatcher;
pub use error::{BindError, ContextError, Error, MatchError, RouteError};
pub use group::Group;
pub use handler::{BoxFuture, BoxedHandler, Handler, HandlerChain, PanicHandler, SyncHandler, handler_fn, sync_fn};
pub use middleware::Interceptor;
pub use params::{Param, Params};
pub use path::clean_path;
pub use pool::{ContextPool, PooledContext};
pub use request::Request;
pub use response::{ContentType, Response};
pub use router::Router;
pub use server::{Server, ShutdownHandle};
pub use tree::RouteTree;
