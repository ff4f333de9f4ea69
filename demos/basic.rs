//! Minimal wend example: CRUD-style JSON endpoints behind a versioned group.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/api/v1/users/42
//!   curl -X POST http://localhost:3000/api/v1/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl -X DELETE http://localhost:3000/api/v1/users/42
//!   curl -i http://localhost:3000/API/V1/USERS/42     # 301 to the canonical path
//!   curl -i -X OPTIONS http://localhost:3000/api/v1/users/42
//!   curl http://localhost:3000/static/css/site.css   # reads ./public/css/site.css

use std::time::Duration;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use wend::middleware::ratelimit::RateLimiter;
use wend::middleware::trace::Trace;
use wend::{BoxFuture, ContentType, Context, Router, Server, sync_fn};

#[derive(Serialize)]
struct User {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct CreateUser {
    name: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let app = Router::new()
        .intercept(Trace::new().with_fields())
        .static_dir("/static", "./public")
        .group("/api/v1", |api| {
            api.intercept(RateLimiter::with_burst(100, 200));
            api.get("/users/:id", get_user)
                .post("/users", create_user)
                .delete("/users/:id", sync_fn(|ctx| ctx.write_status(StatusCode::NO_CONTENT)));
        });

    Server::bind("0.0.0.0:3000")
        .timeout(Duration::from_secs(10))
        .serve(app)
        .await
        .expect("server error");
}

// GET /api/v1/users/:id
fn get_user(ctx: &mut Context) -> BoxFuture<'_> {
    Box::pin(async move {
        let id = ctx.param("id").unwrap_or("unknown").to_owned();
        ctx.set_field("user", &id);

        let user = User { id, name: "alice".to_owned() };
        if let Err(e) = ctx.json(&user) {
            ctx.log_error(format_args!("encoding user: {e}"));
            ctx.write_status(StatusCode::INTERNAL_SERVER_ERROR);
        }
    })
}

// POST /api/v1/users
fn create_user(ctx: &mut Context) -> BoxFuture<'_> {
    Box::pin(async move {
        let input: CreateUser = match ctx.bind_json() {
            Ok(input) => input,
            Err(e) => {
                ctx.log_info(format_args!("rejected body: {e}"));
                ctx.write_status(StatusCode::BAD_REQUEST);
                return;
            }
        };

        // Headers lock once the status is written.
        ctx.set_header(http::header::LOCATION, http::HeaderValue::from_static("/api/v1/users/99"));
        ctx.set_header(http::header::CONTENT_TYPE, http::HeaderValue::from_static(ContentType::Json.as_str()));
        ctx.write_status(StatusCode::CREATED);
        let _ = ctx.json(&User { id: "99".to_owned(), name: input.name });
    })
}
