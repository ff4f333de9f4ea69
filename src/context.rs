//! Per-request context.
//!
//! A [`Context`] bundles everything a handler touches for one request: the
//! request itself, the buffered response, the captured path parameters,
//! lazily parsed form values, a typed value bag, logging fields and a
//! cancellation scope.
//!
//! Contexts are pooled. The dispatcher binds a fresh request into a recycled
//! context and resets it afterwards, so nothing a handler stores here
//! survives past the response.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderName, HeaderValue, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::cancel::{CancelHandle, CancelScope};
use crate::error::{BindError, ContextError};
use crate::fs;
use crate::params::Params;
use crate::request::Request;
use crate::response::{ContentType, Response, ResponseWriter};

/// The per-request handle passed to every handler and interceptor.
pub struct Context {
    req: Request,
    rw: ResponseWriter,
    pub(crate) params: Params,
    form: Vec<(String, String)>,
    form_parsed: bool,
    values: http::Extensions,
    fields: BTreeMap<String, String>,
    scope: CancelScope,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// A detached context, not bound to any request.
    ///
    /// Useful for exercising handlers directly in tests.
    pub fn new() -> Self {
        Self {
            req: Request::default(),
            rw: ResponseWriter::default(),
            params: Params::new(),
            form: Vec::new(),
            form_parsed: false,
            values: http::Extensions::new(),
            fields: BTreeMap::new(),
            scope: CancelScope::new(),
        }
    }

    /// A detached context bound to `req`.
    pub fn with_request(req: Request) -> Self {
        let mut ctx = Self::new();
        ctx.bind(req);
        ctx
    }

    pub(crate) fn bind(&mut self, req: Request) {
        self.req = req;
    }

    /// Returns the context to its freshly allocated state, keeping the
    /// allocations that are safe to reuse.
    pub(crate) fn reset(&mut self) {
        self.req = Request::default();
        self.rw.reset();
        self.params.clear();
        self.form.clear();
        self.form_parsed = false;
        self.values.clear();
        self.fields.clear();
        std::mem::take(&mut self.scope).cancel();
    }

    /// Bounds the request's scope by `deadline`.
    pub(crate) fn set_deadline(&mut self, deadline: Instant) {
        self.scope = self.scope.child_with_deadline(deadline);
    }

    pub(crate) fn take_response(&mut self) -> Response {
        self.rw.take()
    }

    pub(crate) fn reset_response(&mut self) {
        self.rw.reset();
    }

    pub(crate) fn response_status(&self) -> Option<StatusCode> {
        self.rw.status()
    }

    // ── Request ───────────────────────────────────────────────────────────

    pub fn request(&self) -> &Request {
        &self.req
    }

    pub fn method(&self) -> &Method {
        self.req.method()
    }

    pub fn path(&self) -> &str {
        self.req.path()
    }

    /// Returns a named path parameter.
    ///
    /// For the route `/users/:id`, `ctx.param("id")` on `/users/42` is
    /// `Some("42")`. Catch-all values carry no leading slash.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key)
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Returns the first form value for `key`.
    ///
    /// On first use this parses the URL query and, for `POST`, `PUT` and
    /// `PATCH` requests with an `application/x-www-form-urlencoded` body,
    /// the body. Body values take precedence over query values.
    pub fn form(&mut self, key: &str) -> Option<&str> {
        self.parse_form();
        self.form.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Returns every form value for `key`, body values first.
    pub fn form_values(&mut self, key: &str) -> Vec<&str> {
        self.parse_form();
        self.form.iter().filter(|(k, _)| k == key).map(|(_, v)| v.as_str()).collect()
    }

    fn parse_form(&mut self) {
        if self.form_parsed {
            return;
        }
        self.form_parsed = true;

        let urlencoded = matches!(*self.req.method(), Method::POST | Method::PUT | Method::PATCH)
            && self
                .req
                .header(CONTENT_TYPE.as_str())
                .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        if urlencoded {
            self.form.extend(form_urlencoded::parse(self.req.body()).into_owned());
        }
        if let Some(query) = self.req.query() {
            self.form.extend(form_urlencoded::parse(query.as_bytes()).into_owned());
        }
    }

    /// Decodes the request body as JSON.
    pub fn bind_json<T: DeserializeOwned>(&self) -> Result<T, BindError> {
        Ok(serde_json::from_slice(self.req.body())?)
    }

    /// Decodes the request body as XML.
    pub fn bind_xml<T: DeserializeOwned>(&self) -> Result<T, BindError> {
        quick_xml::de::from_reader(self.req.body().as_ref()).map_err(|e| BindError::Xml(e.to_string()))
    }

    // ── Response ──────────────────────────────────────────────────────────

    /// Whether a status has been written. Once it has, later writes of a
    /// status or headers are ignored and the chain stops advancing.
    pub fn written(&self) -> bool {
        self.rw.written()
    }

    pub fn write_status(&mut self, status: StatusCode) {
        self.rw.write_status(status);
    }

    /// Sets a response header, replacing any previous value.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        match self.rw.headers_mut() {
            Some(headers) => {
                headers.insert(name, value);
            }
            None => debug!(header = %name, "header set after status was written, ignored"),
        }
    }

    /// Appends a response header value.
    pub fn add_header(&mut self, name: HeaderName, value: HeaderValue) {
        match self.rw.headers_mut() {
            Some(headers) => {
                headers.append(name, value);
            }
            None => debug!(header = %name, "header added after status was written, ignored"),
        }
    }

    /// Writes `data` with the given content type, implying `200 OK` when no
    /// status was written yet.
    pub fn write_data(&mut self, content_type: ContentType, data: impl AsRef<[u8]>) {
        if let Some(headers) = self.rw.headers_mut() {
            headers.entry(CONTENT_TYPE).or_insert_with(|| content_type.header_value());
        }
        self.rw.write(data.as_ref());
    }

    /// Writes a `text/plain` body.
    pub fn write_string(&mut self, s: impl AsRef<str>) {
        self.write_data(ContentType::Text, s.as_ref());
    }

    /// Serialises `value` as a JSON body. Nothing is written on error.
    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), BindError> {
        let body = serde_json::to_vec(value)?;
        self.write_data(ContentType::Json, body);
        Ok(())
    }

    /// Serialises `value` as an XML body. Nothing is written on error.
    pub fn xml<T: Serialize>(&mut self, value: &T) -> Result<(), BindError> {
        let body = quick_xml::se::to_string(value).map_err(|e| BindError::Xml(e.to_string()))?;
        self.write_data(ContentType::Xml, body);
        Ok(())
    }

    /// Serves the file at `path` with a content type taken from its
    /// extension. A directory is served through its `index.html`.
    ///
    /// A missing file answers `404`, an unreadable one `403`, and any other
    /// I/O failure `500`.
    pub async fn write_file(&mut self, path: impl AsRef<Path>) {
        match fs::load(path.as_ref()).await {
            Ok(file) => {
                if let Some(headers) = self.rw.headers_mut() {
                    headers.entry(CONTENT_TYPE).or_insert_with(|| HeaderValue::from_static(file.content_type));
                }
                self.rw.write(&file.data);
            }
            Err(status) => self.write_plain(status, fs::status_text(status)),
        }
    }

    /// Writes `status` with a `text/plain` body.
    pub(crate) fn write_plain(&mut self, status: StatusCode, body: &str) {
        self.set_header(CONTENT_TYPE, ContentType::Text.header_value());
        self.rw.write_status(status);
        self.rw.write(body.as_bytes());
    }

    /// Writes a redirect to `location` with `status`.
    pub fn redirect(&mut self, status: StatusCode, location: &str) {
        match HeaderValue::from_str(location) {
            Ok(value) => self.set_header(LOCATION, value),
            Err(e) => error!(location, "invalid redirect location: {e}"),
        }
        self.rw.write_status(status);
    }

    // ── Values and log fields ─────────────────────────────────────────────

    /// Stores a typed value for later interceptors or handlers. A second
    /// value of the same type replaces the first.
    pub fn set_value<T: Clone + Send + Sync + 'static>(&mut self, value: T) {
        self.values.insert(value);
    }

    pub fn value<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.values.get::<T>()
    }

    /// Attaches a field to every log line this context emits.
    pub fn set_field(&mut self, key: impl Into<String>, value: impl fmt::Display) {
        self.fields.insert(key.into(), value.to_string());
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub(crate) fn log_fields(&self) -> impl fmt::Display + '_ {
        Fields(&self.fields)
    }

    pub fn log_info(&self, msg: impl fmt::Display) {
        info!(
            method = %self.req.method(),
            path = self.req.path(),
            fields = %Fields(&self.fields),
            "{msg}"
        );
    }

    pub fn log_error(&self, msg: impl fmt::Display) {
        error!(
            method = %self.req.method(),
            path = self.req.path(),
            fields = %Fields(&self.fields),
            "{msg}"
        );
    }

    // ── Cancellation ──────────────────────────────────────────────────────

    /// The context's cancellation scope. Clone it to observe cancellation
    /// from a background task.
    pub fn scope(&self) -> &CancelScope {
        &self.scope
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.scope.deadline()
    }

    /// Why the context completed, or `None` while it is live.
    pub fn err(&self) -> Option<ContextError> {
        self.scope.err()
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ContextError {
        self.scope.done().await
    }

    /// Derives a context with its own cancellation scope.
    ///
    /// The derived context shares the request, response and parameters with
    /// this one. It is never pooled. The parent scope is restored when the
    /// derived context is dropped, and cancelling the derived scope leaves the
    /// parent untouched.
    pub fn with_cancel(&mut self) -> (Scoped<'_>, CancelHandle) {
        let child = self.scope.child();
        self.derive(child)
    }

    /// Like [`with_cancel`](Context::with_cancel), additionally completing at
    /// `deadline` (or the parent's deadline, whichever is first).
    pub fn with_deadline(&mut self, deadline: Instant) -> (Scoped<'_>, CancelHandle) {
        let child = self.scope.child_with_deadline(deadline);
        self.derive(child)
    }

    pub fn with_timeout(&mut self, timeout: Duration) -> (Scoped<'_>, CancelHandle) {
        self.with_deadline(Instant::now() + timeout)
    }

    fn derive(&mut self, child: CancelScope) -> (Scoped<'_>, CancelHandle) {
        let handle = CancelHandle::new(child.clone());
        let parent = std::mem::replace(&mut self.scope, child);
        (Scoped { ctx: self, parent: Some(parent) }, handle)
    }

    /// Runs `job` on its own task and waits for it or for this context to
    /// complete, whichever happens first.
    ///
    /// If the context completes first, its error is returned immediately and
    /// **the job keeps running** in the background until it finishes on its
    /// own. Jobs that must stop promptly should watch a clone of
    /// [`scope`](Context::scope) themselves. A panic inside the job is
    /// resumed on the caller.
    pub async fn run<F, T>(&self, job: F) -> Result<T, ContextError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let task = tokio::spawn(job);

        tokio::select! {
            biased;

            res = task => match res {
                Ok(value) => Ok(value),
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => Err(ContextError::Canceled),
            },
            err = self.scope.done() => Err(err),
        }
    }
}

impl From<Request> for Context {
    fn from(req: Request) -> Self {
        Self::with_request(req)
    }
}

impl From<http::Request<Bytes>> for Context {
    fn from(req: http::Request<Bytes>) -> Self {
        Self::with_request(Request::new(req))
    }
}

/// A context with a derived cancellation scope.
///
/// Dereferences to the parent [`Context`]; see [`Context::with_cancel`].
pub struct Scoped<'a> {
    ctx: &'a mut Context,
    parent: Option<CancelScope>,
}

impl Deref for Scoped<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        self.ctx
    }
}

impl DerefMut for Scoped<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        self.ctx
    }
}

impl Drop for Scoped<'_> {
    fn drop(&mut self) {
        if let Some(parent) = self.parent.take() {
            self.ctx.scope = parent;
        }
    }
}

struct Fields<'a>(&'a BTreeMap<String, String>);

impl fmt::Display for Fields<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn ctx(req: http::Request<&'static str>) -> Context {
        let (parts, body) = req.into_parts();
        Context::with_request(Request::from_parts(parts, Bytes::from_static(body.as_bytes())))
    }

    #[test]
    fn form_prefers_body_over_query() {
        let mut c = ctx(
            http::Request::post("/search?q=query&page=2")
                .header("content-type", "application/x-www-form-urlencoded")
                .body("q=body&tag=a&tag=b")
                .unwrap(),
        );
        assert_eq!(c.form("q"), Some("body"));
        assert_eq!(c.form("page"), Some("2"));
        assert_eq!(c.form_values("tag"), ["a", "b"]);
        assert_eq!(c.form_values("q"), ["body", "query"]);
        assert_eq!(c.form("missing"), None);
    }

    #[test]
    fn form_ignores_body_on_get() {
        let mut c = ctx(
            http::Request::get("/?q=query")
                .header("content-type", "application/x-www-form-urlencoded")
                .body("q=body")
                .unwrap(),
        );
        assert_eq!(c.form("q"), Some("query"));
    }

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct User {
        name: String,
        age: u32,
    }

    #[test]
    fn binds_json_body() {
        let c = ctx(http::Request::post("/users").body(r#"{"name":"alice","age":30}"#).unwrap());
        let user: User = c.bind_json().unwrap();
        assert_eq!(user, User { name: "alice".into(), age: 30 });

        let bad = ctx(http::Request::post("/users").body("{").unwrap());
        assert!(matches!(bad.bind_json::<User>(), Err(BindError::Json(_))));
    }

    #[test]
    fn binds_xml_body() {
        let c = ctx(
            http::Request::post("/users")
                .body("<User><name>bob</name><age>7</age></User>")
                .unwrap(),
        );
        let user: User = c.bind_xml().unwrap();
        assert_eq!(user, User { name: "bob".into(), age: 7 });
    }

    #[test]
    fn json_sets_content_type() {
        let mut c = Context::new();
        c.json(&User { name: "alice".into(), age: 30 }).unwrap();

        let res = c.take_response();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.header("content-type"), Some("application/json; charset=utf-8"));
        assert_eq!(res.body().as_ref(), br#"{"name":"alice","age":30}"#);
    }

    #[test]
    fn headers_are_frozen_once_written() {
        let mut c = Context::new();
        c.write_status(StatusCode::ACCEPTED);
        c.set_header(HeaderName::from_static("x-late"), HeaderValue::from_static("1"));
        c.write_string("queued");

        let res = c.take_response();
        assert_eq!(res.status(), StatusCode::ACCEPTED);
        assert!(res.header("x-late").is_none());
    }

    #[test]
    fn reset_clears_request_state() {
        let mut c = ctx(http::Request::get("/a?x=1").body("").unwrap());
        c.params.push(b"id", b"1");
        c.set_value(42u32);
        c.set_field("request_id", "abc");
        assert_eq!(c.form("x"), Some("1"));
        c.write_string("hello");
        c.scope().cancel();

        c.reset();
        assert_eq!(c.path(), "/");
        assert!(c.params().is_empty());
        assert_eq!(c.value::<u32>(), None);
        assert_eq!(c.field("request_id"), None);
        assert_eq!(c.form("x"), None);
        assert!(!c.written());
        assert_eq!(c.err(), None);
    }

    #[test]
    fn converts_from_requests() {
        let mut c = Context::from(http::Request::get("/a?q=1").body(Bytes::new()).unwrap());
        assert_eq!(c.path(), "/a");
        assert_eq!(c.form("q"), Some("1"));

        let req = Request::new(http::Request::put("/b").body(Bytes::from_static(b"x")).unwrap());
        let c: Context = req.into();
        assert_eq!(*c.method(), Method::PUT);
        assert_eq!(c.request().body().as_ref(), b"x");
    }

    #[test]
    fn derived_scope_restores_parent() {
        let mut c = Context::new();
        {
            let (scoped, cancel) = c.with_cancel();
            cancel.cancel();
            assert_eq!(scoped.err(), Some(ContextError::Canceled));
        }
        assert_eq!(c.err(), None);
    }

    #[tokio::test]
    async fn run_returns_job_output() {
        let c = Context::new();
        let out = c.run(async { 7 }).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test]
    async fn run_gives_up_when_context_completes() {
        let mut c = Context::new();
        let (scoped, _cancel) = c.with_timeout(Duration::from_millis(20));

        let (tx, rx) = tokio::sync::oneshot::channel();
        let out = scoped
            .run(async move {
                tokio::time::sleep(Duration::from_millis(80)).await;
                let _ = tx.send("finished");
            })
            .await;
        assert_eq!(out, Err(ContextError::DeadlineExceeded));

        // The job was not aborted.
        assert_eq!(rx.await, Ok("finished"));
    }
}
