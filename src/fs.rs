//! Static file serving.
//!
//! [`Router::static_dir`](crate::Router::static_dir) mounts a directory
//! under a route prefix and [`Context::write_file`] serves one file. Both
//! read through `tokio::fs`. A directory is served through its `index.html`;
//! directory listings are never produced.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use http::StatusCode;
use tracing::{debug, error};

use crate::context::Context;
use crate::handler::{BoxFuture, Handler};
use crate::path::clean_path;
use crate::response::ContentType;

/// Name of the catch-all parameter a mounted directory is routed by.
pub(crate) const FILEPATH: &str = "filepath";

/// Serves files below `root` for the path captured in [`FILEPATH`].
#[derive(Clone)]
pub(crate) struct StaticDir {
    root: Arc<PathBuf>,
}

impl StaticDir {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: Arc::new(root.into()) }
    }

    /// Maps a captured request path onto the root. `..` elements are resolved
    /// lexically first, so the result never leaves the root.
    fn resolve(&self, captured: &str) -> PathBuf {
        let cleaned = clean_path(&format!("/{captured}"));
        self.root.join(cleaned.trim_start_matches('/'))
    }
}

impl Handler for StaticDir {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a> {
        Box::pin(async move {
            let path = self.resolve(ctx.param(FILEPATH).unwrap_or_default());
            ctx.write_file(path).await;
        })
    }
}

/// A file read into memory with the content type its extension implies.
pub(crate) struct Loaded {
    pub(crate) data: Vec<u8>,
    pub(crate) content_type: &'static str,
}

/// Reads `path`, falling back to `index.html` for directories.
///
/// Errors come back as the status the client should see.
pub(crate) async fn load(path: &Path) -> Result<Loaded, StatusCode> {
    let mut path = path.to_path_buf();
    if tokio::fs::metadata(&path).await.map_err(|e| status_for(&path, &e))?.is_dir() {
        path.push("index.html");
        if tokio::fs::metadata(&path).await.map_err(|e| status_for(&path, &e))?.is_dir() {
            return Err(StatusCode::NOT_FOUND);
        }
    }

    let data = tokio::fs::read(&path).await.map_err(|e| status_for(&path, &e))?;
    Ok(Loaded { data, content_type: content_type(&path) })
}

fn status_for(path: &Path, err: &std::io::Error) -> StatusCode {
    match err.kind() {
        ErrorKind::NotFound | ErrorKind::InvalidInput => {
            debug!(path = %path.display(), "file not found");
            StatusCode::NOT_FOUND
        }
        ErrorKind::PermissionDenied => {
            debug!(path = %path.display(), "file not readable");
            StatusCode::FORBIDDEN
        }
        _ => {
            error!(path = %path.display(), "reading file: {err}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Body written along with a failure status.
pub(crate) fn status_text(status: StatusCode) -> &'static str {
    match status {
        StatusCode::NOT_FOUND => "404 page not found",
        StatusCode::FORBIDDEN => "403 Forbidden",
        _ => "500 Internal Server Error",
    }
}

fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "html" | "htm" => ContentType::Html.as_str(),
        "json"         => ContentType::Json.as_str(),
        "txt"          => ContentType::Text.as_str(),
        "xml"          => ContentType::Xml.as_str(),
        "css"          => "text/css; charset=utf-8",
        "js" | "mjs"   => "text/javascript; charset=utf-8",
        "svg"          => "image/svg+xml",
        "png"          => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif"          => "image/gif",
        "webp"         => "image/webp",
        "ico"          => "image/x-icon",
        "wasm"         => "application/wasm",
        "pdf"          => "application/pdf",
        _              => ContentType::OctetStream.as_str(),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::Method;

    use super::*;
    use crate::request::Request;
    use crate::router::Router;

    fn get(uri: &str) -> Request {
        Request::new(http::Request::get(uri).body(Bytes::new()).unwrap())
    }

    /// `<tmp>/secret.txt` next to a served `<tmp>/public`.
    fn site() -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let public = tmp.path().join("public");
        std::fs::create_dir_all(public.join("docs")).unwrap();
        std::fs::create_dir_all(public.join("empty")).unwrap();
        std::fs::write(tmp.path().join("secret.txt"), "secret").unwrap();
        std::fs::write(public.join("index.html"), "<h1>home</h1>").unwrap();
        std::fs::write(public.join("site.CSS"), "body{}").unwrap();
        std::fs::write(public.join("docs").join("index.html"), "docs").unwrap();
        (tmp, public)
    }

    #[tokio::test]
    async fn static_dir_serves_files() {
        let (_tmp, public) = site();
        let d = Router::new().static_dir("/static", &public).into_dispatcher();

        let res = d.dispatch(get("/static/site.CSS")).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.header("content-type"), Some("text/css; charset=utf-8"));
        assert_eq!(res.body().as_ref(), b"body{}");

        let res = d.dispatch(get("/static/")).await;
        assert_eq!(res.body().as_ref(), b"<h1>home</h1>");
        assert_eq!(res.header("content-type"), Some(ContentType::Html.as_str()));

        let res = d.dispatch(get("/static/docs")).await;
        assert_eq!(res.body().as_ref(), b"docs");

        let res = d.dispatch(get("/static/empty/")).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = d.dispatch(get("/static/missing.png")).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(res.body().as_ref(), b"404 page not found");
    }

    #[tokio::test]
    async fn static_dir_stays_inside_root() {
        let (_tmp, public) = site();
        let d = Router::new().static_dir("/static", &public).into_dispatcher();

        for uri in ["/static/../secret.txt", "/static/%2e%2e/secret.txt", "/static/docs/..%2F..%2Fsecret.txt"] {
            let res = d.dispatch(get(uri)).await;
            assert_eq!(res.status(), StatusCode::NOT_FOUND, "{uri}");
            assert_ne!(res.body().as_ref(), b"secret", "{uri}");
        }

        assert!(d.lookup(&Method::GET, "/static/a/b").is_ok());
        assert!(d.lookup(&Method::POST, "/static/a/b").is_err());
    }

    #[tokio::test]
    async fn write_file_sets_type_and_status() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("user.json");
        std::fs::write(&file, r#"{"id":7}"#).unwrap();

        let mut ctx = Context::new();
        ctx.write_file(&file).await;
        let res = ctx.take_response();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.header("content-type"), Some(ContentType::Json.as_str()));
        assert_eq!(res.body().as_ref(), br#"{"id":7}"#);

        let mut ctx = Context::new();
        ctx.write_file(tmp.path().join("nope.bin")).await;
        assert_eq!(ctx.take_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unknown_extensions_are_octet_stream() {
        assert_eq!(content_type(Path::new("a.tar.gz")), ContentType::OctetStream.as_str());
        assert_eq!(content_type(Path::new("Makefile")), ContentType::OctetStream.as_str());
        assert_eq!(content_type(Path::new("logo.PNG")), "image/png");
    }
}
