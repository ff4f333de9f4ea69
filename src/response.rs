//! Response sink and finished response.
//!
//! Handlers never build a response value themselves. They write through the
//! [`Context`](crate::Context), which buffers into a [`ResponseWriter`]. When
//! the request finishes, the dispatcher takes the buffered state out as a
//! [`Response`].

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, StatusCode};
use http_body_util::Full;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for [`Context::write_data`](crate::Context::write_data).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentType {
    Html,        // text/html; charset=utf-8
    Json,        // application/json; charset=utf-8
    OctetStream, // application/octet-stream
    Text,        // text/plain; charset=utf-8
    Xml,         // application/xml; charset=utf-8
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json; charset=utf-8",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml; charset=utf-8",
        }
    }

    pub(crate) fn header_value(&self) -> HeaderValue {
        HeaderValue::from_static(self.as_str())
    }
}

// ── ResponseWriter ────────────────────────────────────────────────────────────

/// Buffered response state owned by a pooled context.
///
/// The first status written wins. Writing body bytes before any status
/// implies `200 OK`. Headers can only change before the status is written.
#[derive(Default)]
pub(crate) struct ResponseWriter {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ResponseWriter {
    pub(crate) fn written(&self) -> bool {
        self.status.is_some()
    }

    pub(crate) fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub(crate) fn write_status(&mut self, status: StatusCode) {
        if self.status.is_none() {
            self.status = Some(status);
        }
    }

    pub(crate) fn headers_mut(&mut self) -> Option<&mut HeaderMap> {
        if self.written() { None } else { Some(&mut self.headers) }
    }

    pub(crate) fn write(&mut self, data: &[u8]) {
        self.write_status(StatusCode::OK);
        self.body.extend_from_slice(data);
    }

    /// Clears status, headers and body, keeping the body allocation.
    pub(crate) fn reset(&mut self) {
        self.status = None;
        self.headers.clear();
        self.body.clear();
    }

    /// Moves the buffered state out, leaving the writer reset.
    pub(crate) fn take(&mut self) -> Response {
        let status = self.status.take().unwrap_or(StatusCode::OK);
        let headers = std::mem::take(&mut self.headers);
        let body = Bytes::copy_from_slice(&self.body);
        self.body.clear();
        Response { status, headers, body }
    }
}

// ── Response ──────────────────────────────────────────────────────────────────

/// A finished HTTP response, as produced by
/// [`Dispatcher::dispatch`](crate::Dispatcher::dispatch).
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    pub(crate) fn plain(status: StatusCode, body: &'static str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, ContentType::Text.header_value());
        Self { status, headers, body: Bytes::from_static(body.as_bytes()) }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header lookup; values that are not visible ASCII are treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Converts into the `http` response hyper writes to the wire.
    pub fn into_http(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res.headers_mut().remove(CONTENT_LENGTH);
        res
    }
}
