//! Incoming HTTP request type.

use std::net::SocketAddr;

use bytes::Bytes;
use http::request::Parts;
use http::{HeaderMap, Method, Uri};
use percent_encoding::percent_decode_str;

/// An incoming HTTP request with its body already collected.
pub struct Request {
    parts: Parts,
    /// The decoded path, when decoding changed it.
    decoded: Option<String>,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    /// Wraps an `http::Request` whose body has been read into memory.
    ///
    /// ```rust
    /// use wend::Request;
    ///
    /// let req = Request::new(
    ///     http::Request::get("/users/42?fields=name").body(bytes::Bytes::new()).unwrap(),
    /// );
    /// assert_eq!(req.path(), "/users/42");
    /// assert_eq!(req.query(), Some("fields=name"));
    /// ```
    pub fn new(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Self::from_parts(parts, body)
    }

    pub fn from_parts(parts: Parts, body: Bytes) -> Self {
        let raw = parts.uri.path();
        let decoded = raw
            .contains('%')
            .then(|| percent_decode_str(raw).decode_utf8_lossy().into_owned());
        Self { parts, decoded, body, remote_addr: None }
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    /// The percent-decoded request path. Routes are matched against this.
    ///
    /// Escapes that do not decode to UTF-8 are replaced with U+FFFD.
    pub fn path(&self) -> &str {
        self.decoded.as_deref().unwrap_or_else(|| self.parts.uri.path())
    }

    /// The path exactly as it appeared on the request line.
    pub fn raw_path(&self) -> &str {
        self.parts.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.parts.uri.query()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// Header lookup. Names are case-insensitive; values that are not
    /// visible ASCII are treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Peer address, when the request arrived through [`Server`](crate::Server).
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Typed extensions carried on the underlying `http` request.
    pub fn extensions(&self) -> &http::Extensions {
        &self.parts.extensions
    }
}

impl Default for Request {
    fn default() -> Self {
        let (parts, ()) = http::Request::new(()).into_parts();
        Self::from_parts(parts, Bytes::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(uri: &str) -> Request {
        Request::new(http::Request::get(uri).body(Bytes::new()).unwrap())
    }

    #[test]
    fn path_is_percent_decoded() {
        let req = get("/users/John%20Doe?x=%20");
        assert_eq!(req.path(), "/users/John Doe");
        assert_eq!(req.raw_path(), "/users/John%20Doe");
        assert_eq!(req.query(), Some("x=%20"));

        assert_eq!(get("/caf%C3%A9").path(), "/café");
        assert_eq!(get("/a%2Fb").path(), "/a/b");
        assert_eq!(get("/bad%FF").path(), "/bad\u{FFFD}");
    }

    #[test]
    fn plain_paths_are_borrowed() {
        let req = get("/plain/path");
        assert!(req.decoded.is_none());
        assert_eq!(req.path(), req.raw_path());
    }
}
