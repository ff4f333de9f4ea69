//! Error types.
//!
//! Application-level outcomes (404, 405, 500, …) are written to the response,
//! not returned as errors. The types here cover the four places where a
//! caller actually gets a `Result`: starting the server, registering a route,
//! waiting on a cancellable context and decoding a request body.

use std::fmt;

use thiserror::Error;

/// Infrastructure failure returned by [`Server::serve`](crate::Server::serve)
/// and [`Server::serve_tls`](crate::Server::serve_tls).
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("tls: {0}")]
    Tls(String),
}

/// Why a context completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// A route pattern that cannot be inserted into the routing tree.
///
/// [`Router`](crate::Router) turns these into a panic at registration time.
/// [`RouteTree::insert`](crate::RouteTree::insert) returns them directly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("path must begin with '/' in path '{path}'")]
    MissingLeadingSlash { path: String },

    #[error("handler chain is empty for path '{path}'")]
    EmptyChain { path: String },

    #[error("a handle is already registered for path '{path}'")]
    Duplicate { path: String },

    #[error(
        "'{segment}' in new path '{path}' conflicts with existing wildcard '{existing}' in existing prefix '{prefix}'"
    )]
    WildcardConflict {
        segment: String,
        path: String,
        existing: String,
        prefix: String,
    },

    #[error("wildcard segment '{wildcard}' conflicts with existing children in path '{path}'")]
    ChildConflict { wildcard: String, path: String },

    #[error("catch-all routes are only allowed at the end of the path in path '{path}'")]
    InvalidCatchAll { path: String },

    #[error("catch-all conflicts with existing handle for the path segment root in path '{path}'")]
    CatchAllConflict { path: String },

    #[error("no / before catch-all in path '{path}'")]
    MissingSlashBeforeCatchAll { path: String },

    #[error("wildcards must be named with a non-empty name in path '{path}'")]
    UnnamedWildcard { path: String },

    #[error("only one wildcard per path segment is allowed, has: '{segment}' in path '{path}'")]
    TooManyWildcards { segment: String, path: String },
}

/// A lookup that found no value.
///
/// `tsr` is the trailing-slash recommendation: a value exists for the same
/// path with one trailing slash added or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchError {
    pub(crate) tsr: bool,
}

impl MatchError {
    pub fn tsr(&self) -> bool {
        self.tsr
    }
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tsr {
            f.write_str("no match, a route exists with a different trailing slash")
        } else {
            f.write_str("no match")
        }
    }
}

impl std::error::Error for MatchError {}

/// Failure decoding a request body or encoding a response body.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("xml: {0}")]
    Xml(String),
}
