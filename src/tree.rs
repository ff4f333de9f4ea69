//! Radix routing tree.
//!
//! One [`RouteTree`] holds every pattern registered for a single HTTP method.
//! Nodes share common prefixes, so a lookup costs one pass over the request
//! path regardless of how many routes are registered.
//!
//! # Pattern syntax
//!
//! | Segment      | Matches                                   |
//! |--------------|-------------------------------------------|
//! | `users`      | the literal text                          |
//! | `:id`        | one path segment, up to the next `/`      |
//! | `*filepath`  | the rest of the path (final segment only) |
//!
//! # Layout
//!
//! ```text
//! /users/:id           root  "/"
//! /users/:id/posts      ├─ "users/"    (static)
//! /static/*filepath     │   └─ ":id"   (param)     → value
//!                       │       └─ "/posts"        → value
//!                       └─ "static"    (static, indices "/")
//!                           └─ ""      (catch-all, wild child)
//!                               └─ "/*filepath"    → value
//! ```
//!
//! Static children are ordered by descending priority (the number of values
//! registered beneath them). A child only moves ahead of siblings with a
//! strictly lower priority, so ties keep insertion order and the layout is
//! deterministic for a given registration sequence.
//!
//! The tree works on bytes. Prefix splits may fall inside a multi-byte
//! character, but parameters are always cut on ASCII delimiters.

use std::mem;

use crate::error::{MatchError, RouteError};
use crate::params::Params;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NodeKind {
    Static,
    Root,
    Param,
    CatchAll,
}

struct Node<T> {
    prefix: Vec<u8>,
    kind: NodeKind,
    /// First byte of each static child's prefix, in `children` order.
    indices: Vec<u8>,
    /// Set when the single child is a param or catch-all node.
    wild_child: bool,
    children: Vec<Node<T>>,
    value: Option<T>,
    priority: u32,
}

impl<T> Node<T> {
    fn empty() -> Self {
        Self {
            prefix: Vec::new(),
            kind: NodeKind::Static,
            indices: Vec::new(),
            wild_child: false,
            children: Vec::new(),
            value: None,
            priority: 0,
        }
    }
}

/// A radix tree mapping path patterns to values.
///
/// ```rust
/// use wend::{Params, RouteTree};
///
/// let mut tree = RouteTree::new();
/// tree.insert("/users/:id", "user").unwrap();
///
/// let mut params = Params::new();
/// assert_eq!(tree.get_value("/users/42", &mut params), Ok(&"user"));
/// assert_eq!(params.get("id"), Some("42"));
///
/// let miss = tree.get_value("/users/42/", &mut params).unwrap_err();
/// assert!(miss.tsr());
/// ```
pub struct RouteTree<T> {
    root: Node<T>,
}

impl<T> Default for RouteTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RouteTree<T> {
    pub fn new() -> Self {
        Self { root: Node::empty() }
    }

    pub fn is_empty(&self) -> bool {
        self.root.value.is_none() && self.root.children.is_empty()
    }

    /// Registers `value` under `route`.
    ///
    /// Pattern syntax errors are detected before the tree is touched.
    /// Structural conflicts (a wildcard colliding with an existing segment, a
    /// duplicate registration) are detected during the walk. In that case
    /// the tree may have been restructured, but every previously inserted
    /// route still resolves to its value.
    pub fn insert(&mut self, route: &str, value: T) -> Result<(), RouteError> {
        if !route.starts_with('/') {
            return Err(RouteError::MissingLeadingSlash { path: route.to_owned() });
        }
        validate(route)?;

        let full = route;
        let mut path = route.as_bytes();
        let mut n = &mut self.root;
        n.priority += 1;

        if n.prefix.is_empty() && n.indices.is_empty() && n.children.is_empty() {
            n.insert_child(path, full, value)?;
            n.kind = NodeKind::Root;
            return Ok(());
        }

        loop {
            let i = longest_common_prefix(path, &n.prefix);

            // Split the edge: the unshared tail becomes the only child.
            if i < n.prefix.len() {
                let child = Node {
                    prefix: n.prefix[i..].to_vec(),
                    kind: NodeKind::Static,
                    indices: mem::take(&mut n.indices),
                    wild_child: n.wild_child,
                    children: mem::take(&mut n.children),
                    value: n.value.take(),
                    priority: n.priority - 1,
                };
                n.indices = vec![n.prefix[i]];
                n.prefix.truncate(i);
                n.children = vec![child];
                n.wild_child = false;
            }

            if i == path.len() {
                if n.value.is_some() {
                    return Err(RouteError::Duplicate { path: full.to_owned() });
                }
                n.value = Some(value);
                return Ok(());
            }

            path = &path[i..];

            if n.wild_child {
                n = &mut n.children[0];
                n.priority += 1;

                // Same wildcard name, not a catch-all, and not a longer name
                // such as `:ids` against `:id`.
                let len = n.prefix.len();
                if path.len() >= len
                    && path[..len] == n.prefix[..]
                    && n.kind != NodeKind::CatchAll
                    && (len >= path.len() || path[len] == b'/')
                {
                    continue;
                }
                return Err(wildcard_conflict(full, path, n));
            }

            let c = path[0];

            // A '/' after a param is always the param's single child.
            if n.kind == NodeKind::Param && c == b'/' && n.children.len() == 1 {
                n = &mut n.children[0];
                n.priority += 1;
                continue;
            }

            if let Some(pos) = n.indices.iter().position(|&idx| idx == c) {
                let pos = n.increment_child_prio(pos);
                n = &mut n.children[pos];
                continue;
            }

            if c != b':' && c != b'*' {
                n.indices.push(c);
                n.children.push(Node::empty());
                let pos = n.increment_child_prio(n.indices.len() - 1);
                n = &mut n.children[pos];
            }
            return n.insert_child(path, full, value);
        }
    }

    /// Looks up the value registered for `path`, pushing any captured
    /// parameters onto `params`.
    ///
    /// On a miss `params` is restored to its previous length and the error
    /// carries the trailing-slash recommendation: whether the same path with
    /// one trailing `/` added or removed has a value.
    pub fn get_value(&self, path: &str, params: &mut Params) -> Result<&T, MatchError> {
        let start = params.len();
        let res = self.root.get_value(path.as_bytes(), params);
        if res.is_err() {
            params.truncate(start);
        }
        res
    }

    /// Resolves `path` ignoring ASCII case in static segments, returning the
    /// path spelled the way it was registered.
    ///
    /// Parameter and catch-all text is copied from the request unchanged. With
    /// `fix_trailing_slash` a missing or superfluous trailing `/` is corrected
    /// as well.
    pub fn find_case_insensitive_path(&self, path: &str, fix_trailing_slash: bool) -> Option<String> {
        let mut out = Vec::with_capacity(path.len() + 1);
        if self.root.find_case_insensitive(path.as_bytes(), fix_trailing_slash, &mut out) {
            String::from_utf8(out).ok()
        } else {
            None
        }
    }
}

// ── Insertion ─────────────────────────────────────────────────────────────────

impl<T> Node<T> {
    /// Bumps the priority of `children[pos]` and moves it in front of every
    /// sibling with a strictly lower priority. Returns the new position.
    fn increment_child_prio(&mut self, pos: usize) -> usize {
        self.children[pos].priority += 1;
        let prio = self.children[pos].priority;

        let mut new_pos = pos;
        while new_pos > 0 && self.children[new_pos - 1].priority < prio {
            self.children.swap(new_pos - 1, new_pos);
            new_pos -= 1;
        }

        if new_pos != pos {
            let c = self.indices.remove(pos);
            self.indices.insert(new_pos, c);
        }
        new_pos
    }

    fn insert_child(&mut self, mut path: &[u8], full: &str, value: T) -> Result<(), RouteError> {
        let mut n = self;

        while let Some((wildcard, i)) = find_wildcard(path) {
            // The wildcard would shadow existing static children.
            if !n.children.is_empty() {
                return Err(RouteError::ChildConflict {
                    wildcard: lossy(wildcard),
                    path: full.to_owned(),
                });
            }

            if wildcard[0] == b':' {
                if i > 0 {
                    n.prefix = path[..i].to_vec();
                    path = &path[i..];
                }

                n.wild_child = true;
                n.children = vec![Node {
                    prefix: wildcard.to_vec(),
                    kind: NodeKind::Param,
                    ..Node::empty()
                }];
                n = &mut n.children[0];
                n.priority += 1;

                if wildcard.len() < path.len() {
                    path = &path[wildcard.len()..];
                    n.children = vec![Node { priority: 1, ..Node::empty() }];
                    n = &mut n.children[0];
                    continue;
                }

                n.value = Some(value);
                return Ok(());
            }

            if n.prefix.last() == Some(&b'/') {
                return Err(RouteError::CatchAllConflict { path: full.to_owned() });
            }
            if i == 0 || path[i - 1] != b'/' {
                return Err(RouteError::MissingSlashBeforeCatchAll { path: full.to_owned() });
            }

            // The catch-all takes two nodes: an empty wild node reached
            // through the '/' index, then the leaf holding `/*name`.
            let i = i - 1;
            n.prefix = path[..i].to_vec();
            n.indices = vec![b'/'];
            n.children = vec![Node {
                kind: NodeKind::CatchAll,
                wild_child: true,
                priority: 1,
                children: vec![Node {
                    prefix: path[i..].to_vec(),
                    kind: NodeKind::CatchAll,
                    value: Some(value),
                    priority: 1,
                    ..Node::empty()
                }],
                ..Node::empty()
            }];
            return Ok(());
        }

        n.prefix = path.to_vec();
        n.value = Some(value);
        Ok(())
    }
}

// ── Lookup ────────────────────────────────────────────────────────────────────

impl<T> Node<T> {
    fn get_value(&self, mut path: &[u8], params: &mut Params) -> Result<&T, MatchError> {
        let mut n = self;
        // Whether the path consumed before `n` is itself a registered route.
        let mut parent_has_value = false;

        loop {
            let prefix = &n.prefix[..];

            if path.len() > prefix.len() {
                if path.starts_with(prefix) {
                    path = &path[prefix.len()..];

                    if !n.wild_child {
                        let c = path[0];
                        if let Some(pos) = n.indices.iter().position(|&idx| idx == c) {
                            parent_has_value = n.value.is_some();
                            n = &n.children[pos];
                            continue;
                        }
                        return Err(MatchError { tsr: path == b"/" && n.value.is_some() });
                    }

                    n = &n.children[0];
                    match n.kind {
                        NodeKind::Param => {
                            let end = path.iter().position(|&c| c == b'/').unwrap_or(path.len());
                            params.push(&n.prefix[1..], &path[..end]);

                            if end < path.len() {
                                if let Some(child) = n.children.first() {
                                    parent_has_value = n.value.is_some();
                                    path = &path[end..];
                                    n = child;
                                    continue;
                                }
                                return Err(MatchError {
                                    tsr: path.len() == end + 1 && n.value.is_some(),
                                });
                            }

                            if let Some(value) = &n.value {
                                return Ok(value);
                            }
                            let tsr = n.children.len() == 1
                                && n.children[0].prefix == b"/"
                                && n.children[0].value.is_some();
                            return Err(MatchError { tsr });
                        }
                        NodeKind::CatchAll => {
                            // The remainder starts with the '/' that led here.
                            params.push(&n.prefix[2..], &path[1..]);
                            return n.value.as_ref().ok_or(MatchError { tsr: false });
                        }
                        NodeKind::Static | NodeKind::Root => {
                            return Err(MatchError { tsr: false });
                        }
                    }
                }
            } else if path == prefix {
                if let Some(value) = &n.value {
                    return Ok(value);
                }

                // "/" under a param: the path without it is the param route.
                if path == b"/" && n.wild_child && n.kind != NodeKind::Root {
                    return Err(MatchError { tsr: parent_has_value });
                }

                if let Some(pos) = n.indices.iter().position(|&idx| idx == b'/') {
                    let child = &n.children[pos];
                    let tsr = (child.prefix.len() == 1 && child.value.is_some())
                        || (child.kind == NodeKind::CatchAll
                            && child.children.first().is_some_and(|c| c.value.is_some()));
                    return Err(MatchError { tsr });
                }
                return Err(MatchError { tsr: false });
            }

            let tsr = (path == b"/" && parent_has_value)
                || (prefix.len() == path.len() + 1
                    && prefix[path.len()] == b'/'
                    && path == &prefix[..path.len()]
                    && n.value.is_some());
            return Err(MatchError { tsr });
        }
    }

    /// Case-insensitive walk. Appends the registered spelling to `out` and
    /// returns whether a value was reached.
    ///
    /// Recursive at static branches because both `a` and `A` may be
    /// registered as sibling indices.
    fn find_case_insensitive(&self, mut path: &[u8], fix: bool, out: &mut Vec<u8>) -> bool {
        let mut n = self;
        let mut parent_has_value = false;

        while path.len() >= n.prefix.len() && path[..n.prefix.len()].eq_ignore_ascii_case(&n.prefix) {
            path = &path[n.prefix.len()..];
            out.extend_from_slice(&n.prefix);

            if path.is_empty() {
                if n.value.is_some() {
                    return true;
                }
                if fix {
                    if let Some(pos) = n.indices.iter().position(|&idx| idx == b'/') {
                        let child = &n.children[pos];
                        if (child.prefix.len() == 1 && child.value.is_some())
                            || (child.kind == NodeKind::CatchAll
                                && child.children.first().is_some_and(|c| c.value.is_some()))
                        {
                            out.push(b'/');
                            return true;
                        }
                    }
                }
                return false;
            }

            if !n.wild_child {
                let c = path[0].to_ascii_lowercase();
                let mark = out.len();
                for (i, idx) in n.indices.iter().enumerate() {
                    if idx.to_ascii_lowercase() == c {
                        if n.children[i].find_case_insensitive(path, fix, out) {
                            return true;
                        }
                        out.truncate(mark);
                    }
                }
                return fix && path == b"/" && n.value.is_some();
            }

            n = &n.children[0];
            match n.kind {
                NodeKind::Param => {
                    let end = path.iter().position(|&c| c == b'/').unwrap_or(path.len());
                    out.extend_from_slice(&path[..end]);

                    if end < path.len() {
                        if let Some(child) = n.children.first() {
                            parent_has_value = n.value.is_some();
                            path = &path[end..];
                            n = child;
                            continue;
                        }
                        return fix && path.len() == end + 1 && n.value.is_some();
                    }

                    if n.value.is_some() {
                        return true;
                    }
                    if fix
                        && n.children.len() == 1
                        && n.children[0].prefix == b"/"
                        && n.children[0].value.is_some()
                    {
                        out.push(b'/');
                        return true;
                    }
                    return false;
                }
                NodeKind::CatchAll => {
                    out.extend_from_slice(path);
                    return n.value.is_some();
                }
                NodeKind::Static | NodeKind::Root => return false,
            }
        }

        if !fix {
            return false;
        }
        if path == b"/" && parent_has_value {
            return true;
        }
        if path.len() + 1 == n.prefix.len()
            && n.prefix[path.len()] == b'/'
            && path.eq_ignore_ascii_case(&n.prefix[..path.len()])
            && n.value.is_some()
        {
            out.extend_from_slice(&n.prefix);
            return true;
        }
        false
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn longest_common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Finds the first wildcard segment in `path`.
///
/// Returns the wildcard (including its `:` or `*` marker) and its start
/// index. The wildcard ends at the next `/` or the end of `path`.
fn find_wildcard(path: &[u8]) -> Option<(&[u8], usize)> {
    let start = path.iter().position(|&c| c == b':' || c == b'*')?;
    let end = path[start + 1..]
        .iter()
        .position(|&c| c == b'/')
        .map_or(path.len(), |e| start + 1 + e);
    Some((&path[start..end], start))
}

/// Checks wildcard syntax for a whole pattern.
fn validate(route: &str) -> Result<(), RouteError> {
    let bytes = route.as_bytes();
    let mut offset = 0;

    while let Some((wildcard, i)) = find_wildcard(&bytes[offset..]) {
        let start = offset + i;

        if wildcard[1..].iter().any(|&c| c == b':' || c == b'*') {
            return Err(RouteError::TooManyWildcards {
                segment: lossy(wildcard),
                path: route.to_owned(),
            });
        }
        if wildcard.len() < 2 {
            return Err(RouteError::UnnamedWildcard { path: route.to_owned() });
        }
        if wildcard[0] == b'*' {
            if start + wildcard.len() != bytes.len() {
                return Err(RouteError::InvalidCatchAll { path: route.to_owned() });
            }
            if start == 0 || bytes[start - 1] != b'/' {
                return Err(RouteError::MissingSlashBeforeCatchAll { path: route.to_owned() });
            }
        }

        offset = start + wildcard.len();
    }
    Ok(())
}

fn wildcard_conflict<T>(full: &str, path: &[u8], n: &Node<T>) -> RouteError {
    let segment = if n.kind == NodeKind::CatchAll {
        path
    } else {
        path.split(|&c| c == b'/').next().unwrap_or(path)
    };
    let segment = lossy(segment);
    let existing = lossy(&n.prefix);
    let at = full.find(segment.as_str()).unwrap_or(0);

    RouteError::WildcardConflict {
        prefix: format!("{}{existing}", &full[..at]),
        segment,
        path: full.to_owned(),
        existing,
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    impl<T> Node<T> {
        // Verifies that every node's priority equals the number of values
        // at or beneath it.
        fn check_priorities(&self) -> Result<u32, (u32, u32)> {
            let mut prio = u32::from(self.value.is_some());
            for child in &self.children {
                prio += child.check_priorities()?;
            }
            if self.priority != prio {
                return Err((self.priority, prio));
            }
            Ok(prio)
        }

        fn child_prefixes(&self) -> Vec<String> {
            self.children.iter().map(|c| lossy(&c.prefix)).collect()
        }
    }

    fn tree(routes: &[&'static str]) -> RouteTree<&'static str> {
        let mut tree = RouteTree::new();
        for route in routes {
            tree.insert(route, *route).unwrap();
        }
        tree
    }

    #[test]
    fn priorities_count_values_beneath() {
        let tree = tree(&[
            "/",
            "/cmd/:tool/:sub",
            "/cmd/:tool/",
            "/src/*filepath",
            "/search/",
            "/search/:query",
            "/user_:name",
            "/user_:name/about",
            "/files/:dir/*filepath",
            "/doc/",
            "/doc/go_faq.html",
            "/doc/go1.html",
            "/info/:user/public",
            "/info/:user/project/:project",
        ]);
        assert_eq!(tree.root.check_priorities(), Ok(14));
        assert_eq!(tree.root.kind, NodeKind::Root);
    }

    #[test]
    fn hotter_children_move_first() {
        let tree = tree(&["/a", "/b", "/b2", "/b3"]);
        // "/" root with children "a" and "b"; "b" carries three values.
        assert_eq!(lossy(&tree.root.prefix), "/");
        assert_eq!(tree.root.child_prefixes(), ["b", "a"]);
        assert_eq!(tree.root.indices, b"ba");
    }

    #[test]
    fn equal_priorities_keep_insertion_order() {
        let tree = tree(&["/x", "/y", "/z"]);
        assert_eq!(tree.root.child_prefixes(), ["x", "y", "z"]);
        assert_eq!(tree.root.indices, b"xyz");
    }

    #[test]
    fn catch_all_uses_two_nodes() {
        let tree = tree(&["/src/*filepath"]);
        let root = &tree.root;
        assert_eq!(lossy(&root.prefix), "/src");
        assert_eq!(root.indices, b"/");
        assert!(!root.wild_child);

        let wild = &root.children[0];
        assert_eq!(wild.kind, NodeKind::CatchAll);
        assert!(wild.wild_child);
        assert!(wild.prefix.is_empty());

        let leaf = &wild.children[0];
        assert_eq!(lossy(&leaf.prefix), "/*filepath");
        assert!(leaf.children.is_empty());
        assert!(leaf.value.is_some());
    }

    #[test]
    fn edge_split_keeps_existing_values() {
        let mut tree = tree(&["/search/", "/support"]);
        let mut params = Params::new();
        assert_eq!(tree.get_value("/search/", &mut params), Ok(&"/search/"));
        assert_eq!(tree.get_value("/support", &mut params), Ok(&"/support"));

        tree.insert("/s", "/s").unwrap();
        assert_eq!(tree.get_value("/s", &mut params), Ok(&"/s"));
        assert_eq!(tree.get_value("/search/", &mut params), Ok(&"/search/"));
        assert_eq!(tree.root.check_priorities(), Ok(3));
    }

    #[test]
    fn failed_lookup_restores_params() {
        let tree = tree(&["/users/:id/posts"]);
        let mut params = Params::new();
        params.push(b"outer", b"1");

        assert!(tree.get_value("/users/7/comments", &mut params).is_err());
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("id"), None);
    }

    #[test]
    fn no_tsr_towards_unregistered_parent() {
        let tree = tree(&["/users/:id/posts"]);
        let mut params = Params::new();
        let err = tree.get_value("/users/7/", &mut params).unwrap_err();
        assert!(!err.tsr());

        let tree = self::tree(&["/users/:id", "/users/:id/posts"]);
        let err = tree.get_value("/users/7/", &mut params).unwrap_err();
        assert!(err.tsr());
    }

    #[test]
    fn syntax_errors_leave_tree_untouched() {
        let mut tree = tree(&["/a"]);
        assert!(tree.insert("/b/:x:y", "bad").is_err());
        assert!(tree.insert("/b/*rest/more", "bad").is_err());
        assert_eq!(tree.root.check_priorities(), Ok(1));
    }

    #[test]
    fn find_wildcard_bounds() {
        assert_eq!(find_wildcard(b"/users/:id/x"), Some((&b":id"[..], 7)));
        assert_eq!(find_wildcard(b"/*all"), Some((&b"*all"[..], 1)));
        assert_eq!(find_wildcard(b"/plain"), None);
    }
}
