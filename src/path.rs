//! URL path normalisation.

/// Returns the canonical form of a URL path.
///
/// The rules are applied lexically, without touching the filesystem:
///
/// 1. Repeated slashes collapse into one.
/// 2. `.` elements are dropped.
/// 3. `..` removes the element before it. A `..` at the root is dropped.
/// 4. A trailing slash (or trailing `.` element) is kept.
///
/// The result always starts with `/`. An empty input becomes `/`.
/// `clean_path(clean_path(p)) == clean_path(p)` for every `p`.
///
/// ```rust
/// use wend::clean_path;
///
/// assert_eq!(clean_path("/../path"), "/path");
/// assert_eq!(clean_path("//a/./b/../c/"), "/a/c/");
/// ```
pub fn clean_path(p: &str) -> String {
    if p.is_empty() {
        return "/".to_owned();
    }

    let trailing = (p.len() > 1 && p.ends_with('/')) || p.ends_with("/.");
    let mut segments: Vec<&str> = Vec::new();

    for seg in p.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    let mut out = String::with_capacity(p.len() + 1);
    for seg in &segments {
        out.push('/');
        out.push_str(seg);
    }
    if out.is_empty() || trailing {
        out.push('/');
    }
    out
}

/// Joins a group base path and a route pattern.
///
/// The joined path is cleaned. A trailing slash on `sub` survives the join,
/// so `join_path("/api", "/users/")` is `/api/users/`.
pub(crate) fn join_path(base: &str, sub: &str) -> String {
    if sub.is_empty() {
        return clean_path(base);
    }

    let joined = clean_path(&format!("{base}/{sub}"));
    if sub.ends_with('/') && !joined.ends_with('/') {
        return joined + "/";
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;

    // (input, cleaned)
    const CLEAN: &[(&str, &str)] = &[
        // already clean
        ("/", "/"),
        ("/abc", "/abc"),
        ("/a/b/c", "/a/b/c"),
        ("/abc/", "/abc/"),
        ("/a/b/c/", "/a/b/c/"),
        // missing root
        ("", "/"),
        ("a/", "/a/"),
        ("abc", "/abc"),
        ("abc/def", "/abc/def"),
        ("a/b/c", "/a/b/c"),
        // doubled slashes
        ("//", "/"),
        ("/abc//", "/abc/"),
        ("/abc/def//", "/abc/def/"),
        ("/a/b/c//", "/a/b/c/"),
        ("/abc//def//ghi", "/abc/def/ghi"),
        ("//abc", "/abc"),
        ("///abc", "/abc"),
        ("//abc//", "/abc/"),
        // . elements
        (".", "/"),
        ("./", "/"),
        ("/abc/./def", "/abc/def"),
        ("/./abc/def", "/abc/def"),
        ("/abc/.", "/abc/"),
        // .. elements
        ("..", "/"),
        ("../", "/"),
        ("../../", "/"),
        ("../..", "/"),
        ("../../abc", "/abc"),
        ("/abc/def/ghi/../jkl", "/abc/def/jkl"),
        ("/abc/def/../ghi/../jkl", "/abc/jkl"),
        ("/abc/def/..", "/abc"),
        ("/abc/def/../..", "/"),
        ("/abc/def/../../..", "/"),
        ("/abc/def/../../../ghi/jkl/../../../mno", "/mno"),
        // dots inside names are ordinary
        ("/.well-known/x", "/.well-known/x"),
        ("/a/.../b", "/a/.../b"),
        // combinations
        ("abc/./../def", "/def"),
        ("abc//./../def", "/def"),
        ("abc/../../././../def", "/def"),
    ];

    #[test]
    fn cleans_paths() {
        for (input, want) in CLEAN {
            assert_eq!(clean_path(input), *want, "clean_path({input:?})");
        }
    }

    #[test]
    fn clean_is_idempotent() {
        for (input, _) in CLEAN {
            let once = clean_path(input);
            assert_eq!(clean_path(&once), once, "clean_path twice on {input:?}");
        }
    }

    #[test]
    fn cleans_long_paths() {
        for i in 1..300 {
            let name = "a".repeat(i);
            let want = format!("/{name}");
            assert_eq!(clean_path(&name), want);
            assert_eq!(clean_path(&format!("//{name}")), want);
            assert_eq!(clean_path(&format!("//{name}/b/..")), want);
        }
    }

    #[test]
    fn joins_group_paths() {
        assert_eq!(join_path("/api", "/users"), "/api/users");
        assert_eq!(join_path("/api/", "/users/"), "/api/users/");
        assert_eq!(join_path("/api", "/"), "/api/");
        assert_eq!(join_path("/", "/users/:id"), "/users/:id");
        assert_eq!(join_path("/api", ""), "/api");
        assert_eq!(join_path("/v1", "/static/*filepath"), "/v1/static/*filepath");
    }
}
