use wend::{RouteError, RouteTree};

struct InsertTest(Vec<(&'static str, Result<(), Kind>)>);

/// The variant of an expected error, ignoring its message fields.
#[derive(Debug, PartialEq, Eq)]
enum Kind {
    MissingLeadingSlash,
    Duplicate,
    WildcardConflict,
    ChildConflict,
    InvalidCatchAll,
    CatchAllConflict,
    MissingSlashBeforeCatchAll,
    UnnamedWildcard,
    TooManyWildcards,
}

fn kind(err: &RouteError) -> Kind {
    match err {
        RouteError::MissingLeadingSlash { .. } => Kind::MissingLeadingSlash,
        RouteError::Duplicate { .. } => Kind::Duplicate,
        RouteError::WildcardConflict { .. } => Kind::WildcardConflict,
        RouteError::ChildConflict { .. } => Kind::ChildConflict,
        RouteError::InvalidCatchAll { .. } => Kind::InvalidCatchAll,
        RouteError::CatchAllConflict { .. } => Kind::CatchAllConflict,
        RouteError::MissingSlashBeforeCatchAll { .. } => Kind::MissingSlashBeforeCatchAll,
        RouteError::UnnamedWildcard { .. } => Kind::UnnamedWildcard,
        RouteError::TooManyWildcards { .. } => Kind::TooManyWildcards,
        other => panic!("unexpected error {other:?}"),
    }
}

impl InsertTest {
    fn run(self) {
        let mut tree = RouteTree::new();
        for (route, expected) in self.0 {
            let got = tree.insert(route, route.to_owned()).map_err(|e| kind(&e));
            assert_eq!(got, expected, "{route}");
        }
    }
}

#[test]
fn wildcard_conflict() {
    InsertTest(vec![
        ("/cmd/:tool/:sub", Ok(())),
        ("/cmd/vet", Err(Kind::WildcardConflict)),
        ("/src/*filepath", Ok(())),
        ("/src/*filepathx", Err(Kind::WildcardConflict)),
        ("/src/", Err(Kind::WildcardConflict)),
        ("/src1/", Ok(())),
        ("/src1/*filepath", Err(Kind::CatchAllConflict)),
        ("/src2*filepath", Err(Kind::MissingSlashBeforeCatchAll)),
        ("/search/:query", Ok(())),
        ("/search/invalid", Err(Kind::WildcardConflict)),
        ("/user_:name", Ok(())),
        ("/user_x", Err(Kind::WildcardConflict)),
        ("/id:id", Ok(())),
        ("/id/:id", Err(Kind::WildcardConflict)),
    ])
    .run()
}

#[test]
fn child_conflict() {
    InsertTest(vec![
        ("/cmd/vet", Ok(())),
        ("/cmd/:tool", Err(Kind::ChildConflict)),
        ("/src/AUTHORS", Ok(())),
        ("/src/*filepath", Err(Kind::ChildConflict)),
        ("/user_x", Ok(())),
        ("/user_:name", Err(Kind::ChildConflict)),
        ("/id/:id", Ok(())),
        ("/id:id", Err(Kind::ChildConflict)),
        ("/:id", Err(Kind::ChildConflict)),
        ("/*filepath", Err(Kind::ChildConflict)),
    ])
    .run()
}

#[test]
fn conflicting_param_names() {
    InsertTest(vec![
        ("/users/:id", Ok(())),
        ("/users/:id/posts", Ok(())),
        ("/users/:uid/likes", Err(Kind::WildcardConflict)),
        ("/users/:ids", Err(Kind::WildcardConflict)),
    ])
    .run()
}

#[test]
fn duplicates() {
    InsertTest(vec![
        ("/", Ok(())),
        ("/", Err(Kind::Duplicate)),
        ("/doc/", Ok(())),
        ("/doc/", Err(Kind::Duplicate)),
        ("/src/*filepath", Ok(())),
        ("/src/*filepath", Err(Kind::WildcardConflict)),
        ("/search/:query", Ok(())),
        ("/search/:query", Err(Kind::Duplicate)),
        ("/user_:name", Ok(())),
        ("/user_:name", Err(Kind::Duplicate)),
    ])
    .run()
}

#[test]
fn invalid_syntax() {
    InsertTest(vec![
        ("no-slash", Err(Kind::MissingLeadingSlash)),
        ("/user:", Err(Kind::UnnamedWildcard)),
        ("/user:/", Err(Kind::UnnamedWildcard)),
        ("/cmd/:/", Err(Kind::UnnamedWildcard)),
        ("/src/*", Err(Kind::UnnamedWildcard)),
        ("/:foo:bar", Err(Kind::TooManyWildcards)),
        ("/:foo*bar", Err(Kind::TooManyWildcards)),
        ("/src/*filepath/x", Err(Kind::InvalidCatchAll)),
        ("/src/*filepath/", Err(Kind::InvalidCatchAll)),
        ("/src*filepath", Err(Kind::MissingSlashBeforeCatchAll)),
    ])
    .run()
}

#[test]
fn syntax_errors_leave_tree_unchanged() {
    let mut tree = RouteTree::new();
    tree.insert("/users/:id", 1).unwrap();
    assert!(tree.insert("/users/:id/:x:y", 2).is_err());
    assert!(tree.insert("/users/:id/*rest/more", 3).is_err());

    let mut params = wend::Params::new();
    assert_eq!(tree.get_value("/users/7", &mut params), Ok(&1));
    assert!(tree.insert("/users/:id/:x", 4).is_ok());
}

#[test]
fn error_messages_name_the_route() {
    let mut tree = RouteTree::new();
    tree.insert("/cmd/:tool/:sub", ()).unwrap();

    let err = tree.insert("/cmd/vet", ()).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("'/cmd/vet'"), "{msg}");
    assert!(msg.contains(":tool"), "{msg}");

    let err = tree.insert("/a/*x/y", ()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "catch-all routes are only allowed at the end of the path in path '/a/*x/y'"
    );
}
