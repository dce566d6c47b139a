//! Path types used to address items inside repositories.

use std::fmt::{self, Debug, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid path: {0}")]
pub struct InvalidPath(String);

/// A path relative to a repository root.
///
/// These are always relative and platform-independent, which distinguishes
/// them from the ones provided in the standard library. Components are
/// separated by `/`; the empty path addresses the repository root itself.
#[derive(Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelPath {
    inner: String,
}

fn validate_component(component: &str) -> Result<(), InvalidPath> {
    if component.is_empty() {
        return Err(InvalidPath("empty path component".to_string()));
    }
    if component == "." || component == ".." {
        return Err(InvalidPath(format!("dot component {:?}", component)));
    }
    if component.contains(['\0', '\\']) {
        return Err(InvalidPath(format!(
            "forbidden character in component {:?}",
            component
        )));
    }
    Ok(())
}

impl RelPath {
    /// The repository root.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Produces an iterator over the components of the path.
    /// In case the path is the root, an empty iterator is returned.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        let mut iter = self.inner.split('/');

        // We don't want to return an empty element, consume it if it's the only one.
        if self.inner.is_empty() {
            let _ = iter.next();
        }

        iter
    }

    /// Returns the final component of the path, if there is one.
    pub fn file_name(&self) -> Option<&str> {
        self.components().last()
    }

    pub fn parent(&self) -> Option<RelPath> {
        let (parent, _file_name) = self.inner.rsplit_once('/').or_else(|| {
            // a single component's parent is the root
            (!self.inner.is_empty()).then_some(("", self.inner.as_str()))
        })?;

        Some(RelPath {
            inner: parent.to_string(),
        })
    }

    pub fn join(&self, name: &str) -> Result<RelPath, InvalidPath> {
        if name.contains('/') {
            return Err(InvalidPath(format!("joined name {:?} contains '/'", name)));
        }
        validate_component(name)?;

        let mut inner = self.inner.clone();
        if !inner.is_empty() {
            inner.push('/');
        }
        inner.push_str(name);

        Ok(RelPath { inner })
    }
}

impl FromStr for RelPath {
    type Err = InvalidPath;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.is_empty() {
            for component in s.split('/') {
                validate_component(component)?;
            }
        }

        Ok(RelPath {
            inner: s.to_string(),
        })
    }
}

impl TryFrom<String> for RelPath {
    type Error = InvalidPath;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RelPath> for String {
    fn from(value: RelPath) -> Self {
        value.inner
    }
}

impl AsRef<str> for RelPath {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}

impl Debug for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Debug::fmt(&self.inner, f)
    }
}

impl Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}

/// A repository-qualified path, the primary key of the item store.
///
/// Rendered as `repo-key:rel/path`. Repository keys cannot contain `:` or
/// `/`, which keeps the rendering unambiguous and usable as an ordered
/// database key.
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoPath {
    repo_key: Box<str>,
    path: RelPath,
}

impl RepoPath {
    pub fn new(repo_key: &str, path: RelPath) -> Result<Self, InvalidPath> {
        if repo_key.is_empty() || repo_key.contains([':', '/']) {
            return Err(InvalidPath(format!("invalid repository key {:?}", repo_key)));
        }

        Ok(RepoPath {
            repo_key: repo_key.into(),
            path,
        })
    }

    pub fn repo_key(&self) -> &str {
        &self.repo_key
    }

    pub fn path(&self) -> &RelPath {
        &self.path
    }

    /// The same relative path, addressed inside another repository.
    pub fn in_repo(&self, repo_key: &str) -> Result<RepoPath, InvalidPath> {
        RepoPath::new(repo_key, self.path.clone())
    }

    /// A different relative path inside the same repository.
    pub fn with_path(&self, path: RelPath) -> RepoPath {
        RepoPath {
            repo_key: self.repo_key.clone(),
            path,
        }
    }

    pub fn parent(&self) -> Option<RepoPath> {
        Some(self.with_path(self.path.parent()?))
    }

    pub fn join(&self, name: &str) -> Result<RepoPath, InvalidPath> {
        Ok(self.with_path(self.path.join(name)?))
    }
}

impl FromStr for RepoPath {
    type Err = InvalidPath;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (repo_key, path) = s
            .split_once(':')
            .ok_or_else(|| InvalidPath(format!("missing ':' in repo path {:?}", s)))?;

        RepoPath::new(repo_key, path.parse()?)
    }
}

impl TryFrom<String> for RepoPath {
    type Error = InvalidPath;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RepoPath> for String {
    fn from(value: RepoPath) -> Self {
        value.to_string()
    }
}

impl Debug for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.to_string())
    }
}

impl Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.repo_key, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::{RelPath, RepoPath};
    use rstest::rstest;

    #[rstest]
    #[case::empty("", 0)]
    #[case("a", 1)]
    #[case("a/b", 2)]
    #[case("org/example/demo/1.0/demo-1.0.jar", 5)]
    pub fn from_str(#[case] s: &str, #[case] num_components: usize) {
        let p: RelPath = s.parse().expect("must parse");

        assert_eq!(s, p.as_str(), "inner string mismatch");
        assert_eq!(
            num_components,
            p.components().count(),
            "number of components mismatch"
        );
    }

    #[rstest]
    #[case::absolute("/a/b")]
    #[case::two_forward_slashes_start("//a/b")]
    #[case::two_forward_slashes_middle("a/b//c/d")]
    #[case::trailing_slash("a/b/")]
    #[case::dot(".")]
    #[case::dotdot("..")]
    #[case::dot_middle("a/./b")]
    #[case::dotdot_middle("a/../b")]
    #[case::null("fo\0o")]
    #[case::backslash("a\\b")]
    pub fn from_str_fail(#[case] s: &str) {
        s.parse::<RelPath>().expect_err("must fail");
    }

    #[rstest]
    #[case("foo/bar", "foo")]
    #[case("foo/bar/baz", "foo/bar")]
    #[case::to_root("foo", "")]
    pub fn parent(#[case] p: RelPath, #[case] exp_parent: RelPath) {
        assert_eq!(Some(exp_parent), p.parent());
    }

    #[test]
    pub fn no_parent() {
        assert!(RelPath::root().parent().is_none());
    }

    #[rstest]
    #[case("a", "b", "a/b")]
    #[case("", "a", "a")]
    pub fn join(#[case] p: RelPath, #[case] name: &str, #[case] exp_p: RelPath) {
        assert_eq!(exp_p, p.join(name).expect("join failed"));
    }

    #[rstest]
    #[case("a", "/")]
    #[case("a", "")]
    #[case("a", "b/c")]
    #[case("a", "..")]
    pub fn join_fail(#[case] p: RelPath, #[case] name: &str) {
        p.join(name).expect_err("join succeeded unexpectedly");
    }

    #[rstest]
    #[case::empty("", None)]
    #[case("a", Some("a"))]
    #[case("a/b/c", Some("c"))]
    pub fn file_name(#[case] p: RelPath, #[case] exp: Option<&str>) {
        assert_eq!(exp, p.file_name());
    }

    #[test]
    fn repo_path_roundtrip() {
        let p: RepoPath = "libs-local:org/example/demo/1.0/demo-1.0.pom"
            .parse()
            .expect("must parse");

        assert_eq!("libs-local", p.repo_key());
        assert_eq!("org/example/demo/1.0/demo-1.0.pom", p.path().as_str());
        assert_eq!(
            "libs-local:org/example/demo/1.0/demo-1.0.pom",
            p.to_string()
        );
    }

    #[rstest]
    #[case::no_colon("libs-local")]
    #[case::empty_key(":a/b")]
    #[case::slash_in_key("libs/local:a")]
    #[case::bad_path("libs-local:a//b")]
    pub fn repo_path_fail(#[case] s: &str) {
        s.parse::<RepoPath>().expect_err("must fail");
    }

    #[test]
    fn repo_path_navigation() {
        let p: RepoPath = "libs-local:org/example/demo".parse().unwrap();

        assert_eq!(
            "libs-local:org/example",
            p.parent().expect("must have parent").to_string()
        );
        assert_eq!(
            "libs-local:org/example/demo/1.0",
            p.join("1.0").expect("join failed").to_string()
        );
        assert_eq!(
            "remote-cache:org/example/demo",
            p.in_repo("remote-cache").expect("valid key").to_string()
        );
    }
}
