//! Read and deploy grants.
//!
//! Authorization is a flat rule table: each rule grants one user (or any
//! authenticated user, `*`) access to a path prefix in one repository (or
//! all, `*`). An empty table grants every authenticated principal
//! everything. Anonymous access never consults the table; it is decided by
//! the repository's own flag, and only for reads.

use std::fmt::{self, Display};

use serde::Deserialize;

use quarry_store::RelPath;

use crate::registry::Repository;

/// The authenticated (or not) originator of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Principal {
    Anonymous,
    User(Box<str>),
}

impl Principal {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Principal::Anonymous)
    }
}

impl Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::Anonymous => f.write_str("anonymous"),
            Principal::User(name) => f.write_str(name),
        }
    }
}

/// One grant row of the `[[access]]` table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessRule {
    /// User name, or `*` for any authenticated user.
    pub user: String,
    /// Repository key, or `*` for all repositories.
    pub repo: String,
    /// Path prefix the grant covers; empty covers the whole repository.
    #[serde(default)]
    pub path_prefix: String,
}

impl AccessRule {
    fn applies(&self, user: &str, repo: &Repository, path: &RelPath) -> bool {
        (self.user == "*" || self.user == user)
            && (self.repo == "*" || self.repo == repo.key())
            && path.as_str().starts_with(&self.path_prefix)
    }
}

#[derive(Debug, Default)]
pub struct AccessControl {
    rules: Vec<AccessRule>,
}

impl AccessControl {
    pub fn new(rules: Vec<AccessRule>) -> Self {
        AccessControl { rules }
    }

    /// Whether the principal may read `path` in `repo`.
    pub fn allows_read(&self, principal: &Principal, repo: &Repository, path: &RelPath) -> bool {
        match principal {
            Principal::Anonymous => repo.anonymous_read(),
            Principal::User(name) => self.granted(name, repo, path),
        }
    }

    /// Whether the principal may deploy to `path` in `repo`. Deployment is
    /// never anonymous.
    pub fn allows_deploy(&self, principal: &Principal, repo: &Repository, path: &RelPath) -> bool {
        match principal {
            Principal::Anonymous => false,
            Principal::User(name) => self.granted(name, repo, path),
        }
    }

    fn granted(&self, user: &str, repo: &Repository, path: &RelPath) -> bool {
        self.rules.is_empty() || self.rules.iter().any(|r| r.applies(user, repo, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::Settings;
    use crate::registry::Registry;

    fn repos() -> Registry {
        let settings = Settings::parse(
            r#"
            [[repository]]
            key = "open"
            type = "local"

            [[repository]]
            key = "closed"
            type = "local"
            anonymous_read = false
            "#,
        )
        .unwrap();
        Registry::from_settings(&settings).unwrap()
    }

    fn path(s: &str) -> RelPath {
        s.parse().unwrap()
    }

    fn user(name: &str) -> Principal {
        Principal::User(name.into())
    }

    #[test]
    fn anonymous_follows_the_repository_flag() {
        let registry = repos();
        let acl = AccessControl::default();

        let p = path("com/example/a.jar");
        assert!(acl.allows_read(&Principal::Anonymous, registry.get("open").unwrap(), &p));
        assert!(!acl.allows_read(&Principal::Anonymous, registry.get("closed").unwrap(), &p));
        // Even an open repository takes no anonymous deployments.
        assert!(!acl.allows_deploy(&Principal::Anonymous, registry.get("open").unwrap(), &p));
    }

    #[test]
    fn empty_table_admits_any_authenticated_user() {
        let registry = repos();
        let acl = AccessControl::default();

        assert!(acl.allows_read(
            &user("alice"),
            registry.get("closed").unwrap(),
            &path("com/example/a.jar")
        ));
        assert!(acl.allows_deploy(
            &user("alice"),
            registry.get("closed").unwrap(),
            &path("com/example/a.jar")
        ));
    }

    #[test]
    fn rules_narrow_by_user_repo_and_prefix() {
        let registry = repos();
        let acl = AccessControl::new(vec![
            AccessRule {
                user: "alice".to_string(),
                repo: "closed".to_string(),
                path_prefix: "com/example/".to_string(),
            },
            AccessRule {
                user: "*".to_string(),
                repo: "open".to_string(),
                path_prefix: String::new(),
            },
        ]);
        let closed = registry.get("closed").unwrap();
        let open = registry.get("open").unwrap();

        assert!(acl.allows_read(&user("alice"), closed, &path("com/example/a.jar")));
        assert!(!acl.allows_read(&user("alice"), closed, &path("org/other/a.jar")));
        assert!(!acl.allows_read(&user("bob"), closed, &path("com/example/a.jar")));

        // The wildcard row admits anyone to the open repository only.
        assert!(acl.allows_read(&user("bob"), open, &path("org/other/a.jar")));
        assert!(acl.allows_deploy(&user("bob"), open, &path("org/other/a.jar")));
        assert!(!acl.allows_deploy(&user("bob"), closed, &path("com/example/a.jar")));
    }
}
