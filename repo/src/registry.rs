//! The configured repository set.
//!
//! A [`Registry`] is built once from [`Settings`] and holds every repository
//! in configured order. Each remote repository owns a hidden local storage
//! side, addressed as `<key>-cache`, where fetched content lands; the cache
//! is not a repository of its own and cannot be configured directly.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use url::Url;

use quarry_store::{ChecksumPolicyKind, InvalidPath, RelPath, RepoPath};

use crate::config::{ConfigError, RepoKindConfig, Settings};

/// Suffix of the hidden storage key backing a remote repository's cache.
pub const CACHE_SUFFIX: &str = "-cache";

/// Connection settings of a remote repository.
#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub url: Url,
    /// No network for this repository; its cache keeps serving.
    pub offline: bool,
    pub socket_timeout: Duration,
    /// Cached snapshot and metadata copies older than this are refetched.
    pub retrieval_cache: Duration,
}

#[derive(Debug)]
pub enum RepoKind {
    Local,
    Remote(RemoteSettings),
    Virtual { members: Vec<String> },
}

/// One configured repository.
#[derive(Debug)]
pub struct Repository {
    key: Box<str>,
    kind: RepoKind,
    handle_releases: bool,
    handle_snapshots: bool,
    checksum_policy: ChecksumPolicyKind,
    anonymous_read: bool,
}

impl Repository {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> &RepoKind {
        &self.kind
    }

    pub fn is_local(&self) -> bool {
        matches!(self.kind, RepoKind::Local)
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self.kind, RepoKind::Virtual { .. })
    }

    /// Storage key of the cache side of a remote repository.
    pub fn cache_key(&self) -> String {
        format!("{}{}", self.key, CACHE_SUFFIX)
    }

    pub fn checksum_policy(&self) -> ChecksumPolicyKind {
        self.checksum_policy
    }

    pub fn anonymous_read(&self) -> bool {
        self.anonymous_read
    }

    /// Whether this repository serves artifacts of the given nature.
    pub fn handles(&self, snapshot: bool) -> bool {
        if snapshot {
            self.handle_snapshots
        } else {
            self.handle_releases
        }
    }
}

/// Where a candidate's content is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// A local repository's own storage.
    Local,
    /// The already-cached side of a remote repository. `stale_ok` is set
    /// when no network fallback follows (offline or peer request), so
    /// expired copies still serve.
    RemoteCache { stale_ok: bool },
    /// The remote itself, over the network.
    Remote,
}

/// One concrete place resolution consults, in order.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub repo: Arc<Repository>,
    pub source: Source,
}

impl Candidate {
    /// Repository key addressing this candidate's storage.
    pub fn storage_key(&self) -> String {
        match self.source {
            Source::Local => self.repo.key().to_string(),
            Source::RemoteCache { .. } | Source::Remote => self.repo.cache_key(),
        }
    }

    pub fn repo_path(&self, path: &RelPath) -> Result<RepoPath, InvalidPath> {
        RepoPath::new(&self.storage_key(), path.clone())
    }

    pub fn is_local(&self) -> bool {
        matches!(self.source, Source::Local)
    }
}

#[derive(Debug)]
pub struct Registry {
    ordered: Vec<Arc<Repository>>,
    by_key: HashMap<Box<str>, Arc<Repository>>,
}

impl Registry {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let mut ordered = Vec::with_capacity(settings.repositories.len());
        let mut by_key = HashMap::new();

        for config in &settings.repositories {
            let kind = match config.kind {
                RepoKindConfig::Local => RepoKind::Local,
                RepoKindConfig::Virtual => RepoKind::Virtual {
                    members: config.members.clone(),
                },
                RepoKindConfig::Remote => {
                    let raw = config.url.as_deref().ok_or_else(|| {
                        ConfigError::Invalid(format!(
                            "remote repository {:?} needs a url",
                            config.key
                        ))
                    })?;
                    let mut url = Url::parse(raw).map_err(|e| {
                        ConfigError::Invalid(format!(
                            "remote repository {:?}: {}",
                            config.key, e
                        ))
                    })?;
                    // Url::join replaces the last path segment unless the
                    // base ends in a slash.
                    if !url.path().ends_with('/') {
                        url.set_path(&format!("{}/", url.path()));
                    }
                    RepoKind::Remote(RemoteSettings {
                        url,
                        offline: settings.offline || config.offline,
                        socket_timeout: Duration::from_millis(config.socket_timeout_ms),
                        retrieval_cache: Duration::from_secs(config.retrieval_cache_secs),
                    })
                }
            };

            let repo = Arc::new(Repository {
                key: config.key.as_str().into(),
                kind,
                handle_releases: config.handle_releases,
                handle_snapshots: config.handle_snapshots,
                checksum_policy: config.checksum_policy,
                anonymous_read: config.anonymous_read,
            });
            by_key.insert(repo.key.clone(), repo.clone());
            ordered.push(repo);
        }

        Ok(Registry { ordered, by_key })
    }

    pub fn get(&self, key: &str) -> Option<&Arc<Repository>> {
        self.by_key.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Repository>> {
        self.ordered.iter()
    }

    /// Expands a repository into the ordered list of places resolution
    /// consults: local repositories in configured order, then remote
    /// caches, then the remotes themselves. Virtual members expand
    /// recursively; cycles and repeated members are visited once.
    /// `include_remotes = false` drops the network class entirely.
    pub fn candidates(&self, repo: &Arc<Repository>, include_remotes: bool) -> Vec<Candidate> {
        let mut locals = Vec::new();
        let mut caches = Vec::new();
        let mut remotes = Vec::new();
        let mut seen = HashSet::new();

        self.expand(
            repo,
            include_remotes,
            &mut seen,
            &mut locals,
            &mut caches,
            &mut remotes,
        );

        locals.extend(caches);
        locals.extend(remotes);
        locals
    }

    fn expand(
        &self,
        repo: &Arc<Repository>,
        include_remotes: bool,
        seen: &mut HashSet<Box<str>>,
        locals: &mut Vec<Candidate>,
        caches: &mut Vec<Candidate>,
        remotes: &mut Vec<Candidate>,
    ) {
        if !seen.insert(repo.key.clone()) {
            return;
        }

        match repo.kind() {
            RepoKind::Local => locals.push(Candidate {
                repo: repo.clone(),
                source: Source::Local,
            }),
            RepoKind::Remote(settings) => {
                let online = include_remotes && !settings.offline;
                caches.push(Candidate {
                    repo: repo.clone(),
                    source: Source::RemoteCache { stale_ok: !online },
                });
                if online {
                    remotes.push(Candidate {
                        repo: repo.clone(),
                        source: Source::Remote,
                    });
                }
            }
            RepoKind::Virtual { members } => {
                for member in members {
                    match self.by_key.get(member.as_str()) {
                        Some(member) => {
                            self.expand(member, include_remotes, seen, locals, caches, remotes)
                        }
                        // Checked when the settings were loaded; a miss here
                        // is a registry construction bug.
                        None => warn!(member = %member, "virtual member missing from the registry"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn registry(input: &str) -> Registry {
        let settings = Settings::parse(input).expect("settings must parse");
        Registry::from_settings(&settings).expect("registry must build")
    }

    fn keyed(candidates: &[Candidate]) -> Vec<(String, Source)> {
        candidates
            .iter()
            .map(|c| (c.storage_key(), c.source))
            .collect()
    }

    const NESTED: &str = r#"
        [[repository]]
        key = "snapshots"
        type = "local"

        [[repository]]
        key = "releases"
        type = "local"

        [[repository]]
        key = "central"
        type = "remote"
        url = "https://repo1.maven.org/maven2"

        [[repository]]
        key = "inner"
        type = "virtual"
        members = ["central", "snapshots", "outer"]

        [[repository]]
        key = "outer"
        type = "virtual"
        members = ["releases", "inner", "releases"]
    "#;

    #[test]
    fn expands_classes_in_order() {
        let registry = registry(NESTED);
        let outer = registry.get("outer").unwrap();

        // Depth-first member order within each class, remote cache before
        // the network, the self-cycle and the duplicate member ignored.
        assert_eq!(
            vec![
                ("releases".to_string(), Source::Local),
                ("snapshots".to_string(), Source::Local),
                (
                    "central-cache".to_string(),
                    Source::RemoteCache { stale_ok: false }
                ),
                ("central-cache".to_string(), Source::Remote),
            ],
            keyed(&registry.candidates(outer, true))
        );
    }

    #[test]
    fn peer_requests_keep_caches_only() {
        let registry = registry(NESTED);
        let outer = registry.get("outer").unwrap();

        assert_eq!(
            vec![
                ("releases".to_string(), Source::Local),
                ("snapshots".to_string(), Source::Local),
                (
                    "central-cache".to_string(),
                    Source::RemoteCache { stale_ok: true }
                ),
            ],
            keyed(&registry.candidates(outer, false))
        );
    }

    #[test]
    fn concrete_repo_expands_to_itself() {
        let registry = registry(NESTED);
        let releases = registry.get("releases").unwrap();

        let candidates = registry.candidates(releases, true);
        assert_eq!(1, candidates.len());
        assert_eq!("releases", candidates[0].storage_key());
    }

    #[test]
    fn offline_remote_loses_its_network_candidate() {
        let registry = registry(
            r#"
            [[repository]]
            key = "central"
            type = "remote"
            url = "https://repo1.maven.org/maven2/"
            offline = true
            "#,
        );
        let central = registry.get("central").unwrap();

        assert_eq!(
            vec![(
                "central-cache".to_string(),
                Source::RemoteCache { stale_ok: true }
            )],
            keyed(&registry.candidates(central, true))
        );
    }

    #[test]
    fn global_offline_covers_every_remote() {
        let registry = registry(
            r#"
            offline = true

            [[repository]]
            key = "central"
            type = "remote"
            url = "https://repo1.maven.org/maven2/"
            "#,
        );
        let central = registry.get("central").unwrap();

        match central.kind() {
            RepoKind::Remote(settings) => assert!(settings.offline),
            kind => panic!("unexpected kind {:?}", kind),
        }
    }

    #[test]
    fn base_url_gets_a_trailing_slash() {
        let registry = registry(NESTED);
        let central = registry.get("central").unwrap();

        match central.kind() {
            RepoKind::Remote(settings) => {
                assert_eq!("https://repo1.maven.org/maven2/", settings.url.as_str());
                assert_eq!(
                    "https://repo1.maven.org/maven2/org/x/x.jar",
                    settings.url.join("org/x/x.jar").unwrap().as_str()
                );
            }
            kind => panic!("unexpected kind {:?}", kind),
        }
    }
}
