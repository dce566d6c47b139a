//! Server configuration.
//!
//! One TOML document declares the repository set and the read grants:
//!
//! ```toml
//! offline = false
//!
//! [[repository]]
//! key = "libs-releases"
//! type = "local"
//!
//! [[repository]]
//! key = "central"
//! type = "remote"
//! url = "https://repo1.maven.org/maven2/"
//! checksum_policy = "generate-if-absent"
//!
//! [[repository]]
//! key = "libs"
//! type = "virtual"
//! members = ["libs-releases", "central"]
//!
//! [[access]]
//! user = "deployer"
//! repo = "libs-releases"
//! ```
//!
//! Parsing is strict: unknown fields are rejected, and [`Settings::parse`]
//! validates the cross-references (member keys, remote URLs) that serde
//! cannot.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use url::Url;

use quarry_store::ChecksumPolicyKind;

use crate::access::AccessRule;
use crate::registry::CACHE_SUFFIX;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Cuts off all remote consultation; caches keep serving.
    #[serde(default)]
    pub offline: bool,

    #[serde(default, rename = "repository")]
    pub repositories: Vec<RepositoryConfig>,

    /// Read grants. An empty table grants every authenticated principal
    /// everything.
    #[serde(default, rename = "access")]
    pub access_rules: Vec<AccessRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepoKindConfig {
    Local,
    Remote,
    Virtual,
}

/// One `[[repository]]` table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    pub key: String,

    #[serde(rename = "type")]
    pub kind: RepoKindConfig,

    /// Base URL, remote repositories only.
    pub url: Option<String>,

    /// Member keys in search order, virtual repositories only.
    #[serde(default)]
    pub members: Vec<String>,

    #[serde(default = "default_true")]
    pub handle_releases: bool,

    #[serde(default = "default_true")]
    pub handle_snapshots: bool,

    #[serde(default)]
    pub checksum_policy: ChecksumPolicyKind,

    #[serde(default = "default_true")]
    pub anonymous_read: bool,

    /// Per-repository offline switch, remote repositories only.
    #[serde(default)]
    pub offline: bool,

    #[serde(default = "default_socket_timeout_ms")]
    pub socket_timeout_ms: u64,

    /// How long cached snapshot and metadata copies stay fresh before the
    /// remote is asked again. Release artifacts never expire.
    #[serde(default = "default_retrieval_cache_secs")]
    pub retrieval_cache_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_socket_timeout_ms() -> u64 {
    15_000
}

fn default_retrieval_cache_secs() -> u64 {
    600
}

impl Settings {
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(input)?;
        settings.validate()?;
        Ok(settings)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut keys = HashSet::new();
        for repo in &self.repositories {
            if repo.key.is_empty() || repo.key.contains([':', '/']) {
                return Err(ConfigError::Invalid(format!(
                    "invalid repository key {:?}",
                    repo.key
                )));
            }
            if repo.key.ends_with(CACHE_SUFFIX) {
                return Err(ConfigError::Invalid(format!(
                    "repository key {:?} uses the reserved {:?} suffix",
                    repo.key, CACHE_SUFFIX
                )));
            }
            if !keys.insert(repo.key.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate repository key {:?}",
                    repo.key
                )));
            }

            match repo.kind {
                RepoKindConfig::Remote => {
                    let url = repo.url.as_deref().ok_or_else(|| {
                        ConfigError::Invalid(format!(
                            "remote repository {:?} needs a url",
                            repo.key
                        ))
                    })?;
                    let parsed = Url::parse(url).map_err(|e| {
                        ConfigError::Invalid(format!("remote repository {:?}: {}", repo.key, e))
                    })?;
                    if parsed.cannot_be_a_base() {
                        return Err(ConfigError::Invalid(format!(
                            "remote repository {:?}: {:?} cannot serve as a base url",
                            repo.key, url
                        )));
                    }
                }
                RepoKindConfig::Local | RepoKindConfig::Virtual => {
                    if repo.url.is_some() {
                        return Err(ConfigError::Invalid(format!(
                            "repository {:?} does not take a url",
                            repo.key
                        )));
                    }
                }
            }

            if repo.kind == RepoKindConfig::Virtual {
                if repo.members.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "virtual repository {:?} needs members",
                        repo.key
                    )));
                }
            } else if !repo.members.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "repository {:?} is not virtual and takes no members",
                    repo.key
                )));
            }
        }

        // Member references are checked once all keys are known; forward
        // references and cycles are legal.
        for repo in &self.repositories {
            for member in &repo.members {
                if !keys.contains(member.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "virtual repository {:?} references unknown member {:?}",
                        repo.key, member
                    )));
                }
            }
        }

        Ok(())
    }
}
