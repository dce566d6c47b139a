//! Repository resolution on top of [`quarry_store`].
//!
//! A [`Registry`] of configured repositories (local, remote, virtual) is
//! built from [`Settings`]; the [`Resolver`] answers [`ArtifactRequest`]s
//! against it, consulting local storage, remote caches and the remotes
//! themselves in that order and applying the per-path-class resolution
//! rules (first hit, newest snapshot, merged metadata, recorded checksums).

pub mod access;
pub mod config;
mod merged;
pub mod registry;
mod remote;
pub mod request;
pub mod resolve;

pub use access::{AccessControl, AccessRule, Principal};
pub use config::{ConfigError, RepoKindConfig, RepositoryConfig, Settings};
pub use registry::{
    Candidate, Registry, RemoteSettings, RepoKind, Repository, Source, CACHE_SUFFIX,
};
pub use request::{classify, ArtifactRequest, PathKind};
pub use resolve::{Body, Outcome, RepoResource, ResolvedContent, Resolver};
