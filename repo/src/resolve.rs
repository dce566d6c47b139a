//! The resolution engine.
//!
//! [`Resolver::resolve`] turns one [`ArtifactRequest`] into an [`Outcome`]
//! by walking the requested repository's candidate list in order. The path
//! class decides the strategy:
//!
//! * release artifacts take the first hit, skipping repositories that do
//!   not handle releases;
//! * snapshot artifacts are scanned across all candidates and picked by
//!   newest `last_modified`, with local repositories outranking the remote
//!   class entirely;
//! * metadata documents are parsed and semantically merged across every
//!   copy found; a single contributor serves its stored bytes untouched;
//! * checksum sidecars resolve their base artifact and serve the digest
//!   recorded on it, never a recomputed one.
//!
//! A failing candidate (bad data, unreachable remote) is logged and treated
//! as a miss so one broken repository cannot shadow the others.

use std::sync::Arc;

use tracing::{instrument, warn};

use maven_compat::checksum_file::{self, ChecksumKind};
use maven_compat::{path as repo_path, Metadata};
use quarry_store::{
    digest_pair, epoch_millis_now, mime_type_for, Error, HexDigest, InvalidPath, ItemSnapshot,
    ItemStore, RelPath, RepoPath,
};

use crate::access::{AccessControl, Principal};
use crate::merged::{CachedChecksumEntry, MergedChecksumCache};
use crate::registry::{Candidate, Registry, RepoKind, Repository, Source};
use crate::remote::RemoteFetcher;
use crate::request::{ArtifactRequest, PathKind};

/// A resolved artifact descriptor, immutable once returned.
#[derive(Debug, Clone, PartialEq)]
pub struct RepoResource {
    /// Where the content actually lives (a `-cache` key for remote hits),
    /// or the requested path for synthesized documents.
    pub repo_path: RepoPath,
    pub size: u64,
    pub last_modified: u64,
    pub mime_type: Option<Box<str>>,
    /// Digests as served to clients, per the owning repository's checksum
    /// policy. Synthesized checksum bodies carry none.
    pub sha1: Option<HexDigest>,
    pub md5: Option<HexDigest>,
    /// Set on metadata responses and their sidecars.
    pub metadata: bool,
}

/// Content of a successful resolution.
#[derive(Debug)]
pub enum Body {
    /// Blob-backed content.
    File(tokio::fs::File),
    /// Synthesized documents: merged metadata and checksum sidecars.
    Bytes(Vec<u8>),
    /// HEAD requests and unchanged resources carry no content.
    Empty,
}

#[derive(Debug)]
pub struct ResolvedContent {
    pub resource: RepoResource,
    pub body: Body,
}

#[derive(Debug)]
pub enum Outcome {
    Found(ResolvedContent),
    /// Nothing to serve; the reason lands in the response body and log.
    NotFound { reason: &'static str },
    /// Denied. Deliberately distinct from absent.
    Forbidden,
}

pub struct Resolver {
    store: Arc<ItemStore>,
    registry: Arc<Registry>,
    access: AccessControl,
    remote: RemoteFetcher,
    merged: MergedChecksumCache,
}

impl Resolver {
    pub fn new(store: Arc<ItemStore>, registry: Arc<Registry>, access: AccessControl) -> Self {
        Resolver {
            remote: RemoteFetcher::new(store.clone()),
            merged: MergedChecksumCache::new(),
            store,
            registry,
            access,
        }
    }

    pub fn store(&self) -> &Arc<ItemStore> {
        &self.store
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    #[instrument(skip_all, fields(repo = %request.repo_key, path = %request.path))]
    pub async fn resolve(
        &self,
        principal: &Principal,
        request: &ArtifactRequest,
    ) -> Result<Outcome, Error> {
        let repo = match self.registry.get(&request.repo_key) {
            Some(repo) => repo.clone(),
            None => {
                return Ok(Outcome::NotFound {
                    reason: "no such repository",
                })
            }
        };

        // The access gate runs before any repository is consulted, and a
        // denial is never downgraded to a plain miss.
        if !self.access.allows_read(principal, &repo, &request.path) {
            warn!(principal = %principal, "read denied");
            return Ok(Outcome::Forbidden);
        }

        if request.recursive {
            return Ok(Outcome::NotFound {
                reason: "recursive request",
            });
        }

        let candidates = self.registry.candidates(&repo, !request.from_peer);

        match request.path_kind() {
            PathKind::Standard => self.resolve_artifact(&candidates, request, false).await,
            PathKind::Index => self.resolve_artifact(&candidates, request, true).await,
            PathKind::Metadata => self.resolve_metadata(&repo, &candidates, request).await,
            PathKind::Checksum { kind, metadata } => {
                self.resolve_checksum(&repo, &candidates, request, kind, metadata)
                    .await
            }
        }
    }

    /// Lookup on behalf of the system itself (the index manager fetching
    /// packed indexes): no access gate, first hit, no nature filter. Remote
    /// candidates are consulted, so an expired cached copy is refetched.
    pub async fn system_find(
        &self,
        repo: &Arc<Repository>,
        path: &RelPath,
    ) -> Option<(Candidate, Arc<ItemSnapshot>)> {
        let candidates = self.registry.candidates(repo, true);
        self.find_standard(&candidates, path, None).await
    }

    /// Release and snapshot artifacts. `always_standard` paths (index
    /// files) take first-hit resolution with no nature filter.
    async fn resolve_artifact(
        &self,
        candidates: &[Candidate],
        request: &ArtifactRequest,
        always_standard: bool,
    ) -> Result<Outcome, Error> {
        let hit = if !always_standard && request.is_snapshot() {
            self.find_snapshot(candidates, &request.path).await
        } else {
            let nature = (!always_standard).then_some(false);
            self.find_standard(candidates, &request.path, nature).await
        };

        match hit {
            Some((candidate, item)) => {
                let body = self.body_for(&item, request).await?;
                Ok(Outcome::Found(ResolvedContent {
                    resource: self.resource(&candidate, &item, false),
                    body,
                }))
            }
            None => Ok(Outcome::NotFound {
                reason: "not found in any repository",
            }),
        }
    }

    /// First hit wins, in candidate order. `nature` filters candidates by
    /// what they handle; `None` consults all of them.
    async fn find_standard(
        &self,
        candidates: &[Candidate],
        path: &RelPath,
        nature: Option<bool>,
    ) -> Option<(Candidate, Arc<ItemSnapshot>)> {
        for candidate in candidates {
            if let Some(snapshot) = nature {
                if !candidate.repo.handles(snapshot) {
                    continue;
                }
            }
            match self.lookup(candidate, path).await {
                Ok(Some(item)) => return Some((candidate.clone(), item)),
                Ok(None) => {}
                Err(e) => {
                    warn!(repo = candidate.repo.key(), e = %e, "candidate lookup failed")
                }
            }
        }
        None
    }

    /// Scans every candidate and keeps the newest `last_modified`. A hit in
    /// any local repository removes the remote class from consideration;
    /// several local copies are a configuration smell worth a warning, but
    /// the newest still wins.
    async fn find_snapshot(
        &self,
        candidates: &[Candidate],
        path: &RelPath,
    ) -> Option<(Candidate, Arc<ItemSnapshot>)> {
        let mut best: Option<(Candidate, Arc<ItemSnapshot>)> = None;
        let mut local_hits = 0usize;

        for candidate in candidates {
            if !candidate.repo.handles(true) {
                continue;
            }
            if !candidate.is_local() && local_hits > 0 {
                break;
            }
            match self.lookup(candidate, path).await {
                Ok(Some(item)) => {
                    if candidate.is_local() {
                        local_hits += 1;
                        if local_hits > 1 {
                            warn!(path = %path, "snapshot present in multiple local repositories");
                        }
                    }
                    let newer = best
                        .as_ref()
                        .map_or(true, |(_, b)| item.last_modified() > b.last_modified());
                    if newer {
                        best = Some((candidate.clone(), item));
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(repo = candidate.repo.key(), e = %e, "candidate lookup failed")
                }
            }
        }

        best
    }

    /// One candidate, one path. Remote candidates re-fetch over the network
    /// only when their cache could not answer.
    async fn lookup(
        &self,
        candidate: &Candidate,
        path: &RelPath,
    ) -> Result<Option<Arc<ItemSnapshot>>, Error> {
        match candidate.source {
            Source::Local | Source::RemoteCache { .. } => {
                let found = self.store.get(&candidate.repo_path(path)?).await?;
                Ok(found.filter(|item| {
                    item.is_file() && !self.expired(candidate, path, item)
                }))
            }
            Source::Remote => {
                let settings = match candidate.repo.kind() {
                    RepoKind::Remote(settings) => settings,
                    // The registry only emits network candidates for
                    // remote repositories.
                    _ => return Ok(None),
                };
                // The cache candidate ran earlier in the same scan; a fresh
                // entry means it already answered.
                if let Some(item) = self.store.get(&candidate.repo_path(path)?).await? {
                    if item.is_file() && !self.cache_expired(&candidate.repo, path, &item) {
                        return Ok(None);
                    }
                }
                self.remote.fetch(&candidate.repo, settings, path).await
            }
        }
    }

    fn expired(&self, candidate: &Candidate, path: &RelPath, item: &ItemSnapshot) -> bool {
        match candidate.source {
            Source::RemoteCache { stale_ok: false } => {
                self.cache_expired(&candidate.repo, path, item)
            }
            // Local storage never expires, and without a network fallback
            // a stale copy is still the best answer.
            _ => false,
        }
    }

    /// Snapshot, metadata and index copies in a remote cache outlive their
    /// retrieval window and are then refetched; release artifacts never
    /// expire. A zero window disables caching for those paths entirely.
    fn cache_expired(&self, repo: &Repository, path: &RelPath, item: &ItemSnapshot) -> bool {
        let window = match repo.kind() {
            RepoKind::Remote(settings) => settings.retrieval_cache,
            _ => return false,
        };
        let p = path.as_str();
        if !(repo_path::is_snapshot(p) || repo_path::is_metadata(p) || repo_path::is_index(p)) {
            return false;
        }
        epoch_millis_now().saturating_sub(item.last_updated()) >= window.as_millis() as u64
    }

    /// `maven-metadata.xml`: parse and semantically merge every copy the
    /// candidates hold. One contributor serves its stored bytes, so the
    /// recorded checksums stay valid; anything merged is re-serialized and
    /// its digests parked for the sidecar request that follows.
    async fn resolve_metadata(
        &self,
        repo: &Arc<Repository>,
        candidates: &[Candidate],
        request: &ArtifactRequest,
    ) -> Result<Outcome, Error> {
        match self.metadata_state(repo, candidates, &request.path).await? {
            MetadataState::Missing => Ok(Outcome::NotFound {
                reason: "not found in any repository",
            }),
            MetadataState::Single {
                candidate,
                item,
                bytes,
            } => {
                let body = if skip_body(request, item.last_modified()) {
                    Body::Empty
                } else {
                    Body::Bytes(bytes)
                };
                Ok(Outcome::Found(ResolvedContent {
                    resource: self.resource(&candidate, &item, true),
                    body,
                }))
            }
            MetadataState::Merged {
                bytes,
                last_modified,
                sha1,
                md5,
            } => {
                let repo_path = RepoPath::new(repo.key(), request.path.clone())?;
                let resource = RepoResource {
                    size: bytes.len() as u64,
                    mime_type: Some(mime_type_for(&repo_path).into()),
                    repo_path,
                    last_modified,
                    sha1: Some(sha1),
                    md5: Some(md5),
                    metadata: true,
                };
                let body = if skip_body(request, last_modified) {
                    Body::Empty
                } else {
                    Body::Bytes(bytes)
                };
                Ok(Outcome::Found(ResolvedContent { resource, body }))
            }
        }
    }

    /// Sidecar requests serve the digest recorded on the base artifact,
    /// per the owning repository's policy. Merged metadata has no stored
    /// base; its digests come from the merged-checksum cache.
    async fn resolve_checksum(
        &self,
        repo: &Arc<Repository>,
        candidates: &[Candidate],
        request: &ArtifactRequest,
        kind: ChecksumKind,
        metadata: bool,
    ) -> Result<Outcome, Error> {
        let base = match repo_path::checksum_target(request.path.as_str()) {
            Some((base, _)) => base.parse::<RelPath>()?,
            None => {
                return Ok(Outcome::NotFound {
                    reason: "not a checksum path",
                })
            }
        };

        let (hex, last_modified) = if metadata {
            match self.metadata_state(repo, candidates, &base).await? {
                MetadataState::Missing => (None, 0),
                MetadataState::Single { candidate, item, .. } => (
                    candidate
                        .repo
                        .checksum_policy()
                        .reported(item.checksums().get(kind))
                        .cloned(),
                    item.last_modified(),
                ),
                MetadataState::Merged {
                    last_modified,
                    sha1,
                    md5,
                    ..
                } => (
                    Some(match kind {
                        ChecksumKind::Sha1 => sha1,
                        ChecksumKind::Md5 => md5,
                    }),
                    last_modified,
                ),
            }
        } else {
            match self.find_standard(candidates, &base, None).await {
                Some((candidate, item)) => (
                    candidate
                        .repo
                        .checksum_policy()
                        .reported(item.checksums().get(kind))
                        .cloned(),
                    item.last_modified(),
                ),
                None => (None, 0),
            }
        };

        let hex = match hex {
            Some(hex) => hex,
            None => {
                return Ok(Outcome::NotFound {
                    reason: "no recorded checksum",
                })
            }
        };

        let bytes = checksum_file::format(hex.as_str()).into_bytes();
        let requested = RepoPath::new(repo.key(), request.path.clone())?;
        let resource = RepoResource {
            size: bytes.len() as u64,
            mime_type: Some(mime_type_for(&requested).into()),
            repo_path: requested,
            last_modified,
            sha1: None,
            md5: None,
            metadata,
        };
        let body = if skip_body(request, last_modified) {
            Body::Empty
        } else {
            Body::Bytes(bytes)
        };
        Ok(Outcome::Found(ResolvedContent { resource, body }))
    }

    /// Collects and merges every parseable metadata copy, consulting the
    /// merged-checksum cache when two or more repositories contributed.
    async fn metadata_state(
        &self,
        repo: &Arc<Repository>,
        candidates: &[Candidate],
        path: &RelPath,
    ) -> Result<MetadataState, Error> {
        let mut hits = self.gather_metadata(candidates, path).await.into_iter();
        let first = match hits.next() {
            Some(first) => first,
            None => return Ok(MetadataState::Missing),
        };
        let rest: Vec<MetadataHit> = hits.collect();
        if rest.is_empty() {
            return Ok(MetadataState::Single {
                candidate: first.candidate,
                item: first.item,
                bytes: first.bytes,
            });
        }

        // The first hit seeds the accumulator; later copies merge in.
        let mut last_modified = first.item.last_modified();
        let mut newest = first.item.last_updated();
        let mut doc = first.parsed;
        for hit in rest {
            last_modified = last_modified.max(hit.item.last_modified());
            newest = newest.max(hit.item.last_updated());
            doc.merge(&hit.parsed);
        }
        let bytes = doc.to_string().into_bytes();
        let len = bytes.len() as u64;

        let sha1_path = RepoPath::new(repo.key(), sidecar_rel(path, ChecksumKind::Sha1)?)?;
        let md5_path = RepoPath::new(repo.key(), sidecar_rel(path, ChecksumKind::Md5)?)?;
        let cached = self
            .merged
            .lookup(&sha1_path, newest, len)
            .zip(self.merged.lookup(&md5_path, newest, len));
        let (sha1, md5) = match cached {
            Some(pair) => pair,
            None => {
                let (md5, sha1) = digest_pair(&bytes);
                self.merged.store(
                    sha1_path,
                    CachedChecksumEntry {
                        hex: sha1.clone(),
                        last_updated: newest,
                        content_len: len,
                    },
                );
                self.merged.store(
                    md5_path,
                    CachedChecksumEntry {
                        hex: md5.clone(),
                        last_updated: newest,
                        content_len: len,
                    },
                );
                (sha1, md5)
            }
        };

        Ok(MetadataState::Merged {
            bytes,
            last_modified,
            sha1,
            md5,
        })
    }

    async fn gather_metadata(&self, candidates: &[Candidate], path: &RelPath) -> Vec<MetadataHit> {
        let mut hits = Vec::new();
        for candidate in candidates {
            let item = match self.lookup(candidate, path).await {
                Ok(Some(item)) => item,
                Ok(None) => continue,
                Err(e) => {
                    warn!(repo = candidate.repo.key(), e = %e, "candidate lookup failed");
                    continue;
                }
            };
            let bytes = match self.store.read_content_bytes(&item).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(repo = candidate.repo.key(), e = %e, "unreadable metadata copy");
                    continue;
                }
            };
            let text = match std::str::from_utf8(&bytes) {
                Ok(text) => text,
                Err(_) => {
                    warn!(repo = candidate.repo.key(), "metadata copy is not UTF-8");
                    continue;
                }
            };
            match Metadata::parse(text) {
                Ok(parsed) => hits.push(MetadataHit {
                    candidate: candidate.clone(),
                    item,
                    bytes,
                    parsed,
                }),
                Err(e) => {
                    warn!(repo = candidate.repo.key(), e = %e, "skipping unparseable metadata copy")
                }
            }
        }
        hits
    }

    /// Descriptor of a stored hit. Reported digests follow the owning
    /// repository's checksum policy.
    fn resource(&self, candidate: &Candidate, item: &ItemSnapshot, metadata: bool) -> RepoResource {
        let policy = candidate.repo.checksum_policy();
        let checksums = item.checksums();
        RepoResource {
            repo_path: item.repo_path().clone(),
            size: item.size(),
            last_modified: item.last_modified(),
            mime_type: item.info().mime_type.clone(),
            sha1: policy.reported(checksums.get(ChecksumKind::Sha1)).cloned(),
            md5: policy.reported(checksums.get(ChecksumKind::Md5)).cloned(),
            metadata,
        }
    }

    async fn body_for(&self, item: &ItemSnapshot, request: &ArtifactRequest) -> Result<Body, Error> {
        if skip_body(request, item.last_modified()) {
            return Ok(Body::Empty);
        }
        let file = self.store.open_content(item).await?;
        Ok(Body::File(file))
    }
}

enum MetadataState {
    Missing,
    Single {
        candidate: Candidate,
        item: Arc<ItemSnapshot>,
        bytes: Vec<u8>,
    },
    Merged {
        bytes: Vec<u8>,
        last_modified: u64,
        sha1: HexDigest,
        md5: HexDigest,
    },
}

struct MetadataHit {
    candidate: Candidate,
    item: Arc<ItemSnapshot>,
    bytes: Vec<u8>,
    parsed: Metadata,
}

fn skip_body(request: &ArtifactRequest, last_modified: u64) -> bool {
    request.head_only
        || request
            .if_modified_since
            .map_or(false, |since| last_modified <= since)
}

fn sidecar_rel(path: &RelPath, kind: ChecksumKind) -> Result<RelPath, InvalidPath> {
    format!("{}.{}", path.as_str(), kind.ext()).parse()
}
