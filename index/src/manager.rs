//! Index building passes.
//!
//! A pass walks the configured repositories in order. Local repositories
//! are scanned from storage; remote repositories prefer the pack their
//! upstream publishes and fall back to scanning the cache; virtual
//! repositories merge their members' packs into one deduplicated context.
//! Contexts swap in atomically per repository, one repository's failure
//! never aborts the pass, and the shutdown token is honored between
//! repositories and between merge steps.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use maven_compat::{path as repo_path, Coordinates};
use quarry_repo::{Candidate, RepoKind, Repository, Resolver};
use quarry_store::{
    epoch_millis_now, ChecksumPolicyKind, ItemSnapshot, ItemStore, RelPath, RepoPath, Wait,
};

use crate::context::{IndexingContext, SearchHit};
use crate::pack::{self, IndexRecord, PackProperties};
use crate::Error;

/// Builds and holds the per-repository search indexes.
pub struct IndexManager {
    store: Arc<ItemStore>,
    resolver: Arc<Resolver>,
    contexts: RwLock<HashMap<Box<str>, Arc<IndexingContext>>>,
}

impl IndexManager {
    pub fn new(store: Arc<ItemStore>, resolver: Arc<Resolver>) -> Self {
        IndexManager {
            store,
            resolver,
            contexts: RwLock::new(HashMap::new()),
        }
    }

    /// One full indexing pass over every configured repository. Returns
    /// the number of repositories whose context was rebuilt.
    #[instrument(skip_all, fields(indicatif.pb_show = 1))]
    pub async fn run(&self, cancel: &CancellationToken) -> usize {
        let span = Span::current();
        span.pb_set_style(&quarry_tracing::PB_SPINNER_STYLE);
        span.pb_start();

        // Concrete repositories first; virtual merges read their packs.
        let (virtuals, concrete): (Vec<_>, Vec<_>) = self
            .resolver
            .registry()
            .iter()
            .cloned()
            .partition(|repo| repo.is_virtual());
        span.pb_set_length((concrete.len() + virtuals.len()) as u64);

        let mut rebuilt = 0;
        for repo in concrete.iter().chain(virtuals.iter()) {
            if cancel.is_cancelled() {
                info!("indexing pass interrupted");
                break;
            }
            span.pb_set_message(&format!("indexing {}", repo.key()));
            let outcome = match repo.kind() {
                RepoKind::Local => self.index_local(repo).await,
                RepoKind::Remote(_) => self.index_remote(repo).await,
                RepoKind::Virtual { .. } => self.index_virtual(repo, cancel).await,
            };
            match outcome {
                Ok(docs) => {
                    debug!(repo = repo.key(), docs, "index rebuilt");
                    rebuilt += 1;
                }
                Err(e) => warn!(repo = repo.key(), e = %e, "indexing failed, continuing"),
            }
            span.pb_inc(1);
        }
        rebuilt
    }

    async fn index_local(&self, repo: &Arc<Repository>) -> Result<u64, Error> {
        let records = self.scan(repo.key()).await?;
        let docs = self.install_context(repo.key(), &records)?;
        self.save_pack(repo.key(), &records).await?;
        Ok(docs)
    }

    /// Prefers the pack the upstream publishes; anything cached locally
    /// that the upstream never indexed is covered by the cache scan
    /// fallback.
    async fn index_remote(&self, repo: &Arc<Repository>) -> Result<u64, Error> {
        let pack_rel = pack_rel_path()?;
        let (records, fetched) = match self.resolver.system_find(repo, &pack_rel).await {
            Some((candidate, item)) => match self.load_pack(&item).await {
                Ok(records) => {
                    debug!(
                        repo = repo.key(),
                        source = candidate.storage_key(),
                        records = records.len(),
                        "using published index pack"
                    );
                    (records, true)
                }
                Err(e) => {
                    warn!(repo = repo.key(), e = %e, "index pack unreadable, scanning the cache");
                    (self.scan(&repo.cache_key()).await?, false)
                }
            },
            None => {
                debug!(repo = repo.key(), "no published index pack, scanning the cache");
                (self.scan(&repo.cache_key()).await?, false)
            }
        };
        let docs = self.install_context(repo.key(), &records)?;
        if !fetched {
            // A fetched pack already landed in cache storage on its way
            // through resolution; a scan-built one has to be written out
            // so peers and virtual merges can pick it up.
            self.save_pack(&repo.cache_key(), &records).await?;
        }
        Ok(docs)
    }

    async fn index_virtual(
        &self,
        repo: &Arc<Repository>,
        cancel: &CancellationToken,
    ) -> Result<u64, Error> {
        let members = self.resolver.registry().candidates(repo, false);
        let context = IndexingContext::in_scratch_dir(repo.key())?;
        let mut seen = HashSet::new();
        for member in &members {
            if cancel.is_cancelled() {
                info!(repo = repo.key(), "virtual index merge interrupted");
                break;
            }
            let records = match self.member_records(member).await {
                Ok(records) => records,
                Err(e) => {
                    warn!(member = member.storage_key(), e = %e, "skipping member in virtual index");
                    continue;
                }
            };
            for record in records {
                // Members frequently mirror each other; one entry per path.
                if seen.insert(record.path.clone()) {
                    context.add(&record)?;
                }
            }
        }
        let docs = context.commit()?;
        self.contexts.write().insert(repo.key().into(), Arc::new(context));
        Ok(docs)
    }

    /// A member's packed index, or a direct scan when no pack exists yet.
    async fn member_records(&self, member: &Candidate) -> Result<Vec<IndexRecord>, Error> {
        let storage_key = member.storage_key();
        let pack_path = RepoPath::new(&storage_key, pack_rel_path()?)
            .map_err(quarry_store::Error::from)?;
        match self.store.get(&pack_path).await? {
            Some(item) if item.is_file() => self.load_pack(&item).await,
            _ => self.scan(&storage_key).await,
        }
    }

    async fn load_pack(&self, item: &Arc<ItemSnapshot>) -> Result<Vec<IndexRecord>, Error> {
        let file = self.store.open_content(item).await?;
        Ok(pack::read_pack(BufReader::new(file)).await?)
    }

    /// Collects a record for every artifact file committed under a storage
    /// key. Metadata, checksum sidecars and stray files carry no
    /// coordinates and are skipped.
    async fn scan(&self, storage_key: &str) -> Result<Vec<IndexRecord>, Error> {
        let mut records = Vec::new();
        for info in self.store.list_repo(storage_key).await? {
            if !info.is_file() {
                continue;
            }
            let path = info.repo_path.path().as_str();
            // Sidecars parse as coordinates too (`.jar.sha1` looks like a
            // compound extension), so they need an explicit skip.
            if repo_path::is_checksum(path) {
                continue;
            }
            if let Some(coords) = Coordinates::from_repo_path(path) {
                records.push(IndexRecord {
                    coords,
                    path: path.to_string(),
                    last_modified: info.last_modified,
                });
            }
        }
        Ok(records)
    }

    /// Builds a fresh RAM context from the records and swaps it in.
    fn install_context(&self, repo_key: &str, records: &[IndexRecord]) -> Result<u64, Error> {
        let context = IndexingContext::in_ram(repo_key)?;
        for record in records {
            context.add(record)?;
        }
        let docs = context.commit()?;
        self.contexts.write().insert(repo_key.into(), Arc::new(context));
        Ok(docs)
    }

    async fn save_pack(&self, storage_key: &str, records: &[IndexRecord]) -> Result<(), Error> {
        let packed = pack::write_pack(records).await?;
        let now = epoch_millis_now();
        self.save_item(storage_key, pack_rel_path()?, &packed, now).await?;
        let properties = PackProperties {
            index_id: storage_key.to_string(),
            generated: now,
        };
        self.save_item(storage_key, properties_rel_path()?, &properties.to_bytes(), now)
            .await
    }

    async fn save_item(
        &self,
        storage_key: &str,
        rel: RelPath,
        bytes: &[u8],
        last_modified: u64,
    ) -> Result<(), Error> {
        let path = RepoPath::new(storage_key, rel).map_err(quarry_store::Error::from)?;
        let mut handle = self.store.write(&path, Wait::Normal).await?;
        self.store
            .fill_content(&mut handle, ChecksumPolicyKind::default(), last_modified, bytes)
            .await?;
        self.store.commit(handle).await?;
        Ok(())
    }

    /// Searches one repository's context, or every concrete repository
    /// when no key is given. Virtual contexts are skipped in the spanning
    /// case since they duplicate their members' documents.
    pub fn search(
        &self,
        repo: Option<&str>,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, Error> {
        let contexts = self.contexts.read();
        match repo {
            Some(key) => match contexts.get(key) {
                Some(context) => context.search(query, limit),
                None => Ok(Vec::new()),
            },
            None => {
                let mut hits = Vec::new();
                for context in contexts.values() {
                    let spanning = self
                        .resolver
                        .registry()
                        .get(context.repo_key())
                        .map_or(false, |repo| !repo.is_virtual());
                    if spanning {
                        hits.extend(context.search(query, limit)?);
                    }
                }
                hits.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                hits.truncate(limit);
                Ok(hits)
            }
        }
    }

    pub fn context(&self, repo_key: &str) -> Option<Arc<IndexingContext>> {
        self.contexts.read().get(repo_key).cloned()
    }
}

fn pack_rel_path() -> Result<RelPath, Error> {
    Ok(pack::pack_rel_path()
        .parse()
        .map_err(quarry_store::Error::from)?)
}

fn properties_rel_path() -> Result<RelPath, Error> {
    Ok(pack::properties_rel_path()
        .parse()
        .map_err(quarry_store::Error::from)?)
}
