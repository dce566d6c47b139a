//! The item store: locked, cached, transactional access to repository items
//! and their content.
//!
//! All mutation goes through a [`WriteHandle`], which holds the item's write
//! lock and owns a draft forked from the committed state. Content streams
//! into a staging file while both checksums are computed in one pass; only
//! [`ItemStore::commit`] makes anything durable. Dropping a handle loses the
//! draft and the staging file, never half an item.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, instrument, warn};

use crate::blobs::BlobStore;
use crate::checksum::ChecksumPolicyKind;
use crate::db::ItemDb;
use crate::digests::HexDigest;
use crate::epoch_millis_now;
use crate::errors::Error;
use crate::hashing_reader::HashingReader;
use crate::item::{BlobRef, ItemDraft, ItemInfo, ItemKind, ItemSnapshot};
use crate::lock::{LockMap, LockTimeouts, Slot, SlotState, Wait};
use crate::path::RepoPath;

/// Upper bound for documents handled as an in-memory buffer (metadata
/// documents, checksum sidecars, index properties). Artifact content is
/// never buffered, only streamed.
pub const MAX_BUFFERED_DOCUMENT: u64 = 2 * 1024 * 1024;

const SNAPSHOT_CACHE_CAPACITY: usize = 4096;

pub struct ItemStore {
    db: ItemDb,
    blobs: BlobStore,
    locks: LockMap,
    cache: RwLock<LruCache<RepoPath, Arc<ItemSnapshot>>>,
}

/// Read access to one item, holding its read lock until dropped.
#[derive(Debug)]
pub struct ReadHandle {
    snapshot: Option<Arc<ItemSnapshot>>,
    _guard: OwnedRwLockReadGuard<Slot>,
}

impl ReadHandle {
    pub fn snapshot(&self) -> Option<&Arc<ItemSnapshot>> {
        self.snapshot.as_ref()
    }
}

/// Exclusive write access to one item.
///
/// Holds the item's write lock and owns the draft; there is no way to reach
/// a draft without going through a handle, so every mutation is covered by
/// the lock by construction.
pub struct WriteHandle {
    path: RepoPath,
    draft: ItemDraft,
    staged: Option<StagedContent>,
    existed: bool,
    guard: OwnedRwLockWriteGuard<Slot>,
}

struct StagedContent {
    file: async_tempfile::TempFile,
    size: u64,
    sha1: HexDigest,
}

impl WriteHandle {
    pub fn path(&self) -> &RepoPath {
        &self.path
    }

    pub fn draft(&self) -> &ItemDraft {
        &self.draft
    }

    pub fn draft_mut(&mut self) -> &mut ItemDraft {
        &mut self.draft
    }

    /// Whether the item already existed when the lock was acquired.
    pub fn existed(&self) -> bool {
        self.existed
    }
}

impl ItemStore {
    /// Opens (or initialises) a store rooted at the given directory, with
    /// the item database and the content area inside it.
    pub async fn open(root: impl Into<PathBuf>, timeouts: LockTimeouts) -> Result<Self, Error> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;

        Ok(ItemStore {
            db: ItemDb::open(root.join("items.redb")).await?,
            blobs: BlobStore::open(root.join("content")).await?,
            locks: LockMap::new(timeouts),
            cache: RwLock::new(LruCache::new(
                NonZeroUsize::new(SNAPSHOT_CACHE_CAPACITY).expect("capacity is non-zero"),
            )),
        })
    }

    /// Fetches the committed snapshot of an item without taking its lock.
    ///
    /// This is the fast path used by resolution. The snapshot cache is
    /// advisory: a concurrent commit is either fully visible or not yet
    /// visible, never partially.
    #[instrument(level = "trace", skip_all, fields(item.path=%path))]
    pub async fn get(&self, path: &RepoPath) -> Result<Option<Arc<ItemSnapshot>>, Error> {
        if let Some(snapshot) = self.cache.write().await.get(path) {
            return Ok(Some(snapshot.clone()));
        }

        match self.db.get(path).await? {
            None => Ok(None),
            Some(info) => {
                let snapshot = Arc::new(ItemSnapshot::new(info));
                let mut cache = self.cache.write().await;
                // Someone may have committed while we read the database;
                // keep whichever state is newer.
                match cache.peek(path) {
                    Some(existing) if existing.last_updated() >= snapshot.last_updated() => {
                        Ok(Some(existing.clone()))
                    }
                    _ => {
                        cache.put(path.clone(), snapshot.clone());
                        Ok(Some(snapshot))
                    }
                }
            }
        }
    }

    pub async fn exists(&self, path: &RepoPath) -> Result<bool, Error> {
        Ok(self.get(path).await?.is_some())
    }

    /// Acquires a read lock on an item. The returned handle pins the state
    /// the item had at acquisition; writers are held off until it drops.
    pub async fn read(&self, path: &RepoPath, wait: Wait) -> Result<ReadHandle, Error> {
        let guard = self.locks.read(path, wait).await?;
        let snapshot = match guard.snapshot() {
            Some(snapshot) => Some(snapshot.clone()),
            None if guard.is_unloaded() => self.get(path).await?,
            None => None,
        };

        Ok(ReadHandle {
            snapshot,
            _guard: guard,
        })
    }

    /// Acquires a write lock on an item and forks a draft from its committed
    /// state (or a fresh file draft if it does not exist).
    pub async fn write(&self, path: &RepoPath, wait: Wait) -> Result<WriteHandle, Error> {
        let mut guard = self.locks.write(path, wait).await?;

        if guard.is_unloaded() {
            guard.state = match self.db.get(path).await? {
                Some(info) => SlotState::Present(Arc::new(ItemSnapshot::new(info))),
                None => SlotState::Absent,
            };
        }

        let (draft, existed) = match guard.snapshot() {
            Some(snapshot) => (snapshot.to_draft(), true),
            None => (ItemDraft::new_file(path.clone(), epoch_millis_now()), false),
        };

        Ok(WriteHandle {
            path: path.clone(),
            draft,
            staged: None,
            existed,
            guard,
        })
    }

    /// Acquires a write lock only if the item does not exist yet; returns
    /// `None` (releasing the lock) when it does.
    pub async fn write_if_missing(
        &self,
        path: &RepoPath,
        wait: Wait,
    ) -> Result<Option<WriteHandle>, Error> {
        let handle = self.write(path, wait).await?;
        Ok((!handle.existed).then_some(handle))
    }

    /// Streams content into the handle's staging area, computing both
    /// checksums on the way, and verifies the declared checksums against
    /// the given policy. On a policy rejection the staging file is dropped
    /// and nothing durable remains.
    #[instrument(skip_all, fields(item.path=%handle.path))]
    pub async fn fill_content<R>(
        &self,
        handle: &mut WriteHandle,
        policy: ChecksumPolicyKind,
        last_modified: u64,
        reader: R,
    ) -> Result<(), Error>
    where
        R: AsyncRead + Unpin,
    {
        if handle.draft.kind() != ItemKind::File {
            return Err(Error::InvalidRequest(format!(
                "cannot store content at folder {}",
                handle.path
            )));
        }

        let mut staged = self.blobs.stage().await?;
        let mut hashing = HashingReader::from(reader);
        let size = tokio::io::copy(&mut hashing, &mut staged).await?;
        let (md5, sha1) = hashing.digests();

        handle.draft.checksums_mut().set_actuals(md5, sha1.clone());
        policy.verify(handle.draft.checksums())?;

        handle.draft.set_last_modified(last_modified);
        handle.staged = Some(StagedContent {
            file: staged,
            size,
            sha1,
        });

        Ok(())
    }

    /// [`ItemStore::fill_content`] for documents already buffered in memory,
    /// bounded by [`MAX_BUFFERED_DOCUMENT`].
    pub async fn fill_bytes(
        &self,
        handle: &mut WriteHandle,
        policy: ChecksumPolicyKind,
        last_modified: u64,
        bytes: &[u8],
    ) -> Result<(), Error> {
        if bytes.len() as u64 > MAX_BUFFERED_DOCUMENT {
            return Err(Error::InvalidRequest(format!(
                "document of {} bytes exceeds the {} byte buffer limit",
                bytes.len(),
                MAX_BUFFERED_DOCUMENT
            )));
        }
        self.fill_content(handle, policy, last_modified, bytes).await
    }

    /// Commits the handle's draft: moves staged content into the blob area,
    /// persists the item record together with any missing parent folders in
    /// one transaction, and installs the new snapshot.
    #[instrument(skip_all, fields(item.path=%handle.path))]
    pub async fn commit(&self, handle: WriteHandle) -> Result<Arc<ItemSnapshot>, Error> {
        let WriteHandle {
            path,
            mut draft,
            staged,
            existed: _,
            mut guard,
        } = handle;

        if let Some(staged) = staged {
            let blob = BlobRef::new(staged.sha1.clone());
            self.blobs.commit(staged.file, &blob).await?;
            draft.set_content(staged.size, Some(blob));
        } else if draft.kind() == ItemKind::File && draft.info().blob.is_none() {
            return Err(Error::InvalidRequest(format!(
                "refusing to commit file {} without content",
                path
            )));
        }

        let now = epoch_millis_now();
        let parents = parent_folders(&path, now);
        let info = draft.freeze(now);
        self.db.put(info.clone(), parents).await?;

        let snapshot = Arc::new(ItemSnapshot::new(info));
        guard.state = SlotState::Present(snapshot.clone());
        self.cache.write().await.put(path, snapshot.clone());

        Ok(snapshot)
    }

    /// Soft-deletes the locked item into the trash. Deleting an item that
    /// does not exist is a no-op; returns whether anything was removed.
    #[instrument(skip_all, fields(item.path=%handle.path))]
    pub async fn delete(&self, handle: WriteHandle) -> Result<bool, Error> {
        let WriteHandle {
            path, mut guard, ..
        } = handle;

        let removed = self.db.remove_to_trash(&path, epoch_millis_now()).await?;
        guard.state = SlotState::Absent;
        self.cache.write().await.pop(&path);

        Ok(removed.is_some())
    }

    /// Creates a folder item, returning the existing one when the path is
    /// already a folder.
    pub async fn create_folder(
        &self,
        path: &RepoPath,
        wait: Wait,
    ) -> Result<Arc<ItemSnapshot>, Error> {
        let mut handle = self.write(path, wait).await?;
        if handle.existed() {
            let existing = handle
                .guard
                .snapshot()
                .cloned()
                .ok_or_else(|| Error::LockViolation {
                    path: path.clone(),
                    reason: "slot lost its snapshot while the write lock was held".to_string(),
                })?;
            if existing.is_file() {
                return Err(Error::InvalidRequest(format!(
                    "{} already exists as a file",
                    path
                )));
            }
            return Ok(existing);
        }

        handle.draft = ItemDraft::new_folder(path.clone(), epoch_millis_now());
        self.commit(handle).await
    }

    /// Opens the stored bytes of a file snapshot.
    pub async fn open_content(&self, snapshot: &ItemSnapshot) -> Result<tokio::fs::File, Error> {
        let blob = snapshot.blob().ok_or_else(|| {
            Error::InvalidRequest(format!("{} has no content", snapshot.repo_path()))
        })?;

        self.blobs.open_read(blob).await?.ok_or_else(|| {
            warn!(blob=%blob.sha1_hex(), "content blob is missing");
            Error::StorageError(format!(
                "content blob of {} is missing",
                snapshot.repo_path()
            ))
        })
    }

    /// Reads a document item fully into memory, refusing anything larger
    /// than [`MAX_BUFFERED_DOCUMENT`].
    pub async fn read_content_bytes(&self, snapshot: &ItemSnapshot) -> Result<Vec<u8>, Error> {
        if snapshot.size() > MAX_BUFFERED_DOCUMENT {
            return Err(Error::InvalidRequest(format!(
                "{} is {} bytes, too large to buffer",
                snapshot.repo_path(),
                snapshot.size()
            )));
        }

        let mut file = self.open_content(snapshot).await?;
        let mut buf = Vec::with_capacity(snapshot.size() as usize);
        file.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    pub async fn list_children(&self, path: &RepoPath) -> Result<Vec<ItemInfo>, Error> {
        self.db.list_children(path).await
    }

    pub async fn list_repo(&self, repo_key: &str) -> Result<Vec<ItemInfo>, Error> {
        self.db.list_repo(repo_key).await
    }

    /// Purges trash records older than the retention period and removes
    /// content blobs that no live item or remaining trash record references
    /// anymore. Returns the number of purged records.
    #[instrument(skip_all, fields(retention=?retention))]
    pub async fn purge_trash(&self, retention: Duration) -> Result<usize, Error> {
        let cutoff = epoch_millis_now().saturating_sub(retention.as_millis() as u64);
        let drained = self.db.drain_trash(cutoff).await?;
        if drained.is_empty() {
            return Ok(0);
        }

        let live = self.db.live_blobs().await?;
        for record in &drained {
            if let Some(blob) = &record.item.blob {
                if !live.contains(blob) {
                    self.blobs.remove(blob).await?;
                }
            }
        }

        debug!(purged = drained.len(), "trash purge done");
        Ok(drained.len())
    }

    /// Drops lock slots nobody holds anymore.
    pub fn sweep_locks(&self) -> usize {
        self.locks.sweep()
    }
}

fn parent_folders(path: &RepoPath, now: u64) -> Vec<ItemInfo> {
    let mut parents = Vec::new();
    let mut current = path.parent();
    while let Some(parent) = current {
        current = parent.parent();
        if !parent.path().is_root() {
            parents.push(ItemInfo::new_folder(parent, now));
        }
    }
    parents.reverse();
    parents
}
