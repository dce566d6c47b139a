//! Checksums of merged metadata documents.
//!
//! When several repositories contribute to one `maven-metadata.xml`, the
//! served document is re-serialized and its bytes never exist as a stored
//! item, so the sidecar request that follows cannot be answered from any
//! item's recorded checksums. Merging recomputes the digests and parks them
//! here, keyed by the sidecar path. An entry is reused only while the
//! merged state it was computed from is unchanged (same newest contributor,
//! same byte length); a deployment in any member invalidates it implicitly.
//! Concurrent merges race benignly: both sides write the same derived
//! value, last writer wins.

use std::collections::HashMap;

use parking_lot::RwLock;

use quarry_store::{HexDigest, RepoPath};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CachedChecksumEntry {
    pub hex: HexDigest,
    /// Newest contributor `last_updated` at computation time.
    pub last_updated: u64,
    /// Byte length of the merged document.
    pub content_len: u64,
}

#[derive(Debug, Default)]
pub(crate) struct MergedChecksumCache {
    entries: RwLock<HashMap<RepoPath, CachedChecksumEntry>>,
}

impl MergedChecksumCache {
    pub fn new() -> Self {
        MergedChecksumCache::default()
    }

    /// The parked digest, if it still describes a merge with this newest
    /// contributor and byte length.
    pub fn lookup(&self, path: &RepoPath, last_updated: u64, content_len: u64) -> Option<HexDigest> {
        let entries = self.entries.read();
        let entry = entries.get(path)?;
        (entry.last_updated == last_updated && entry.content_len == content_len)
            .then(|| entry.hex.clone())
    }

    pub fn store(&self, path: RepoPath, entry: CachedChecksumEntry) {
        self.entries.write().insert(path, entry);
    }
}
