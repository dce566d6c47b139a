//! Stored items: the snapshot/draft split.
//!
//! Committed state is only ever handed out as [`ItemSnapshot`], immutable
//! and shared via `Arc`. Mutation goes through an [`ItemDraft`], which is
//! exclusively owned by a write handle until committed, so readers never
//! observe a half-updated item.

use serde::{Deserialize, Serialize};

use crate::checksum::Checksums;
use crate::digests::HexDigest;
use crate::path::{RelPath, RepoPath};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    File,
    Folder,
}

/// Names the content blob of a file item by the SHA-1 of its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef(HexDigest);

impl BlobRef {
    pub(crate) fn new(sha1: HexDigest) -> Self {
        BlobRef(sha1)
    }

    pub fn sha1_hex(&self) -> &str {
        self.0.as_str()
    }
}

/// All persisted properties of one item. This is the record serialized into
/// the item database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemInfo {
    pub repo_path: RepoPath,
    pub kind: ItemKind,
    /// Content length in bytes; 0 for folders.
    pub size: u64,
    pub mime_type: Option<Box<str>>,
    /// Creation time, epoch millis.
    pub created: u64,
    /// Client-supplied modification time of the content, epoch millis.
    pub last_modified: u64,
    /// Time of the last committed write to this item, epoch millis.
    pub last_updated: u64,
    pub checksums: Checksums,
    pub blob: Option<BlobRef>,
}

impl ItemInfo {
    fn new(repo_path: RepoPath, kind: ItemKind, now: u64) -> Self {
        ItemInfo {
            repo_path,
            kind,
            size: 0,
            mime_type: None,
            created: now,
            last_modified: now,
            last_updated: now,
            checksums: Checksums::default(),
            blob: None,
        }
    }

    pub(crate) fn new_folder(repo_path: RepoPath, now: u64) -> Self {
        ItemInfo::new(repo_path, ItemKind::Folder, now)
    }

    pub fn is_file(&self) -> bool {
        self.kind == ItemKind::File
    }
}

/// An immutable view of a committed item.
#[derive(Debug, PartialEq)]
pub struct ItemSnapshot {
    info: ItemInfo,
}

impl ItemSnapshot {
    pub(crate) fn new(info: ItemInfo) -> Self {
        ItemSnapshot { info }
    }

    pub fn info(&self) -> &ItemInfo {
        &self.info
    }

    pub fn repo_path(&self) -> &RepoPath {
        &self.info.repo_path
    }

    pub fn kind(&self) -> ItemKind {
        self.info.kind
    }

    pub fn is_file(&self) -> bool {
        self.info.is_file()
    }

    pub fn size(&self) -> u64 {
        self.info.size
    }

    pub fn last_modified(&self) -> u64 {
        self.info.last_modified
    }

    pub fn last_updated(&self) -> u64 {
        self.info.last_updated
    }

    pub fn checksums(&self) -> &Checksums {
        &self.info.checksums
    }

    pub fn blob(&self) -> Option<&BlobRef> {
        self.info.blob.as_ref()
    }

    /// Forks a mutable working copy. Changes only become visible once the
    /// draft is committed through its write handle.
    pub(crate) fn to_draft(&self) -> ItemDraft {
        ItemDraft {
            info: self.info.clone(),
        }
    }
}

/// A mutable working copy of an item, exclusively owned by a write handle.
#[derive(Debug)]
pub struct ItemDraft {
    info: ItemInfo,
}

impl ItemDraft {
    pub(crate) fn new_file(repo_path: RepoPath, now: u64) -> Self {
        ItemDraft {
            info: ItemInfo::new(repo_path, ItemKind::File, now),
        }
    }

    pub(crate) fn new_folder(repo_path: RepoPath, now: u64) -> Self {
        ItemDraft {
            info: ItemInfo::new_folder(repo_path, now),
        }
    }

    pub fn info(&self) -> &ItemInfo {
        &self.info
    }

    pub fn kind(&self) -> ItemKind {
        self.info.kind
    }

    pub fn repo_path(&self) -> &RepoPath {
        &self.info.repo_path
    }

    pub fn set_last_modified(&mut self, epoch_millis: u64) {
        self.info.last_modified = epoch_millis;
    }

    pub(crate) fn set_created(&mut self, epoch_millis: u64) {
        self.info.created = epoch_millis;
    }

    pub fn checksums(&self) -> &Checksums {
        &self.info.checksums
    }

    pub fn checksums_mut(&mut self) -> &mut Checksums {
        &mut self.info.checksums
    }

    pub(crate) fn set_content(&mut self, size: u64, blob: Option<BlobRef>) {
        self.info.size = size;
        self.info.blob = blob;
        self.info.mime_type = match self.info.kind {
            ItemKind::File => Some(mime_type_for(&self.info.repo_path).into()),
            ItemKind::Folder => None,
        };
    }

    /// Finalizes the draft for persisting.
    pub(crate) fn freeze(mut self, now: u64) -> ItemInfo {
        self.info.last_updated = now;
        self.info
    }
}

/// Content type served for a stored file, derived from its extension.
pub fn mime_type_for(repo_path: &RepoPath) -> &'static str {
    mime_type_for_path(repo_path.path())
}

fn mime_type_for_path(path: &RelPath) -> &'static str {
    let ext = path
        .file_name()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .unwrap_or("");

    match ext {
        "jar" | "war" | "ear" => "application/java-archive",
        "pom" | "xml" => "application/xml",
        "json" | "module" => "application/json",
        "gz" | "tgz" => "application/gzip",
        "zip" => "application/zip",
        "sha1" | "md5" | "asc" | "txt" | "properties" | "mf" => "text/plain",
        _ => "application/octet-stream",
    }
}
