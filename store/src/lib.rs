//! Storage engine for repository items.
//!
//! Items (artifact files and their folders) live in two places: properties
//! in an embedded [redb](https://github.com/cberner/redb) database, content
//! in a SHA-1-addressed blob area on the local filesystem. Access is
//! mediated by per-item read/write locks; mutation happens on drafts owned
//! by write handles and becomes visible atomically on commit.

mod blobs;
mod db;
mod digests;
mod errors;
mod hashing_reader;
mod item;
mod lock;
mod path;
mod store;

pub mod checksum;
pub mod export;
pub mod import;

pub use checksum::{ChecksumInfo, ChecksumPolicyError, ChecksumPolicyKind, Checksums};
pub use digests::{digest_pair, HexDigest};
pub use errors::Error;
pub use item::{mime_type_for, BlobRef, ItemDraft, ItemInfo, ItemKind, ItemSnapshot};
pub use lock::{LockMode, LockTimeouts, Wait};
pub use path::{InvalidPath, RelPath, RepoPath};
pub use store::{ItemStore, ReadHandle, WriteHandle, MAX_BUFFERED_DOCUMENT};

/// Milliseconds since the Unix epoch; the timestamp unit used throughout.
pub fn epoch_millis_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
