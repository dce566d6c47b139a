//! Item property database, using redb under the hood.
//!
//! redb stores all of its data in a single file with a K/V pointing from a
//! rendered [`RepoPath`] (`repo-key:rel/path`) to its bincode-encoded
//! [`ItemInfo`]. Key ordering makes a repository's items one contiguous,
//! prefix-addressable range, which is what the children/subtree scans rely
//! on. Soft-deleted items move to a second table until trash purging
//! collects them.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::Error;
use crate::item::{BlobRef, ItemInfo};
use crate::path::RepoPath;

const ITEM_TABLE: TableDefinition<&str, Vec<u8>> = TableDefinition::new("items");
const TRASH_TABLE: TableDefinition<&str, Vec<u8>> = TableDefinition::new("trash");

/// A soft-deleted item, awaiting purge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrashRecord {
    pub item: ItemInfo,
    /// Deletion time, epoch millis.
    pub deleted_at: u64,
}

pub(crate) struct ItemDb {
    // We wrap db in an Arc to be able to move it into spawn_blocking,
    // as discussed in https://github.com/cberner/redb/issues/789
    db: Arc<Database>,
}

impl ItemDb {
    /// Constructs a new instance using the specified file system path for
    /// storage.
    pub(crate) async fn open(path: PathBuf) -> Result<Self, Error> {
        if path == PathBuf::from("/") {
            return Err(Error::StorageError(
                "cowardly refusing to open / with redb".to_string(),
            ));
        }

        let db = tokio::task::spawn_blocking(|| -> Result<_, redb::Error> {
            let db = redb::Database::create(path)?;
            create_schema(&db)?;
            Ok(db)
        })
        .await??;

        Ok(Self { db: Arc::new(db) })
    }

    /// Constructs a new instance using the in-memory backend.
    pub(crate) fn new_temporary() -> Result<Self, Error> {
        let db =
            redb::Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;

        create_schema(&db)?;

        Ok(Self { db: Arc::new(db) })
    }

    pub(crate) async fn get(&self, path: &RepoPath) -> Result<Option<ItemInfo>, Error> {
        let db = self.db.clone();
        let key = path.to_string();

        tokio::task::spawn_blocking(move || {
            let txn = db.begin_read()?;
            let table = txn.open_table(ITEM_TABLE)?;
            match table.get(key.as_str())? {
                Some(bytes) => Ok(Some(decode("item record", &bytes.value())?)),
                None => Ok(None),
            }
        })
        .await?
    }

    /// Stores an item record together with any of its ancestor folders that
    /// do not exist yet, in one transaction.
    pub(crate) async fn put(&self, item: ItemInfo, parents: Vec<ItemInfo>) -> Result<(), Error> {
        let db = self.db.clone();
        let key = item.repo_path.to_string();
        let encoded = encode("item record", &item)?;
        let parents = parents
            .into_iter()
            .map(|parent| Ok((parent.repo_path.to_string(), encode("item record", &parent)?)))
            .collect::<Result<Vec<_>, Error>>()?;

        tokio::task::spawn_blocking(move || -> Result<(), Error> {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(ITEM_TABLE)?;
                for (parent_key, parent_encoded) in parents {
                    if table.get(parent_key.as_str())?.is_none() {
                        table.insert(parent_key.as_str(), parent_encoded)?;
                    }
                }
                table.insert(key.as_str(), encoded)?;
            }
            Ok(txn.commit()?)
        })
        .await?
    }

    /// Moves an item record into the trash table. Returns the removed record,
    /// or `None` if there was nothing to remove. A re-deleted path replaces
    /// its older trash entry.
    pub(crate) async fn remove_to_trash(
        &self,
        path: &RepoPath,
        deleted_at: u64,
    ) -> Result<Option<ItemInfo>, Error> {
        let db = self.db.clone();
        let key = path.to_string();

        tokio::task::spawn_blocking(move || -> Result<Option<ItemInfo>, Error> {
            let txn = db.begin_write()?;
            let removed = {
                let mut items = txn.open_table(ITEM_TABLE)?;
                let bytes = items.remove(key.as_str())?.map(|guard| guard.value());
                match bytes {
                    Some(bytes) => Some(decode::<ItemInfo>("item record", &bytes)?),
                    None => None,
                }
            };
            if let Some(item) = &removed {
                let record = TrashRecord {
                    item: item.clone(),
                    deleted_at,
                };
                let mut trash = txn.open_table(TRASH_TABLE)?;
                trash.insert(key.as_str(), encode("trash record", &record)?)?;
            }
            txn.commit()?;
            Ok(removed)
        })
        .await?
    }

    /// Lists the direct children of a folder path, in key order.
    pub(crate) async fn list_children(&self, path: &RepoPath) -> Result<Vec<ItemInfo>, Error> {
        let prefix = if path.path().is_root() {
            format!("{}:", path.repo_key())
        } else {
            format!("{}/", path)
        };

        let items = self.scan_prefix(prefix.clone()).await?;
        Ok(items
            .into_iter()
            .filter(|item| {
                let key = item.repo_path.to_string();
                !key[prefix.len()..].contains('/')
            })
            .collect())
    }

    /// Lists every item of a repository, in key order (parents before their
    /// contents).
    pub(crate) async fn list_repo(&self, repo_key: &str) -> Result<Vec<ItemInfo>, Error> {
        self.scan_prefix(format!("{}:", repo_key)).await
    }

    async fn scan_prefix(&self, prefix: String) -> Result<Vec<ItemInfo>, Error> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || {
            let txn = db.begin_read()?;
            let table = txn.open_table(ITEM_TABLE)?;

            let mut items = Vec::new();
            for elem in table.range(prefix.as_str()..)? {
                let (key, value) = elem?;
                if !key.value().starts_with(prefix.as_str()) {
                    break;
                }
                items.push(decode("item record", &value.value())?);
            }
            Ok(items)
        })
        .await?
    }

    /// Removes and returns all trash records deleted at or before the cutoff.
    pub(crate) async fn drain_trash(&self, cutoff: u64) -> Result<Vec<TrashRecord>, Error> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<TrashRecord>, Error> {
            let txn = db.begin_write()?;
            let drained = {
                let mut trash = txn.open_table(TRASH_TABLE)?;

                let mut expired = Vec::new();
                for elem in trash.iter()? {
                    let (key, value) = elem?;
                    let record: TrashRecord = decode("trash record", &value.value())?;
                    if record.deleted_at <= cutoff {
                        expired.push((key.value().to_string(), record));
                    }
                }

                let mut drained = Vec::with_capacity(expired.len());
                for (key, record) in expired {
                    trash.remove(key.as_str())?;
                    drained.push(record);
                }
                drained
            };
            txn.commit()?;
            Ok(drained)
        })
        .await?
    }

    /// The blob references still reachable from live items or from trash
    /// records that have not been purged yet.
    pub(crate) async fn live_blobs(&self) -> Result<HashSet<BlobRef>, Error> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || {
            let txn = db.begin_read()?;
            let mut live = HashSet::new();

            let items = txn.open_table(ITEM_TABLE)?;
            for elem in items.iter()? {
                let (_, value) = elem?;
                let item: ItemInfo = decode("item record", &value.value())?;
                live.extend(item.blob);
            }

            let trash = txn.open_table(TRASH_TABLE)?;
            for elem in trash.iter()? {
                let (_, value) = elem?;
                let record: TrashRecord = decode("trash record", &value.value())?;
                live.extend(record.item.blob);
            }

            Ok(live)
        })
        .await?
    }
}

/// Ensures all tables are present.
/// Opens a write transaction and calls open_table on both tables, which will
/// create them if not present.
fn create_schema(db: &redb::Database) -> Result<(), redb::Error> {
    let txn = db.begin_write()?;
    txn.open_table(ITEM_TABLE)?;
    txn.open_table(TRASH_TABLE)?;
    txn.commit()?;

    Ok(())
}

fn encode<T: Serialize>(what: &'static str, value: &T) -> Result<Vec<u8>, Error> {
    bincode::serialize(value).map_err(|e| {
        warn!(err=%e, "failed to encode {}", what);
        Error::StorageError(format!("failed to encode {}", what))
    })
}

fn decode<T: DeserializeOwned>(what: &'static str, bytes: &[u8]) -> Result<T, Error> {
    bincode::deserialize(bytes).map_err(|e| {
        warn!(err=%e, "failed to decode stored {}", what);
        Error::StorageError(format!("failed to decode stored {}", what))
    })
}
