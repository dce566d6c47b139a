//! Importing a filesystem layout into a repository.
//!
//! The source is expected to be a Maven repository tree, typically one
//! produced by [`export_repo`](crate::export::export_repo) or by another
//! repository manager. Checksum sidecars become the items' declared
//! checksums; `.quarry-items` records written by an earlier export restore
//! the properties the plain layout cannot carry.

use std::path::{Path, PathBuf};

use maven_compat::checksum_file::ChecksumKind;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::checksum::ChecksumPolicyKind;
use crate::digests::HexDigest;
use crate::errors::Error;
use crate::export::{sidecar_path, ITEM_SIDECAR_DIR};
use crate::item::ItemInfo;
use crate::lock::Wait;
use crate::path::RepoPath;
use crate::store::{ItemStore, WriteHandle};

#[derive(Debug, Clone, Copy)]
pub struct ImportSettings {
    /// Policy applied to declared checksums found next to the files.
    pub policy: ChecksumPolicyKind,
    /// Read `.sha1`/`.md5` sidecars as the items' declared checksums.
    pub read_checksums: bool,
    /// Restore item records from [`ITEM_SIDECAR_DIR`] directories.
    pub read_properties: bool,
}

impl Default for ImportSettings {
    fn default() -> Self {
        ImportSettings {
            policy: ChecksumPolicyKind::default(),
            read_checksums: true,
            read_properties: true,
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: u64,
    /// Entries that could not become items (unrepresentable paths).
    pub skipped: u64,
    /// Entries rejected by the checksum policy or failing mid-transfer.
    pub failed: u64,
    pub cancelled: bool,
}

struct SourceEntry {
    rel: String,
    abs: PathBuf,
    is_dir: bool,
    modified_millis: u64,
}

/// Imports all files below `source` into a repository.
#[instrument(skip(store, cancel), fields(repo = repo_key, source = %source.display()))]
pub async fn import_repo(
    store: &ItemStore,
    repo_key: &str,
    source: &Path,
    settings: ImportSettings,
    cancel: &CancellationToken,
) -> Result<ImportReport, Error> {
    let entries = collect_entries(source.to_path_buf()).await?;
    let mut report = ImportReport::default();
    let mut current_folder: Option<&str> = None;

    for entry in &entries {
        // like export, cancellation is polled at folder boundaries
        let folder = parent_of(&entry.rel);
        if current_folder != Some(folder) {
            if cancel.is_cancelled() {
                info!(imported = report.imported, "import cancelled");
                report.cancelled = true;
                break;
            }
            current_folder = Some(folder);
        }

        // checksum sidecars are picked up with the file they cover
        if !entry.is_dir && maven_compat::path::is_checksum(&entry.rel) {
            continue;
        }

        let path = match entry.rel.parse().and_then(|rel| RepoPath::new(repo_key, rel)) {
            Ok(path) => path,
            Err(e) => {
                warn!(entry = entry.rel, err = %e, "skipping unrepresentable path");
                report.skipped += 1;
                continue;
            }
        };

        if entry.is_dir {
            store.create_folder(&path, Wait::Normal).await?;
            continue;
        }

        match import_file(store, path, entry, &settings).await {
            Ok(()) => report.imported += 1,
            Err(e) => {
                warn!(entry = entry.rel, err = %e, "failed to import file");
                report.failed += 1;
            }
        }
    }

    info!(
        imported = report.imported,
        skipped = report.skipped,
        failed = report.failed,
        "import done"
    );
    Ok(report)
}

async fn collect_entries(source: PathBuf) -> Result<Vec<SourceEntry>, Error> {
    tokio::task::spawn_blocking(move || -> Result<Vec<SourceEntry>, Error> {
        let mut entries = Vec::new();
        let walker = walkdir::WalkDir::new(&source)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.file_name() != ITEM_SIDECAR_DIR);

        for entry in walker {
            let entry = entry
                .map_err(|e| Error::InvalidRequest(format!("cannot walk import source: {}", e)))?;
            if entry.depth() == 0 {
                continue;
            }

            let rel = entry
                .path()
                .strip_prefix(&source)
                .map_err(|e| Error::StorageError(e.to_string()))?;
            let rel = match rel.to_str() {
                Some(rel) => rel.to_string(),
                None => {
                    warn!(entry = %rel.display(), "skipping non-UTF-8 path");
                    continue;
                }
            };

            let modified_millis = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64)
                .unwrap_or_else(crate::epoch_millis_now);

            entries.push(SourceEntry {
                rel,
                abs: entry.path().to_path_buf(),
                is_dir: entry.file_type().is_dir(),
                modified_millis,
            });
        }

        Ok(entries)
    })
    .await?
}

fn parent_of(rel: &str) -> &str {
    rel.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

async fn import_file(
    store: &ItemStore,
    path: RepoPath,
    entry: &SourceEntry,
    settings: &ImportSettings,
) -> Result<(), Error> {
    let record = if settings.read_properties {
        read_property_sidecar(&entry.abs).await
    } else {
        None
    };

    let mut handle = store.write(&path, Wait::Normal).await?;
    let mut last_modified = entry.modified_millis;

    if settings.read_checksums {
        for kind in ChecksumKind::ALL {
            if let Some(digest) = read_checksum_sidecar(&entry.abs, kind).await {
                handle.draft_mut().checksums_mut().set_original(kind, digest);
            }
        }
    }

    // a record written by our own export is more precise than the layout
    if let Some(record) = record {
        last_modified = record.last_modified;
        handle.draft_mut().set_created(record.created);
        restore_checksums(&mut handle, &record);
    }

    let file = tokio::fs::File::open(&entry.abs).await?;
    store
        .fill_content(&mut handle, settings.policy, last_modified, file)
        .await?;
    store.commit(handle).await?;

    Ok(())
}

fn restore_checksums(handle: &mut WriteHandle, record: &ItemInfo) {
    for kind in ChecksumKind::ALL {
        let recorded = record.checksums.get(kind);
        if let Some(original) = &recorded.original {
            let slot = handle.draft_mut().checksums_mut().get_mut(kind);
            slot.original = Some(original.clone());
            slot.trusted = recorded.trusted;
        }
    }
}

async fn read_checksum_sidecar(abs: &Path, kind: ChecksumKind) -> Option<HexDigest> {
    let sidecar = sidecar_path(abs, kind.ext());
    let content = tokio::fs::read_to_string(&sidecar).await.ok()?;
    match HexDigest::parse(&content, kind) {
        Ok(digest) => Some(digest),
        Err(e) => {
            warn!(sidecar = %sidecar.display(), err = %e, "ignoring unparseable checksum sidecar");
            None
        }
    }
}

async fn read_property_sidecar(abs: &Path) -> Option<ItemInfo> {
    let name = abs.file_name()?.to_str()?;
    let sidecar = abs
        .parent()?
        .join(ITEM_SIDECAR_DIR)
        .join(format!("{}.json", name));
    let bytes = tokio::fs::read(&sidecar).await.ok()?;

    match serde_json::from_slice(&bytes) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(sidecar = %sidecar.display(), err = %e, "ignoring unreadable item record");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{export_repo, ExportSettings};
    use crate::lock::LockTimeouts;

    async fn test_store(dir: &tempfile::TempDir) -> ItemStore {
        ItemStore::open(dir.path(), LockTimeouts::default())
            .await
            .unwrap()
    }

    async fn deploy(store: &ItemStore, path: &str, data: &[u8], last_modified: u64) {
        let path: RepoPath = path.parse().unwrap();
        let mut handle = store.write(&path, Wait::Normal).await.unwrap();
        store
            .fill_content(
                &mut handle,
                ChecksumPolicyKind::IgnoreAndGenerate,
                last_modified,
                data,
            )
            .await
            .unwrap();
        store.commit(handle).await.unwrap();
    }

    #[tokio::test]
    async fn export_import_roundtrip() {
        let src_dir = tempfile::tempdir().unwrap();
        let exchange = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();

        let source = test_store(&src_dir).await;
        deploy(
            &source,
            "libs-local:org/example/demo/1.0/demo-1.0.jar",
            b"jar bytes",
            123_000,
        )
        .await;
        deploy(
            &source,
            "libs-local:org/example/demo/1.0/demo-1.0.pom",
            b"<project/>",
            124_000,
        )
        .await;

        let report = export_repo(
            &source,
            "libs-local",
            exchange.path(),
            ExportSettings {
                incremental: false,
                write_checksums: true,
                write_properties: true,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(2, report.exported);
        assert!(exchange
            .path()
            .join("org/example/demo/1.0/demo-1.0.jar.sha1")
            .exists());

        let target = test_store(&dst_dir).await;
        let report = import_repo(
            &target,
            "libs-local",
            exchange.path(),
            ImportSettings::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(2, report.imported);
        assert_eq!(0, report.failed);

        let path: RepoPath = "libs-local:org/example/demo/1.0/demo-1.0.jar"
            .parse()
            .unwrap();
        let item = target.get(&path).await.unwrap().expect("must exist");
        assert_eq!(123_000, item.last_modified());
        // the exported sidecar became the declared checksum, and it matches
        assert_eq!(
            Some(true),
            item.checksums().get(ChecksumKind::Sha1).matches()
        );
        assert_eq!(
            b"jar bytes".as_slice(),
            target.read_content_bytes(&item).await.unwrap()
        );
    }

    #[tokio::test]
    async fn incremental_export_skips_fresh_targets() {
        let src_dir = tempfile::tempdir().unwrap();
        let exchange = tempfile::tempdir().unwrap();

        let source = test_store(&src_dir).await;
        deploy(
            &source,
            "libs-local:org/example/demo/1.0/demo-1.0.jar",
            b"jar bytes",
            123_000,
        )
        .await;

        let settings = ExportSettings {
            incremental: true,
            ..Default::default()
        };
        let first = export_repo(
            &source,
            "libs-local",
            exchange.path(),
            settings,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(1, first.exported);

        let second = export_repo(
            &source,
            "libs-local",
            exchange.path(),
            settings,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(0, second.exported);
        assert_eq!(1, second.skipped);
    }

    #[tokio::test]
    async fn cancelled_export_stops_cleanly() {
        let src_dir = tempfile::tempdir().unwrap();
        let exchange = tempfile::tempdir().unwrap();

        let source = test_store(&src_dir).await;
        deploy(
            &source,
            "libs-local:org/example/demo/1.0/demo-1.0.jar",
            b"jar bytes",
            123_000,
        )
        .await;

        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = export_repo(
            &source,
            "libs-local",
            exchange.path(),
            ExportSettings::default(),
            &cancel,
        )
        .await
        .unwrap();
        assert!(report.cancelled);
        assert_eq!(0, report.exported);
    }

    #[tokio::test]
    async fn import_rejects_mismatched_sidecar_under_strict_policy() {
        let exchange = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();

        let dir = exchange.path().join("org/example/demo/1.0");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("demo-1.0.jar"), b"jar bytes")
            .await
            .unwrap();
        tokio::fs::write(
            dir.join("demo-1.0.jar.sha1"),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709",
        )
        .await
        .unwrap();

        let target = test_store(&dst_dir).await;
        let report = import_repo(
            &target,
            "libs-local",
            exchange.path(),
            ImportSettings {
                policy: ChecksumPolicyKind::VerifyAgainstClient,
                ..Default::default()
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(0, report.imported);
        assert_eq!(1, report.failed);
        assert!(!target
            .exists(&"libs-local:org/example/demo/1.0/demo-1.0.jar".parse().unwrap())
            .await
            .unwrap());
    }
}
