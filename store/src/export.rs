//! Exporting a repository back to a plain filesystem layout.
//!
//! The exported tree is a valid Maven repository: artifact files in their
//! folder structure, optionally with regenerated checksum sidecars. Item
//! properties that have no place in the Maven layout (declared checksums,
//! timestamps) can be written to a `.quarry-items` sidecar directory per
//! folder, which a later import picks up again.

use std::path::{Path, PathBuf};

use maven_compat::checksum_file::{self, ChecksumKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::errors::Error;
use crate::item::{ItemInfo, ItemKind, ItemSnapshot};
use crate::path::RelPath;
use crate::store::ItemStore;

/// Name of the per-folder sidecar directory holding exported item records.
pub const ITEM_SIDECAR_DIR: &str = ".quarry-items";

#[derive(Debug, Clone, Copy, Default)]
pub struct ExportSettings {
    /// Skip files whose export target is at least as new as the stored item.
    pub incremental: bool,
    /// Write `.sha1`/`.md5` sidecar files next to each exported file.
    pub write_checksums: bool,
    /// Write each item's property record into [`ITEM_SIDECAR_DIR`].
    pub write_properties: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub exported: u64,
    pub skipped: u64,
    /// Set when the run stopped at a folder boundary due to cancellation;
    /// everything exported so far is complete.
    pub cancelled: bool,
}

/// Writes all items of a repository below `target`.
#[instrument(skip(store, cancel), fields(repo = repo_key, target = %target.display(), indicatif.pb_show = 1))]
pub async fn export_repo(
    store: &ItemStore,
    repo_key: &str,
    target: &Path,
    settings: ExportSettings,
    cancel: &CancellationToken,
) -> Result<ExportReport, Error> {
    let items = store.list_repo(repo_key).await?;
    let mut report = ExportReport::default();
    let mut current_folder: Option<RelPath> = None;

    let span = Span::current();
    span.pb_set_style(&quarry_tracing::PB_PROGRESS_STYLE);
    span.pb_set_length(items.len() as u64);
    span.pb_start();

    for item in items {
        // cancellation is polled at folder boundaries, so a completed
        // folder is never left half-written
        let folder = item.repo_path.path().parent();
        if folder != current_folder {
            if cancel.is_cancelled() {
                info!(exported = report.exported, "export cancelled");
                report.cancelled = true;
                return Ok(report);
            }
            current_folder = folder;
        }
        span.pb_inc(1);

        let dst = target.join(item.repo_path.path().as_str());
        match item.kind {
            ItemKind::Folder => {
                tokio::fs::create_dir_all(&dst).await?;
            }
            ItemKind::File => {
                if settings.incremental && is_up_to_date(&dst, &item).await {
                    report.skipped += 1;
                    continue;
                }
                if let Some(parent) = dst.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }

                let snapshot = ItemSnapshot::new(item.clone());
                let mut content = store.open_content(&snapshot).await?;
                let mut out = tokio::fs::File::create(&dst).await?;
                tokio::io::copy(&mut content, &mut out).await?;

                if settings.write_checksums {
                    write_checksum_sidecars(&dst, &item).await?;
                }
                if settings.write_properties {
                    write_property_sidecar(&dst, &item).await?;
                }
                report.exported += 1;
            }
        }
    }

    info!(
        exported = report.exported,
        skipped = report.skipped,
        "export done"
    );
    Ok(report)
}

async fn is_up_to_date(dst: &Path, item: &ItemInfo) -> bool {
    let modified = match tokio::fs::metadata(dst).await.and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(_) => return false,
    };
    let millis = modified
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    millis >= item.last_modified
}

pub(crate) fn sidecar_path(dst: &Path, extension: &str) -> PathBuf {
    let mut os = dst.to_path_buf().into_os_string();
    os.push(format!(".{}", extension));
    PathBuf::from(os)
}

async fn write_checksum_sidecars(dst: &Path, item: &ItemInfo) -> Result<(), Error> {
    for kind in ChecksumKind::ALL {
        let info = item.checksums.get(kind);
        // prefer the digest of the bytes we just wrote
        if let Some(digest) = info.actual.as_ref().or(info.original.as_ref()) {
            tokio::fs::write(
                sidecar_path(dst, kind.ext()),
                checksum_file::format(digest.as_str()),
            )
            .await?;
        }
    }
    Ok(())
}

async fn write_property_sidecar(dst: &Path, item: &ItemInfo) -> Result<(), Error> {
    let file_name = item.repo_path.path().file_name().ok_or_else(|| {
        Error::InvalidRequest(format!("cannot export repository root {}", item.repo_path))
    })?;
    let sidecar_dir = match dst.parent() {
        Some(parent) => parent.join(ITEM_SIDECAR_DIR),
        None => PathBuf::from(ITEM_SIDECAR_DIR),
    };
    tokio::fs::create_dir_all(&sidecar_dir).await?;

    let encoded = serde_json::to_vec_pretty(item)
        .map_err(|e| Error::StorageError(format!("failed to encode item record: {}", e)))?;
    tokio::fs::write(sidecar_dir.join(format!("{}.json", file_name)), encoded).await?;

    Ok(())
}
