//! Content-addressed blob storage on a local filesystem.
//!
//! File content is staged in a `tmp` directory and moved **atomically** into
//! `blobs/SHA1[:2]/SHA1` once its digest is known, e.g. `abcdef...` gets
//! turned into `ab/abcdef...`. Two items with identical bytes share one
//! blob; a blob with no referencing item is removed by trash purging.

use std::io;
use std::path::PathBuf;

use tokio::io::AsyncWriteExt;

use crate::item::BlobRef;

pub(crate) struct BlobStore {
    /// Root of the content area, holding `tmp` and `blobs`.
    root: PathBuf,
}

impl BlobStore {
    pub(crate) async fn open(root: PathBuf) -> io::Result<Self> {
        tokio::fs::create_dir_all(&root).await?;
        tokio::fs::create_dir_all(root.join("tmp")).await?;
        tokio::fs::create_dir_all(root.join("blobs")).await?;

        Ok(Self { root })
    }

    /// Opens a staging file. Dropping it without [`BlobStore::commit`]
    /// removes it again.
    pub(crate) async fn stage(&self) -> io::Result<async_tempfile::TempFile> {
        match async_tempfile::TempFile::new_in(self.root.join("tmp")).await {
            Ok(file) => Ok(file),
            Err(async_tempfile::Error::Io(io_error)) => Err(io_error),
            Err(async_tempfile::Error::InvalidFile) => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "invalid or missing file specified",
            )),
            Err(async_tempfile::Error::InvalidDirectory) => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "invalid or missing directory specified",
            )),
        }
    }

    /// Moves a staged file into its content address.
    pub(crate) async fn commit(
        &self,
        mut staged: async_tempfile::TempFile,
        blob: &BlobRef,
    ) -> io::Result<()> {
        staged.sync_all().await?;
        staged.flush().await?;

        let hex = blob.sha1_hex();
        let shard_dir = self.root.join("blobs").join(&hex[..2]);
        tokio::fs::create_dir_all(&shard_dir).await?;
        tokio::fs::rename(staged.file_path(), shard_dir.join(hex)).await?;

        Ok(())
    }

    fn derive_path(&self, blob: &BlobRef) -> PathBuf {
        let hex = blob.sha1_hex();
        self.root.join("blobs").join(&hex[..2]).join(hex)
    }

    pub(crate) async fn has(&self, blob: &BlobRef) -> io::Result<bool> {
        tokio::fs::try_exists(self.derive_path(blob)).await
    }

    pub(crate) async fn open_read(&self, blob: &BlobRef) -> io::Result<Option<tokio::fs::File>> {
        match tokio::fs::File::open(self.derive_path(blob)).await {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Removes a blob; already-gone blobs are not an error.
    pub(crate) async fn remove(&self, blob: &BlobRef) -> io::Result<()> {
        match tokio::fs::remove_file(self.derive_path(blob)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::digests::HexDigest;

    fn blob_ref(data: &[u8]) -> BlobRef {
        use digest::Digest;
        BlobRef::new(HexDigest::from_bytes(&sha1::Sha1::digest(data)))
    }

    #[tokio::test]
    async fn stage_commit_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::open(dir.path().to_path_buf()).await.unwrap();

        let data = b"artifact bytes";
        let blob = blob_ref(data);
        assert!(!blobs.has(&blob).await.unwrap());

        let mut staged = blobs.stage().await.unwrap();
        staged.write_all(data).await.unwrap();
        blobs.commit(staged, &blob).await.unwrap();

        assert!(blobs.has(&blob).await.unwrap());
        let mut read_back = Vec::new();
        blobs
            .open_read(&blob)
            .await
            .unwrap()
            .expect("blob must exist")
            .read_to_end(&mut read_back)
            .await
            .unwrap();
        assert_eq!(data.as_slice(), read_back);
    }

    #[tokio::test]
    async fn dropped_staging_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::open(dir.path().to_path_buf()).await.unwrap();

        let mut staged = blobs.stage().await.unwrap();
        staged.write_all(b"discarded").await.unwrap();
        drop(staged);

        assert!(blobs.open_read(&blob_ref(b"discarded")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::open(dir.path().to_path_buf()).await.unwrap();

        let blob = blob_ref(b"x");
        let mut staged = blobs.stage().await.unwrap();
        staged.write_all(b"x").await.unwrap();
        blobs.commit(staged, &blob).await.unwrap();

        blobs.remove(&blob).await.unwrap();
        blobs.remove(&blob).await.unwrap();
        assert!(!blobs.has(&blob).await.unwrap());
    }
}
