//! Classification of repository-relative paths.
//!
//! Resolution treats a request differently depending on what kind of path it
//! names: checksum sidecars and index files are always resolved like release
//! artifacts, metadata documents are merged across repositories, snapshot
//! artifacts are picked by timestamp. All of that is decided from the path
//! alone, before any repository is consulted.

use crate::checksum_file::ChecksumKind;
use crate::{snapshot, INDEX_DIR, METADATA_FILE_NAME};

/// The final component of the path ("" for the repository root).
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Splits a checksum sidecar path into the covered path and algorithm.
/// `foo/bar.jar.sha1` → (`foo/bar.jar`, SHA-1).
pub fn checksum_target(path: &str) -> Option<(&str, ChecksumKind)> {
    let (base, ext) = path.rsplit_once('.')?;
    let kind = ChecksumKind::from_ext(ext)?;
    if base.is_empty() || base.ends_with('/') {
        return None;
    }
    Some((base, kind))
}

pub fn is_checksum(path: &str) -> bool {
    checksum_target(path).is_some()
}

/// True for `maven-metadata.xml` documents at any depth.
pub fn is_metadata(path: &str) -> bool {
    file_name(path) == METADATA_FILE_NAME
}

/// True for files under the packed-index directory of a repository.
pub fn is_index(path: &str) -> bool {
    path.strip_prefix(INDEX_DIR)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// True when the path lies in a snapshot version directory, i.e. its parent
/// directory ends in `-SNAPSHOT`. Checksum sidecars inherit the
/// classification of the file they cover.
pub fn is_snapshot(path: &str) -> bool {
    let path = match checksum_target(path) {
        Some((base, _)) => base,
        None => path,
    };
    match path.rsplit_once('/') {
        Some((dir, _)) => snapshot::base_version(file_name(dir)).is_some(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::sha1("a/b-1.0.jar.sha1", Some(("a/b-1.0.jar", ChecksumKind::Sha1)))]
    #[case::md5("a/b-1.0.jar.md5", Some(("a/b-1.0.jar", ChecksumKind::Md5)))]
    #[case::metadata_sha1(
        "a/maven-metadata.xml.sha1",
        Some(("a/maven-metadata.xml", ChecksumKind::Sha1))
    )]
    #[case::plain("a/b-1.0.jar", None)]
    #[case::sha256("a/b-1.0.jar.sha256", None)]
    #[case::bare(".sha1", None)]
    fn checksum_targets(#[case] path: &str, #[case] expected: Option<(&str, ChecksumKind)>) {
        assert_eq!(expected, checksum_target(path));
    }

    #[rstest]
    #[case::artifact_dir("com/example/widget/maven-metadata.xml", true)]
    #[case::root("maven-metadata.xml", true)]
    #[case::other_xml("com/example/widget/metadata.xml", false)]
    #[case::jar("com/example/widget/1.0/widget-1.0.jar", false)]
    fn metadata(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(expected, is_metadata(path));
    }

    #[rstest]
    #[case(".index/quarry-index.gz", true)]
    #[case(".index/quarry-index.properties", true)]
    #[case(".indexes/foo", false)]
    #[case("a/.index/foo", false)]
    #[case(".index", false)]
    fn index(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(expected, is_index(path));
    }

    #[rstest]
    #[case::plain("com/example/widget/1.0-SNAPSHOT/widget-1.0-SNAPSHOT.jar", true)]
    #[case::unique("com/example/widget/1.0-SNAPSHOT/widget-1.0-20240801.123456-3.jar", true)]
    #[case::sidecar("com/example/widget/1.0-SNAPSHOT/widget-1.0-SNAPSHOT.jar.sha1", true)]
    #[case::snapshot_metadata("com/example/widget/1.0-SNAPSHOT/maven-metadata.xml", true)]
    #[case::release("com/example/widget/1.0/widget-1.0.jar", false)]
    #[case::top_level("widget-1.0-SNAPSHOT.jar", false)]
    fn snapshots(#[case] path: &str, #[case] expected: bool) {
        assert_eq!(expected, is_snapshot(path));
    }
}
