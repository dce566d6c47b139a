//! One resolution request and its path classification.

use maven_compat::checksum_file::ChecksumKind;
use maven_compat::path as repo_path;

use quarry_store::RelPath;

/// What kind of repository path a request names, decided from the path
/// alone before any repository is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// A release or snapshot artifact, or anything else without special
    /// handling.
    Standard,
    /// A `maven-metadata.xml` document, merged across repositories.
    Metadata,
    /// A checksum sidecar. `metadata` marks sidecars covering a metadata
    /// document, which are served from the merged-checksum cache.
    Checksum { kind: ChecksumKind, metadata: bool },
    /// A file under the packed-index directory.
    Index,
}

pub fn classify(path: &str) -> PathKind {
    if let Some((base, kind)) = repo_path::checksum_target(path) {
        return PathKind::Checksum {
            kind,
            metadata: repo_path::is_metadata(base),
        };
    }
    if repo_path::is_index(path) {
        return PathKind::Index;
    }
    if repo_path::is_metadata(path) {
        return PathKind::Metadata;
    }
    PathKind::Standard
}

/// A single artifact lookup, as the bridge hands it to the resolver.
#[derive(Debug, Clone)]
pub struct ArtifactRequest {
    pub repo_key: String,
    pub path: RelPath,
    /// HEAD request; resolution never opens content.
    pub head_only: bool,
    /// `If-Modified-Since` in epoch milliseconds. Content is skipped when
    /// the winning resource is not newer; the descriptor still resolves.
    pub if_modified_since: Option<u64>,
    /// The request came from another repository manager; remotes are never
    /// consulted on its behalf.
    pub from_peer: bool,
    /// Marks a lookup a repository issued against itself while answering
    /// another request; short-circuits to not-found to break loops.
    pub recursive: bool,
}

impl ArtifactRequest {
    pub fn new(repo_key: impl Into<String>, path: RelPath) -> Self {
        ArtifactRequest {
            repo_key: repo_key.into(),
            path,
            head_only: false,
            if_modified_since: None,
            from_peer: false,
            recursive: false,
        }
    }

    pub fn path_kind(&self) -> PathKind {
        classify(self.path.as_str())
    }

    /// Whether the path (or the file a sidecar covers) lies in a snapshot
    /// version directory.
    pub fn is_snapshot(&self) -> bool {
        repo_path::is_snapshot(self.path.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::jar("com/example/widget/1.0/widget-1.0.jar", PathKind::Standard)]
    #[case::pom("com/example/widget/1.0/widget-1.0.pom", PathKind::Standard)]
    #[case::snapshot_jar(
        "com/example/widget/1.0-SNAPSHOT/widget-1.0-SNAPSHOT.jar",
        PathKind::Standard
    )]
    #[case::metadata("com/example/widget/maven-metadata.xml", PathKind::Metadata)]
    #[case::artifact_sha1(
        "com/example/widget/1.0/widget-1.0.jar.sha1",
        PathKind::Checksum {
            kind: ChecksumKind::Sha1,
            metadata: false,
        }
    )]
    #[case::metadata_md5(
        "com/example/widget/maven-metadata.xml.md5",
        PathKind::Checksum {
            kind: ChecksumKind::Md5,
            metadata: true,
        }
    )]
    #[case::index(".index/quarry-index.gz", PathKind::Index)]
    #[case::index_sha1(
        ".index/quarry-index.gz.sha1",
        PathKind::Checksum {
            kind: ChecksumKind::Sha1,
            metadata: false,
        }
    )]
    fn classification(#[case] path: &str, #[case] expected: PathKind) {
        assert_eq!(expected, classify(path));
    }

    #[test]
    fn snapshot_flag_covers_sidecars() {
        let path: RelPath = "com/example/widget/1.0-SNAPSHOT/widget-1.0-SNAPSHOT.jar.md5"
            .parse()
            .unwrap();
        assert!(ArtifactRequest::new("libs", path).is_snapshot());

        let path: RelPath = "com/example/widget/1.0/widget-1.0.jar".parse().unwrap();
        assert!(!ArtifactRequest::new("libs", path).is_snapshot());
    }
}
