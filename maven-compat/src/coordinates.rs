//! Artifact coordinates and their mapping to repository layout paths.
//!
//! The standard layout places an artifact at
//! `<group/as/path>/<artifactId>/<versionDir>/<artifactId>-<version>[-<classifier>].<extension>`
//! where `versionDir` is the base version (`1.0-SNAPSHOT`) even when the
//! file carries a unique snapshot version (`1.0-20240801.123456-3`).

use std::fmt::{self, Display};

use crate::{snapshot, SNAPSHOT};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Coordinates {
    /// Dotted group id, e.g. `org.apache.maven`.
    pub group_id: String,
    pub artifact_id: String,
    /// The file version: either the literal version, `<base>-SNAPSHOT`, or a
    /// unique snapshot version.
    pub version: String,
    pub classifier: Option<String>,
    /// File extension, possibly compound (`tar.gz`).
    pub extension: String,
}

impl Coordinates {
    /// Parses coordinates out of a repository-relative path. Returns None
    /// for paths that do not follow the standard layout (metadata
    /// documents, checksum sidecars, index files, stray files).
    pub fn from_repo_path(path: &str) -> Option<Self> {
        let components: Vec<&str> = path.split('/').collect();
        if components.len() < 4 {
            return None;
        }
        let file_name = *components.last().unwrap();
        let version_dir = components[components.len() - 2];
        let artifact_id = components[components.len() - 3];
        let group_id = components[..components.len() - 3].join(".");

        if group_id.is_empty() || artifact_id.is_empty() || version_dir.is_empty() {
            return None;
        }

        let rest = file_name.strip_prefix(artifact_id)?.strip_prefix('-')?;

        // Figure out where the version part of the file name ends.
        let (version, tail) = match snapshot::base_version(version_dir) {
            Some(base) => {
                let after_base = rest.strip_prefix(base)?.strip_prefix('-')?;
                if let Some(t) = after_base.strip_prefix(SNAPSHOT) {
                    (version_dir.to_string(), t)
                } else {
                    // Unique spelling: qualifier, dash, build number.
                    let qualifier = after_base.get(..15)?;
                    if !crate::timestamp::is_snapshot_qualifier(qualifier) {
                        return None;
                    }
                    let after_qualifier = after_base[15..].strip_prefix('-')?;
                    let digits = after_qualifier
                        .find(|c: char| !c.is_ascii_digit())
                        .unwrap_or(after_qualifier.len());
                    if digits == 0 {
                        return None;
                    }
                    let build: u32 = after_qualifier[..digits].parse().ok()?;
                    (
                        snapshot::format_unique(base, qualifier, build),
                        &after_qualifier[digits..],
                    )
                }
            }
            None => (version_dir.to_string(), rest.strip_prefix(version_dir)?),
        };

        let (classifier, extension) = match tail.strip_prefix('-') {
            Some(t) => {
                let (classifier, ext) = t.split_once('.')?;
                if classifier.is_empty() {
                    return None;
                }
                (Some(classifier.to_string()), ext)
            }
            None => (None, tail.strip_prefix('.')?),
        };
        if extension.is_empty() {
            return None;
        }

        Some(Coordinates {
            group_id,
            artifact_id: artifact_id.to_string(),
            version,
            classifier,
            extension: extension.to_string(),
        })
    }

    /// The version-directory spelling for this artifact (`1.0-SNAPSHOT` for
    /// unique snapshot versions, the version itself otherwise).
    pub fn directory_version(&self) -> String {
        match snapshot::parse_unique(&self.version) {
            Some(u) => u.directory_version(),
            None => self.version.clone(),
        }
    }

    /// The repository-relative path of this artifact under the standard
    /// layout.
    pub fn repo_path(&self) -> String {
        let mut p = String::new();
        p.push_str(&self.group_id.replace('.', "/"));
        p.push('/');
        p.push_str(&self.artifact_id);
        p.push('/');
        p.push_str(&self.directory_version());
        p.push('/');
        p.push_str(&self.artifact_id);
        p.push('-');
        p.push_str(&self.version);
        if let Some(classifier) = &self.classifier {
            p.push('-');
            p.push_str(classifier);
        }
        p.push('.');
        p.push_str(&self.extension);
        p
    }
}

impl Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.version)?;
        if let Some(classifier) = &self.classifier {
            write!(f, ":{}", classifier)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case::release(
        "org/apache/maven/maven-core/3.9.6/maven-core-3.9.6.jar",
        "org.apache.maven", "maven-core", "3.9.6", None, "jar"
    )]
    #[case::pom(
        "com/example/widget/1.0/widget-1.0.pom",
        "com.example", "widget", "1.0", None, "pom"
    )]
    #[case::classifier(
        "com/example/widget/1.0/widget-1.0-sources.jar",
        "com.example", "widget", "1.0", Some("sources"), "jar"
    )]
    #[case::compound_extension(
        "com/example/widget/1.0/widget-1.0-dist.tar.gz",
        "com.example", "widget", "1.0", Some("dist"), "tar.gz"
    )]
    #[case::plain_snapshot(
        "com/example/widget/1.0-SNAPSHOT/widget-1.0-SNAPSHOT.jar",
        "com.example", "widget", "1.0-SNAPSHOT", None, "jar"
    )]
    #[case::unique_snapshot(
        "com/example/widget/1.0-SNAPSHOT/widget-1.0-20240801.123456-3.jar",
        "com.example", "widget", "1.0-20240801.123456-3", None, "jar"
    )]
    #[case::unique_snapshot_classifier(
        "com/example/widget/1.0-SNAPSHOT/widget-1.0-20240801.123456-3-sources.jar",
        "com.example", "widget", "1.0-20240801.123456-3", Some("sources"), "jar"
    )]
    fn parses(
        #[case] path: &str,
        #[case] group: &str,
        #[case] artifact: &str,
        #[case] version: &str,
        #[case] classifier: Option<&str>,
        #[case] extension: &str,
    ) {
        let c = Coordinates::from_repo_path(path).expect("must parse");
        assert_eq!(group, c.group_id);
        assert_eq!(artifact, c.artifact_id);
        assert_eq!(version, c.version);
        assert_eq!(classifier.map(str::to_string), c.classifier);
        assert_eq!(extension, c.extension);
    }

    #[rstest]
    #[case::too_shallow("widget/1.0/widget-1.0.jar")]
    #[case::metadata("com/example/widget/maven-metadata.xml")]
    #[case::name_mismatch("com/example/widget/1.0/gadget-1.0.jar")]
    #[case::version_mismatch("com/example/widget/1.0/widget-1.1.jar")]
    #[case::no_extension("com/example/widget/1.0/widget-1.0")]
    #[case::empty_classifier("com/example/widget/1.0/widget-1.0-.jar")]
    fn rejects(#[case] path: &str) {
        assert_eq!(None, Coordinates::from_repo_path(path));
    }

    #[test]
    fn path_roundtrip() {
        for path in [
            "org/apache/maven/maven-core/3.9.6/maven-core-3.9.6.jar",
            "com/example/widget/1.0-SNAPSHOT/widget-1.0-20240801.123456-3-sources.jar",
        ] {
            let c = Coordinates::from_repo_path(path).expect("must parse");
            assert_eq!(path, c.repo_path());
        }
    }

    #[test]
    fn display() {
        let c = Coordinates::from_repo_path("com/example/widget/1.0/widget-1.0-sources.jar")
            .unwrap();
        assert_eq!("com.example:widget:1.0:sources", c.to_string());
    }
}
