//! Snapshot version strings.
//!
//! A snapshot version appears in two spellings: the non-unique directory
//! form `1.0-SNAPSHOT`, and the unique deployed form
//! `1.0-20240801.123456-3` carrying the deployment timestamp and build
//! number. Resolution needs to move between the two.

use crate::{timestamp, SNAPSHOT};

/// A parsed unique snapshot version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueSnapshot<'a> {
    /// Version without the qualifier, e.g. `1.0`.
    pub base: &'a str,
    /// `yyyyMMdd.HHmmss` deployment timestamp.
    pub timestamp: &'a str,
    pub build_number: u32,
}

impl UniqueSnapshot<'_> {
    /// The directory spelling, `<base>-SNAPSHOT`.
    pub fn directory_version(&self) -> String {
        format!("{}-{}", self.base, SNAPSHOT)
    }
}

/// Strips a `-SNAPSHOT` suffix.
pub fn base_version(version: &str) -> Option<&str> {
    version.strip_suffix(&format!("-{}", SNAPSHOT))
}

/// Parses the unique spelling `<base>-<yyyyMMdd.HHmmss>-<build>`.
pub fn parse_unique(version: &str) -> Option<UniqueSnapshot<'_>> {
    // Work from the right: the build number and qualifier have fixed shape,
    // the base may itself contain dashes.
    let (rest, build) = version.rsplit_once('-')?;
    let build_number: u32 = build.parse().ok()?;
    let (base, qualifier) = rest.rsplit_once('-')?;
    if base.is_empty() || !timestamp::is_snapshot_qualifier(qualifier) {
        return None;
    }
    Some(UniqueSnapshot {
        base,
        timestamp: qualifier,
        build_number,
    })
}

/// Builds the unique spelling from its parts.
pub fn format_unique(base: &str, qualifier: &str, build_number: u32) -> String {
    format!("{}-{}-{}", base, qualifier, build_number)
}
