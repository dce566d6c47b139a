//! Checksum bookkeeping and the write-side verification policy.
//!
//! Every stored file carries one [`ChecksumInfo`] per supported algorithm:
//! the digest the client declared (if any), the digest computed from the
//! bytes actually stored, and a trust flag for values imported from sources
//! that never supplied the content itself.

use maven_compat::checksum_file::ChecksumKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::digests::HexDigest;

/// Checksum state of one algorithm for one stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumInfo {
    pub kind: ChecksumKind,
    /// Digest declared by the client or a sidecar file, if any.
    pub original: Option<HexDigest>,
    /// Digest computed over the stored bytes.
    pub actual: Option<HexDigest>,
    /// Marks an original that is accepted without comparison, e.g. because
    /// it was imported from a trusted filesystem layout.
    pub trusted: bool,
}

impl ChecksumInfo {
    fn new(kind: ChecksumKind) -> Self {
        ChecksumInfo {
            kind,
            original: None,
            actual: None,
            trusted: false,
        }
    }

    /// `Some(true)` when both sides are present and agree, `Some(false)` on
    /// a mismatch, `None` while either side is missing.
    pub fn matches(&self) -> Option<bool> {
        Some(self.original.as_ref()? == self.actual.as_ref()?)
    }
}

/// The per-algorithm checksum slots of a stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksums {
    md5: ChecksumInfo,
    sha1: ChecksumInfo,
}

impl Default for Checksums {
    fn default() -> Self {
        Checksums {
            md5: ChecksumInfo::new(ChecksumKind::Md5),
            sha1: ChecksumInfo::new(ChecksumKind::Sha1),
        }
    }
}

impl Checksums {
    pub fn get(&self, kind: ChecksumKind) -> &ChecksumInfo {
        match kind {
            ChecksumKind::Md5 => &self.md5,
            ChecksumKind::Sha1 => &self.sha1,
        }
    }

    pub fn get_mut(&mut self, kind: ChecksumKind) -> &mut ChecksumInfo {
        match kind {
            ChecksumKind::Md5 => &mut self.md5,
            ChecksumKind::Sha1 => &mut self.sha1,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChecksumInfo> {
        [&self.md5, &self.sha1].into_iter()
    }

    pub fn set_original(&mut self, kind: ChecksumKind, digest: HexDigest) {
        self.get_mut(kind).original = Some(digest);
    }

    pub fn set_trusted_original(&mut self, kind: ChecksumKind, digest: HexDigest) {
        let info = self.get_mut(kind);
        info.original = Some(digest);
        info.trusted = true;
    }

    pub(crate) fn set_actuals(&mut self, md5: HexDigest, sha1: HexDigest) {
        self.md5.actual = Some(md5);
        self.sha1.actual = Some(sha1);
    }

    /// The digest of the stored bytes, used to address the content blob.
    pub fn actual_sha1(&self) -> Option<&HexDigest> {
        self.sha1.actual.as_ref()
    }
}

/// How writes treat a declared checksum that is missing or disagrees with
/// the stored bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChecksumPolicyKind {
    /// Accept everything; a broken or missing declared value is shadowed by
    /// the computed one when checksums are served.
    #[default]
    IgnoreAndGenerate,
    /// Accept a missing declared value, reject a mismatch.
    GenerateIfAbsent,
    /// Require a declared value and reject a mismatch.
    VerifyAgainstClient,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChecksumPolicyError {
    #[error("{kind} checksum mismatch: declared {original}, stored bytes have {actual}")]
    Mismatch {
        kind: ChecksumKind,
        original: HexDigest,
        actual: HexDigest,
    },

    #[error("no {kind} checksum declared, but policy requires one")]
    MissingOriginal { kind: ChecksumKind },
}

impl ChecksumPolicyKind {
    /// Checks all algorithms of a file against this policy. Called after the
    /// stored digests have been computed.
    pub fn verify(&self, checksums: &Checksums) -> Result<(), ChecksumPolicyError> {
        for info in checksums.iter() {
            self.verify_one(info)?;
        }
        Ok(())
    }

    fn verify_one(&self, info: &ChecksumInfo) -> Result<(), ChecksumPolicyError> {
        if info.trusted {
            return Ok(());
        }
        match (&info.original, &info.actual) {
            (Some(original), Some(actual)) if original == actual => Ok(()),
            (Some(original), Some(actual)) => match self {
                ChecksumPolicyKind::IgnoreAndGenerate => Ok(()),
                _ => Err(ChecksumPolicyError::Mismatch {
                    kind: info.kind,
                    original: original.clone(),
                    actual: actual.clone(),
                }),
            },
            (None, Some(_)) => match self {
                ChecksumPolicyKind::VerifyAgainstClient => {
                    Err(ChecksumPolicyError::MissingOriginal { kind: info.kind })
                }
                _ => Ok(()),
            },
            // No stored digest to compare against (folders, not yet filled).
            (_, None) => Ok(()),
        }
    }

    /// The digest served when a client asks for this file's checksum.
    ///
    /// Generating policies shadow a missing or disagreeing declared value
    /// with the computed one; the strict policy serves what was declared.
    pub fn reported<'a>(&self, info: &'a ChecksumInfo) -> Option<&'a HexDigest> {
        if info.trusted {
            return info.original.as_ref().or(info.actual.as_ref());
        }
        match self {
            ChecksumPolicyKind::VerifyAgainstClient => {
                info.original.as_ref().or(info.actual.as_ref())
            }
            _ => match (&info.original, &info.actual) {
                (Some(original), Some(actual)) if original == actual => Some(original),
                (_, Some(actual)) => Some(actual),
                (original, None) => original.as_ref(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const D1: &str = "0cc175b9c0f1b6a831c399e269772661";
    const D2: &str = "92eb5ffee6ae2fec3ad71c777531578f";

    fn info(original: Option<&str>, actual: Option<&str>, trusted: bool) -> ChecksumInfo {
        let parse = |s: &str| HexDigest::parse(s, ChecksumKind::Md5).expect("valid test digest");
        ChecksumInfo {
            kind: ChecksumKind::Md5,
            original: original.map(parse),
            actual: actual.map(parse),
            trusted,
        }
    }

    use ChecksumPolicyKind::*;

    #[rstest]
    // declared and stored agree: every policy passes
    #[case::match_ignore(IgnoreAndGenerate, Some(D1), Some(D1), false, true)]
    #[case::match_strict(VerifyAgainstClient, Some(D1), Some(D1), false, true)]
    // mismatch: only the ignoring policy passes
    #[case::mismatch_ignore(IgnoreAndGenerate, Some(D1), Some(D2), false, true)]
    #[case::mismatch_generate(GenerateIfAbsent, Some(D1), Some(D2), false, false)]
    #[case::mismatch_strict(VerifyAgainstClient, Some(D1), Some(D2), false, false)]
    // nothing declared: only the strict policy fails
    #[case::absent_ignore(IgnoreAndGenerate, None, Some(D1), false, true)]
    #[case::absent_generate(GenerateIfAbsent, None, Some(D1), false, true)]
    #[case::absent_strict(VerifyAgainstClient, None, Some(D1), false, false)]
    // trusted values short-circuit everything
    #[case::trusted_mismatch(VerifyAgainstClient, Some(D1), Some(D2), true, true)]
    #[case::trusted_no_actual(VerifyAgainstClient, Some(D1), None, true, true)]
    // nothing stored yet: nothing to check
    #[case::no_actual(VerifyAgainstClient, None, None, false, true)]
    fn verify_matrix(
        #[case] policy: ChecksumPolicyKind,
        #[case] original: Option<&str>,
        #[case] actual: Option<&str>,
        #[case] trusted: bool,
        #[case] ok: bool,
    ) {
        let info = info(original, actual, trusted);
        assert_eq!(ok, policy.verify_one(&info).is_ok());
    }

    #[rstest]
    // generating policy shadows a broken declared value with the stored one
    #[case::mismatch_ignore(IgnoreAndGenerate, Some(D1), Some(D2), Some(D2))]
    #[case::match_ignore(IgnoreAndGenerate, Some(D1), Some(D1), Some(D1))]
    #[case::absent_ignore(IgnoreAndGenerate, None, Some(D2), Some(D2))]
    // strict policy serves the declared value as-is
    #[case::strict(VerifyAgainstClient, Some(D1), Some(D1), Some(D1))]
    #[case::strict_no_original(VerifyAgainstClient, None, Some(D2), Some(D2))]
    #[case::nothing(IgnoreAndGenerate, None, None, None)]
    fn reported_value(
        #[case] policy: ChecksumPolicyKind,
        #[case] original: Option<&str>,
        #[case] actual: Option<&str>,
        #[case] expected: Option<&str>,
    ) {
        let info = info(original, actual, false);
        assert_eq!(
            expected,
            policy.reported(&info).map(HexDigest::as_str),
            "policy {:?}",
            policy
        );
    }

    #[test]
    fn verify_covers_all_slots() {
        let mut checksums = Checksums::default();
        checksums.set_actuals(
            HexDigest::parse(D1, ChecksumKind::Md5).unwrap(),
            HexDigest::parse("a9993e364706816aba3e25717850c26c9cd0d89d", ChecksumKind::Sha1)
                .unwrap(),
        );
        checksums.set_original(
            ChecksumKind::Sha1,
            HexDigest::parse("da39a3ee5e6b4b0d3255bfef95601890afd80709", ChecksumKind::Sha1)
                .unwrap(),
        );

        // the md5 slot is fine, the sha1 slot disagrees
        assert!(matches!(
            GenerateIfAbsent.verify(&checksums),
            Err(ChecksumPolicyError::Mismatch {
                kind: ChecksumKind::Sha1,
                ..
            })
        ));
    }

    #[test]
    fn policy_kind_serde_spelling() {
        assert_eq!(
            "\"verify-against-client\"",
            serde_json::to_string(&VerifyAgainstClient).unwrap()
        );
    }
}
