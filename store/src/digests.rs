use std::fmt;

use data_encoding::HEXLOWER;
use maven_compat::checksum_file::{self, ChecksumKind};
use serde::{Deserialize, Serialize};

/// A checksum value, stored as its lowercase hex spelling.
///
/// The covered algorithm is carried alongside (see
/// [`ChecksumInfo`](crate::checksum::ChecksumInfo)); two digests of
/// different algorithms never compare equal because their lengths differ.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HexDigest(Box<str>);

impl HexDigest {
    /// Encodes raw digest output.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        HexDigest(HEXLOWER.encode(bytes).into())
    }

    /// Parses a digest in the spelling used by checksum sidecar files,
    /// validating length and charset for the given algorithm.
    pub fn parse(s: &str, kind: ChecksumKind) -> Result<Self, checksum_file::Error> {
        checksum_file::parse(s, kind).map(|hex| HexDigest(hex.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Both digests of a fully buffered document, in `(md5, sha1)` order like
/// [`HashingReader::digests`](crate::hashing_reader::HashingReader::digests).
pub fn digest_pair(bytes: &[u8]) -> (HexDigest, HexDigest) {
    use digest::Digest;

    (
        HexDigest::from_bytes(&md5::Md5::digest(bytes)),
        HexDigest::from_bytes(&sha1::Sha1::digest(bytes)),
    )
}

impl fmt::Display for HexDigest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for HexDigest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl AsRef<str> for HexDigest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
