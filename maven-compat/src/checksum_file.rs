//! Checksum sidecar files.
//!
//! A checksum lives next to the file it covers, named by appending the
//! algorithm extension (`foo.jar.sha1`). The content is a single lowercase
//! hex digest; tools occasionally append `  filename`, which is tolerated
//! on the read side and never produced.

use std::fmt::{self, Display};

/// Checksum algorithms carried in the repository layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ChecksumKind {
    Md5,
    Sha1,
}

impl ChecksumKind {
    pub const ALL: [ChecksumKind; 2] = [ChecksumKind::Md5, ChecksumKind::Sha1];

    /// File extension, without the leading dot.
    pub fn ext(&self) -> &'static str {
        match self {
            ChecksumKind::Md5 => "md5",
            ChecksumKind::Sha1 => "sha1",
        }
    }

    pub fn from_ext(ext: &str) -> Option<Self> {
        match ext {
            "md5" => Some(ChecksumKind::Md5),
            "sha1" => Some(ChecksumKind::Sha1),
            _ => None,
        }
    }

    /// Length of the lowercase hex spelling.
    pub fn hex_len(&self) -> usize {
        match self {
            ChecksumKind::Md5 => 32,
            ChecksumKind::Sha1 => 40,
        }
    }
}

impl Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChecksumKind::Md5 => "MD5",
            ChecksumKind::Sha1 => "SHA-1",
        })
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("empty checksum file")]
    Empty,

    #[error("invalid {kind} digest length: expected {expected}, got {found}")]
    InvalidLength {
        kind: ChecksumKind,
        expected: usize,
        found: usize,
    },

    #[error("digest contains non-hex characters")]
    NotHex,
}

/// Parses the digest out of a checksum file body, normalised to lowercase.
pub fn parse(content: &str, kind: ChecksumKind) -> Result<String, Error> {
    let token = content.split_whitespace().next().ok_or(Error::Empty)?;
    if token.len() != kind.hex_len() {
        return Err(Error::InvalidLength {
            kind,
            expected: kind.hex_len(),
            found: token.len(),
        });
    }
    if !token.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::NotHex);
    }
    Ok(token.to_ascii_lowercase())
}

/// Renders a checksum file body.
pub fn format(digest: &str) -> String {
    digest.to_ascii_lowercase()
}
