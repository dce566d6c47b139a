//! Data formats of the Maven repository layout.
//!
//! This crate has no async machinery and no I/O; it deals purely with the
//! shapes Maven clients and repositories exchange:
//!
//! * artifact coordinates and their mapping to repository paths,
//! * `maven-metadata.xml` documents, including the semantic merge used when
//!   a virtual repository aggregates several copies,
//! * unique snapshot version strings (`1.0-20240801.123456-3`),
//! * checksum sidecar files (`*.sha1`, `*.md5`),
//! * classification of repository paths (checksum, metadata, index, …).

pub mod checksum_file;
pub mod coordinates;
pub mod metadata;
pub mod path;
pub mod snapshot;
pub mod timestamp;
pub mod xml;

pub use coordinates::Coordinates;
pub use metadata::Metadata;

/// File name of artifact-directory metadata documents.
pub const METADATA_FILE_NAME: &str = "maven-metadata.xml";

/// Directory (relative to a repository root) holding the packed artifact
/// index and its properties companion.
pub const INDEX_DIR: &str = ".index";

/// Version token marking a non-unique snapshot.
pub const SNAPSHOT: &str = "SNAPSHOT";
