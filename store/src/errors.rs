use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinError;

use crate::checksum::ChecksumPolicyError;
use crate::lock::LockMode;
use crate::path::RepoPath;

/// Errors surfaced by the item store and its callers.
#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal storage error: {0}")]
    StorageError(String),

    #[error("timed out after {waited:?} waiting for {mode} lock on {path}")]
    LockTimeout {
        path: RepoPath,
        mode: LockMode,
        waited: Duration,
    },

    #[error("lock violation on {path}: {reason}")]
    LockViolation { path: RepoPath, reason: String },

    #[error(transparent)]
    ChecksumPolicy(#[from] ChecksumPolicyError),
}

impl From<JoinError> for Error {
    fn from(value: JoinError) -> Self {
        Error::StorageError(value.to_string())
    }
}

impl From<redb::Error> for Error {
    fn from(value: redb::Error) -> Self {
        Error::StorageError(value.to_string())
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(value: redb::DatabaseError) -> Self {
        Error::StorageError(value.to_string())
    }
}

impl From<redb::TableError> for Error {
    fn from(value: redb::TableError) -> Self {
        Error::StorageError(value.to_string())
    }
}

impl From<redb::TransactionError> for Error {
    fn from(value: redb::TransactionError) -> Self {
        Error::StorageError(value.to_string())
    }
}

impl From<redb::StorageError> for Error {
    fn from(value: redb::StorageError) -> Self {
        Error::StorageError(value.to_string())
    }
}

impl From<redb::CommitError> for Error {
    fn from(value: redb::CommitError) -> Self {
        Error::StorageError(value.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        if value.kind() == std::io::ErrorKind::InvalidInput {
            Error::InvalidRequest(value.to_string())
        } else {
            Error::StorageError(value.to_string())
        }
    }
}

impl From<crate::path::InvalidPath> for Error {
    fn from(value: crate::path::InvalidPath) -> Self {
        Error::InvalidRequest(value.to_string())
    }
}
