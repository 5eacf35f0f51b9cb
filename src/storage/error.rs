//! Storage errors

use thiserror::Error;

/// Failure reported by the key-value collaborator or by record (de)serialization.
///
/// Always carries enough context (operation and key) to be logged before the
/// node shuts down.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage {op} failed for key {key}: {message}")]
    Backend {
        op: &'static str,
        key: String,
        message: String,
    },
    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: bincode::Error,
    },
    #[error("failed to decode {what} at key {key}: {source}")]
    Decode {
        what: &'static str,
        key: String,
        #[source]
        source: bincode::Error,
    },
    #[error("store is inconsistent: {0}")]
    Corrupted(String),
}

impl StorageError {
    pub fn kind(&self) -> crate::error::ErrorKind {
        crate::error::ErrorKind::StorageFailure
    }

    pub(crate) fn backend(op: &'static str, key: &[u8], err: impl std::fmt::Display) -> Self {
        StorageError::Backend {
            op,
            key: super::keys::describe_key(key),
            message: err.to_string(),
        }
    }
}
