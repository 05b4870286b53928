use crate::hash_id::{ContentHash, HashId};
use std::path::PathBuf;

/// Errors surfaced by the blob store.
///
/// A missing blob is not an error: lookups return `Ok(None)`. Desync between
/// the log and its index is repaired in place and never shows up here.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob log {} is corrupt: {reason}", .path.display())]
    CorruptLog { path: PathBuf, reason: String },

    #[error("blob index {} is corrupt: {reason}", .path.display())]
    IndexCorrupt { path: PathBuf, reason: String },

    #[error("hash id {id} is ambiguous: {} distinct blobs share it", .candidates.len())]
    AmbiguousHash {
        id: HashId,
        candidates: Vec<ContentHash>,
    },

    #[error("invalid store name {0:?}")]
    InvalidName(String),

    #[error("invalid hash id {0:?}")]
    InvalidHashId(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BlobError {
    pub(crate) fn corrupt_log(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        BlobError::CorruptLog {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn index_corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        BlobError::IndexCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BlobError>;
