use thiserror::Error;

use crate::model::{EntryId, PlaylistId};

/// Errors surfaced by the mirror.
///
/// `NotFound` goes back to query callers. `NativeQueryFailed` and
/// `InconsistentNativeData` are recovered inside the reconciliation context:
/// the reload is dropped and the repository keeps its last good content.
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Native query '{0}' failed: {1}")]
    NativeQueryFailed(String, String),

    #[error("Inconsistent native data: {0}")]
    InconsistentNativeData(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Wrong format string: {0}")]
    InvalidFormat(String),

    #[error("Reconciliation context is stopped")]
    ContextStopped,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MirrorError {
    pub fn playlist_not_found(id: PlaylistId) -> Self {
        MirrorError::NotFound(format!("playlist {}", id))
    }

    pub fn entry_not_found(playlist_id: PlaylistId, entry_id: EntryId) -> Self {
        MirrorError::NotFound(format!("entry {} in playlist {}", entry_id, playlist_id))
    }

    pub fn native_query_failed(query: &str, reason: impl ToString) -> Self {
        MirrorError::NativeQueryFailed(query.to_string(), reason.to_string())
    }

    pub fn inconsistent(message: impl Into<String>) -> Self {
        MirrorError::InconsistentNativeData(message.into())
    }

    pub fn invalid_format(message: &str) -> Self {
        MirrorError::InvalidFormat(message.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, MirrorError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;
