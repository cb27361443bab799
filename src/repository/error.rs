use thiserror::Error;

use crate::entity::PayloadError;

/// Errors raised by event stores, snapshot stores and aggregate reconstruction.
///
/// An append that returns [`RepositoryError::ConcurrentWrite`] is a conflict;
/// every other variant returned from an append is a store failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("repository lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("concurrent write detected for aggregate {id} (expected version {expected}, got {actual})")]
    ConcurrentWrite {
        id: String,
        expected: u64,
        actual: u64,
    },
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("replay error: {0}")]
    Replay(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("aggregate not found: {0}")]
    NotFound(String),
}

impl RepositoryError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, RepositoryError::ConcurrentWrite { .. })
    }
}

impl From<PayloadError> for RepositoryError {
    fn from(err: PayloadError) -> Self {
        RepositoryError::Encode(err.message)
    }
}
