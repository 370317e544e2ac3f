use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The object was written by someone else since it was read.
    #[error("{key} was modified concurrently: read version {expected}, stored version {found}")]
    Conflict {
        key: String,
        expected: u64,
        found: u64,
    },
    #[error("{key} no longer matches the expected state")]
    PreconditionFailed { key: String },
}

/// Whether `err` is a write conflict that a fresh read can resolve.
pub fn is_conflict(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::Conflict { .. })
    )
}
