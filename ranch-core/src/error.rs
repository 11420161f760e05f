//! Error kinds for the Ranch's verbs and storage adapter.
//!
//! Split the way the teacher splits `OperationError` from success shapes
//! (`OperationResponse`): `Queued` is not here, it is a variant of
//! [`crate::lifecycle::AcquireOutcome`], because a parked request is a
//! normal outcome, not a failure.

use thiserror::Error;

/// Failures surfaced by the storage adapter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No object exists at that key.
    #[error("no such object: {0}")]
    NotFound(String),
    /// `expected_version` did not match the stored version.
    #[error("version conflict on {0}")]
    Conflict(String),
    /// The backend could not be reached; distinguishable so callers can back off.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Failures surfaced by Ranch's verbs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RanchError {
    /// No resource matches `(type, from_state, owner="")`, and no request was
    /// queued (caller supplied no `request_id`).
    #[error("no matching resource")]
    NotFound,
    /// `release`/`update` called by a caller that does not own the resource.
    #[error("caller does not own resource {0}")]
    OwnerMismatch(String),
    /// Resource is not in the state the caller expected at commit time.
    #[error("resource {0} is not in the expected state")]
    StateMismatch(String),
    /// Optimistic concurrency retry budget exhausted.
    #[error("conflicting concurrent update to {0}")]
    Conflict(String),
    /// A config reconciliation pass was rejected; the prior pool is retained.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
    /// The storage backend is unavailable after retries.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl From<StorageError> for RanchError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(name) => RanchError::StateMismatch(name),
            StorageError::Conflict(name) => RanchError::Conflict(name),
            StorageError::Unavailable(msg) => RanchError::StorageUnavailable(msg),
        }
    }
}
