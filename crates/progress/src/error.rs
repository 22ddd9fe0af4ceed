//! Engine errors.

use teamprog_core::{MemberId, ModelError, ObjectiveKey};
use teamprog_storage::StorageError;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors returned by the progress engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid argument, out-of-range progress or an invalidated record
    #[error("precondition violated: {0}")]
    Precondition(#[from] ModelError),

    /// The member has no cache entry; load it first
    #[error("member {0} is not loaded")]
    MemberNotLoaded(MemberId),

    /// A composite objective only accepts 0 and its maximum
    #[error("arbitrary progress update rejected for composite objective {0}")]
    ArbitraryUpdateRejected(ObjectiveKey),

    /// The backend failed; never retried
    #[error("backend failure: {0}")]
    Backend(#[from] StorageError),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),

    /// The engine no longer accepts requests
    #[error("progress engine is shut down")]
    ShutDown,
}
