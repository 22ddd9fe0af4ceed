//! Errors raised by the progress data model.

use crate::id::{ObjectiveKey, TeamId};

/// Violations of the data model's preconditions.
///
/// These are caller mistakes; none of them is ever retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// A record was read or written after it was evicted from the cache
    #[error("progress record for {0} has been invalidated")]
    InvalidatedRecord(TeamId),

    /// The objective is not registered
    #[error("unknown objective: {0}")]
    UnknownObjective(ObjectiveKey),

    /// A progress value outside `0..=max`
    #[error("progress {value} out of range for {objective} (max {max})")]
    ProgressOutOfRange {
        /// Objective being updated
        objective: ObjectiveKey,
        /// Rejected value
        value: u32,
        /// Declared maximum
        max: u32,
    },

    /// An objective definition that cannot be registered
    #[error("invalid objective: {0}")]
    InvalidObjective(String),

    /// A malformed objective key
    #[error("invalid objective key: {0:?}")]
    InvalidKey(String),

    /// The splitter was asked for a trivial or out-of-range target
    #[error("split target {target} invalid for current {current} (max {max})")]
    SplitTarget {
        /// Aggregate value before the update
        current: u32,
        /// Requested aggregate value
        target: u32,
        /// Aggregate maximum
        max: u32,
    },

    /// The sub-objectives could not absorb the whole delta
    #[error("sub-objectives left {remaining} of the delta unconsumed")]
    InsufficientCapacity {
        /// Delta left after the walk
        remaining: u32,
    },
}
