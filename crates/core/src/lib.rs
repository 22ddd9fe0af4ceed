//! teamprog core data models.
//!
//! Identities, the objective tree, the shared team progress record and the
//! events emitted when team state changes.

#![warn(missing_docs)]

mod id;
mod error;
mod objective;
mod record;
mod event;

pub use id::{MemberId, ObjectiveKey, Requester, TeamId};
pub use error::ModelError;
pub use objective::{Objective, ObjectiveKind, ObjectiveRegistry, TaskSpec};
pub use record::{ProgressRecord, TeamSnapshot};
pub use event::{Observer, TeamEvent};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
