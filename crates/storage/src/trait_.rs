//! Backend trait abstraction.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use teamprog_core::{MemberId, ObjectiveKey, TeamId, TeamSnapshot};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database error
    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// A reward grant deferred until a team member is online.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingReward {
    /// Completed objective
    pub objective: ObjectiveKey,
    /// Whether rewards should be handed out on replay
    pub give_rewards: bool,
}

/// Durable storage for teams, members and progress.
///
/// Logical tables: `Team(id)`, `Member(id, name, team)`,
/// `Progress(objective, team, count)` with zero counts omitted, and
/// `PendingReward(objective, team, give_rewards)` referencing `Progress`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Check that the backend is reachable.
    async fn health_check(&self) -> Result<()>;

    // === Lookups ===

    /// Team of a member, if the member is known.
    async fn team_of(&self, member: MemberId) -> Result<Option<TeamId>>;

    /// Members of a team.
    async fn team_members(&self, team: TeamId) -> Result<Vec<MemberId>>;

    /// Sparse progress of a team.
    async fn team_progress(&self, team: TeamId) -> Result<BTreeMap<ObjectiveKey, u32>>;

    /// Load the member's team, creating member and a one-member team on first
    /// sight. The stored name is updated to `name`. Returns whether the
    /// member was created.
    async fn load_or_register(&self, member: MemberId, name: &str) -> Result<(TeamSnapshot, bool)>;

    /// Load the team of a known member. Fails with [`StorageError::NotFound`]
    /// for unknown members.
    async fn load_team_of(&self, member: MemberId) -> Result<TeamSnapshot>;

    // === Progress ===

    /// Upsert one progress row; a count of 0 deletes it (and its pending reward).
    async fn update_progress(&self, team: TeamId, objective: &ObjectiveKey, count: u32) -> Result<()>;

    /// Pending rewards of a team.
    async fn pending_rewards(&self, team: TeamId) -> Result<Vec<PendingReward>>;

    /// Queue a reward for later replay. The progress row must exist.
    async fn add_pending_reward(&self, team: TeamId, objective: &ObjectiveKey, give_rewards: bool) -> Result<()>;

    /// Drop all pending rewards of a team.
    async fn clear_pending_rewards(&self, team: TeamId) -> Result<()>;

    // === Membership ===

    /// Reassign a member to an existing team.
    async fn move_member(&self, member: MemberId, team: TeamId) -> Result<()>;

    /// Create a new team and make the member its only member.
    async fn move_member_to_new_team(&self, member: MemberId) -> Result<TeamId>;

    /// Update a member's display name.
    async fn rename_member(&self, member: MemberId, name: &str) -> Result<()>;

    /// Delete teams without members. Returns how many were deleted.
    async fn collect_orphan_teams(&self) -> Result<usize>;
}
