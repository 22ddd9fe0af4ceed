//! Team progress record - the shared, cached state of one team.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::id::{MemberId, ObjectiveKey, TeamId};
use crate::Time;

/// Plain copy of a team's stored state.
///
/// Backends return it when loading a team; records produce it for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamSnapshot {
    /// Team identity
    pub team: TeamId,

    /// Member identities
    pub members: Vec<MemberId>,

    /// Sparse progress; zero entries are absent
    pub progress: BTreeMap<ObjectiveKey, u32>,
}

#[derive(Debug)]
struct RecordState {
    members: HashSet<MemberId>,
    progress: HashMap<ObjectiveKey, u32>,
}

/// Progress of one team.
///
/// Shared as `Arc<ProgressRecord>` between the cache and its users. Once the
/// record is evicted it is invalid for good and every access fails with
/// [`ModelError::InvalidatedRecord`].
#[derive(Debug)]
pub struct ProgressRecord {
    team: TeamId,
    valid: AtomicBool,
    loaded_at: Time,
    state: RwLock<RecordState>,
}

impl ProgressRecord {
    /// Create a record for a freshly loaded team.
    pub fn new(
        team: TeamId,
        members: impl IntoIterator<Item = MemberId>,
        progress: impl IntoIterator<Item = (ObjectiveKey, u32)>,
    ) -> Self {
        Self {
            team,
            valid: AtomicBool::new(true),
            loaded_at: chrono::Utc::now(),
            state: RwLock::new(RecordState {
                members: members.into_iter().collect(),
                progress: progress.into_iter().filter(|(_, v)| *v > 0).collect(),
            }),
        }
    }

    /// Build a record from stored rows.
    pub fn from_snapshot(snapshot: TeamSnapshot) -> Self {
        Self::new(snapshot.team, snapshot.members, snapshot.progress)
    }

    /// Team identity. Stays readable after invalidation so late observers can
    /// tell which team went away.
    pub fn team_id(&self) -> TeamId {
        self.team
    }

    /// When the record entered the cache.
    pub fn loaded_at(&self) -> Time {
        self.loaded_at
    }

    /// Whether the record is still cached.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Fail unless the record is still cached.
    pub fn ensure_valid(&self) -> Result<(), ModelError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(ModelError::InvalidatedRecord(self.team))
        }
    }

    /// Mark the record as evicted.
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    /// Member identities, sorted.
    pub fn members(&self) -> Result<Vec<MemberId>, ModelError> {
        let state = self.read()?;
        let mut members: Vec<MemberId> = state.members.iter().copied().collect();
        members.sort();
        Ok(members)
    }

    /// Whether `member` belongs to the team.
    pub fn contains(&self, member: MemberId) -> Result<bool, ModelError> {
        Ok(self.read()?.members.contains(&member))
    }

    /// Number of members.
    pub fn size(&self) -> Result<usize, ModelError> {
        Ok(self.read()?.members.len())
    }

    /// Stored progress of one objective; 0 when absent.
    pub fn progress(&self, objective: &ObjectiveKey) -> Result<u32, ModelError> {
        Ok(self.read()?.progress.get(objective).copied().unwrap_or(0))
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> Result<TeamSnapshot, ModelError> {
        let state = self.read()?;
        let mut members: Vec<MemberId> = state.members.iter().copied().collect();
        members.sort();
        Ok(TeamSnapshot {
            team: self.team,
            members,
            progress: state.progress.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        })
    }

    /// Store a progress value, returning the previous one. Zero removes the entry.
    ///
    /// Bounds are checked by the caller, which knows the objective's maximum.
    pub fn store_progress(&self, objective: &ObjectiveKey, value: u32) -> Result<u32, ModelError> {
        let mut state = self.write()?;
        let old = if value == 0 {
            state.progress.remove(objective)
        } else {
            state.progress.insert(objective.clone(), value)
        };
        Ok(old.unwrap_or(0))
    }

    /// Add a member. Returns false if it was already present.
    pub fn add_member(&self, member: MemberId) -> Result<bool, ModelError> {
        Ok(self.write()?.members.insert(member))
    }

    /// Remove a member. Returns false if it was not present.
    pub fn remove_member(&self, member: MemberId) -> Result<bool, ModelError> {
        Ok(self.write()?.members.remove(&member))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, RecordState>, ModelError> {
        self.ensure_valid()?;
        Ok(self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, RecordState>, ModelError> {
        self.ensure_valid()?;
        Ok(self.state.write().unwrap_or_else(PoisonError::into_inner))
    }
}
