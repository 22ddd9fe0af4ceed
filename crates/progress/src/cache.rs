//! In-memory cache of team records.
//!
//! A member has a cache entry exactly when it is online or pinned. Every
//! cached member of a team maps to the same [`ProgressRecord`], and a record
//! is evicted (and invalidated) as soon as no member maps to it and no
//! membership transaction holds it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use teamprog_core::{MemberId, ProgressRecord, TeamId};
use tracing::debug;

use crate::pin::PinTable;

#[derive(Debug)]
struct TeamSlot {
    record: Arc<ProgressRecord>,
    mapped: usize,
    holds: usize,
}

/// Cache state. Guarded by the engine's mutex; never touched across an await.
#[derive(Debug, Default)]
pub struct ProgressCache {
    members: HashMap<MemberId, Arc<ProgressRecord>>,
    teams: HashMap<TeamId, TeamSlot>,
    online: HashSet<MemberId>,
    pins: PinTable,
    evictions: u64,
}

impl ProgressCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record of a cached member.
    pub fn get(&self, member: MemberId) -> Option<&Arc<ProgressRecord>> {
        self.members.get(&member)
    }

    /// Cached record of a team.
    pub fn team(&self, team: TeamId) -> Option<&Arc<ProgressRecord>> {
        self.teams.get(&team).map(|slot| &slot.record)
    }

    /// Find a cached record that lists `member`, even though the member
    /// itself has no cache entry yet.
    pub fn find_in_members(&self, member: MemberId) -> Option<Arc<ProgressRecord>> {
        self.teams
            .values()
            .find(|slot| slot.record.contains(member).unwrap_or(false))
            .map(|slot| Arc::clone(&slot.record))
    }

    /// Map `member` to `record`. Returns true if the record entered the cache
    /// with this call.
    ///
    /// A previous mapping of the member is replaced; the caller checks the
    /// previous team with [`evict_if_orphan`](Self::evict_if_orphan).
    pub fn put(&mut self, member: MemberId, record: Arc<ProgressRecord>) -> bool {
        let team = record.team_id();
        if let Some(previous) = self.members.insert(member, Arc::clone(&record)) {
            self.decrement(previous.team_id());
        }

        let mut inserted = false;
        let slot = self.teams.entry(team).or_insert_with(|| {
            inserted = true;
            TeamSlot { record: Arc::clone(&record), mapped: 0, holds: 0 }
        });
        debug_assert!(Arc::ptr_eq(&slot.record, &record), "two records cached for {}", team);
        slot.mapped += 1;
        inserted
    }

    /// Drop the member's mapping without checking eviction.
    pub fn unmap(&mut self, member: MemberId) -> Option<Arc<ProgressRecord>> {
        let record = self.members.remove(&member)?;
        self.decrement(record.team_id());
        Some(record)
    }

    fn decrement(&mut self, team: TeamId) {
        if let Some(slot) = self.teams.get_mut(&team) {
            slot.mapped = slot.mapped.saturating_sub(1);
        }
    }

    /// Keep a team cached while a membership change is in flight, even if its
    /// last member is released meanwhile.
    pub fn hold(&mut self, team: TeamId) {
        if let Some(slot) = self.teams.get_mut(&team) {
            slot.holds += 1;
        }
    }

    /// Undo one [`hold`](Self::hold). Eviction is left to the caller.
    pub fn unhold(&mut self, team: TeamId) {
        if let Some(slot) = self.teams.get_mut(&team) {
            slot.holds = slot.holds.saturating_sub(1);
        }
    }

    /// Evict and invalidate the team if nothing references it any more.
    pub fn evict_if_orphan(&mut self, team: TeamId) -> Option<Arc<ProgressRecord>> {
        let slot = self.teams.get(&team)?;
        if slot.mapped > 0 || slot.holds > 0 {
            return None;
        }
        let slot = self.teams.remove(&team)?;
        slot.record.invalidate();
        self.evictions += 1;
        debug!(%team, "evicted team record");
        Some(slot.record)
    }

    /// Number of evictions so far. A backend read taken before the count
    /// moved may predate writes made through the evicted record.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Whether the member still has a reason to stay cached.
    pub fn is_retained(&self, member: MemberId) -> bool {
        self.online.contains(&member) || self.pins.is_pinned(member)
    }

    /// Drop the member's entry if it has no remaining reason to be cached.
    /// Returns the team record if that evicted it.
    pub fn release(&mut self, member: MemberId) -> Option<Arc<ProgressRecord>> {
        if self.is_retained(member) {
            return None;
        }
        let record = self.unmap(member)?;
        self.evict_if_orphan(record.team_id())
    }

    /// Mark a member online. Returns false if it already was.
    pub fn set_online(&mut self, member: MemberId) -> bool {
        self.online.insert(member)
    }

    /// Mark a member offline. Returns false if it was not online.
    pub fn set_offline(&mut self, member: MemberId) -> bool {
        self.online.remove(&member)
    }

    /// Whether the member is online.
    pub fn is_online(&self, member: MemberId) -> bool {
        self.online.contains(&member)
    }

    /// An online member of the record's team, lowest id first.
    pub fn online_member_of(&self, record: &Arc<ProgressRecord>) -> Option<MemberId> {
        self.online
            .iter()
            .filter(|member| {
                self.members
                    .get(member)
                    .map(|mapped| Arc::ptr_eq(mapped, record))
                    .unwrap_or(false)
            })
            .min()
            .copied()
    }

    /// Pin table.
    pub fn pins(&self) -> &PinTable {
        &self.pins
    }

    /// Mutable pin table.
    pub fn pins_mut(&mut self) -> &mut PinTable {
        &mut self.pins
    }

    /// Cached team records, ordered by team id.
    pub fn teams(&self) -> Vec<Arc<ProgressRecord>> {
        let mut teams: Vec<_> = self.teams.values().map(|slot| Arc::clone(&slot.record)).collect();
        teams.sort_by_key(|record| record.team_id());
        teams
    }

    /// Number of cached members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty() && self.teams.is_empty()
    }

    /// Evict everything. Returned records are already invalidated.
    pub fn drain(&mut self) -> Vec<Arc<ProgressRecord>> {
        let records = self.teams();
        for record in &records {
            record.invalidate();
        }
        self.members.clear();
        self.teams.clear();
        self.online.clear();
        self.pins.clear();
        records
    }
}
