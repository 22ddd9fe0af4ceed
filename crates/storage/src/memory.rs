//! In-process backend.
//!
//! Keeps the four logical tables in memory. Nothing survives the process, so
//! it is meant for tests and for embedding the engine without a database.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use teamprog_core::{MemberId, ObjectiveKey, TeamId, TeamSnapshot};
use tokio::sync::Mutex;
use tracing::debug;

use super::{Backend, PendingReward, Result, StorageError};

#[derive(Debug)]
struct MemberRow {
    name: String,
    team: TeamId,
}

#[derive(Debug, Default)]
struct Tables {
    last_team: i64,
    teams: BTreeSet<TeamId>,
    members: HashMap<MemberId, MemberRow>,
    progress: BTreeMap<(TeamId, ObjectiveKey), u32>,
    pending: BTreeMap<(TeamId, ObjectiveKey), bool>,
}

impl Tables {
    fn create_team(&mut self) -> TeamId {
        self.last_team += 1;
        let team = TeamId(self.last_team);
        self.teams.insert(team);
        team
    }

    fn members_of(&self, team: TeamId) -> Vec<MemberId> {
        let mut members: Vec<MemberId> = self
            .members
            .iter()
            .filter(|(_, row)| row.team == team)
            .map(|(id, _)| *id)
            .collect();
        members.sort();
        members
    }

    fn progress_of(&self, team: TeamId) -> BTreeMap<ObjectiveKey, u32> {
        self.progress
            .iter()
            .filter(|((t, _), _)| *t == team)
            .map(|((_, key), count)| (key.clone(), *count))
            .collect()
    }

    fn snapshot(&self, team: TeamId) -> TeamSnapshot {
        TeamSnapshot {
            team,
            members: self.members_of(team),
            progress: self.progress_of(team),
        }
    }

    fn require_team(&self, team: TeamId) -> Result<()> {
        if self.teams.contains(&team) {
            Ok(())
        } else {
            Err(StorageError::NotFound(team.to_string()))
        }
    }

    fn require_member(&mut self, member: MemberId) -> Result<&mut MemberRow> {
        self.members
            .get_mut(&member)
            .ok_or_else(|| StorageError::NotFound(format!("member {}", member)))
    }
}

/// Backend keeping all rows in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: Mutex<Tables>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored teams.
    pub async fn team_count(&self) -> usize {
        self.tables.lock().await.teams.len()
    }

    /// Stored display name of a member.
    pub async fn member_name(&self, member: MemberId) -> Option<String> {
        self.tables.lock().await.members.get(&member).map(|row| row.name.clone())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn team_of(&self, member: MemberId) -> Result<Option<TeamId>> {
        Ok(self.tables.lock().await.members.get(&member).map(|row| row.team))
    }

    async fn team_members(&self, team: TeamId) -> Result<Vec<MemberId>> {
        let tables = self.tables.lock().await;
        tables.require_team(team)?;
        Ok(tables.members_of(team))
    }

    async fn team_progress(&self, team: TeamId) -> Result<BTreeMap<ObjectiveKey, u32>> {
        let tables = self.tables.lock().await;
        tables.require_team(team)?;
        Ok(tables.progress_of(team))
    }

    async fn load_or_register(&self, member: MemberId, name: &str) -> Result<(TeamSnapshot, bool)> {
        let mut tables = self.tables.lock().await;
        if let Some(row) = tables.members.get_mut(&member) {
            row.name = name.to_string();
            let team = row.team;
            return Ok((tables.snapshot(team), false));
        }

        let team = tables.create_team();
        tables.members.insert(member, MemberRow { name: name.to_string(), team });
        debug!(%member, %team, "registered member");
        Ok((tables.snapshot(team), true))
    }

    async fn load_team_of(&self, member: MemberId) -> Result<TeamSnapshot> {
        let mut tables = self.tables.lock().await;
        let team = tables.require_member(member)?.team;
        Ok(tables.snapshot(team))
    }

    async fn update_progress(&self, team: TeamId, objective: &ObjectiveKey, count: u32) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.require_team(team)?;
        let row = (team, objective.clone());
        if count == 0 {
            tables.progress.remove(&row);
            tables.pending.remove(&row);
        } else {
            tables.progress.insert(row, count);
        }
        Ok(())
    }

    async fn pending_rewards(&self, team: TeamId) -> Result<Vec<PendingReward>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .pending
            .iter()
            .filter(|((t, _), _)| *t == team)
            .map(|((_, objective), give_rewards)| PendingReward {
                objective: objective.clone(),
                give_rewards: *give_rewards,
            })
            .collect())
    }

    async fn add_pending_reward(&self, team: TeamId, objective: &ObjectiveKey, give_rewards: bool) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let row = (team, objective.clone());
        if !tables.progress.contains_key(&row) {
            return Err(StorageError::NotFound(format!("progress {} of {}", objective, team)));
        }
        tables.pending.insert(row, give_rewards);
        Ok(())
    }

    async fn clear_pending_rewards(&self, team: TeamId) -> Result<()> {
        self.tables.lock().await.pending.retain(|(t, _), _| *t != team);
        Ok(())
    }

    async fn move_member(&self, member: MemberId, team: TeamId) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.require_team(team)?;
        tables.require_member(member)?.team = team;
        Ok(())
    }

    async fn move_member_to_new_team(&self, member: MemberId) -> Result<TeamId> {
        let mut tables = self.tables.lock().await;
        tables.require_member(member)?;
        let team = tables.create_team();
        tables.require_member(member)?.team = team;
        Ok(team)
    }

    async fn rename_member(&self, member: MemberId, name: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.require_member(member)?.name = name.to_string();
        Ok(())
    }

    async fn collect_orphan_teams(&self) -> Result<usize> {
        let mut tables = self.tables.lock().await;
        let used: BTreeSet<TeamId> = tables.members.values().map(|row| row.team).collect();
        let orphans: Vec<TeamId> = tables.teams.difference(&used).copied().collect();
        for team in &orphans {
            tables.teams.remove(team);
            tables.progress.retain(|(t, _), _| t != team);
            tables.pending.retain(|(t, _), _| t != team);
        }
        Ok(orphans.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> ObjectiveKey {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_load_or_register_creates_once() {
        let backend = MemoryBackend::new();
        let member = MemberId::new();

        let (first, created) = backend.load_or_register(member, "alice").await.unwrap();
        assert!(created);
        assert_eq!(first.members, vec![member]);

        let (second, created) = backend.load_or_register(member, "alice").await.unwrap();
        assert!(!created);
        assert_eq!(second.team, first.team);
    }

    #[tokio::test]
    async fn test_zero_progress_deletes_row_and_pending_reward() {
        let backend = MemoryBackend::new();
        let (team, _) = backend.load_or_register(MemberId::new(), "a").await.unwrap();

        backend.update_progress(team.team, &key("t:a"), 2).await.unwrap();
        backend.add_pending_reward(team.team, &key("t:a"), true).await.unwrap();
        assert_eq!(backend.pending_rewards(team.team).await.unwrap().len(), 1);

        backend.update_progress(team.team, &key("t:a"), 0).await.unwrap();
        assert!(backend.team_progress(team.team).await.unwrap().is_empty());
        assert!(backend.pending_rewards(team.team).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_reward_requires_progress_row() {
        let backend = MemoryBackend::new();
        let (team, _) = backend.load_or_register(MemberId::new(), "a").await.unwrap();
        let err = backend.add_pending_reward(team.team, &key("t:a"), false).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_move_and_collect_orphans() {
        let backend = MemoryBackend::new();
        let a = MemberId::new();
        let b = MemberId::new();
        let (team_a, _) = backend.load_or_register(a, "a").await.unwrap();
        let (team_b, _) = backend.load_or_register(b, "b").await.unwrap();

        backend.move_member(a, team_b.team).await.unwrap();
        assert_eq!(backend.team_of(a).await.unwrap(), Some(team_b.team));
        assert!(backend.team_members(team_a.team).await.unwrap().is_empty());

        assert_eq!(backend.collect_orphan_teams().await.unwrap(), 1);
        assert_eq!(backend.team_count().await, 1);

        let fresh = backend.move_member_to_new_team(b).await.unwrap();
        assert_ne!(fresh, team_b.team);
        assert_eq!(backend.load_team_of(b).await.unwrap().members, vec![b]);
    }

    #[tokio::test]
    async fn test_unknown_member_lookup() {
        let backend = MemoryBackend::new();
        let member = MemberId::new();
        assert_eq!(backend.team_of(member).await.unwrap(), None);
        assert!(matches!(
            backend.load_team_of(member).await,
            Err(StorageError::NotFound(_))
        ));
    }
}
