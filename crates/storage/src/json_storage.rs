//! JSON file storage implementation.
//!
//! Stores one JSON file per team (progress and pending rewards) and one per
//! member (name and team) under a root directory, plus small per-team meta
//! markers (version + updated_at) and the team id sequence.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use teamprog_core::{MemberId, ObjectiveKey, TeamId, TeamSnapshot};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Backend, PendingReward, Result, StorageError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TeamFile {
    id: TeamId,
    #[serde(default)]
    progress: BTreeMap<ObjectiveKey, u32>,
    #[serde(default)]
    pending: Vec<PendingReward>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MemberFile {
    id: MemberId,
    name: String,
    team: TeamId,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Sequence {
    last_team: i64,
}

/// File-based JSON backend.
pub struct JsonBackend {
    root: PathBuf,
    // Operations touch several files; they run one at a time.
    lock: Mutex<()>,
}

impl JsonBackend {
    /// Open a store rooted at `root`, creating the directory layout if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("teams")).await?;
        fs::create_dir_all(root.join("members")).await?;
        fs::create_dir_all(root.join("meta").join("teams")).await?;

        info!(root = %root.display(), "opened JSON store");
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    fn team_path(&self, id: TeamId) -> PathBuf {
        self.root.join("teams").join(format!("{}.json", id.get()))
    }
    fn member_path(&self, id: MemberId) -> PathBuf {
        self.root.join("members").join(format!("{}.json", id))
    }
    fn meta_path(&self, id: TeamId) -> PathBuf {
        self.root.join("meta").join("teams").join(format!("{}.meta.json", id.get()))
    }
    fn sequence_path(&self) -> PathBuf {
        self.root.join("meta").join("sequence.json")
    }

    /// Read and increment per-team version, return new version.
    async fn bump_version(&self, id: TeamId) -> Result<u64> {
        let path = self.meta_path(id);
        let mut version = 0u64;
        if let Ok(s) = fs::read_to_string(&path).await {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(&s) {
                if let Some(v) = json.get("version").and_then(|v| v.as_u64()) {
                    version = v;
                }
            }
        }
        version += 1;
        let meta = serde_json::json!({"version": version, "updated_at": chrono::Utc::now()});
        fs::write(&path, serde_json::to_string_pretty(&meta)?.as_bytes()).await?;
        Ok(version)
    }

    async fn next_team_id(&self) -> Result<TeamId> {
        let mut sequence: Sequence = read_json(&self.sequence_path()).await?.unwrap_or_default();
        sequence.last_team += 1;
        write_json(&self.sequence_path(), &sequence).await?;
        Ok(TeamId(sequence.last_team))
    }

    async fn create_team(&self) -> Result<TeamId> {
        let id = self.next_team_id().await?;
        self.save_team(&TeamFile { id, ..Default::default() }).await?;
        Ok(id)
    }

    async fn load_team(&self, id: TeamId) -> Result<TeamFile> {
        read_json(&self.team_path(id))
            .await?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn save_team(&self, team: &TeamFile) -> Result<()> {
        write_json(&self.team_path(team.id), team).await?;
        self.bump_version(team.id).await?;
        Ok(())
    }

    async fn load_member(&self, id: MemberId) -> Result<Option<MemberFile>> {
        read_json(&self.member_path(id)).await
    }

    async fn require_member(&self, id: MemberId) -> Result<MemberFile> {
        self.load_member(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("member {}", id)))
    }

    async fn members_of(&self, team: TeamId) -> Result<Vec<MemberId>> {
        let all: Vec<MemberFile> = list_dir(&self.root.join("members")).await?;
        let mut members: Vec<MemberId> = all
            .into_iter()
            .filter(|m| m.team == team)
            .map(|m| m.id)
            .collect();
        members.sort();
        Ok(members)
    }

    async fn snapshot(&self, id: TeamId) -> Result<TeamSnapshot> {
        let team = self.load_team(id).await?;
        Ok(TeamSnapshot {
            team: id,
            members: self.members_of(id).await?,
            progress: team.progress,
        })
    }
}

#[async_trait::async_trait]
impl Backend for JsonBackend {
    async fn health_check(&self) -> Result<()> {
        let meta = fs::metadata(&self.root).await?;
        if meta.is_dir() {
            Ok(())
        } else {
            Err(StorageError::Other(format!("{} is not a directory", self.root.display())))
        }
    }

    async fn team_of(&self, member: MemberId) -> Result<Option<TeamId>> {
        let _guard = self.lock.lock().await;
        Ok(self.load_member(member).await?.map(|m| m.team))
    }

    async fn team_members(&self, team: TeamId) -> Result<Vec<MemberId>> {
        let _guard = self.lock.lock().await;
        self.load_team(team).await?;
        self.members_of(team).await
    }

    async fn team_progress(&self, team: TeamId) -> Result<BTreeMap<ObjectiveKey, u32>> {
        let _guard = self.lock.lock().await;
        Ok(self.load_team(team).await?.progress)
    }

    async fn load_or_register(&self, member: MemberId, name: &str) -> Result<(TeamSnapshot, bool)> {
        let _guard = self.lock.lock().await;
        if let Some(mut row) = self.load_member(member).await? {
            if row.name != name {
                row.name = name.to_string();
                write_json(&self.member_path(member), &row).await?;
            }
            return Ok((self.snapshot(row.team).await?, false));
        }

        let team = self.create_team().await?;
        let row = MemberFile { id: member, name: name.to_string(), team };
        write_json(&self.member_path(member), &row).await?;
        debug!(%member, %team, "registered member");
        Ok((self.snapshot(team).await?, true))
    }

    async fn load_team_of(&self, member: MemberId) -> Result<TeamSnapshot> {
        let _guard = self.lock.lock().await;
        let row = self.require_member(member).await?;
        self.snapshot(row.team).await
    }

    async fn update_progress(&self, team: TeamId, objective: &ObjectiveKey, count: u32) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.load_team(team).await?;
        if count == 0 {
            file.progress.remove(objective);
            file.pending.retain(|p| &p.objective != objective);
        } else {
            file.progress.insert(objective.clone(), count);
        }
        self.save_team(&file).await
    }

    async fn pending_rewards(&self, team: TeamId) -> Result<Vec<PendingReward>> {
        let _guard = self.lock.lock().await;
        Ok(self.load_team(team).await?.pending)
    }

    async fn add_pending_reward(&self, team: TeamId, objective: &ObjectiveKey, give_rewards: bool) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.load_team(team).await?;
        if !file.progress.contains_key(objective) {
            return Err(StorageError::NotFound(format!("progress {} of {}", objective, team)));
        }
        file.pending.retain(|p| &p.objective != objective);
        file.pending.push(PendingReward { objective: objective.clone(), give_rewards });
        self.save_team(&file).await
    }

    async fn clear_pending_rewards(&self, team: TeamId) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.load_team(team).await?;
        if file.pending.is_empty() {
            return Ok(());
        }
        file.pending.clear();
        self.save_team(&file).await
    }

    async fn move_member(&self, member: MemberId, team: TeamId) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.load_team(team).await?;
        let mut row = self.require_member(member).await?;
        row.team = team;
        write_json(&self.member_path(member), &row).await
    }

    async fn move_member_to_new_team(&self, member: MemberId) -> Result<TeamId> {
        let _guard = self.lock.lock().await;
        let mut row = self.require_member(member).await?;
        let team = self.create_team().await?;
        row.team = team;
        write_json(&self.member_path(member), &row).await?;
        Ok(team)
    }

    async fn rename_member(&self, member: MemberId, name: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut row = self.require_member(member).await?;
        row.name = name.to_string();
        write_json(&self.member_path(member), &row).await
    }

    async fn collect_orphan_teams(&self) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let teams: Vec<TeamFile> = list_dir(&self.root.join("teams")).await?;
        let members: Vec<MemberFile> = list_dir(&self.root.join("members")).await?;

        let mut removed = 0;
        for team in teams {
            if members.iter().any(|m| m.team == team.id) {
                continue;
            }
            remove_if_exists(&self.team_path(team.id)).await?;
            remove_if_exists(&self.meta_path(team.id)).await?;
            removed += 1;
        }
        if removed > 0 {
            info!(removed, "collected orphan teams");
        }
        Ok(removed)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json.as_bytes()).await?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    fs::remove_file(path).await.or_else(|e| {
        if e.kind() == std::io::ErrorKind::NotFound { Ok(()) } else { Err(e) }
    })?;
    Ok(())
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        // an unreadable file fails the whole listing; callers decide on the
        // full set of rows or not at all
        match read_json(&entry.path()).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "unreadable row");
                return Err(e);
            }
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> ObjectiveKey {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_register_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonBackend::new(dir.path()).await.unwrap();
        let member = MemberId::new();

        let (snapshot, created) = backend.load_or_register(member, "alice").await.unwrap();
        assert!(created);
        backend.update_progress(snapshot.team, &key("t:a"), 4).await.unwrap();

        // A second handle on the same directory sees the stored rows.
        let reopened = JsonBackend::new(dir.path()).await.unwrap();
        let loaded = reopened.load_team_of(member).await.unwrap();
        assert_eq!(loaded.team, snapshot.team);
        assert_eq!(loaded.members, vec![member]);
        assert_eq!(loaded.progress.get(&key("t:a")), Some(&4));
    }

    #[tokio::test]
    async fn test_team_ids_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonBackend::new(dir.path()).await.unwrap();
        let (a, _) = backend.load_or_register(MemberId::new(), "a").await.unwrap();
        let (b, _) = backend.load_or_register(MemberId::new(), "b").await.unwrap();
        assert_ne!(a.team, b.team);
    }

    #[tokio::test]
    async fn test_pending_rewards_follow_progress_rows() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonBackend::new(dir.path()).await.unwrap();
        let (team, _) = backend.load_or_register(MemberId::new(), "a").await.unwrap();

        assert!(backend.add_pending_reward(team.team, &key("t:a"), true).await.is_err());

        backend.update_progress(team.team, &key("t:a"), 1).await.unwrap();
        backend.add_pending_reward(team.team, &key("t:a"), true).await.unwrap();
        assert_eq!(
            backend.pending_rewards(team.team).await.unwrap(),
            vec![PendingReward { objective: key("t:a"), give_rewards: true }]
        );

        backend.update_progress(team.team, &key("t:a"), 0).await.unwrap();
        assert!(backend.pending_rewards(team.team).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_split_merge_and_gc() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonBackend::new(dir.path()).await.unwrap();
        let a = MemberId::new();
        let b = MemberId::new();
        let (team_a, _) = backend.load_or_register(a, "a").await.unwrap();
        let (team_b, _) = backend.load_or_register(b, "b").await.unwrap();

        backend.move_member(a, team_b.team).await.unwrap();
        assert_eq!(backend.team_members(team_b.team).await.unwrap().len(), 2);
        assert_eq!(backend.collect_orphan_teams().await.unwrap(), 1);
        assert!(backend.team_members(team_a.team).await.is_err());

        let fresh = backend.move_member_to_new_team(a).await.unwrap();
        assert_eq!(backend.team_of(a).await.unwrap(), Some(fresh));
        assert_eq!(backend.collect_orphan_teams().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_gc_keeps_teams_when_a_member_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonBackend::new(dir.path()).await.unwrap();
        let member = MemberId::new();
        let (team, _) = backend.load_or_register(member, "a").await.unwrap();
        backend.update_progress(team.team, &key("t:a"), 3).await.unwrap();

        fs::write(backend.member_path(member), b"{\"id\":").await.unwrap();
        assert!(backend.collect_orphan_teams().await.is_err());
        assert!(backend.team_path(team.team).exists());
        assert!(backend.team_members(team.team).await.is_err());
    }

    #[tokio::test]
    async fn test_rename_member() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonBackend::new(dir.path()).await.unwrap();
        let member = MemberId::new();
        backend.load_or_register(member, "old").await.unwrap();
        backend.rename_member(member, "new").await.unwrap();

        let row: MemberFile = read_json(&backend.member_path(member)).await.unwrap().unwrap();
        assert_eq!(row.name, "new");
        assert!(backend.rename_member(MemberId::new(), "x").await.is_err());
    }
}
