//! SQLite storage backend.
//!
//! Stores the four logical tables as real SQL tables with cascading foreign
//! keys. This is the recommended backend for production use.

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use teamprog_core::{MemberId, ObjectiveKey, TeamId, TeamSnapshot};
use tracing::{debug, info};

use super::trait_::{Backend, PendingReward, Result, StorageError};

/// SQLite storage implementation.
#[derive(Clone)]
pub struct SqliteBackend {
    /// Database connection pool
    pool: sqlx::SqlitePool,
}

impl SqliteBackend {
    /// Open (creating if missing) the database at `url`, e.g. `sqlite://progress.db`.
    pub async fn new(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let storage = Self { pool };
        storage.init_schema().await?;
        info!(url, "opened SQLite store");
        Ok(storage)
    }

    /// Create an in-memory SQLite storage for testing.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        // One connection, otherwise each connection gets its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        sqlx::query("CREATE TABLE IF NOT EXISTS teams (id INTEGER PRIMARY KEY AUTOINCREMENT)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS members (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                team_id INTEGER NOT NULL REFERENCES teams(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS progress (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                team_id INTEGER NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
                count INTEGER NOT NULL CHECK (count > 0),
                PRIMARY KEY (namespace, key, team_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS pending_rewards (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                team_id INTEGER NOT NULL,
                give_rewards INTEGER NOT NULL,
                PRIMARY KEY (namespace, key, team_id),
                FOREIGN KEY (namespace, key, team_id)
                    REFERENCES progress(namespace, key, team_id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_members_team ON members(team_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn member_of(row: &SqliteRow) -> Result<MemberId> {
        let id: String = row.try_get("id")?;
        id.parse()
            .map_err(|e| StorageError::Other(format!("bad member id {:?}: {}", id, e)))
    }

    fn objective_of(row: &SqliteRow) -> Result<ObjectiveKey> {
        let namespace: String = row.try_get("namespace")?;
        let key: String = row.try_get("key")?;
        ObjectiveKey::new(namespace, key).map_err(|e| StorageError::Other(e.to_string()))
    }

    async fn snapshot<'e, E>(executor: E, team: TeamId) -> Result<TeamSnapshot>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite> + Copy,
    {
        let rows = sqlx::query("SELECT id FROM members WHERE team_id = ? ORDER BY id")
            .bind(team.get())
            .fetch_all(executor)
            .await?;
        let members = rows.iter().map(Self::member_of).collect::<Result<Vec<_>>>()?;

        let rows = sqlx::query("SELECT namespace, key, count FROM progress WHERE team_id = ?")
            .bind(team.get())
            .fetch_all(executor)
            .await?;
        let mut progress = BTreeMap::new();
        for row in &rows {
            let count: i64 = row.try_get("count")?;
            let count = u32::try_from(count)
                .map_err(|_| StorageError::Other(format!("progress count {} of team {} out of range", count, team)))?;
            progress.insert(Self::objective_of(row)?, count);
        }

        Ok(TeamSnapshot { team, members, progress })
    }

    /// Check if the database is healthy.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn team_of(&self, member: MemberId) -> Result<Option<TeamId>> {
        let row = sqlx::query("SELECT team_id FROM members WHERE id = ?")
            .bind(member.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(TeamId(row.try_get("team_id")?))),
            None => Ok(None),
        }
    }

    async fn team_members(&self, team: TeamId) -> Result<Vec<MemberId>> {
        let rows = sqlx::query("SELECT id FROM members WHERE team_id = ? ORDER BY id")
            .bind(team.get())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::member_of).collect()
    }

    async fn team_progress(&self, team: TeamId) -> Result<BTreeMap<ObjectiveKey, u32>> {
        Ok(Self::snapshot(&self.pool, team).await?.progress)
    }

    async fn load_or_register(&self, member: MemberId, name: &str) -> Result<(TeamSnapshot, bool)> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT team_id FROM members WHERE id = ?")
            .bind(member.to_string())
            .fetch_optional(&mut *tx)
            .await?;

        let (team, created) = match existing {
            Some(row) => {
                let team = TeamId(row.try_get("team_id")?);
                sqlx::query("UPDATE members SET name = ? WHERE id = ?")
                    .bind(name)
                    .bind(member.to_string())
                    .execute(&mut *tx)
                    .await?;
                (team, false)
            }
            None => {
                let team = TeamId(
                    sqlx::query("INSERT INTO teams DEFAULT VALUES")
                        .execute(&mut *tx)
                        .await?
                        .last_insert_rowid(),
                );
                sqlx::query("INSERT INTO members (id, name, team_id) VALUES (?, ?, ?)")
                    .bind(member.to_string())
                    .bind(name)
                    .bind(team.get())
                    .execute(&mut *tx)
                    .await?;
                debug!(%member, %team, "registered member");
                (team, true)
            }
        };
        tx.commit().await?;

        Ok((Self::snapshot(&self.pool, team).await?, created))
    }

    async fn load_team_of(&self, member: MemberId) -> Result<TeamSnapshot> {
        let team = self
            .team_of(member)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("member {}", member)))?;
        Self::snapshot(&self.pool, team).await
    }

    async fn update_progress(&self, team: TeamId, objective: &ObjectiveKey, count: u32) -> Result<()> {
        if count == 0 {
            sqlx::query("DELETE FROM progress WHERE namespace = ? AND key = ? AND team_id = ?")
                .bind(objective.namespace())
                .bind(objective.key())
                .bind(team.get())
                .execute(&self.pool)
                .await?;
            return Ok(());
        }

        sqlx::query(
            "INSERT INTO progress (namespace, key, team_id, count) VALUES (?, ?, ?, ?)
            ON CONFLICT (namespace, key, team_id) DO UPDATE SET count = excluded.count",
        )
        .bind(objective.namespace())
        .bind(objective.key())
        .bind(team.get())
        .bind(i64::from(count))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pending_rewards(&self, team: TeamId) -> Result<Vec<PendingReward>> {
        let rows = sqlx::query(
            "SELECT namespace, key, give_rewards FROM pending_rewards WHERE team_id = ?",
        )
        .bind(team.get())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(PendingReward {
                    objective: Self::objective_of(row)?,
                    give_rewards: row.try_get::<bool, _>("give_rewards")?,
                })
            })
            .collect()
    }

    async fn add_pending_reward(&self, team: TeamId, objective: &ObjectiveKey, give_rewards: bool) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO pending_rewards (namespace, key, team_id, give_rewards)
            VALUES (?, ?, ?, ?)",
        )
        .bind(objective.namespace())
        .bind(objective.key())
        .bind(team.get())
        .bind(give_rewards)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_pending_rewards(&self, team: TeamId) -> Result<()> {
        sqlx::query("DELETE FROM pending_rewards WHERE team_id = ?")
            .bind(team.get())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn move_member(&self, member: MemberId, team: TeamId) -> Result<()> {
        let result = sqlx::query("UPDATE members SET team_id = ? WHERE id = ?")
            .bind(team.get())
            .bind(member.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("member {}", member)));
        }
        Ok(())
    }

    async fn move_member_to_new_team(&self, member: MemberId) -> Result<TeamId> {
        let mut tx = self.pool.begin().await?;
        let team = TeamId(
            sqlx::query("INSERT INTO teams DEFAULT VALUES")
                .execute(&mut *tx)
                .await?
                .last_insert_rowid(),
        );
        let result = sqlx::query("UPDATE members SET team_id = ? WHERE id = ?")
            .bind(team.get())
            .bind(member.to_string())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StorageError::NotFound(format!("member {}", member)));
        }
        tx.commit().await?;
        Ok(team)
    }

    async fn rename_member(&self, member: MemberId, name: &str) -> Result<()> {
        let result = sqlx::query("UPDATE members SET name = ? WHERE id = ?")
            .bind(name)
            .bind(member.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("member {}", member)));
        }
        Ok(())
    }

    async fn collect_orphan_teams(&self) -> Result<usize> {
        let result = sqlx::query(
            "DELETE FROM teams WHERE NOT EXISTS (SELECT 1 FROM members WHERE members.team_id = teams.id)",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }
}
