//! Team membership changes.
//!
//! The backend is written first; the cache is only touched once the backend
//! has accepted the change, so a failed move leaves every cached record as it
//! was. Both teams are held in the cache while the backend call runs.

use std::sync::Arc;

use teamprog_core::{MemberId, ModelError, ProgressRecord, TeamEvent, TeamId};
use tracing::{info, warn};

use crate::cache::ProgressCache;
use crate::engine::ProgressEngine;
use crate::error::{EngineError, Result};

impl ProgressEngine {
    /// Move a cached member into the team of `target`.
    ///
    /// Emits `MemberLeft` for the old team, `TeamUnloaded` if that left it
    /// without cached members, then `MemberJoined` for the target. Moving a
    /// member into its own team does nothing.
    pub async fn move_member(&self, member: MemberId, target: &Arc<ProgressRecord>) -> Result<()> {
        self.ensure_running()?;
        target.ensure_valid()?;

        let old = {
            let mut cache = self.lock();
            let old = cache.get(member).cloned().ok_or(EngineError::MemberNotLoaded(member))?;
            if Arc::ptr_eq(&old, target) || target.contains(member)? {
                return Ok(());
            }
            match cache.team(target.team_id()) {
                Some(cached) if Arc::ptr_eq(cached, target) => {}
                _ => return Err(ModelError::InvalidatedRecord(target.team_id()).into()),
            }
            cache.hold(old.team_id());
            cache.hold(target.team_id());
            old
        };

        let team = target.team_id();
        let result = self
            .run_backend("move_member", move |backend| async move {
                backend.move_member(member, team).await
            })
            .await;

        let mut events = Vec::new();
        {
            let mut cache = self.lock();
            cache.unhold(old.team_id());
            cache.unhold(team);

            if result.is_ok() {
                // the member may have been released while the backend was busy
                if cache.get(member).is_some() {
                    cache.put(member, Arc::clone(target));
                }
                if old.is_valid() {
                    old.remove_member(member)?;
                }
                if target.is_valid() {
                    target.add_member(member)?;
                }
                events.push(TeamEvent::MemberLeft { team: Arc::clone(&old), member });
            }
            evict(&mut cache, old.team_id(), &mut events);
            evict(&mut cache, team, &mut events);
            if result.is_ok() {
                events.push(TeamEvent::MemberJoined { team: Arc::clone(target), member });
            }
        }

        match &result {
            Ok(()) => info!(%member, from = %old.team_id(), to = %team, "member moved"),
            Err(e) => warn!(%member, to = %team, error = %e, "member move rejected by backend"),
        }
        self.dispatch(events);
        result
    }

    /// Move a cached member into a new team of its own. Returns the new record.
    ///
    /// The new team starts without progress.
    pub async fn move_member_to_new_team(&self, member: MemberId) -> Result<Arc<ProgressRecord>> {
        self.ensure_running()?;

        let old = {
            let mut cache = self.lock();
            let old = cache.get(member).cloned().ok_or(EngineError::MemberNotLoaded(member))?;
            cache.hold(old.team_id());
            old
        };

        let result = self
            .run_backend("move_member_to_new_team", move |backend| async move {
                backend.move_member_to_new_team(member).await
            })
            .await;

        let mut events = Vec::new();
        let record = {
            let mut cache = self.lock();
            cache.unhold(old.team_id());

            let record = match &result {
                Ok(team) => {
                    if old.is_valid() {
                        old.remove_member(member)?;
                    }
                    events.push(TeamEvent::MemberLeft { team: Arc::clone(&old), member });

                    let record = Arc::new(ProgressRecord::new(*team, [member], []));
                    let cached = cache.get(member).is_some();
                    if cached {
                        cache.put(member, Arc::clone(&record));
                    } else {
                        record.invalidate();
                    }
                    Some((record, cached))
                }
                Err(_) => None,
            };
            evict(&mut cache, old.team_id(), &mut events);

            if let Some((record, true)) = &record {
                events.push(TeamEvent::TeamLoaded { team: Arc::clone(record) });
                events.push(TeamEvent::MemberJoined { team: Arc::clone(record), member });
            }
            record
        };

        self.dispatch(events);
        let team = result?;
        match record {
            Some((record, true)) => {
                info!(%member, from = %old.team_id(), to = %team, "member split into new team");
                Ok(record)
            }
            _ => {
                warn!(%member, %team, "member released during split");
                Err(EngineError::MemberNotLoaded(member))
            }
        }
    }
}

fn evict(cache: &mut ProgressCache, team: TeamId, events: &mut Vec<TeamEvent>) {
    if let Some(record) = cache.evict_if_orphan(team) {
        events.push(TeamEvent::TeamUnloaded { team: record });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{key, TestBed};
    use teamprog_core::Requester;
    use teamprog_storage::{Backend, StorageError};

    #[tokio::test]
    async fn test_merge_moves_member_and_unloads_old_team() {
        let bed = TestBed::new().await;
        let (a, team_a) = bed.online().await;
        let (b, team_b) = bed.online().await;
        bed.events.clear();

        bed.engine.move_member(b, &team_a).await.unwrap();
        assert_eq!(
            bed.events.names(),
            vec!["member_left", "team_unloaded", "member_joined"]
        );
        assert!(!team_b.is_valid());
        assert!(Arc::ptr_eq(&bed.engine.get(b).unwrap(), &team_a));
        assert_eq!(team_a.size().unwrap(), 2);
        assert!(team_a.contains(a).unwrap());
        assert_eq!(bed.backend.team_of(b).await.unwrap(), Some(team_a.team_id()));
    }

    #[tokio::test]
    async fn test_merge_keeps_old_team_with_other_members() {
        let bed = TestBed::new().await;
        let (a, b) = bed.team_of_two().await;
        let old = bed.engine.load_online(a, "alex").await.unwrap();
        bed.engine.load_online(b, "blair").await.unwrap();
        let (_, target) = bed.online().await;
        bed.events.clear();

        bed.engine.move_member(b, &target).await.unwrap();
        assert_eq!(bed.events.names(), vec!["member_left", "member_joined"]);
        assert!(old.is_valid());
        assert_eq!(old.members().unwrap(), vec![a]);
    }

    #[tokio::test]
    async fn test_merge_into_own_team_is_noop() {
        let bed = TestBed::new().await;
        let (a, team) = bed.online().await;
        bed.events.clear();

        bed.engine.move_member(a, &team).await.unwrap();
        assert!(bed.events.names().is_empty());
    }

    #[tokio::test]
    async fn test_merge_requires_loaded_member() {
        let bed = TestBed::new().await;
        let (_, team) = bed.online().await;
        let err = bed.engine.move_member(MemberId::new(), &team).await.unwrap_err();
        assert!(matches!(err, EngineError::MemberNotLoaded(_)));
    }

    #[tokio::test]
    async fn test_merge_fails_closed() {
        let bed = TestBed::failing_moves().await;
        let (a, team_a) = bed.online().await;
        let (b, team_b) = bed.online().await;
        bed.engine.set_progress(&key("wood"), &team_a, 3, true).unwrap();
        bed.events.clear();

        let err = bed.engine.move_member(b, &team_a).await.unwrap_err();
        assert!(matches!(err, EngineError::Backend(StorageError::Other(_))));
        assert!(bed.events.names().is_empty());
        assert!(team_a.is_valid() && team_b.is_valid());
        assert_eq!(team_a.members().unwrap(), vec![a]);
        assert_eq!(team_b.members().unwrap(), vec![b]);
        assert_eq!(team_a.progress(&key("wood")).unwrap(), 3);
        assert!(Arc::ptr_eq(&bed.engine.get(b).unwrap(), &team_b));

        let err = bed.engine.move_member_to_new_team(a).await.unwrap_err();
        assert!(matches!(err, EngineError::Backend(_)));
        assert!(Arc::ptr_eq(&bed.engine.get(a).unwrap(), &team_a));
    }

    #[tokio::test]
    async fn test_split_creates_empty_team() {
        let bed = TestBed::new().await;
        let (a, b) = bed.team_of_two().await;
        let old = bed.engine.load_online(a, "alex").await.unwrap();
        bed.engine.load_online(b, "blair").await.unwrap();
        bed.engine.set_progress(&key("wood"), &old, 5, true).unwrap();
        bed.events.clear();

        let new = bed.engine.move_member_to_new_team(b).await.unwrap();
        assert_ne!(new.team_id(), old.team_id());
        assert_eq!(new.members().unwrap(), vec![b]);
        assert_eq!(new.progress(&key("wood")).unwrap(), 0);
        assert_eq!(old.members().unwrap(), vec![a]);
        assert_eq!(old.progress(&key("wood")).unwrap(), 5);
        assert_eq!(
            bed.events.names(),
            vec!["member_left", "team_loaded", "member_joined"]
        );
        assert_eq!(bed.backend.team_of(b).await.unwrap(), Some(new.team_id()));
    }

    #[tokio::test]
    async fn test_split_of_sole_member_unloads_old_team() {
        let bed = TestBed::new().await;
        let member = bed.offline_member().await;
        let job = Requester::new("job");
        let old = bed
            .engine
            .load_member(member, &job, crate::CacheFreeingOption::Manual)
            .await
            .unwrap();
        bed.events.clear();

        let new = bed.engine.move_member_to_new_team(member).await.unwrap();
        assert!(!old.is_valid());
        assert_eq!(
            bed.events.names(),
            vec!["member_left", "team_unloaded", "team_loaded", "member_joined"]
        );

        // the pin moved with the member
        assert!(bed.engine.release_pin(member, &job));
        assert!(!new.is_valid());
    }

    #[tokio::test]
    async fn test_merge_scenario() {
        let bed = TestBed::new().await;
        let (p1, p2) = bed.team_of_two().await;
        let team_a = bed.engine.load_online(p1, "p1").await.unwrap();
        bed.engine.load_online(p2, "p2").await.unwrap();
        let (p3, team_b) = bed.online().await;
        bed.events.clear();

        bed.engine.move_member(p1, &team_b).await.unwrap();
        assert_eq!(team_a.members().unwrap(), vec![p2]);
        assert!(team_a.is_valid());
        let mut expected = vec![p1, p3];
        expected.sort();
        assert_eq!(team_b.members().unwrap(), expected);
        assert_eq!(bed.events.count("team_unloaded"), 0);

        bed.engine.move_member(p2, &team_b).await.unwrap();
        assert!(!team_a.is_valid());
        assert_eq!(
            bed.events.names()[2..].to_vec(),
            vec!["member_left", "team_unloaded", "member_joined"]
        );
        assert_eq!(team_b.size().unwrap(), 3);

        // no member is listed by two cached records
        for member in [p1, p2, p3] {
            let holders = bed
                .engine
                .loaded_teams()
                .iter()
                .filter(|r| r.contains(member).unwrap())
                .count();
            assert_eq!(holders, 1);
        }
    }
}
