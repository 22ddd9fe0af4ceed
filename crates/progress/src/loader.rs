//! Load pipeline - bring a member's team into the cache.
//!
//! A load is served, in order, from the member's own cache entry, from a
//! cached teammate's record, or from the backend. Whatever serves it, the
//! member gains its reason to stay cached (online or a pin) before the call
//! returns.

use std::sync::Arc;
use std::time::Duration;

use teamprog_core::{MemberId, ProgressRecord, Requester, TeamEvent};
use tracing::{debug, info, warn};

use crate::cache::ProgressCache;
use crate::engine::ProgressEngine;
use crate::error::Result;
use crate::pin::{CacheFreeingOption, PinKind};
use crate::writer::WriteOp;

/// Where a load was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadStage {
    /// The member was already cached
    Cache,
    /// A cached teammate's record listed the member
    DeepCache,
    /// Read from the backend
    Backend,
    /// The backend created the member
    Registered,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum LoadReason<'a> {
    Online { name: &'a str },
    Pin { requester: &'a Requester, option: CacheFreeingOption },
}

fn retain(cache: &mut ProgressCache, member: MemberId, reason: &LoadReason<'_>) {
    match reason {
        LoadReason::Online { .. } => {
            cache.set_online(member);
        }
        LoadReason::Pin { requester, option } => cache.pins_mut().pin(member, requester, option.kind()),
    }
}

impl ProgressEngine {
    /// Load the team of a member that just came online.
    ///
    /// Unknown members are registered with a fresh one-member team. The member
    /// stays cached until [`set_offline`](Self::set_offline).
    pub async fn load_online(&self, member: MemberId, name: &str) -> Result<Arc<ProgressRecord>> {
        let (record, stage) = self.load(member, LoadReason::Online { name }).await?;

        // a backend load already stored the name
        if self.inner.config.rename_on_login && matches!(stage, LoadStage::Cache | LoadStage::DeepCache) {
            self.submit(WriteOp::Rename { member, name: name.to_string() });
        }
        if self.inner.config.replay_pending_rewards {
            self.replay_pending_rewards(&record, member).await;
        }
        Ok(record)
    }

    /// Load the team of a member that may be offline and pin it for `requester`.
    ///
    /// Fails with a backend `NotFound` for members the backend has never seen.
    pub async fn load_member(
        &self,
        member: MemberId,
        requester: &Requester,
        option: CacheFreeingOption,
    ) -> Result<Arc<ProgressRecord>> {
        let (record, _) = self.load(member, LoadReason::Pin { requester, option }).await?;
        Ok(record)
    }

    /// [`load_member`](Self::load_member) with an automatic pin released after
    /// the configured default delay.
    pub async fn load_offline(&self, member: MemberId, requester: &Requester) -> Result<Arc<ProgressRecord>> {
        let option = CacheFreeingOption::Automatic(self.inner.config.default_auto_release());
        self.load_member(member, requester, option).await
    }

    /// Mark a member offline, evicting its team if nothing else keeps it.
    /// Returns false if the member was not online.
    pub fn set_offline(&self, member: MemberId) -> bool {
        let evicted = {
            let mut cache = self.lock();
            if !cache.set_offline(member) {
                return false;
            }
            cache.release(member)
        };
        debug!(%member, "member offline");
        if let Some(team) = evicted {
            self.dispatch(vec![TeamEvent::TeamUnloaded { team }]);
        }
        true
    }

    /// Release one manual pin. Returns false if `requester` held none.
    pub fn release_pin(&self, member: MemberId, requester: &Requester) -> bool {
        self.unpin(member, requester, PinKind::Manual)
    }

    fn unpin(&self, member: MemberId, requester: &Requester, kind: PinKind) -> bool {
        if self.ensure_running().is_err() {
            return false;
        }
        let evicted = {
            let mut cache = self.lock();
            if !cache.pins_mut().unpin(member, requester, kind) {
                warn!(%member, %requester, %kind, "no pin to release");
                return false;
            }
            cache.release(member)
        };
        if let Some(team) = evicted {
            self.dispatch(vec![TeamEvent::TeamUnloaded { team }]);
        }
        true
    }

    fn schedule_release(&self, member: MemberId, requester: Requester, delay: Duration) {
        let engine = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = engine.upgrade() {
                ProgressEngine { inner }.unpin(member, &requester, PinKind::Automatic);
            }
        });
    }

    fn after_retain(&self, member: MemberId, reason: &LoadReason<'_>) {
        if let LoadReason::Pin { requester, option: CacheFreeingOption::Automatic(delay) } = reason {
            self.schedule_release(member, (*requester).clone(), *delay);
        }
    }

    pub(crate) async fn load(
        &self,
        member: MemberId,
        reason: LoadReason<'_>,
    ) -> Result<(Arc<ProgressRecord>, LoadStage)> {
        self.ensure_running()?;

        let cached = {
            let mut cache = self.lock();
            let hit = match cache.get(member).cloned() {
                Some(record) => Some((record, LoadStage::Cache)),
                None => cache.find_in_members(member).map(|record| {
                    cache.put(member, Arc::clone(&record));
                    (record, LoadStage::DeepCache)
                }),
            };
            if hit.is_some() {
                retain(&mut cache, member, &reason);
            }
            hit
        };
        if let Some((record, stage)) = cached {
            debug!(%member, team = %record.team_id(), ?stage, "load served from cache");
            self.after_retain(member, &reason);
            return Ok((record, stage));
        }

        let mut created = false;
        let mut events = Vec::new();
        let record = loop {
            let evictions = self.lock().evictions();
            // queued writes must land before the backend is read
            self.inner.writer.flush().await;
            let snapshot = match reason {
                LoadReason::Online { name } => {
                    let name = name.to_string();
                    let (snapshot, registered) = self
                        .run_backend("load_or_register", move |backend| async move {
                            backend.load_or_register(member, &name).await
                        })
                        .await?;
                    created |= registered;
                    snapshot
                }
                LoadReason::Pin { .. } => {
                    self.run_backend("load_team_of", move |backend| async move {
                        backend.load_team_of(member).await
                    })
                    .await?
                }
            };

            let mut cache = self.lock();
            self.ensure_running()?;
            // another load may have cached the team while the backend was busy
            let record = match cache.get(member).cloned() {
                Some(record) => record,
                None => match cache.team(snapshot.team).cloned() {
                    Some(record) => {
                        record.add_member(member)?;
                        cache.put(member, Arc::clone(&record));
                        record
                    }
                    None if cache.evictions() != evictions => {
                        // the team may have been cached, changed and evicted meanwhile
                        drop(cache);
                        debug!(%member, team = %snapshot.team, "eviction during load, reading again");
                        continue;
                    }
                    None => {
                        let record = Arc::new(ProgressRecord::from_snapshot(snapshot));
                        cache.put(member, Arc::clone(&record));
                        events.push(TeamEvent::TeamLoaded { team: Arc::clone(&record) });
                        record
                    }
                },
            };
            retain(&mut cache, member, &reason);
            break record;
        };

        let stage = if created {
            events.push(TeamEvent::MemberRegistered { team: Arc::clone(&record), member });
            LoadStage::Registered
        } else {
            LoadStage::Backend
        };
        info!(%member, team = %record.team_id(), ?stage, "team loaded");

        self.dispatch(events);
        self.after_retain(member, &reason);
        Ok((record, stage))
    }

    /// Hand out rewards completed while nobody in the team was online.
    async fn replay_pending_rewards(&self, record: &Arc<ProgressRecord>, member: MemberId) {
        let team = record.team_id();
        self.inner.writer.flush().await;

        let pending = match self
            .run_backend("pending_rewards", move |backend| async move {
                backend.pending_rewards(team).await
            })
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                warn!(%team, error = %e, "could not read pending rewards");
                return;
            }
        };
        if pending.is_empty() {
            return;
        }
        if let Err(e) = self
            .run_backend("clear_pending_rewards", move |backend| async move {
                backend.clear_pending_rewards(team).await
            })
            .await
        {
            warn!(%team, error = %e, "could not clear pending rewards");
            return;
        }

        let grantee = {
            let cache = self.lock();
            let mapped = cache.get(member).map(|r| Arc::ptr_eq(r, record)).unwrap_or(false);
            if mapped && cache.is_online(member) {
                Some(member)
            } else {
                cache.online_member_of(record)
            }
        };
        let Some(grantee) = grantee else {
            // went offline meanwhile; keep them for next time
            for reward in pending {
                self.submit(WriteOp::PendingReward {
                    team,
                    objective: reward.objective,
                    give_rewards: reward.give_rewards,
                });
            }
            return;
        };

        info!(%team, member = %grantee, count = pending.len(), "replaying pending rewards");
        let events = pending
            .into_iter()
            .map(|reward| TeamEvent::ObjectiveGranted {
                team: Arc::clone(record),
                objective: reward.objective,
                member: grantee,
                give_rewards: reward.give_rewards,
            })
            .collect();
        self.dispatch(events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::pin::PinCounts;
    use crate::testing::{key, TestBed};
    use teamprog_storage::{Backend, StorageError};

    #[tokio::test]
    async fn test_register_new_member() {
        let bed = TestBed::new().await;
        let member = MemberId::new();

        let (record, stage) = bed.engine.load(member, LoadReason::Online { name: "alex" }).await.unwrap();
        assert_eq!(stage, LoadStage::Registered);
        assert_eq!(record.members().unwrap(), vec![member]);
        assert_eq!(bed.events.names(), vec!["team_loaded", "member_registered"]);
        assert!(bed.engine.is_online(member));
    }

    #[tokio::test]
    async fn test_teammates_share_one_record() {
        let bed = TestBed::new().await;
        let (a, b) = bed.team_of_two().await;

        let first = bed.engine.load_online(a, "alex").await.unwrap();
        let second = bed.engine.load_online(b, "blair").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(bed.events.count("team_loaded"), 1);
        assert_eq!(bed.engine.loaded_teams().len(), 1);
    }

    #[tokio::test]
    async fn test_deep_cache_serves_teammate() {
        let bed = TestBed::new().await;
        let (a, b) = bed.team_of_two().await;
        let record = bed.engine.load_online(a, "alex").await.unwrap();

        let job = Requester::new("job");
        let reason = LoadReason::Pin { requester: &job, option: CacheFreeingOption::Manual };
        let (found, stage) = bed.engine.load(b, reason).await.unwrap();
        assert_eq!(stage, LoadStage::DeepCache);
        assert!(Arc::ptr_eq(&found, &record));

        let (_, stage) = bed.engine.load(b, reason).await.unwrap();
        assert_eq!(stage, LoadStage::Cache);
        assert_eq!(bed.engine.pin_counts(b, &job), PinCounts { automatic: 0, manual: 2 });
    }

    #[tokio::test]
    async fn test_unknown_member_pin_load_fails() {
        let bed = TestBed::new().await;
        let member = MemberId::new();
        let err = bed
            .engine
            .load_member(member, &Requester::new("job"), CacheFreeingOption::Manual)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Backend(StorageError::NotFound(_))));
        assert!(!bed.engine.is_loaded(member));
        assert!(bed.events.names().is_empty());
    }

    #[tokio::test]
    async fn test_offline_evicts_last_member() {
        let bed = TestBed::new().await;
        let (a, b) = bed.team_of_two().await;
        let record = bed.engine.load_online(a, "alex").await.unwrap();
        bed.engine.load_online(b, "blair").await.unwrap();

        assert!(bed.engine.set_offline(a));
        assert!(record.is_valid());
        assert!(!bed.engine.is_loaded(a));

        assert!(bed.engine.set_offline(b));
        assert!(!record.is_valid());
        assert!(bed.engine.loaded_teams().is_empty());
        assert_eq!(bed.events.names().last(), Some(&"team_unloaded"));
        assert!(!bed.engine.set_offline(b));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pins_release_independently() {
        let bed = TestBed::new().await;
        let member = bed.offline_member().await;
        let job = Requester::new("job");

        let record = bed
            .engine
            .load_member(member, &job, CacheFreeingOption::Automatic(Duration::from_secs(10)))
            .await
            .unwrap();
        bed.engine
            .load_member(member, &job, CacheFreeingOption::Automatic(Duration::from_secs(20)))
            .await
            .unwrap();
        bed.engine.load_member(member, &job, CacheFreeingOption::Manual).await.unwrap();
        assert_eq!(bed.engine.pin_counts(member, &job), PinCounts { automatic: 2, manual: 1 });

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(bed.engine.pin_counts(member, &job), PinCounts { automatic: 1, manual: 1 });
        assert!(bed.engine.is_loaded(member));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(bed.engine.pin_counts(member, &job), PinCounts { automatic: 0, manual: 1 });
        assert!(bed.engine.is_loaded(member));
        assert!(record.is_valid());

        assert!(bed.engine.release_pin(member, &job));
        assert!(!bed.engine.is_loaded(member));
        assert!(!record.is_valid());
        assert!(!bed.engine.release_pin(member, &job));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_offline_uses_default_delay() {
        let bed = TestBed::new().await;
        let member = bed.offline_member().await;
        let job = Requester::new("job");

        bed.engine.load_offline(member, &job).await.unwrap();
        tokio::time::sleep(bed.engine.config().default_auto_release() - Duration::from_secs(1)).await;
        assert!(bed.engine.is_loaded(member));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!bed.engine.is_loaded(member));
    }

    #[tokio::test]
    async fn test_rename_on_login_from_cache() {
        let bed = TestBed::new().await;
        let (a, b) = bed.team_of_two().await;
        bed.engine.load_online(a, "alex").await.unwrap();

        bed.engine.load_online(b, "blair the second").await.unwrap();
        bed.engine.flush().await;
        assert_eq!(bed.backend.member_name(b).await.as_deref(), Some("blair the second"));
    }

    #[tokio::test]
    async fn test_pending_rewards_replayed_on_login() {
        let bed = TestBed::new().await;
        let member = bed.offline_member().await;
        let job = Requester::new("job");

        let record = bed.engine.load_member(member, &job, CacheFreeingOption::Manual).await.unwrap();
        bed.engine.set_progress(&key("root"), &record, 1, true).unwrap();
        assert_eq!(bed.events.count("objective_granted"), 0);
        bed.engine.release_pin(member, &job);
        bed.engine.flush().await;
        assert_eq!(bed.backend.pending_rewards(record.team_id()).await.unwrap().len(), 1);

        let record = bed.engine.load_online(member, "alex").await.unwrap();
        let granted = bed.events.granted();
        assert_eq!(granted, vec![(key("root"), member, true)]);
        assert!(bed.backend.pending_rewards(record.team_id()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_record() {
        let bed = TestBed::new().await;
        let (a, b) = bed.team_of_two().await;
        let job = Requester::new("job");

        let (first, second, third) = tokio::join!(
            bed.engine.load_online(a, "alex"),
            bed.engine.load_member(b, &job, CacheFreeingOption::Manual),
            bed.engine.load_online(b, "blair"),
        );
        let (first, second, third) = (first.unwrap(), second.unwrap(), third.unwrap());
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &third));
        assert_eq!(bed.events.count("team_loaded"), 1);
        assert_eq!(bed.engine.loaded_teams().len(), 1);
        assert_eq!(first.size().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_racing_eviction_reads_fresh_progress() {
        let bed = TestBed::slow_offline_load(Duration::from_secs(10)).await;
        let (a, b) = bed.team_of_two().await;
        let job = Requester::new("job");

        let engine = bed.engine.clone();
        let pending = tokio::spawn({
            let job = job.clone();
            async move { engine.load_member(a, &job, CacheFreeingOption::Manual).await }
        });
        // the load above now holds a snapshot without the update below
        tokio::time::sleep(Duration::from_secs(1)).await;

        let teammate = bed.engine.load_online(b, "blair").await.unwrap();
        bed.engine.set_progress(&key("wood"), &teammate, 4, true).unwrap();
        assert!(bed.engine.set_offline(b));
        assert!(!teammate.is_valid());
        bed.engine.flush().await;

        let record = pending.await.unwrap().unwrap();
        assert_eq!(record.progress(&key("wood")).unwrap(), 4);

        bed.engine.set_progress(&key("wood"), &record, 5, true).unwrap();
        bed.engine.flush().await;
        let stored = bed.backend.team_progress(record.team_id()).await.unwrap();
        assert_eq!(stored.get(&key("wood")), Some(&5));
    }
}
