//! The progress engine - shared handle over cache, backend and observers.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use teamprog_core::{MemberId, ObjectiveRegistry, Observer, ProgressRecord, Requester, TeamEvent};
use teamprog_storage::{Backend, StorageError};
use tracing::{debug, error, info, warn};

use crate::cache::ProgressCache;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::pin::PinCounts;
use crate::writer::{WriteOp, WriteQueue};

pub(crate) struct EngineInner {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) registry: Arc<ObjectiveRegistry>,
    pub(crate) config: EngineConfig,
    pub(crate) cache: Mutex<ProgressCache>,
    pub(crate) writer: WriteQueue,
    observers: RwLock<Vec<Arc<dyn Observer>>>,
    closed: AtomicBool,
}

/// Handle to the progress engine.
///
/// Cheap to clone; all clones share one cache. Loads and membership changes
/// are async because they reach the backend. Progress updates are applied to
/// the cached record synchronously and persisted in the background.
#[derive(Clone)]
pub struct ProgressEngine {
    pub(crate) inner: Arc<EngineInner>,
}

impl std::fmt::Debug for ProgressEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressEngine")
            .field("config", &self.inner.config)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ProgressEngine {
    /// Check the backend and start the engine.
    pub async fn start(
        backend: Arc<dyn Backend>,
        registry: ObjectiveRegistry,
        config: EngineConfig,
    ) -> Result<Self> {
        backend.health_check().await.map_err(|e| {
            error!(error = %e, "backend health check failed");
            EngineError::Backend(e)
        })?;

        let writer = WriteQueue::spawn(Arc::clone(&backend));
        info!(objectives = registry.len(), "progress engine started");

        Ok(Self {
            inner: Arc::new(EngineInner {
                backend,
                registry: Arc::new(registry),
                config,
                cache: Mutex::new(ProgressCache::new()),
                writer,
                observers: RwLock::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Register an observer. Observers are called in registration order.
    pub fn subscribe(&self, observer: Arc<dyn Observer>) {
        self.inner
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Objective definitions.
    pub fn registry(&self) -> &ObjectiveRegistry {
        &self.inner.registry
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Cached record of a member.
    pub fn get(&self, member: MemberId) -> Result<Arc<ProgressRecord>> {
        self.lock()
            .get(member)
            .cloned()
            .ok_or(EngineError::MemberNotLoaded(member))
    }

    /// Whether the member has a cache entry.
    pub fn is_loaded(&self, member: MemberId) -> bool {
        self.lock().get(member).is_some()
    }

    /// Whether the member is online.
    pub fn is_online(&self, member: MemberId) -> bool {
        self.lock().is_online(member)
    }

    /// Cached team records, ordered by team id.
    pub fn loaded_teams(&self) -> Vec<Arc<ProgressRecord>> {
        self.lock().teams()
    }

    /// Pins `requester` holds on `member`.
    pub fn pin_counts(&self, member: MemberId, requester: &Requester) -> PinCounts {
        self.lock().pins().counts(member, requester)
    }

    /// Store a member's display name, after any queued writes.
    pub async fn rename_member(&self, member: MemberId, name: &str) -> Result<()> {
        self.ensure_running()?;
        self.inner.writer.flush().await;
        let name = name.to_string();
        self.run_backend("rename_member", move |backend| async move {
            backend.rename_member(member, &name).await
        })
        .await
    }

    /// Delete teams without members from the backend.
    pub async fn collect_orphan_teams(&self) -> Result<usize> {
        self.ensure_running()?;
        self.inner.writer.flush().await;
        let removed = self
            .run_backend("collect_orphan_teams", |backend| async move {
                backend.collect_orphan_teams().await
            })
            .await?;
        info!(removed, "collected orphan teams");
        Ok(removed)
    }

    /// Wait until queued writes have reached the backend.
    pub async fn flush(&self) {
        self.inner.writer.flush().await;
    }

    /// Number of background writes that failed.
    pub fn write_failures(&self) -> u64 {
        self.inner.writer.failures()
    }

    /// Stop accepting requests, flush writes and evict every record.
    pub async fn shutdown(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.inner.config.flush_on_shutdown {
            self.inner.writer.flush().await;
        }

        let evicted = self.lock().drain();
        let count = evicted.len();
        self.dispatch(evicted.into_iter().map(|team| TeamEvent::TeamUnloaded { team }).collect());

        self.inner.writer.close().await;
        info!(evicted = count, failures = self.write_failures(), "progress engine stopped");
        Ok(())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ProgressCache> {
        self.inner.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn ensure_running(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(EngineError::ShutDown);
        }
        Ok(())
    }

    pub(crate) fn submit(&self, op: WriteOp) {
        self.inner.writer.submit(op);
    }

    /// Deliver events to every observer, in order, on the calling task.
    pub(crate) fn dispatch(&self, events: Vec<TeamEvent>) {
        if events.is_empty() {
            return;
        }
        let observers = self
            .inner
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for event in &events {
            debug!(event = event.name(), team = %event.team().team_id(), "dispatching");
            for observer in &observers {
                observer.on_event(event);
            }
        }
    }

    /// Run one backend call on the runtime's worker pool and wait for it.
    pub(crate) async fn run_backend<T, F, Fut>(&self, op: &'static str, call: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn Backend>) -> Fut,
        Fut: Future<Output = teamprog_storage::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let handle = tokio::spawn(call(Arc::clone(&self.inner.backend)));
        match handle.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(op, error = %e, "backend call failed");
                Err(EngineError::Backend(e))
            }
            Err(e) => {
                error!(op, error = %e, "backend task aborted");
                Err(EngineError::Backend(StorageError::Other(e.to_string())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{key, registry, TestBed};
    use teamprog_storage::MemoryBackend;

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let bed = TestBed::new().await;
        let member = MemberId::new();
        let team = bed.engine.load_online(member, "alex").await.unwrap();

        bed.engine.shutdown().await.unwrap();
        assert!(!team.is_valid());
        assert!(bed.engine.loaded_teams().is_empty());
        assert_eq!(bed.events.names().last(), Some(&"team_unloaded"));
        assert!(matches!(
            bed.engine.load_online(member, "alex").await,
            Err(EngineError::ShutDown)
        ));
        // idempotent
        bed.engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_flushes_writes() {
        let bed = TestBed::new().await;
        let member = MemberId::new();
        let team = bed.engine.load_online(member, "alex").await.unwrap();
        bed.engine.set_progress(&key("wood"), &team, 4, true).unwrap();
        let team_id = team.team_id();

        bed.engine.shutdown().await.unwrap();
        let progress = bed.backend.team_progress(team_id).await.unwrap();
        assert_eq!(progress.get(&key("wood")), Some(&4));
    }

    #[tokio::test]
    async fn test_observers_in_registration_order() {
        let engine = ProgressEngine::start(Arc::new(MemoryBackend::new()), registry(), EngineConfig::default())
            .await
            .unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second"] {
            let order = Arc::clone(&order);
            engine.subscribe(Arc::new(move |event: &TeamEvent| {
                order.lock().unwrap().push((name, event.name()));
            }));
        }
        engine.load_online(MemberId::new(), "alex").await.unwrap();

        let order = order.lock().unwrap();
        assert_eq!(order[0], ("first", "team_loaded"));
        assert_eq!(order[1], ("second", "team_loaded"));
    }

    #[tokio::test]
    async fn test_rename_and_gc() {
        let bed = TestBed::new().await;
        let (a, b) = (MemberId::new(), MemberId::new());
        let team_a = bed.engine.load_online(a, "alex").await.unwrap();
        bed.engine.load_online(b, "blair").await.unwrap();

        bed.engine.rename_member(b, "bee").await.unwrap();
        bed.engine.move_member(b, &team_a).await.unwrap();
        assert_eq!(bed.engine.collect_orphan_teams().await.unwrap(), 1);
        assert_eq!(bed.backend.team_count().await, 1);
    }
}
