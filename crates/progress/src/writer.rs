//! Ordered background writes.
//!
//! Progress changes are applied to the cached record first and persisted
//! afterwards by a single worker, so writes reach the backend in the order
//! they were made. Failures are logged and counted, never retried.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use teamprog_core::{MemberId, ObjectiveKey, TeamId};
use teamprog_storage::Backend;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

#[derive(Debug)]
pub(crate) enum WriteOp {
    Progress { team: TeamId, objective: ObjectiveKey, count: u32 },
    PendingReward { team: TeamId, objective: ObjectiveKey, give_rewards: bool },
    Rename { member: MemberId, name: String },
    Barrier(oneshot::Sender<()>),
    Stop,
}

pub(crate) struct WriteQueue {
    tx: mpsc::UnboundedSender<WriteOp>,
    worker: Mutex<Option<JoinHandle<()>>>,
    failures: Arc<AtomicU64>,
}

impl WriteQueue {
    pub(crate) fn spawn(backend: Arc<dyn Backend>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let failures = Arc::new(AtomicU64::new(0));
        let worker = tokio::spawn(run(backend, rx, Arc::clone(&failures)));
        Self { tx, worker: Mutex::new(Some(worker)), failures }
    }

    /// Queue a write. Returns false once the worker has stopped.
    pub(crate) fn submit(&self, op: WriteOp) -> bool {
        match self.tx.send(op) {
            Ok(()) => true,
            Err(mpsc::error::SendError(op)) => {
                error!(?op, "write queue closed, dropping write");
                false
            }
        }
    }

    /// Wait until every write queued before this call has been attempted.
    pub(crate) async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.submit(WriteOp::Barrier(done)) {
            let _ = wait.await;
        }
    }

    /// Stop the worker after the writes already queued.
    pub(crate) async fn close(&self) {
        let _ = self.tx.send(WriteOp::Stop);
        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "write worker panicked");
            }
        }
    }

    pub(crate) fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

async fn run(backend: Arc<dyn Backend>, mut rx: mpsc::UnboundedReceiver<WriteOp>, failures: Arc<AtomicU64>) {
    while let Some(op) = rx.recv().await {
        let result = match op {
            WriteOp::Progress { team, objective, count } => {
                debug!(%team, %objective, count, "persisting progress");
                backend.update_progress(team, &objective, count).await
            }
            WriteOp::PendingReward { team, objective, give_rewards } => {
                debug!(%team, %objective, "persisting pending reward");
                backend.add_pending_reward(team, &objective, give_rewards).await
            }
            WriteOp::Rename { member, name } => backend.rename_member(member, &name).await,
            WriteOp::Barrier(done) => {
                let _ = done.send(());
                Ok(())
            }
            WriteOp::Stop => break,
        };
        if let Err(e) = result {
            failures.fetch_add(1, Ordering::Relaxed);
            error!(error = %e, "background write failed");
        }
    }
    debug!("write worker stopped");
}
