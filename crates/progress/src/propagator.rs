//! Progress updates and objective completion.
//!
//! Updates are applied to the cached record at once, observers are told, and
//! the write is queued for the backend. Completing an objective grants it
//! through an online team member, or queues a pending reward when nobody in
//! the team is online.

use std::sync::Arc;

use teamprog_core::{Objective, ObjectiveKey, ObjectiveKind, ProgressRecord, TeamEvent};
use tracing::{debug, info};

use crate::engine::ProgressEngine;
use crate::error::{EngineError, Result};
use crate::splitter::{distribute, SubProgress};
use crate::writer::WriteOp;

impl ProgressEngine {
    /// Set an objective's progress for a team. Returns the previous value.
    ///
    /// Setting the current value again is a no-op. Composite objectives
    /// distribute the value over their tasks; see [`distribute`].
    pub fn set_progress(
        &self,
        objective: &ObjectiveKey,
        record: &Arc<ProgressRecord>,
        value: u32,
        give_rewards: bool,
    ) -> Result<u32> {
        self.ensure_running()?;
        record.ensure_valid()?;
        let registry = Arc::clone(&self.inner.registry);
        let objective = registry.require(objective)?;
        check_range(objective, value)?;

        let mut events = Vec::new();
        let old = match &objective.kind {
            ObjectiveKind::Composite { tasks, allow_arbitrary_updates, .. } => self.set_composite(
                record,
                objective,
                tasks,
                *allow_arbitrary_updates,
                value,
                give_rewards,
                &mut events,
            )?,
            ObjectiveKind::Task { composite } => {
                let composite = registry.require(composite)?;
                let before = self.aggregate(record, composite)?;
                let old = self.store(record, objective, value, &mut events)?;
                if old != value {
                    self.on_change(record, objective, old, value, give_rewards, &mut events);
                    let after = self.aggregate(record, composite)?;
                    if after != before {
                        self.store_total(record, composite, after)?;
                        events.push(TeamEvent::ProgressChanged {
                            team: Arc::clone(record),
                            objective: composite.key.clone(),
                            old: before,
                            new: after,
                        });
                        self.on_change(record, composite, before, after, give_rewards, &mut events);
                    }
                }
                old
            }
            _ => {
                let old = self.store(record, objective, value, &mut events)?;
                self.on_change(record, objective, old, value, give_rewards, &mut events);
                old
            }
        };

        self.dispatch(events);
        Ok(old)
    }

    /// Add to an objective's progress, capped at its maximum. Returns the new value.
    pub fn increment_progress(
        &self,
        objective: &ObjectiveKey,
        record: &Arc<ProgressRecord>,
        by: u32,
        give_rewards: bool,
    ) -> Result<u32> {
        let max = self.inner.registry.require(objective)?.max;
        let value = self.progress(record, objective)?.saturating_add(by).min(max);
        self.set_progress(objective, record, value, give_rewards)?;
        Ok(value)
    }

    /// Complete an objective.
    pub fn grant(&self, objective: &ObjectiveKey, record: &Arc<ProgressRecord>, give_rewards: bool) -> Result<u32> {
        let max = self.inner.registry.require(objective)?.max;
        self.set_progress(objective, record, max, give_rewards)
    }

    /// Reset an objective to zero.
    pub fn revoke(&self, objective: &ObjectiveKey, record: &Arc<ProgressRecord>) -> Result<u32> {
        self.set_progress(objective, record, 0, false)
    }

    /// Current progress of an objective; composites report the sum of their tasks.
    pub fn progress(&self, record: &Arc<ProgressRecord>, objective: &ObjectiveKey) -> Result<u32> {
        let objective = self.inner.registry.require(objective)?;
        self.aggregate(record, objective)
    }

    /// Whether the team has completed the objective.
    pub fn is_granted(&self, record: &Arc<ProgressRecord>, objective: &ObjectiveKey) -> Result<bool> {
        let definition = self.inner.registry.require(objective)?;
        Ok(definition.is_completed_by(self.progress(record, objective)?))
    }

    fn aggregate(&self, record: &ProgressRecord, objective: &Objective) -> Result<u32> {
        if !objective.is_composite() {
            return Ok(record.progress(&objective.key)?);
        }
        let mut total = 0u32;
        for task in objective.tasks() {
            total = total.saturating_add(record.progress(task)?);
        }
        Ok(total)
    }

    #[allow(clippy::too_many_arguments)]
    fn set_composite(
        &self,
        record: &Arc<ProgressRecord>,
        composite: &Objective,
        tasks: &[ObjectiveKey],
        allow_arbitrary_updates: bool,
        value: u32,
        give_rewards: bool,
        events: &mut Vec<TeamEvent>,
    ) -> Result<u32> {
        let old = self.aggregate(record, composite)?;
        if old == value {
            return Ok(old);
        }

        let registry = Arc::clone(&self.inner.registry);
        if value == 0 || value == composite.max {
            // sub-task completions do not grant on their own here
            for task in tasks {
                let task = registry.require(task)?;
                let target = if value == 0 { 0 } else { task.max };
                self.store(record, task, target, events)?;
            }
        } else if !allow_arbitrary_updates {
            return Err(EngineError::ArbitraryUpdateRejected(composite.key.clone()));
        } else {
            let mut subs = Vec::with_capacity(tasks.len());
            for task in tasks {
                let task = registry.require(task)?;
                subs.push(SubProgress {
                    key: task.key.clone(),
                    current: record.progress(&task.key)?,
                    max: task.max,
                });
            }
            for (key, target) in distribute(&subs, old, value)? {
                let task = registry.require(&key)?;
                self.store(record, task, target, events)?;
            }
        }

        self.store_total(record, composite, value)?;
        events.push(TeamEvent::ProgressChanged {
            team: Arc::clone(record),
            objective: composite.key.clone(),
            old,
            new: value,
        });
        self.on_change(record, composite, old, value, give_rewards, events);
        Ok(old)
    }

    /// Keep the composite's own row in step with its tasks. Pending rewards
    /// for the composite hang off this row.
    fn store_total(&self, record: &Arc<ProgressRecord>, composite: &Objective, total: u32) -> Result<()> {
        if record.store_progress(&composite.key, total)? != total {
            self.submit(WriteOp::Progress {
                team: record.team_id(),
                objective: composite.key.clone(),
                count: total,
            });
        }
        Ok(())
    }

    /// Write one stored value to the record and queue it for the backend.
    /// Returns the previous value.
    fn store(
        &self,
        record: &Arc<ProgressRecord>,
        objective: &Objective,
        value: u32,
        events: &mut Vec<TeamEvent>,
    ) -> Result<u32> {
        check_range(objective, value)?;
        let old = record.store_progress(&objective.key, value)?;
        if old == value {
            return Ok(old);
        }
        debug!(team = %record.team_id(), objective = %objective.key, old, new = value, "progress stored");

        events.push(TeamEvent::ProgressChanged {
            team: Arc::clone(record),
            objective: objective.key.clone(),
            old,
            new: value,
        });
        self.submit(WriteOp::Progress {
            team: record.team_id(),
            objective: objective.key.clone(),
            count: value,
        });
        Ok(old)
    }

    /// Grant the objective if this change completed it.
    fn on_change(
        &self,
        record: &Arc<ProgressRecord>,
        objective: &Objective,
        old: u32,
        new: u32,
        give_rewards: bool,
        events: &mut Vec<TeamEvent>,
    ) {
        if old == new || !objective.is_completed_by(new) || objective.is_completed_by(old) {
            return;
        }

        let online = self.lock().online_member_of(record);
        match online {
            Some(member) => {
                info!(team = %record.team_id(), objective = %objective.key, %member, "objective granted");
                events.push(TeamEvent::ObjectiveGranted {
                    team: Arc::clone(record),
                    objective: objective.key.clone(),
                    member,
                    give_rewards,
                });
            }
            None => {
                info!(team = %record.team_id(), objective = %objective.key, "nobody online, reward deferred");
                self.submit(WriteOp::PendingReward {
                    team: record.team_id(),
                    objective: objective.key.clone(),
                    give_rewards,
                });
            }
        }
    }
}

fn check_range(objective: &Objective, value: u32) -> Result<()> {
    if value > objective.max {
        return Err(EngineError::Precondition(teamprog_core::ModelError::ProgressOutOfRange {
            objective: objective.key.clone(),
            value,
            max: objective.max,
        }));
    }
    Ok(())
}
