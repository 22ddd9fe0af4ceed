//! Objective model - nodes of the progress tree.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::id::ObjectiveKey;

/// One node of the progress tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Objective {
    /// Unique key
    pub key: ObjectiveKey,

    /// Human readable title
    pub display: String,

    /// Progress needed to complete the objective
    pub max: u32,

    /// Position in the tree
    pub kind: ObjectiveKind,
}

/// Where an objective sits in the tree and how its progress is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveKind {
    /// Top of a tree
    Root,

    /// Single parent
    Base {
        /// Parent objective
        parent: ObjectiveKey,
    },

    /// Reachable from several parents
    MultiParent {
        /// Parent objectives
        parents: Vec<ObjectiveKey>,
    },

    /// Progress is the sum of its tasks' progress.
    ///
    /// `tasks` order is the order progress is distributed in.
    Composite {
        /// Parent objective, if any
        parent: Option<ObjectiveKey>,
        /// Sub-objectives, in registration order
        tasks: Vec<ObjectiveKey>,
        /// Whether values strictly between 0 and max are accepted
        allow_arbitrary_updates: bool,
    },

    /// Sub-objective of a composite
    Task {
        /// Owning composite
        composite: ObjectiveKey,
    },
}

impl Objective {
    /// Create a root objective.
    pub fn root(key: ObjectiveKey, display: impl Into<String>, max: u32) -> Self {
        Self { key, display: display.into(), max, kind: ObjectiveKind::Root }
    }

    /// Create an objective with a single parent.
    pub fn child(key: ObjectiveKey, display: impl Into<String>, max: u32, parent: ObjectiveKey) -> Self {
        Self { key, display: display.into(), max, kind: ObjectiveKind::Base { parent } }
    }

    /// Create an objective with several parents.
    pub fn multi_parent(
        key: ObjectiveKey,
        display: impl Into<String>,
        max: u32,
        parents: Vec<ObjectiveKey>,
    ) -> Self {
        Self { key, display: display.into(), max, kind: ObjectiveKind::MultiParent { parents } }
    }

    /// Parent objectives; empty for roots and parentless composites.
    pub fn parents(&self) -> &[ObjectiveKey] {
        match &self.kind {
            ObjectiveKind::Root => &[],
            ObjectiveKind::Base { parent } => std::slice::from_ref(parent),
            ObjectiveKind::MultiParent { parents } => parents,
            ObjectiveKind::Composite { parent, .. } => parent.as_slice(),
            ObjectiveKind::Task { composite } => std::slice::from_ref(composite),
        }
    }

    /// Whether the objective has at least one parent.
    pub fn has_parents(&self) -> bool {
        !self.parents().is_empty()
    }

    /// Sub-objectives of a composite; empty otherwise.
    pub fn tasks(&self) -> &[ObjectiveKey] {
        match &self.kind {
            ObjectiveKind::Composite { tasks, .. } => tasks,
            _ => &[],
        }
    }

    /// Whether progress is the sum of sub-objectives.
    pub fn is_composite(&self) -> bool {
        matches!(self.kind, ObjectiveKind::Composite { .. })
    }

    /// Whether `value` is complete for this objective.
    pub fn is_completed_by(&self, value: u32) -> bool {
        value >= self.max
    }
}

/// Definition of one task of a composite, used by [`ObjectiveRegistry::register_composite`].
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// Task key
    pub key: ObjectiveKey,
    /// Task title
    pub display: String,
    /// Task maximum
    pub max: u32,
}

impl TaskSpec {
    /// Create a task definition.
    pub fn new(key: ObjectiveKey, display: impl Into<String>, max: u32) -> Self {
        Self { key, display: display.into(), max }
    }
}

/// Registration-ordered catalogue of objectives.
#[derive(Debug, Default)]
pub struct ObjectiveRegistry {
    objectives: Vec<Objective>,
    index: HashMap<ObjectiveKey, usize>,
}

impl ObjectiveRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a root, base or multi-parent objective.
    ///
    /// Composites and tasks go through [`register_composite`](Self::register_composite).
    pub fn register(&mut self, objective: Objective) -> Result<(), ModelError> {
        match objective.kind {
            ObjectiveKind::Composite { .. } | ObjectiveKind::Task { .. } => {
                return Err(ModelError::InvalidObjective(format!(
                    "{} must be registered with register_composite",
                    objective.key
                )));
            }
            _ => {}
        }
        self.check_new(&objective.key, objective.max)?;
        self.check_parents(&objective.key, objective.parents())?;
        self.push(objective);
        Ok(())
    }

    /// Register a composite objective together with its tasks.
    ///
    /// The composite's maximum is the sum of the tasks' maxima. The order of
    /// `tasks` is kept and is the order aggregate progress is distributed in.
    pub fn register_composite(
        &mut self,
        key: ObjectiveKey,
        display: impl Into<String>,
        parent: Option<ObjectiveKey>,
        tasks: Vec<TaskSpec>,
        allow_arbitrary_updates: bool,
    ) -> Result<(), ModelError> {
        if tasks.is_empty() {
            return Err(ModelError::InvalidObjective(format!("{} has no tasks", key)));
        }
        let mut max: u32 = 0;
        for task in &tasks {
            if task.key == key || tasks.iter().filter(|t| t.key == task.key).count() > 1 {
                return Err(ModelError::InvalidObjective(format!("duplicate task {}", task.key)));
            }
            self.check_new(&task.key, task.max)?;
            max = max.checked_add(task.max).ok_or_else(|| {
                ModelError::InvalidObjective(format!("{} maximum overflows", key))
            })?;
        }
        self.check_new(&key, max)?;
        if let Some(parent) = &parent {
            self.check_parents(&key, std::slice::from_ref(parent))?;
        }

        let task_keys: Vec<ObjectiveKey> = tasks.iter().map(|t| t.key.clone()).collect();
        self.push(Objective {
            key: key.clone(),
            display: display.into(),
            max,
            kind: ObjectiveKind::Composite { parent, tasks: task_keys, allow_arbitrary_updates },
        });
        for task in tasks {
            self.push(Objective {
                key: task.key,
                display: task.display,
                max: task.max,
                kind: ObjectiveKind::Task { composite: key.clone() },
            });
        }
        Ok(())
    }

    /// Get an objective by key.
    pub fn get(&self, key: &ObjectiveKey) -> Option<&Objective> {
        self.index.get(key).map(|&i| &self.objectives[i])
    }

    /// Get an objective or fail with [`ModelError::UnknownObjective`].
    pub fn require(&self, key: &ObjectiveKey) -> Result<&Objective, ModelError> {
        self.get(key).ok_or_else(|| ModelError::UnknownObjective(key.clone()))
    }

    /// All objectives in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Objective> {
        self.objectives.iter()
    }

    /// Number of registered objectives.
    pub fn len(&self) -> usize {
        self.objectives.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.objectives.is_empty()
    }

    fn check_new(&self, key: &ObjectiveKey, max: u32) -> Result<(), ModelError> {
        if max == 0 {
            return Err(ModelError::InvalidObjective(format!("{} has a maximum of 0", key)));
        }
        if self.index.contains_key(key) {
            return Err(ModelError::InvalidObjective(format!("{} is already registered", key)));
        }
        Ok(())
    }

    fn check_parents(&self, key: &ObjectiveKey, parents: &[ObjectiveKey]) -> Result<(), ModelError> {
        for parent in parents {
            if parent == key {
                return Err(ModelError::InvalidObjective(format!("{} is its own parent", key)));
            }
            if !self.index.contains_key(parent) {
                return Err(ModelError::InvalidObjective(format!(
                    "parent {} of {} is not registered",
                    parent, key
                )));
            }
        }
        Ok(())
    }

    fn push(&mut self, objective: Objective) {
        self.index.insert(objective.key.clone(), self.objectives.len());
        self.objectives.push(objective);
    }
}
