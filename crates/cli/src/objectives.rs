//! Objective definitions file.
//!
//! A JSON array of entries, registered in file order:
//!
//! ```json
//! [
//!   { "key": "quest:root", "display": "Quests", "max": 1 },
//!   { "key": "quest:wood", "display": "Chop wood", "max": 64, "parents": ["quest:root"] },
//!   { "key": "quest:tools", "display": "Tools", "parents": ["quest:root"],
//!     "tasks": [ { "key": "quest:axe", "display": "Axe", "max": 1 } ] }
//! ]
//! ```

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use teamprog_core::{Objective, ObjectiveKey, ObjectiveRegistry, TaskSpec};

#[derive(Debug, Deserialize)]
struct Entry {
    key: ObjectiveKey,
    #[serde(default)]
    display: Option<String>,
    #[serde(default)]
    max: Option<u32>,
    #[serde(default)]
    parents: Vec<ObjectiveKey>,
    #[serde(default)]
    tasks: Vec<TaskEntry>,
    #[serde(default)]
    allow_arbitrary_updates: bool,
}

#[derive(Debug, Deserialize)]
struct TaskEntry {
    key: ObjectiveKey,
    #[serde(default)]
    display: Option<String>,
    max: u32,
}

/// Build a registry from a definitions file. A missing file yields an empty registry.
pub fn load(path: &Path) -> Result<ObjectiveRegistry> {
    if !path.exists() {
        return Ok(ObjectiveRegistry::new());
    }
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse(&content).with_context(|| format!("loading objectives from {}", path.display()))
}

fn parse(content: &str) -> Result<ObjectiveRegistry> {
    let entries: Vec<Entry> = serde_json::from_str(content)?;
    let mut registry = ObjectiveRegistry::new();

    for entry in entries {
        let display = entry.display.unwrap_or_else(|| entry.key.key().to_string());
        if !entry.tasks.is_empty() {
            if entry.parents.len() > 1 {
                bail!("composite {} can have at most one parent", entry.key);
            }
            let tasks = entry
                .tasks
                .into_iter()
                .map(|t| {
                    let display = t.display.unwrap_or_else(|| t.key.key().to_string());
                    TaskSpec::new(t.key, display, t.max)
                })
                .collect();
            let parent = entry.parents.into_iter().next();
            registry.register_composite(entry.key, display, parent, tasks, entry.allow_arbitrary_updates)?;
            continue;
        }

        let Some(max) = entry.max else {
            bail!("{} needs a max", entry.key);
        };
        let mut parents = entry.parents;
        let objective = match parents.len() {
            0 => Objective::root(entry.key, display, max),
            1 => Objective::child(entry.key, display, max, parents.remove(0)),
            _ => Objective::multi_parent(entry.key, display, max, parents),
        };
        registry.register(objective)?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_kinds() {
        let registry = parse(
            r#"[
                { "key": "quest:root", "max": 1 },
                { "key": "quest:side", "display": "Side", "max": 1 },
                { "key": "quest:wood", "max": 64, "parents": ["quest:root"] },
                { "key": "quest:both", "max": 2, "parents": ["quest:root", "quest:side"] },
                { "key": "quest:tools", "parents": ["quest:root"],
                  "tasks": [ { "key": "quest:axe", "max": 1 }, { "key": "quest:saw", "max": 2 } ] }
            ]"#,
        )
        .unwrap();

        let tools = registry.require(&"quest:tools".parse().unwrap()).unwrap();
        assert!(tools.is_composite());
        assert_eq!(tools.max, 3);
        assert_eq!(registry.require(&"quest:both".parse().unwrap()).unwrap().parents().len(), 2);
        assert_eq!(registry.require(&"quest:root".parse().unwrap()).unwrap().display, "root");
        assert_eq!(registry.len(), 7);
    }

    #[test]
    fn test_missing_max_rejected() {
        assert!(parse(r#"[ { "key": "quest:root" } ]"#).is_err());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = load(&dir.path().join("objectives.json")).unwrap();
        assert!(registry.is_empty());
    }
}
