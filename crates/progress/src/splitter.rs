//! Distribution of a composite target across its tasks.

use teamprog_core::{ModelError, ObjectiveKey};

/// Current state of one task of a composite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubProgress {
    /// Task key
    pub key: ObjectiveKey,
    /// Current task progress
    pub current: u32,
    /// Task maximum
    pub max: u32,
}

/// Work out new task values that move a composite from `current` to `target`.
///
/// Tasks are visited in the given order. Raising fills each task up to its
/// maximum before moving on; lowering drains each task to zero the same way.
/// Only tasks whose value changes are returned.
///
/// `target` must lie strictly between 0 and the sum of the task maxima and
/// differ from `current`; 0 and the maximum are handled by the caller.
pub fn distribute(
    subs: &[SubProgress],
    current: u32,
    target: u32,
) -> Result<Vec<(ObjectiveKey, u32)>, ModelError> {
    let max: u32 = subs.iter().map(|sub| sub.max).sum();
    if target == 0 || target >= max || target == current {
        return Err(ModelError::SplitTarget { current, target, max });
    }

    let mut changes = Vec::new();
    if target > current {
        let mut remaining = target - current;
        for sub in subs {
            if remaining == 0 {
                break;
            }
            let cap = sub.max.saturating_sub(sub.current);
            if cap == 0 {
                continue;
            }
            let step = cap.min(remaining);
            changes.push((sub.key.clone(), sub.current + step));
            remaining -= step;
        }
        if remaining > 0 {
            return Err(ModelError::InsufficientCapacity { remaining });
        }
    } else {
        let mut remaining = current - target;
        for sub in subs {
            if remaining == 0 {
                break;
            }
            if sub.current == 0 {
                continue;
            }
            let step = sub.current.min(remaining);
            changes.push((sub.key.clone(), sub.current - step));
            remaining -= step;
        }
        if remaining > 0 {
            return Err(ModelError::InsufficientCapacity { remaining });
        }
    }
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(key: &str, current: u32, max: u32) -> SubProgress {
        SubProgress { key: ObjectiveKey::new("quest", key).unwrap(), current, max }
    }

    fn key(key: &str) -> ObjectiveKey {
        ObjectiveKey::new("quest", key).unwrap()
    }

    #[test]
    fn test_raise_fills_in_order() {
        let subs = [sub("a", 0, 2), sub("b", 0, 3), sub("c", 0, 5)];
        let changes = distribute(&subs, 0, 4).unwrap();
        assert_eq!(changes, vec![(key("a"), 2), (key("b"), 2)]);
    }

    #[test]
    fn test_raise_skips_full_tasks() {
        let subs = [sub("a", 2, 2), sub("b", 1, 3), sub("c", 0, 5)];
        let changes = distribute(&subs, 3, 7).unwrap();
        assert_eq!(changes, vec![(key("b"), 3), (key("c"), 2)]);
    }

    #[test]
    fn test_lower_drains_in_order() {
        let subs = [sub("a", 2, 2), sub("b", 3, 3), sub("c", 1, 5)];
        let changes = distribute(&subs, 6, 3).unwrap();
        assert_eq!(changes, vec![(key("a"), 0), (key("b"), 2)]);
    }

    #[test]
    fn test_lower_skips_empty_tasks() {
        let subs = [sub("a", 0, 2), sub("b", 3, 3)];
        let changes = distribute(&subs, 3, 1).unwrap();
        assert_eq!(changes, vec![(key("b"), 1)]);
    }

    #[test]
    fn test_result_sums_to_target() {
        let subs = [sub("a", 1, 4), sub("b", 0, 4), sub("c", 2, 4)];
        for target in 1..12 {
            if target == 3 {
                continue;
            }
            let changes = distribute(&subs, 3, target).unwrap();
            let total: u32 = subs
                .iter()
                .map(|s| {
                    changes
                        .iter()
                        .find(|(k, _)| *k == s.key)
                        .map(|(_, v)| *v)
                        .unwrap_or(s.current)
                })
                .sum();
            assert_eq!(total, target);
        }
    }

    #[test]
    fn test_rejects_bounds_and_noop() {
        let subs = [sub("a", 1, 2), sub("b", 0, 3)];
        assert!(matches!(distribute(&subs, 1, 0), Err(ModelError::SplitTarget { .. })));
        assert!(matches!(distribute(&subs, 1, 5), Err(ModelError::SplitTarget { .. })));
        assert!(matches!(distribute(&subs, 1, 1), Err(ModelError::SplitTarget { .. })));
    }

    #[test]
    fn test_inconsistent_current_reports_capacity() {
        // claims 4 done while the tasks hold nothing
        let subs = [sub("a", 0, 2), sub("b", 0, 3)];
        assert_eq!(
            distribute(&subs, 4, 2).err(),
            Some(ModelError::InsufficientCapacity { remaining: 2 })
        );
    }
}
