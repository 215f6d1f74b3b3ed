//! Plan computation: which migrations to run, in which order.

use shipyard_core::error::{Result, ShipyardError};
use shipyard_core::migration::{Direction, HistoryEntry, Migration};

/// Walk registry and history in lockstep and return how many registry
/// entries are applied.
///
/// History must be a prefix of the registry (both sorted by version). Any
/// divergence is an error; nothing is repaired. `direction` is attached to
/// the error when the walk happens on behalf of a run.
pub fn applied_count(
    registry: &[&Migration],
    history: &[HistoryEntry],
    direction: Option<Direction>,
) -> Result<usize> {
    for index in 0..registry.len().max(history.len()) {
        match (registry.get(index), history.get(index)) {
            (Some(migration), Some(entry)) => {
                if migration.tag() != &entry.tag {
                    return Err(ShipyardError::TagMismatch {
                        index,
                        registry: migration.id(),
                        history: entry.id(),
                        direction,
                    });
                }
            }
            (Some(_), None) => return Ok(index),
            (None, Some(entry)) => {
                return Err(ShipyardError::MissingRegistryTag {
                    migration: entry.id(),
                    direction,
                })
            }
            (None, None) => break,
        }
    }

    Ok(history.len())
}

/// The full plan for `direction`; step limits are applied by the executor.
///
/// `up` is every pending migration, ascending. `down` is every applied
/// migration, most recently applied first.
pub fn plan<'r>(
    registry: &[&'r Migration],
    history: &[HistoryEntry],
    direction: Direction,
) -> Result<Vec<&'r Migration>> {
    let applied = applied_count(registry, history, Some(direction))?;

    let plan: Vec<&Migration> = match direction {
        Direction::Up => registry[applied..].to_vec(),
        Direction::Down => registry[..applied].iter().rev().copied().collect(),
    };

    tracing::debug!(
        "Planned {} migration(s) {} ({} applied, {} declared)",
        plan.len(),
        direction,
        applied,
        registry.len()
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shipyard_core::migration::MigrationRegistry;

    fn registry(tags: &[&str]) -> MigrationRegistry {
        let mut registry = MigrationRegistry::new();
        for (i, tag) in tags.iter().enumerate() {
            registry
                .register(Migration::new(tag, format!("m{}", i)).unwrap())
                .unwrap();
        }
        registry
    }

    fn history(tags: &[&str]) -> Vec<HistoryEntry> {
        tags.iter()
            .enumerate()
            .map(|(i, tag)| HistoryEntry::from_row(tag, format!("m{}", i), Utc::now()).unwrap())
            .collect()
    }

    fn tags(plan: &[&Migration]) -> Vec<String> {
        plan.iter().map(|m| m.tag().to_string()).collect()
    }

    #[test]
    fn test_up_against_empty_history_is_whole_registry() {
        let registry = registry(&["0.0.3", "0.0.1", "0.0.2"]);
        let plan = plan(&registry.sorted_all(), &[], Direction::Up).unwrap();
        assert_eq!(tags(&plan), vec!["0.0.1", "0.0.2", "0.0.3"]);
    }

    #[test]
    fn test_up_starts_at_first_pending() {
        let registry = registry(&["0.0.1", "0.0.2", "0.0.3"]);
        let history = history(&["0.0.1"]);
        let plan = plan(&registry.sorted_all(), &history, Direction::Up).unwrap();
        assert_eq!(tags(&plan), vec!["0.0.2", "0.0.3"]);
    }

    #[test]
    fn test_down_reverses_applied_prefix() {
        let registry = registry(&["0.0.1", "0.0.2", "0.0.3"]);
        let history = history(&["0.0.1", "0.0.2"]);
        let plan = plan(&registry.sorted_all(), &history, Direction::Down).unwrap();
        assert_eq!(tags(&plan), vec!["0.0.2", "0.0.1"]);
    }

    #[test]
    fn test_fully_applied() {
        let registry = registry(&["0.0.1", "0.0.2"]);
        let history = history(&["0.0.1", "0.0.2"]);
        let sorted = registry.sorted_all();

        assert!(plan(&sorted, &history, Direction::Up).unwrap().is_empty());
        assert_eq!(
            tags(&plan(&sorted, &history, Direction::Down).unwrap()),
            vec!["0.0.2", "0.0.1"]
        );
    }

    #[test]
    fn test_down_with_empty_history_is_empty() {
        let registry = registry(&["0.0.1"]);
        assert!(plan(&registry.sorted_all(), &[], Direction::Down)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_mismatch_at_same_index() {
        let registry = registry(&["0.0.1", "0.0.3"]);
        let history = history(&["0.0.1", "0.0.2"]);

        for direction in [Direction::Up, Direction::Down] {
            let err = plan(&registry.sorted_all(), &history, direction).unwrap_err();
            match err {
                ShipyardError::TagMismatch {
                    index,
                    registry,
                    history,
                    direction: found,
                } => {
                    assert_eq!(index, 1);
                    assert_eq!(registry, "0.0.3_m1");
                    assert_eq!(history, "0.0.2_m1");
                    assert_eq!(found, Some(direction));
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn test_history_longer_than_registry() {
        let registry = registry(&["0.0.1"]);
        let history = history(&["0.0.1", "0.0.2"]);

        let err = plan(&registry.sorted_all(), &history, Direction::Up).unwrap_err();
        match err {
            ShipyardError::MissingRegistryTag {
                migration,
                direction,
            } => {
                assert_eq!(migration, "0.0.2_m1");
                assert_eq!(direction, Some(Direction::Up));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
