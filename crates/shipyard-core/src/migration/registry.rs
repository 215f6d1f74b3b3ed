use std::collections::BTreeMap;

use semver::Version;

use super::Migration;
use crate::error::{Result, ShipyardError};

/// Every migration declared by the embedding application.
///
/// Keyed by tag, so iteration order is semantic version order regardless of
/// the order migrations were registered in.
#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    migrations: BTreeMap<Version, Migration>,
}

impl MigrationRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            migrations: BTreeMap::new(),
        }
    }

    /// Register a migration. Fails if its tag is already taken.
    pub fn register(&mut self, migration: Migration) -> Result<()> {
        if let Some(existing) = self.migrations.get(migration.tag()) {
            return Err(ShipyardError::DuplicateTag {
                tag: migration.tag().to_string(),
                name: migration.name().to_string(),
                existing: existing.name().to_string(),
            });
        }

        tracing::debug!("Registered migration {}", migration.id());
        self.migrations.insert(migration.tag().clone(), migration);
        Ok(())
    }

    /// All migrations in ascending version order.
    pub fn sorted_all(&self) -> Vec<&Migration> {
        self.migrations.values().collect()
    }

    /// Get a migration by tag.
    pub fn get(&self, tag: &Version) -> Option<&Migration> {
        self.migrations.get(tag)
    }

    /// Get the number of registered migrations.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}
