//! SHIPYARD embedding API.
//!
//! Applications that declare migrations in code build a [`Shipyard`] with
//! their registry and configuration, then run it against any configured
//! environment.

use std::io::Write;
use std::path::PathBuf;

use shipyard_core::config::ShipyardConfig;
use shipyard_core::error::{Result, ShipyardError};
use shipyard_core::migration::{Migration, MigrationRegistry};
use shipyard_runtime::migrations::{MigrationRunner, RunOptions, RunReport, StatusRow};

use crate::loader::load_migrations_from_dir;

/// Prelude module for common imports.
pub mod prelude {
    pub use shipyard_core::config::{DatabaseConfig, ShipyardConfig};
    pub use shipyard_core::dialect::Dialect;
    pub use shipyard_core::error::{Result, ShipyardError};
    pub use shipyard_core::migration::{Direction, Migration, MigrationRegistry, Operation};
    pub use shipyard_runtime::migrations::{RunOptions, RunReport, StatusRow};

    pub use crate::{Shipyard, ShipyardBuilder};
}

/// A configured migration engine.
pub struct Shipyard {
    config: ShipyardConfig,
    registry: MigrationRegistry,
}

impl Shipyard {
    /// Create a new builder for configuring SHIPYARD.
    pub fn builder() -> ShipyardBuilder {
        ShipyardBuilder::new()
    }

    /// Get the configuration.
    pub fn config(&self) -> &ShipyardConfig {
        &self.config
    }

    /// Get the migration registry.
    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    /// Apply or roll back migrations on `environment` (or the default one).
    pub async fn migrate(
        &self,
        environment: Option<&str>,
        options: &RunOptions,
        out: &mut dyn Write,
    ) -> Result<RunReport> {
        let database = self.config.environment(environment)?.clone();
        MigrationRunner::new(&self.registry, database)
            .run(options, out)
            .await
    }

    /// Applied and pending migrations on `environment` (or the default one).
    pub async fn status(&self, environment: Option<&str>) -> Result<Vec<StatusRow>> {
        let database = self.config.environment(environment)?.clone();
        MigrationRunner::new(&self.registry, database)
            .status()
            .await
    }
}

/// Builder for [`Shipyard`].
pub struct ShipyardBuilder {
    config: Option<ShipyardConfig>,
    migrations_dir: Option<PathBuf>,
    registry: MigrationRegistry,
}

impl ShipyardBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: None,
            migrations_dir: None,
            registry: MigrationRegistry::new(),
        }
    }

    /// Also load `<tag>_<name>.toml` migration files from this directory.
    pub fn migrations_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.migrations_dir = Some(path.into());
        self
    }

    /// Register a migration declared in code. Duplicate tags fail here.
    pub fn migration(mut self, migration: Migration) -> Result<Self> {
        self.registry.register(migration)?;
        Ok(self)
    }

    /// Set the configuration.
    pub fn config(mut self, config: ShipyardConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the engine, loading migration files if a directory was set.
    pub fn build(self) -> Result<Shipyard> {
        let config = self
            .config
            .ok_or_else(|| ShipyardError::Config("Configuration is required".to_string()))?;

        let mut registry = self.registry;
        if let Some(dir) = &self.migrations_dir {
            load_migrations_from_dir(dir, &mut registry)?;
        }

        Ok(Shipyard { config, registry })
    }
}

impl Default for ShipyardBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_core::dialect::Dialect;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> ShipyardConfig {
        let url = format!("sqlite://{}", dir.path().join("app.db").display());
        ShipyardConfig::default_with_database(Dialect::Sqlite, &url)
    }

    #[test]
    fn test_build_requires_config() {
        assert!(matches!(
            Shipyard::builder().build(),
            Err(ShipyardError::Config(_))
        ));
    }

    #[test]
    fn test_duplicate_between_code_and_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("0.0.1_files.toml"),
            "[[up]]\nquery = \"SELECT 1\"\n",
        )
        .unwrap();

        let result = Shipyard::builder()
            .config(config(&dir))
            .migration(Migration::new("0.0.1", "code").unwrap())
            .unwrap()
            .migrations_dir(dir.path())
            .build();

        assert!(matches!(result, Err(ShipyardError::DuplicateTag { .. })));
    }

    #[tokio::test]
    async fn test_migrate_and_status() {
        let dir = TempDir::new().unwrap();
        let shipyard = Shipyard::builder()
            .config(config(&dir))
            .migration(
                Migration::new("1.0.0", "users")
                    .unwrap()
                    .up("CREATE TABLE users (id INTEGER)")
                    .down("DROP TABLE users"),
            )
            .unwrap()
            .build()
            .unwrap();

        let mut out = Vec::new();
        let report = shipyard
            .migrate(None, &RunOptions::up(), &mut out)
            .await
            .unwrap();
        assert_eq!(report.migrations, vec!["1.0.0_users"]);

        let rows = shipyard.status(None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].is_pending());

        assert!(matches!(
            shipyard.status(Some("prod")).await,
            Err(ShipyardError::Config(_))
        ));
    }
}
