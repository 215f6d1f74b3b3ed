//! Migration files on disk.
//!
//! Each migration is one TOML file named `<tag>_<name>.toml` holding its
//! `[[up]]` and `[[down]]` operations:
//!
//! ```toml
//! [[up]]
//! query = "CREATE TABLE users (id INTEGER PRIMARY KEY)"
//!
//! [[down]]
//! query = "DROP TABLE users"
//! ```

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use shipyard_core::error::{Result, ShipyardError};
use shipyard_core::migration::{Migration, MigrationRegistry, Operation};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MigrationFile {
    #[serde(default)]
    up: Vec<Operation>,
    #[serde(default)]
    down: Vec<Operation>,
}

/// Parse one migration file. Tag and name come from the file stem.
pub fn load_migration_file(path: &Path) -> Result<Migration> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ShipyardError::Config(format!("Invalid migration filename: {:?}", path)))?;

    let (tag, name) = stem.split_once('_').ok_or_else(|| {
        ShipyardError::Config(format!(
            "Migration file {:?} must be named <tag>_<name>.toml",
            path
        ))
    })?;

    let content = std::fs::read_to_string(path)?;
    let file: MigrationFile = toml::from_str(&content).map_err(|e| {
        ShipyardError::Config(format!("Failed to parse migration {:?}: {}", path, e))
    })?;

    let migration = Migration::new(tag, name).map_err(|e| {
        ShipyardError::Config(format!("Migration file {:?}: {}", path, e))
    })?;

    let migration = file
        .up
        .into_iter()
        .fold(migration, |m, op| m.up_operation(op));
    Ok(file
        .down
        .into_iter()
        .fold(migration, |m, op| m.down_operation(op)))
}

/// Register every `*.toml` migration in `dir`.
///
/// A missing directory registers nothing. Files are read in name order so
/// duplicate-tag errors are reported deterministically.
pub fn load_migrations_from_dir(dir: &Path, registry: &mut MigrationRegistry) -> Result<usize> {
    if !dir.exists() {
        debug!("Migrations directory does not exist: {:?}", dir);
        return Ok(0);
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().map(|e| e == "toml").unwrap_or(false) {
            paths.push(path);
        }
    }
    paths.sort();

    for path in &paths {
        registry.register(load_migration_file(path)?)?;
    }

    debug!("Loaded {} migrations from {:?}", paths.len(), dir);
    Ok(paths.len())
}
