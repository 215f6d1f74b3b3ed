//! One migration invocation, from connection to report.
//!
//! The runner opens a single connection, reconciles the registry with the
//! recorded history and always closes the connection again, whatever the
//! outcome. Only a live run creates the history table; dry runs and status
//! reports leave the database untouched.
//!
//! Runs against one database must be serialized by the caller: no lock is
//! taken.

use std::io::Write;

use tracing::{debug, info, warn};

use shipyard_core::config::DatabaseConfig;
use shipyard_core::error::Result;
use shipyard_core::migration::{HistoryEntry, MigrationRegistry};

use super::executor::{MigrationExecutor, RunOptions, RunReport};
use super::planner;
use super::reporter::{status_report, StatusRow};
use crate::store::Store;

/// Plan and execute against an already open store.
pub async fn migrate(
    store: &mut Store,
    registry: &MigrationRegistry,
    options: &RunOptions,
    out: &mut dyn Write,
) -> Result<RunReport> {
    let history = if options.dry_run {
        read_history(store).await?
    } else {
        // Ensure migration tracking table exists
        store.ensure_history_table().await?;
        store.sorted_history().await?
    };
    debug!("Already applied migrations: {}", history.len());

    let sorted = registry.sorted_all();
    let plan = planner::plan(&sorted, &history, options.direction)?;

    if plan.is_empty() {
        info!("No migrations to run ({})", options.direction);
    }

    MigrationExecutor::new(store).run(&plan, options, out).await
}

/// Status rows for an already open store.
pub async fn status(store: &mut Store, registry: &MigrationRegistry) -> Result<Vec<StatusRow>> {
    let history = read_history(store).await?;
    status_report(&registry.sorted_all(), &history)
}

/// Sorted history without creating anything: a missing table means nothing
/// has been applied yet.
async fn read_history(store: &mut Store) -> Result<Vec<HistoryEntry>> {
    if !store.history_table_exists().await? {
        debug!("History table does not exist yet");
        return Ok(Vec::new());
    }
    store.sorted_history().await
}

/// Migration runner bound to a registry and a target database.
pub struct MigrationRunner<'r> {
    registry: &'r MigrationRegistry,
    database: DatabaseConfig,
}

impl<'r> MigrationRunner<'r> {
    pub fn new(registry: &'r MigrationRegistry, database: DatabaseConfig) -> Self {
        Self { registry, database }
    }

    /// Run the plan for `options`, writing progress lines to `out`.
    pub async fn run(&self, options: &RunOptions, out: &mut dyn Write) -> Result<RunReport> {
        let mut store = Store::open(&self.database).await?;

        let result = migrate(&mut store, self.registry, options, out).await;

        // Always release the connection, even on error
        close(store).await;

        result
    }

    /// Report applied and pending migrations.
    pub async fn status(&self) -> Result<Vec<StatusRow>> {
        let mut store = Store::open(&self.database).await?;

        let result = status(&mut store, self.registry).await;

        close(store).await;

        result
    }
}

async fn close(store: Store) {
    let dialect = store.dialect();
    if let Err(e) = store.close().await {
        warn!("Failed to close {} connection: {}", dialect, e);
    }
}
