use std::io::Write;

use tracing::{debug, info, warn};

use shipyard_core::error::{Result, ShipyardError};
use shipyard_core::migration::{Direction, HistoryEntry, Migration, Operation};

use crate::store::{Store, StoreError};

/// How a plan should be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub direction: Direction,
    /// Number of plan entries to process; `0` means all of them.
    pub step_limit: usize,
    /// Print the plan instead of executing it.
    pub dry_run: bool,
}

impl RunOptions {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            step_limit: 0,
            dry_run: false,
        }
    }

    pub fn up() -> Self {
        Self::new(Direction::Up)
    }

    pub fn down() -> Self {
        Self::new(Direction::Down)
    }

    pub fn steps(mut self, step_limit: usize) -> Self {
        self.step_limit = step_limit;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// The leading part of `plan` this run will touch.
    pub fn limit<'p, T>(&self, plan: &'p [T]) -> &'p [T] {
        if self.step_limit == 0 || self.step_limit >= plan.len() {
            plan
        } else {
            &plan[..self.step_limit]
        }
    }
}

/// What a run processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub direction: Direction,
    pub dry_run: bool,
    /// `<tag>_<name>` of each processed migration, in order.
    pub migrations: Vec<String>,
}

impl RunReport {
    fn new(options: &RunOptions) -> Self {
        Self {
            direction: options.direction,
            dry_run: options.dry_run,
            migrations: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

/// Print the plan without touching the database.
///
/// One header line per migration followed by each query terminated with `;`.
pub fn print_plan(
    plan: &[&Migration],
    options: &RunOptions,
    out: &mut dyn Write,
) -> Result<RunReport> {
    let mut report = RunReport::new(options);

    for migration in options.limit(plan) {
        writeln!(
            out,
            "==> migration \"{}\" ({})",
            migration.id(),
            options.direction
        )?;
        for operation in migration.operations(options.direction) {
            writeln!(out, "{};", operation.query)?;
        }
        report.migrations.push(migration.id());
    }

    Ok(report)
}

/// Consecutive operations that share one execution mode.
enum Segment<'m> {
    Transactional(Vec<&'m Operation>),
    Direct(&'m Operation),
}

/// Group a migration's operations: consecutive transactional operations run
/// in one transaction, each non-transactional one runs alone.
fn segments(operations: &[Operation]) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut batch: Vec<&Operation> = Vec::new();

    for operation in operations {
        if operation.disable_transaction {
            if !batch.is_empty() {
                segments.push(Segment::Transactional(std::mem::take(&mut batch)));
            }
            segments.push(Segment::Direct(operation));
        } else {
            batch.push(operation);
        }
    }
    if !batch.is_empty() {
        segments.push(Segment::Transactional(batch));
    }

    segments
}

/// Executes migration plans against a store.
pub struct MigrationExecutor<'s> {
    store: &'s mut Store,
}

impl<'s> MigrationExecutor<'s> {
    /// Create a new migration executor.
    pub fn new(store: &'s mut Store) -> Self {
        Self { store }
    }

    /// Run the first `step_limit` entries of `plan`.
    ///
    /// Stops at the first failure; migrations already processed stay
    /// applied (or removed).
    pub async fn run(
        &mut self,
        plan: &[&Migration],
        options: &RunOptions,
        out: &mut dyn Write,
    ) -> Result<RunReport> {
        if options.dry_run {
            return print_plan(plan, options, out);
        }

        let mut report = RunReport::new(options);
        let verb = match options.direction {
            Direction::Up => "applied",
            Direction::Down => "removed",
        };

        for migration in options.limit(plan) {
            self.execute(migration, options.direction).await?;
            writeln!(
                out,
                "migration \"{}\" successfully {} ({})",
                migration.id(),
                verb,
                options.direction
            )?;
            report.migrations.push(migration.id());
        }

        Ok(report)
    }

    /// Run one migration's operations, then update its history entry.
    async fn execute(&mut self, migration: &Migration, direction: Direction) -> Result<()> {
        let start = std::time::Instant::now();
        info!("Running migration {} ({})", migration.id(), direction);

        for segment in segments(migration.operations(direction)) {
            match segment {
                Segment::Transactional(operations) => {
                    self.execute_in_transaction(migration, direction, &operations)
                        .await?
                }
                Segment::Direct(operation) => {
                    debug!("{} (no transaction): {}", migration.id(), operation.query);
                    self.store.exec(&operation.query).await.map_err(|e| {
                        execution_error(migration, direction, &operation.query, e)
                    })?;
                }
            }
        }

        let recorded = match direction {
            Direction::Up => {
                self.store
                    .insert_history_entry(&HistoryEntry::for_migration(migration))
                    .await
            }
            Direction::Down => self.store.delete_history_entry(migration.tag()).await,
        };
        recorded.map_err(|e| ShipyardError::HistoryRecord {
            migration: migration.id(),
            direction,
            message: e.to_string(),
        })?;

        info!(
            "Migration {} ({}) done in {}ms",
            migration.id(),
            direction,
            start.elapsed().as_millis()
        );
        Ok(())
    }

    async fn execute_in_transaction(
        &mut self,
        migration: &Migration,
        direction: Direction,
        operations: &[&Operation],
    ) -> Result<()> {
        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|e| execution_error(migration, direction, "BEGIN TRANSACTION", e))?;

        for operation in operations {
            debug!("{}: {}", migration.id(), operation.query);
            if let Err(e) = tx.exec(&operation.query).await {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(
                        "Failed to roll back migration {}: {}",
                        migration.id(),
                        rollback_err
                    );
                }
                return Err(execution_error(migration, direction, &operation.query, e));
            }
        }

        tx.commit()
            .await
            .map_err(|e| ShipyardError::TransactionCommit {
                migration: migration.id(),
                direction,
                message: e.to_string(),
            })
    }
}

fn execution_error(
    migration: &Migration,
    direction: Direction,
    query: &str,
    err: StoreError,
) -> ShipyardError {
    ShipyardError::MigrationExecution {
        migration: migration.id(),
        direction,
        query: query.to_string(),
        message: err.to_string(),
    }
}
