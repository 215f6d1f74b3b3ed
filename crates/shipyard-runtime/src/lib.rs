pub mod migrations;
pub mod store;

pub use migrations::{MigrationExecutor, MigrationRunner, RunOptions, RunReport, StatusRow};
pub use store::{Store, StoreError, StoreTransaction};
