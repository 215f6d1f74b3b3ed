mod executor;
pub mod planner;
mod reporter;
mod runner;

pub use executor::{print_plan, MigrationExecutor, RunOptions, RunReport};
pub use reporter::{status_report, StatusRow};
pub use runner::{migrate, status, MigrationRunner};
