pub mod config;
pub mod dialect;
pub mod error;
pub mod migration;

pub use config::{DatabaseConfig, LoggingConfig, ShipyardConfig};
pub use dialect::Dialect;
pub use error::{Result, ShipyardError};
pub use migration::{Direction, HistoryEntry, Migration, MigrationRegistry, Operation};
