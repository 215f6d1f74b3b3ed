//! SHIPYARD - versioned schema migrations
//!
//! Declares ordered, semver-tagged migrations, plans them against the
//! history table of a Postgres, MySQL, SQLite or SQL Server database and
//! applies or rolls them back in order.

pub mod cli;
pub mod loader;
pub mod logging;
mod runtime;

#[doc(hidden)]
pub use shipyard_core;
#[doc(hidden)]
pub use shipyard_runtime;

pub use runtime::prelude;
pub use runtime::{Shipyard, ShipyardBuilder};
