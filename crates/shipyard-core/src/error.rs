use thiserror::Error;

use crate::dialect::Dialect;
use crate::migration::Direction;

/// Core error type for SHIPYARD operations.
///
/// Every variant is fatal to the current invocation. Nothing is retried and a
/// diverged history is never repaired automatically.
#[derive(Error, Debug)]
pub enum ShipyardError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid migration tag '{tag}': {reason}")]
    InvalidTag { tag: String, reason: String },

    #[error("Duplicate migration tag {tag}: '{existing}' is already registered, cannot register '{name}'")]
    DuplicateTag {
        tag: String,
        name: String,
        existing: String,
    },

    #[error("Failed to connect to {dialect} database: {message}")]
    Connection { dialect: Dialect, message: String },

    #[error("Failed to {action} migration history: {message}")]
    Persistence {
        action: &'static str,
        message: String,
    },

    #[error("Migration history contains corrupt tag '{tag}' (name '{name}'): {reason}")]
    CorruptTag {
        tag: String,
        name: String,
        reason: String,
    },

    #[error(
        "Migration history diverged at position {index}{}: registry declares '{registry}' but history recorded '{history}'",
        planning(.direction)
    )]
    TagMismatch {
        index: usize,
        registry: String,
        history: String,
        /// Set when the divergence was found while planning a run.
        direction: Option<Direction>,
    },

    #[error(
        "Migration history references '{migration}' which is not declared in the registry{}",
        planning(.direction)
    )]
    MissingRegistryTag {
        migration: String,
        direction: Option<Direction>,
    },

    #[error("Migration '{migration}' failed ({direction}) on query `{query}`: {message}")]
    MigrationExecution {
        migration: String,
        direction: Direction,
        query: String,
        message: String,
    },

    #[error("Migration '{migration}' ({direction}) failed to commit: {message}")]
    TransactionCommit {
        migration: String,
        direction: Direction,
        message: String,
    },

    #[error(
        "Migration '{migration}' ({direction}) ran successfully but its history entry could not be recorded: {message}"
    )]
    HistoryRecord {
        migration: String,
        direction: Direction,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn planning(direction: &Option<Direction>) -> String {
    match direction {
        Some(direction) => format!(" (planning {})", direction),
        None => String::new(),
    }
}

/// Result type alias using ShipyardError.
pub type Result<T> = std::result::Result<T, ShipyardError>;
