//! SQL dialects supported by the history store.
//!
//! Each dialect owns the quoting and placeholder rules used to build the
//! statements that maintain the history table. The set is closed: adding a
//! backend means adding a variant here and a connection arm in the runtime.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShipyardError};

/// Name of the table recording applied migrations.
pub const HISTORY_TABLE: &str = "shipyard_migrations";

/// Primary key column holding the migration tag.
pub const TAG_COLUMN: &str = "tag";

/// Column holding the migration name.
pub const NAME_COLUMN: &str = "name";

/// Column holding the time the migration was applied.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Relational backend family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[serde(alias = "postgresql", alias = "pg")]
    Postgres,
    #[serde(alias = "mariadb")]
    Mysql,
    #[serde(alias = "sqlite3")]
    Sqlite,
    #[serde(alias = "mssql")]
    Sqlserver,
}

impl Dialect {
    /// All supported dialects.
    pub const ALL: [Dialect; 4] = [
        Dialect::Postgres,
        Dialect::Mysql,
        Dialect::Sqlite,
        Dialect::Sqlserver,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
            Self::Sqlite => "sqlite",
            Self::Sqlserver => "sqlserver",
        }
    }

    /// Quote an identifier, doubling any embedded closing quote.
    pub fn quote_identifier(&self, ident: &str) -> String {
        match self {
            Self::Postgres | Self::Sqlite => format!("\"{}\"", ident.replace('"', "\"\"")),
            Self::Mysql => format!("`{}`", ident.replace('`', "``")),
            Self::Sqlserver => format!("[{}]", ident.replace(']', "]]")),
        }
    }

    /// Bind parameter marker for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Self::Postgres => format!("${}", index),
            Self::Mysql | Self::Sqlite => "?".to_string(),
            Self::Sqlserver => format!("@P{}", index),
        }
    }

    fn table(&self) -> String {
        self.quote_identifier(HISTORY_TABLE)
    }

    fn columns(&self) -> (String, String, String) {
        (
            self.quote_identifier(TAG_COLUMN),
            self.quote_identifier(NAME_COLUMN),
            self.quote_identifier(TIMESTAMP_COLUMN),
        )
    }

    /// DDL creating the history table when it does not exist yet.
    pub fn create_history_table_sql(&self) -> String {
        let table = self.table();
        let (tag, name, timestamp) = self.columns();

        match self {
            Self::Postgres => format!(
                "CREATE TABLE IF NOT EXISTS {table} (\n    \
                    {tag} VARCHAR(255) PRIMARY KEY,\n    \
                    {name} VARCHAR(255) NOT NULL,\n    \
                    {timestamp} TIMESTAMPTZ NOT NULL\n\
                )"
            ),
            Self::Mysql => format!(
                "CREATE TABLE IF NOT EXISTS {table} (\n    \
                    {tag} VARCHAR(255) NOT NULL PRIMARY KEY,\n    \
                    {name} VARCHAR(255) NOT NULL,\n    \
                    {timestamp} DATETIME(6) NOT NULL\n\
                )"
            ),
            Self::Sqlite => format!(
                "CREATE TABLE IF NOT EXISTS {table} (\n    \
                    {tag} TEXT NOT NULL PRIMARY KEY,\n    \
                    {name} TEXT NOT NULL,\n    \
                    {timestamp} TIMESTAMP NOT NULL\n\
                )"
            ),
            Self::Sqlserver => format!(
                "IF OBJECT_ID(N'{HISTORY_TABLE}', N'U') IS NULL\n\
                CREATE TABLE {table} (\n    \
                    {tag} NVARCHAR(255) NOT NULL PRIMARY KEY,\n    \
                    {name} NVARCHAR(255) NOT NULL,\n    \
                    {timestamp} DATETIME2 NOT NULL\n\
                )"
            ),
        }
    }

    /// Count of history tables visible on the connection: `0` or `1`.
    ///
    /// Lets read-only callers find out whether the table exists without
    /// creating it.
    pub fn history_table_exists_sql(&self) -> String {
        match self {
            Self::Postgres => format!(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = '{HISTORY_TABLE}'"
            ),
            Self::Mysql => format!(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_name = '{HISTORY_TABLE}'"
            ),
            Self::Sqlite => format!(
                "SELECT COUNT(*) FROM sqlite_master \
                 WHERE type = 'table' AND name = '{HISTORY_TABLE}'"
            ),
            Self::Sqlserver => format!(
                "SELECT COUNT_BIG(*) FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_NAME = '{HISTORY_TABLE}'"
            ),
        }
    }

    /// Insert one history row, binding tag, name and timestamp in that order.
    pub fn insert_history_sql(&self) -> String {
        let (tag, name, timestamp) = self.columns();
        format!(
            "INSERT INTO {} ({}, {}, {}) VALUES ({}, {}, {})",
            self.table(),
            tag,
            name,
            timestamp,
            self.placeholder(1),
            self.placeholder(2),
            self.placeholder(3)
        )
    }

    /// Delete the history row for one tag.
    pub fn delete_history_sql(&self) -> String {
        let (tag, _, _) = self.columns();
        format!(
            "DELETE FROM {} WHERE {} = {}",
            self.table(),
            tag,
            self.placeholder(1)
        )
    }

    /// Select every history row. Ordering is done after parsing the tags.
    pub fn select_history_sql(&self) -> String {
        let (tag, name, timestamp) = self.columns();
        format!("SELECT {}, {}, {} FROM {}", tag, name, timestamp, self.table())
    }

    /// Select the history row for one tag.
    pub fn select_history_entry_sql(&self) -> String {
        let (tag, _, _) = self.columns();
        format!(
            "{} WHERE {} = {}",
            self.select_history_sql(),
            tag,
            self.placeholder(1)
        )
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = ShipyardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::Mysql),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "sqlserver" | "mssql" => Ok(Self::Sqlserver),
            other => Err(ShipyardError::Config(format!(
                "Unknown dialect '{}' (expected postgres, mysql, sqlite or sqlserver)",
                other
            ))),
        }
    }
}
