use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::error::{Result, ShipyardError};

/// A database target: which dialect to speak and where to connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Backend family.
    pub dialect: Dialect,

    /// Connection string. A URL for the sqlx backends, an ADO.NET string for
    /// SQL Server.
    pub url: String,

    /// Connect (and ping) timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn new(dialect: Dialect, url: impl Into<String>) -> Self {
        Self {
            dialect,
            url: url.into(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Check the target is usable. `environment` names it in errors.
    pub fn validate(&self, environment: &str) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(ShipyardError::Config(format!(
                "Environment '{}' has an empty url",
                environment
            )));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ShipyardError::Config(format!(
                "Environment '{}': connect_timeout_secs must be greater than 0",
                environment
            )));
        }
        Ok(())
    }
}

fn default_connect_timeout() -> u64 {
    30
}
