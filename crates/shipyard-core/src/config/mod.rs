mod database;
mod logging;

pub use database::DatabaseConfig;
pub use logging::LoggingConfig;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;
use crate::error::{Result, ShipyardError};

/// Root configuration for SHIPYARD, usually read from `shipyard.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipyardConfig {
    /// Environment used when none is selected explicitly.
    #[serde(default)]
    pub default_environment: Option<String>,

    /// Project metadata.
    #[serde(default)]
    pub project: ProjectConfig,

    /// Where migration files live.
    #[serde(default)]
    pub migrations: MigrationsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Named database targets.
    #[serde(default)]
    pub environments: BTreeMap<String, DatabaseConfig>,
}

impl ShipyardConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ShipyardError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        // Substitute environment variables
        let content = substitute_env_vars(content);

        let config: Self = toml::from_str(&content)
            .map_err(|e| ShipyardError::Config(format!("Failed to parse config: {}", e)))?;

        for (name, database) in &config.environments {
            database.validate(name)?;
        }
        Ok(config)
    }

    /// Configuration with a single `default` environment.
    pub fn default_with_database(dialect: Dialect, url: &str) -> Self {
        let mut environments = BTreeMap::new();
        environments.insert("default".to_string(), DatabaseConfig::new(dialect, url));

        Self {
            default_environment: Some("default".to_string()),
            project: ProjectConfig::default(),
            migrations: MigrationsConfig::default(),
            logging: LoggingConfig::default(),
            environments,
        }
    }

    /// Resolve the target database.
    ///
    /// An explicit name wins, then `default_environment`, then the only
    /// environment if exactly one is declared.
    pub fn environment(&self, name: Option<&str>) -> Result<&DatabaseConfig> {
        let name = match name.or(self.default_environment.as_deref()) {
            Some(name) => name,
            None if self.environments.len() == 1 => {
                return self
                    .environments
                    .values()
                    .next()
                    .ok_or_else(|| ShipyardError::Config("No environments configured".into()));
            }
            None => {
                return Err(ShipyardError::Config(format!(
                    "No environment selected and no default_environment set (available: {})",
                    self.environment_names()
                )))
            }
        };

        self.environments.get(name).ok_or_else(|| {
            ShipyardError::Config(format!(
                "Unknown environment '{}' (available: {})",
                name,
                self.environment_names()
            ))
        })
    }

    fn environment_names(&self) -> String {
        if self.environments.is_empty() {
            return "none".to_string();
        }
        self.environments
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Project metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name.
    #[serde(default = "default_project_name")]
    pub name: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: default_project_name(),
        }
    }
}

fn default_project_name() -> String {
    "shipyard-app".to_string()
}

/// Migration source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationsConfig {
    /// Directory holding `<tag>_<name>.toml` migration files.
    #[serde(default = "default_migrations_dir")]
    pub dir: PathBuf,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: default_migrations_dir(),
        }
    }
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

static ENV_VAR_PATTERN: LazyLock<regex_lite::Regex> = LazyLock::new(|| {
    regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("env var pattern is valid")
});

/// Substitute environment variables in the format ${VAR_NAME}.
/// Unset variables are left as written.
fn substitute_env_vars(content: &str) -> String {
    let mut result = content.to_string();

    for cap in ENV_VAR_PATTERN.captures_iter(content) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}
