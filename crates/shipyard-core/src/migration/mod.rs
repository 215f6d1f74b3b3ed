//! Declared migrations and their persisted history.

mod registry;

pub use registry::MigrationRegistry;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShipyardError};

/// Direction a plan is executed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = ShipyardError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            other => Err(ShipyardError::Config(format!(
                "Unknown direction '{}' (expected up or down)",
                other
            ))),
        }
    }
}

/// Parse a migration tag as a semantic version. A leading `v` is accepted.
///
/// Build metadata is rejected: it carries no precedence, so `1.0.0+a` and
/// `1.0.0+b` would otherwise be two different tags at the same position.
pub fn parse_tag(tag: &str) -> Result<Version> {
    let trimmed = tag.trim();
    let raw = trimmed.strip_prefix('v').unwrap_or(trimmed);
    let version = Version::parse(raw).map_err(|e| ShipyardError::InvalidTag {
        tag: tag.to_string(),
        reason: e.to_string(),
    })?;

    if !version.build.is_empty() {
        return Err(ShipyardError::InvalidTag {
            tag: tag.to_string(),
            reason: format!("build metadata '+{}' is not allowed", version.build),
        });
    }
    Ok(version)
}

/// The smallest unit of execution inside a migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Operation {
    /// SQL text, executed verbatim.
    pub query: String,

    /// Run directly on the connection instead of inside a transaction.
    #[serde(default)]
    pub disable_transaction: bool,
}

impl Operation {
    /// A transactional operation.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            disable_transaction: false,
        }
    }

    /// An operation that must run outside a transaction
    /// (e.g. `CREATE INDEX CONCURRENTLY`).
    pub fn without_transaction(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            disable_transaction: true,
        }
    }
}

/// A declared, version-tagged unit of forward and backward change.
///
/// Fields are private: once built and registered a migration cannot change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    tag: Version,
    name: String,
    up: Vec<Operation>,
    down: Vec<Operation>,
}

impl Migration {
    /// Create a migration with no operations.
    pub fn new(tag: &str, name: impl Into<String>) -> Result<Self> {
        Ok(Self::with_version(parse_tag(tag)?, name))
    }

    /// Create a migration from an already parsed version.
    pub fn with_version(tag: Version, name: impl Into<String>) -> Self {
        Self {
            tag,
            name: name.into(),
            up: Vec::new(),
            down: Vec::new(),
        }
    }

    /// Append a transactional `up` query.
    pub fn up(mut self, query: impl Into<String>) -> Self {
        self.up.push(Operation::new(query));
        self
    }

    /// Append a transactional `down` query.
    pub fn down(mut self, query: impl Into<String>) -> Self {
        self.down.push(Operation::new(query));
        self
    }

    /// Append an `up` operation.
    pub fn up_operation(mut self, operation: Operation) -> Self {
        self.up.push(operation);
        self
    }

    /// Append a `down` operation.
    pub fn down_operation(mut self, operation: Operation) -> Self {
        self.down.push(operation);
        self
    }

    pub fn tag(&self) -> &Version {
        &self.tag
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier used in output and errors: `<tag>_<name>`.
    pub fn id(&self) -> String {
        format!("{}_{}", self.tag, self.name)
    }

    /// Operations for the given direction, in execution order.
    pub fn operations(&self, direction: Direction) -> &[Operation] {
        match direction {
            Direction::Up => &self.up,
            Direction::Down => &self.down,
        }
    }
}

/// A persisted record that a migration's `up` operations were applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub tag: Version,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// A fresh entry for `migration`, stamped now.
    pub fn for_migration(migration: &Migration) -> Self {
        Self {
            tag: migration.tag().clone(),
            name: migration.name().to_string(),
            applied_at: Utc::now(),
        }
    }

    /// Decode a stored row. An unparsable tag is corruption, not a pending row.
    pub fn from_row(tag: &str, name: String, applied_at: DateTime<Utc>) -> Result<Self> {
        let version = parse_tag(tag).map_err(|e| match e {
            ShipyardError::InvalidTag { reason, .. } => ShipyardError::CorruptTag {
                tag: tag.to_string(),
                name: name.clone(),
                reason,
            },
            other => other,
        })?;

        Ok(Self {
            tag: version,
            name,
            applied_at,
        })
    }

    pub fn id(&self) -> String {
        format!("{}_{}", self.tag, self.name)
    }
}

/// Sort history entries by version into a new vector.
pub fn sort_history(entries: impl IntoIterator<Item = HistoryEntry>) -> Vec<HistoryEntry> {
    let mut sorted: Vec<HistoryEntry> = entries.into_iter().collect();
    sorted.sort_by(|a, b| a.tag.cmp(&b.tag));
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tag_accepts_v_prefix() {
        assert_eq!(parse_tag("v1.2.3").unwrap(), Version::new(1, 2, 3));
        assert_eq!(parse_tag("0.0.1").unwrap(), Version::new(0, 0, 1));
        assert!(matches!(
            parse_tag("first"),
            Err(ShipyardError::InvalidTag { .. })
        ));
    }

    #[test]
    fn test_parse_tag_rejects_build_metadata() {
        assert!(matches!(
            parse_tag("1.0.0+build.5"),
            Err(ShipyardError::InvalidTag { .. })
        ));
        assert!(matches!(
            HistoryEntry::from_row("1.0.0+a", "meta".into(), Utc::now()),
            Err(ShipyardError::CorruptTag { .. })
        ));
        assert!(parse_tag("1.0.0-rc.1").is_ok());
    }

    #[test]
    fn test_migration_builder() {
        let m = Migration::new("0.0.1", "create")
            .unwrap()
            .up("CREATE TABLE users (id INTEGER)")
            .up_operation(Operation::without_transaction("CREATE INDEX idx ON users (id)"))
            .down("DROP TABLE users");

        assert_eq!(m.id(), "0.0.1_create");
        assert_eq!(m.operations(Direction::Up).len(), 2);
        assert!(m.operations(Direction::Up)[1].disable_transaction);
        assert_eq!(m.operations(Direction::Down)[0].query, "DROP TABLE users");
    }

    #[test]
    fn test_history_entry_corrupt_tag() {
        let err = HistoryEntry::from_row("not-a-version", "broken".into(), Utc::now()).unwrap_err();
        match err {
            ShipyardError::CorruptTag { tag, name, .. } => {
                assert_eq!(tag, "not-a-version");
                assert_eq!(name, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_sort_history_uses_semver_not_text() {
        let now = Utc::now();
        let entries = vec![
            HistoryEntry::from_row("0.10.0", "ten".into(), now).unwrap(),
            HistoryEntry::from_row("0.2.0", "two".into(), now).unwrap(),
            HistoryEntry::from_row("0.9.1", "nine".into(), now).unwrap(),
        ];

        let sorted = sort_history(entries);
        let names: Vec<_> = sorted.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["two", "nine", "ten"]);
    }

    #[test]
    fn test_operation_deserialize_defaults() {
        let op: Operation = toml::from_str(r#"query = "SELECT 1""#).unwrap();
        assert!(!op.disable_transaction);

        let typo = toml::from_str::<Operation>(
            "query = \"SELECT 1\"\ndisable_transacton = true",
        );
        assert!(typo.is_err());
    }
}
