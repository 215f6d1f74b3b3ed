use std::fmt;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::Serialize;

use shipyard_core::error::Result;
use shipyard_core::migration::{HistoryEntry, Migration};

use super::planner::applied_count;

/// One line of the status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRow {
    pub tag: Version,
    pub name: String,
    /// `None` while the migration is pending.
    pub applied_at: Option<DateTime<Utc>>,
}

impl StatusRow {
    pub fn is_pending(&self) -> bool {
        self.applied_at.is_none()
    }

    /// Applied timestamp, or `pending`.
    pub fn state(&self) -> String {
        match self.applied_at {
            Some(at) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => "pending".to_string(),
        }
    }
}

impl fmt::Display for StatusRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}", self.tag, self.name, self.state())
    }
}

/// Full outer join of declared and applied migrations, ascending by version.
///
/// Fails on the same divergences the planner rejects.
pub fn status_report(registry: &[&Migration], history: &[HistoryEntry]) -> Result<Vec<StatusRow>> {
    let applied = applied_count(registry, history, None)?;

    Ok(registry
        .iter()
        .enumerate()
        .map(|(index, migration)| StatusRow {
            tag: migration.tag().clone(),
            name: migration.name().to_string(),
            applied_at: (index < applied).then(|| history[index].applied_at),
        })
        .collect())
}
