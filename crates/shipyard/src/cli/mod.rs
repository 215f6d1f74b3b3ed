mod migrate;

pub use migrate::MigrateCommand;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// SHIPYARD - versioned schema migrations
#[derive(Parser)]
#[command(name = "shipyard")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Manage database migrations.
    Migrate(MigrateCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Migrate(cmd) => cmd.execute().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_up() {
        let cli = Cli::try_parse_from(["shipyard", "migrate", "up"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_cli_parse_down_with_steps() {
        let cli = Cli::try_parse_from([
            "shipyard", "migrate", "-e", "staging", "down", "-n", "2", "--dry-run",
        ]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_cli_rejects_negative_steps() {
        let cli = Cli::try_parse_from(["shipyard", "migrate", "up", "-n", "-1"]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["shipyard", "migrate"]).is_err());
    }
}
