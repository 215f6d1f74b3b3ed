use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use console::style;

use shipyard_core::config::ShipyardConfig;
use shipyard_core::migration::Direction;
use shipyard_runtime::migrations::{RunOptions, StatusRow};

use crate::logging::init_tracing;
use crate::runtime::Shipyard;

/// Manage database migrations.
#[derive(Parser)]
pub struct MigrateCommand {
    #[command(subcommand)]
    pub action: MigrateAction,

    /// Configuration file path.
    #[arg(short, long, default_value = "shipyard.toml", global = true)]
    pub config: String,

    /// Migrations directory path (overrides config).
    #[arg(short, long, global = true)]
    pub migrations_dir: Option<PathBuf>,

    /// Target environment (defaults to `default_environment`).
    #[arg(short, long, global = true)]
    pub env: Option<String>,
}

#[derive(Subcommand)]
pub enum MigrateAction {
    /// Apply pending migrations.
    Up(StepArgs),

    /// Roll back applied migrations, most recent first.
    Down(StepArgs),

    /// Show applied and pending migrations.
    Status {
        /// Print rows as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
pub struct StepArgs {
    /// Number of migrations to process (0 = all).
    #[arg(short = 'n', long, default_value = "0")]
    pub steps: usize,

    /// Print the queries instead of running them.
    #[arg(long)]
    pub dry_run: bool,
}

impl MigrateCommand {
    pub async fn execute(self) -> Result<()> {
        // Load .env if present
        dotenvy::dotenv().ok();

        let config_path = Path::new(&self.config);
        if !config_path.exists() {
            anyhow::bail!("Configuration file not found: {}", self.config);
        }

        let config = ShipyardConfig::from_file(config_path)?;
        init_tracing(&config.logging);

        let migrations_dir = self
            .migrations_dir
            .clone()
            .unwrap_or_else(|| config.migrations.dir.clone());

        let shipyard = Shipyard::builder()
            .config(config)
            .migrations_dir(&migrations_dir)
            .build()?;

        let environment = self.env.as_deref();

        match self.action {
            MigrateAction::Up(args) => run(&shipyard, environment, Direction::Up, args).await,
            MigrateAction::Down(args) => run(&shipyard, environment, Direction::Down, args).await,
            MigrateAction::Status { json } => {
                let rows = shipyard.status(environment).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                } else {
                    print!("{}", render_status(&rows));
                }
                Ok(())
            }
        }
    }
}

async fn run(
    shipyard: &Shipyard,
    environment: Option<&str>,
    direction: Direction,
    args: StepArgs,
) -> Result<()> {
    let options = RunOptions::new(direction)
        .steps(args.steps)
        .dry_run(args.dry_run);

    let mut stdout = std::io::stdout();
    let report = shipyard.migrate(environment, &options, &mut stdout).await?;

    if report.is_empty() {
        eprintln!("  {} No migrations to run ({})", style("ℹ").blue(), direction);
    } else if !report.dry_run {
        eprintln!(
            "  {} {} migration(s) {}",
            style("✓").green(),
            report.migrations.len(),
            match direction {
                Direction::Up => "applied",
                Direction::Down => "rolled back",
            }
        );
    }

    Ok(())
}

/// Aligned `tag  name  applied` table, one row per declared migration.
fn render_status(rows: &[StatusRow]) -> String {
    if rows.is_empty() {
        return format!("  {} No migrations found\n", style("ℹ").blue());
    }

    let tag_width = rows
        .iter()
        .map(|r| r.tag.to_string().len())
        .max()
        .unwrap_or(0)
        .max("TAG".len());
    let name_width = rows
        .iter()
        .map(|r| r.name.len())
        .max()
        .unwrap_or(0)
        .max("NAME".len());

    let mut table = format!(
        "{:tag_width$}  {:name_width$}  {}\n",
        style("TAG").bold(),
        style("NAME").bold(),
        style("APPLIED").bold(),
    );

    for row in rows {
        let state = if row.is_pending() {
            style(row.state()).yellow()
        } else {
            style(row.state()).green()
        };
        table.push_str(&format!(
            "{:tag_width$}  {:name_width$}  {}\n",
            row.tag.to_string(),
            row.name,
            state
        ));
    }

    let pending = rows.iter().filter(|r| r.is_pending()).count();
    table.push_str(&format!(
        "\n{} applied, {} pending\n",
        rows.len() - pending,
        pending
    ));
    table
}
