//! # wikictl
//!
//! Command-line entry point for wiki deployments.
//!
//! ## Usage
//!
//! ```bash
//! wikictl --config ./config/wiki.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `wikictl init` | Create the SQLite database and its tables |
//! | `wikictl deploy <project> <url>` | Clone and ingest a documentation repository |
//! | `wikictl revision <path>` | Print the HEAD revision of a working tree |
//! | `wikictl serve` | Start the progress and deploy HTTP server |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wiki_ingest::config::{self, GitConfig};
use wiki_ingest::db::{self, SqliteDatabase};
use wiki_ingest::deploy::{DeployRequest, Deployer};
use wiki_ingest::git::{RepositoryAcquirer, WorkingTree};
use wiki_ingest::migrate;
use wiki_ingest::progress::TracingLog;
use wiki_ingest::realtime::ConnectionManager;
use wiki_ingest::schema::JsonSchemaValidator;
use wiki_ingest::server;

/// Deploys modded-game documentation repositories into a wiki database.
#[derive(Parser)]
#[command(name = "wikictl", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/wiki.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Clone a documentation repository and ingest it.
    ///
    /// Prints a summary and every issue recorded for the deployment. Exits
    /// with an error when any error-level issue was recorded.
    Deploy {
        /// Project id; also the working-tree directory name.
        project: String,

        /// Repository URL or local path.
        url: String,

        /// Branch to clone instead of the remote default.
        #[arg(long)]
        branch: Option<String>,

        /// Docs root inside the repository.
        #[arg(long)]
        root: Option<String>,

        /// Version label attached to recorded issues.
        #[arg(long)]
        version_name: Option<String>,
    },

    /// Print the HEAD revision of a git working tree as JSON.
    Revision {
        path: PathBuf,
    },

    /// Start the HTTP server.
    ///
    /// Binds to `[server].bind` and serves the log WebSocket and deploy
    /// endpoints.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Revision { path } = &cli.command {
        let acquirer = RepositoryAcquirer::new(&GitConfig::default(), Arc::new(TracingLog::new("revision")));
        let revision = acquirer.get_latest_revision(&WorkingTree::open(path)).await?;
        println!("{}", serde_json::to_string_pretty(&revision)?);
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Deploy {
            project,
            url,
            branch,
            root,
            version_name,
        } => {
            let pool = db::connect(&cfg).await?;
            migrate::create_schema(&pool).await?;
            let database = Arc::new(SqliteDatabase::new(pool));

            let deployer = Deployer::new(
                &cfg,
                database.clone(),
                Arc::new(ConnectionManager::new()),
                Arc::new(JsonSchemaValidator::new()?),
            );
            let outcome = deployer
                .deploy(DeployRequest {
                    project,
                    url,
                    branch,
                    root,
                    version_name,
                })
                .await?;

            println!("Deployment {} of {}", outcome.deployment_id, outcome.project);
            if let Some(revision) = &outcome.revision {
                println!("  revision: {} {}", revision.hash, revision.message);
            }
            println!("  items: {}", outcome.items);

            let issues = database.list_issues(&outcome.deployment_id).await?;
            println!("  issues: {}", issues.len());
            for issue in &issues {
                let file = if issue.file.is_empty() { "-" } else { issue.file.as_str() };
                println!(
                    "  [{}] {}/{} {}: {}",
                    issue.level, issue.issue_type, issue.subject, file, issue.details
                );
            }

            if !outcome.success {
                bail!("deployment of {} failed", outcome.project);
            }
            println!("ok");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Revision { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
