//! # knowdesk CLI
//!
//! Commands for database initialization, GitLab ingestion, knowledge base
//! status, question answering, and the agent assistant.
//!
//! ## Usage
//!
//! ```bash
//! knowdesk --config ./config/knowdesk.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `knowdesk init` | Create the SQLite database and run schema migrations |
//! | `knowdesk ingest` | Index a GitLab project into a workspace knowledge base |
//! | `knowdesk status` | Show a knowledge base's status and totals |
//! | `knowdesk ask` | Answer a question from a completed knowledge base |
//! | `knowdesk chat` | Route a message to an agent and print the result |
//! | `knowdesk reset` | Delete a knowledge base and everything indexed for it |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use knowdesk::agents::CardContext;
use knowdesk::commands::{self, parse_card};
use knowdesk::config;
use knowdesk::ingest::StatusQuery;
use knowdesk::migrate;

/// knowdesk: GitLab knowledge bases and an intent-routed assistant.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/knowdesk.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "knowdesk",
    about = "Per-workspace knowledge bases over GitLab artifacts, with an intent-routed assistant",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/knowdesk.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Index a GitLab project into the workspace's knowledge base.
    ///
    /// Wiki pages, merge requests, and open issues are fetched, chunked,
    /// embedded, and stored. Resources indexed by an earlier run are skipped.
    Ingest {
        #[arg(long)]
        workspace: String,

        /// GitLab project ID or path (e.g. `group/app`).
        #[arg(long)]
        project: String,

        /// GitLab access token. Falls back to the variable named by
        /// `gitlab.token_env`.
        #[arg(long)]
        token: Option<String>,
    },

    /// Show the status of a knowledge base.
    #[command(group(ArgGroup::new("target").required(true).args(["workspace", "config_id"])))]
    Status {
        #[arg(long)]
        workspace: Option<String>,

        #[arg(long)]
        config_id: Option<String>,
    },

    /// Answer a question from a completed knowledge base.
    Ask {
        /// Knowledge base ID.
        #[arg(long)]
        kb: String,

        question: String,
    },

    /// Send a message to the assistant and print the agent result as JSON.
    Chat {
        message: String,

        /// Selected card: `id=..,title=..[,description=..][,status=..][,list=..]`.
        /// Repeatable.
        #[arg(long = "card", value_parser = parse_card)]
        cards: Vec<CardContext>,

        /// Use this workspace's knowledge base for knowledge questions.
        #[arg(long)]
        workspace: Option<String>,
    },

    /// Delete a knowledge base with its chunks and index ledger.
    Reset {
        #[arg(long)]
        kb: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            workspace,
            project,
            token,
        } => {
            commands::run_ingest(&cfg, &workspace, &project, token).await?;
        }
        Commands::Status {
            workspace,
            config_id,
        } => {
            let query = match (config_id, workspace) {
                (Some(id), _) => StatusQuery::Config(id),
                (None, Some(ws)) => StatusQuery::Workspace(ws),
                (None, None) => anyhow::bail!("either --workspace or --config-id is required"),
            };
            commands::run_status(&cfg, query).await?;
        }
        Commands::Ask { kb, question } => {
            commands::run_ask(&cfg, &kb, &question).await?;
        }
        Commands::Chat {
            message,
            cards,
            workspace,
        } => {
            commands::run_chat(&cfg, &message, cards, workspace).await?;
        }
        Commands::Reset { kb } => {
            commands::run_reset(&cfg, &kb).await?;
        }
    }

    Ok(())
}
