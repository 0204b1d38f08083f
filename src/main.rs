//! # Notion Harness CLI (`nh`)
//!
//! ## Usage
//!
//! ```bash
//! nh --config ./config/nh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `nh index` | Summarize the workspace and publish a new snapshot |
//! | `nh tools` | List the actions derived from the published snapshot |
//! | `nh search "<query>"` | Answer a query from pages and filtered tables |
//! | `nh add "<text>"` | Turn a note into workspace entries |
//!
//! Secrets are read from the environment variables named in the config
//! (`NOTION_TOKEN` and `OPENAI_API_KEY` by default); a `.env` file in the
//! working directory is loaded first. Logs go to stderr and honour
//! `RUST_LOG`; command output goes to stdout.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use notion_harness::app::Harness;
use notion_harness::config;
use notion_harness::models::ItemKind;
use notion_harness::progress::ProgressMode;
use notion_harness::registry::ActionRegistry;
use notion_harness::snapshot::{PublishOutcome, SnapshotStore};

/// Notion Harness: workspace indexing, search routing and a task agent.
#[derive(Parser)]
#[command(name = "nh", version, about = "Index a Notion workspace, search it, and add notes to it")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/nh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the workspace and publish the snapshot.
    ///
    /// Lists every table and standalone page, summarizes each one, and
    /// replaces the published snapshot atomically. Ctrl-C cancels the run
    /// without publishing anything.
    Index {
        /// Index and report, but do not publish.
        #[arg(long)]
        dry_run: bool,

        /// Progress on stderr: `human`, `json` or `off`. Defaults to human
        /// on a terminal.
        #[arg(long)]
        progress: Option<ProgressMode>,
    },

    /// List the actions derived from the published snapshot.
    Tools,

    /// Search the workspace.
    Search {
        /// The natural-language query.
        query: String,
    },

    /// Turn a short note into workspace entries.
    Add {
        /// The note, e.g. "buy seeds for the garden tomorrow".
        text: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Index { dry_run, progress } => {
            let harness = Harness::open(cfg).await?;
            let reporter = progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("Cancelling, nothing will be published...");
                    on_signal.cancel();
                }
            });

            let summary = harness.index(reporter.as_ref(), &cancel, dry_run).await?;
            let snapshot = &summary.report.snapshot;
            println!(
                "Indexed {} items ({} tables, {} pages), {} skipped.",
                snapshot.len(),
                snapshot.count(ItemKind::Table),
                snapshot.count(ItemKind::Page),
                summary.report.failures.len()
            );
            for failure in &summary.report.failures {
                println!("  skipped: {}", failure);
            }
            match summary.published {
                Some(PublishOutcome::Written { digest }) => {
                    println!("Published snapshot {}", &digest[..12.min(digest.len())]);
                }
                Some(PublishOutcome::Unchanged { .. }) => println!("Snapshot unchanged."),
                None => println!("Dry run: snapshot not published."),
            }
        }
        Commands::Tools => {
            let store = SnapshotStore::new(&cfg.snapshot)?;
            let snapshot = store.load().await?;
            let registry = ActionRegistry::build(&snapshot);

            if registry.is_empty() {
                println!("No actions. Run `nh index` first.");
                return Ok(());
            }
            println!("{} actions from {}:", registry.len(), store.location());
            for action in registry.actions() {
                println!("  {:<48} {:<6} {}", action.name, action.kind.as_str(), action.bound_id);
            }
        }
        Commands::Search { query } => {
            let harness = Harness::open(cfg).await?;
            let outcome = harness.search(&query).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Add { text } => {
            let harness = Harness::open(cfg).await?;
            let run = harness.add(&text).await?;
            println!("{}", run.answer);
        }
    }

    Ok(())
}
