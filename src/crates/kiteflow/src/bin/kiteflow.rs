//! kiteflow CLI
//!
//! Main entry point for the kiteflow command-line tool.

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use kiteflow::notify::notifier_from_config;
use kiteflow::{
    accounts, cli, logging, version_info, AccountScheduler, HttpSessionProvider, KiteflowConfig,
    KiteflowError, ShutdownCoordinator, TaskRunner,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "kiteflow")]
#[command(about = "kiteflow - resumable per-wallet task orchestration", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Project config file (defaults to ./kiteflow.toml)
    #[arg(short, long, global = true, env = "KITEFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the selected task presets for every selected account
    Run {
        /// Seed for shuffling, plans and pauses
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Create or upgrade the progress ledger schema
    InitDb,

    /// Resolve and print one plan without running anything
    Plan {
        /// Seed for group ordering and choices
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Show ledger progress per wallet
    Status {
        /// Show every task record for one wallet key
        #[arg(short, long)]
        wallet: Option<String>,
    },

    /// Delete ledger records
    Reset {
        /// Wallet key to reset
        #[arg(short, long, conflicts_with = "all")]
        wallet: Option<String>,

        /// Reset every wallet
        #[arg(long)]
        all: bool,
    },

    /// Show version information
    Version,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let command = match args.command {
        Some(Commands::Version) => {
            println!("{}", version_info());
            return Ok(());
        }
        None => {
            println!("{}", version_info());
            println!("\nUse --help to see available commands");
            return Ok(());
        }
        Some(command) => command,
    };

    let config = match kiteflow::load_config(args.config).await {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e);
            return Err(e.into());
        }
    };
    logging::init_logging(&config.logging)?;

    match command {
        Commands::Run { seed } => run(config, seed).await,
        Commands::InitDb => Ok(cli::ledger::handle_init_db(&config).await?),
        Commands::Plan { seed } => Ok(cli::plan::handle_plan(&config, seed).await?),
        Commands::Status { wallet } => Ok(cli::ledger::handle_status(&config, wallet).await?),
        Commands::Reset { wallet, all } => Ok(cli::ledger::handle_reset(&config, wallet, all).await?),
        Commands::Version => Ok(()),
    }
}

async fn run(config: Arc<KiteflowConfig>, seed: Option<u64>) -> anyhow::Result<()> {
    let (spec, registry) = cli::plan::load_spec(&config).await?;
    info!(spec = %spec.name, elements = spec.elements.len(), "Task spec loaded");

    let ledger = cli::open_ledger(&config)
        .await
        .context("opening progress ledger")?;
    if let Err(e @ KiteflowError::LedgerUninitialized(_)) = ledger.check_initialized().await {
        error!(error = %e, "Every account will fail setup until the ledger is initialized");
    }

    let sessions = Arc::new(HttpSessionProvider::new(config.http.clone()));
    let runner = TaskRunner::new(config.clone(), Arc::new(spec), Arc::new(registry), ledger, sessions)?;
    let notifier = notifier_from_config(&config.notifications)?;

    let shutdown = ShutdownCoordinator::new();
    let _signals = shutdown.install_signal_handlers();

    let selected = accounts::load_accounts(&config.files, &config.settings).await?;

    let mut scheduler = AccountScheduler::new(runner, notifier).with_shutdown(shutdown);
    if let Some(seed) = seed {
        scheduler = scheduler.with_seed(seed);
    }

    let batch = scheduler.run(selected).await;
    if batch.failed_accounts() == 0 {
        println!("{}", batch.summary().green().bold());
    } else {
        println!("{}", batch.summary().yellow().bold());
    }
    Ok(())
}
