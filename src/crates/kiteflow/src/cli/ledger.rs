//! Ledger maintenance command handlers

use super::{format_timestamp, open_ledger};
use crate::config::KiteflowConfig;
use crate::db::Database;
use crate::error::{KiteflowError, Result};
use crate::ledger::TaskStatus;
use colored::Colorize;
use tabled::{Table, Tabled};

/// Per-wallet summary row
#[derive(Tabled)]
struct WalletRow {
    #[tabled(rename = "Wallet")]
    wallet: String,
    #[tabled(rename = "Completed")]
    completed: u32,
    #[tabled(rename = "Failed")]
    failed: u32,
    #[tabled(rename = "Pending")]
    pending: u32,
    #[tabled(rename = "Updated")]
    updated: String,
}

/// Per-task row for one wallet
#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "Task")]
    task: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Failures")]
    failures: u32,
    #[tabled(rename = "Updated")]
    updated: String,
}

/// Handle init-db command
pub async fn handle_init_db(config: &KiteflowConfig) -> Result<()> {
    let path = config.database_path()?;
    let db = Database::initialize(&path).await?;
    db.health_check().await?;
    db.close().await;

    println!("{}", "✓ Ledger initialized".green().bold());
    println!("  {}", path.display());
    Ok(())
}

/// Handle status command: every wallet, or every task of one wallet
pub async fn handle_status(config: &KiteflowConfig, wallet: Option<String>) -> Result<()> {
    let ledger = open_ledger(config).await?;
    ledger.check_initialized().await?;

    let Some(key) = wallet else {
        let summaries = ledger.summaries().await?;
        if summaries.is_empty() {
            println!("{}", "Ledger is empty".yellow());
            return Ok(());
        }

        let rows: Vec<WalletRow> = summaries
            .into_iter()
            .map(|summary| WalletRow {
                wallet: summary.wallet_key,
                completed: summary.completed,
                failed: summary.failed,
                pending: summary.pending,
                updated: format_timestamp(summary.last_update),
            })
            .collect();

        let count = rows.len();
        println!("{}", Table::new(rows));
        println!("\nTotal: {} wallets", count);
        return Ok(());
    };

    let records = ledger.records(&key).await?;
    if records.is_empty() {
        println!("{}", format!("No records for wallet {}", key).yellow());
        return Ok(());
    }

    let rows: Vec<TaskRow> = records
        .into_iter()
        .map(|record| TaskRow {
            status: colorize_status(record.status).to_string(),
            task: record.task_name,
            failures: record.failure_count,
            updated: format_timestamp(record.updated_at),
        })
        .collect();

    println!("{}", Table::new(rows));
    Ok(())
}

/// Handle reset command
pub async fn handle_reset(config: &KiteflowConfig, wallet: Option<String>, all: bool) -> Result<()> {
    if wallet.is_none() && !all {
        return Err(KiteflowError::Other("Pass --wallet <KEY> or --all".to_string()));
    }

    let ledger = open_ledger(config).await?;
    ledger.check_initialized().await?;
    let removed = ledger.reset(wallet.as_deref()).await?;

    println!("{}", format!("✓ Removed {} record(s)", removed).green().bold());
    Ok(())
}

fn colorize_status(status: TaskStatus) -> colored::ColoredString {
    match status {
        TaskStatus::Completed => status.as_str().green(),
        TaskStatus::Failed => status.as_str().red(),
        TaskStatus::Pending => status.as_str().yellow(),
    }
}
