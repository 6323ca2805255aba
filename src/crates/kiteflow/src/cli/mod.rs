//! CLI command implementations
//!
//! Provides command handlers for the kiteflow CLI binary.

pub mod ledger;
pub mod plan;

use crate::config::KiteflowConfig;
use crate::db::Database;
use crate::error::Result;
use crate::ledger::ProgressLedger;
use chrono::DateTime;
use std::sync::Arc;

/// Open the configured ledger with the configured pool size and failure cap
pub async fn open_ledger(config: &KiteflowConfig) -> Result<ProgressLedger> {
    let path = config.database_path()?;
    let db = Database::with_max_connections(&path, config.database.max_connections).await?;
    Ok(ProgressLedger::new(Arc::new(db)).with_max_failed_runs(config.flow.max_failed_runs))
}

fn format_timestamp(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|time| time.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}
