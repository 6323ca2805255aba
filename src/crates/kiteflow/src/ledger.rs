//! Durable per-wallet task progress
//!
//! One row per (wallet_key, task_name). Rows are created lazily as `pending`
//! the first time a task is scheduled for a wallet, then upserted to
//! `completed` or `failed`. Completed tasks are skipped on later runs; failed
//! tasks are eligible again unless `max_failed_runs` caps them.
//!
//! Writers for the same wallet are serialized through a per-wallet async
//! lock. Different wallets never wait on each other at this layer.

use crate::db::Database;
use crate::error::{KiteflowError, Result};
use crate::identity::WalletIdentity;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// Status of one task for one wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = KiteflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(KiteflowError::Database(format!("Unknown task status: {}", other))),
        }
    }
}

/// One ledger row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub wallet_key: String,
    pub task_name: String,
    pub status: TaskStatus,
    pub failure_count: u32,
    pub updated_at: i64,
}

/// Plan-ordered split of the scheduled tasks for one wallet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanProgress {
    /// Tasks to dispatch this run
    pub pending: Vec<String>,
    /// Tasks already completed in an earlier run
    pub completed: Vec<String>,
    /// Tasks that reached the failed-run cap
    pub exhausted: Vec<String>,
}

/// Per-wallet counts for the `status` command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletSummary {
    pub wallet_key: String,
    pub completed: u32,
    pub failed: u32,
    pub pending: u32,
    pub last_update: i64,
}

/// Progress ledger backed by the `progress` table
#[derive(Clone)]
pub struct ProgressLedger {
    db: Arc<Database>,
    max_failed_runs: Option<u32>,
    wallet_locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl std::fmt::Debug for ProgressLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressLedger")
            .field("max_failed_runs", &self.max_failed_runs)
            .field("wallets_locked", &self.wallet_locks.lock().len())
            .finish()
    }
}

impl ProgressLedger {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            max_failed_runs: None,
            wallet_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Exclude tasks that have failed this many runs
    pub fn with_max_failed_runs(mut self, max_failed_runs: Option<u32>) -> Self {
        self.max_failed_runs = max_failed_runs;
        self
    }

    fn wallet_lock(&self, wallet_key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.wallet_locks
            .lock()
            .entry(wallet_key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Fails with `LedgerUninitialized` if `init-db` has not been run
    pub async fn check_initialized(&self) -> Result<()> {
        let exists: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'progress'")
                .fetch_optional(self.db.pool())
                .await
                .map_err(|e| ledger_error("check ledger", e))?;

        match exists {
            Some(_) => Ok(()),
            None => Err(KiteflowError::LedgerUninitialized(
                "progress table is missing; run `kiteflow init-db` first".to_string(),
            )),
        }
    }

    /// Plan-ordered names whose status is not completed
    pub async fn get_pending(&self, wallet: &WalletIdentity, tasks: &[String]) -> Result<Vec<String>> {
        Ok(self.partition(wallet, tasks).await?.pending)
    }

    /// Split scheduled tasks into pending, already completed and exhausted,
    /// creating `pending` rows for tasks this wallet has never seen
    pub async fn partition(&self, wallet: &WalletIdentity, tasks: &[String]) -> Result<PlanProgress> {
        let lock = self.wallet_lock(wallet.key());
        let _guard = lock.lock().await;

        let rows = sqlx::query(
            "SELECT task_name, status, failure_count FROM progress WHERE wallet_key = ?",
        )
        .bind(wallet.key())
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| ledger_error("load progress", e))?;

        let mut known: HashMap<String, (TaskStatus, u32)> = HashMap::with_capacity(rows.len());
        for row in rows {
            let status: String = row.get("status");
            let failure_count: i64 = row.get("failure_count");
            known.insert(
                row.get("task_name"),
                (status.parse::<TaskStatus>()?, u32::try_from(failure_count).unwrap_or(u32::MAX)),
            );
        }

        let mut progress = PlanProgress::default();
        let mut unseen = HashSet::new();
        for task in tasks {
            match known.get(task) {
                Some((TaskStatus::Completed, _)) => progress.completed.push(task.clone()),
                Some((_, failures)) if self.is_exhausted(*failures) => progress.exhausted.push(task.clone()),
                Some(_) => progress.pending.push(task.clone()),
                None => {
                    unseen.insert(task.as_str());
                    progress.pending.push(task.clone());
                }
            }
        }

        if !unseen.is_empty() {
            let now = Utc::now().timestamp();
            let mut tx = self.db.pool().begin().await.map_err(|e| ledger_error("begin", e))?;
            for task in &unseen {
                sqlx::query(
                    "INSERT OR IGNORE INTO progress (wallet_key, task_name, status, failure_count, updated_at)
                     VALUES (?, ?, 'pending', 0, ?)",
                )
                .bind(wallet.key())
                .bind(*task)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| ledger_error("create pending record", e))?;
            }
            tx.commit().await.map_err(|e| ledger_error("commit", e))?;
        }

        debug!(
            wallet = %wallet,
            pending = progress.pending.len(),
            completed = progress.completed.len(),
            exhausted = progress.exhausted.len(),
            "Partitioned plan against ledger"
        );
        Ok(progress)
    }

    fn is_exhausted(&self, failures: u32) -> bool {
        matches!(self.max_failed_runs, Some(cap) if failures >= cap)
    }

    /// Upsert the status of one task; a failed mark bumps the failure counter
    pub async fn mark(&self, wallet: &WalletIdentity, task_name: &str, status: TaskStatus) -> Result<()> {
        let lock = self.wallet_lock(wallet.key());
        let _guard = lock.lock().await;

        let failure_increment: i64 = if status == TaskStatus::Failed { 1 } else { 0 };

        sqlx::query(
            "INSERT INTO progress (wallet_key, task_name, status, failure_count, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (wallet_key, task_name) DO UPDATE SET
                status = excluded.status,
                failure_count = progress.failure_count + excluded.failure_count,
                updated_at = excluded.updated_at",
        )
        .bind(wallet.key())
        .bind(task_name)
        .bind(status.as_str())
        .bind(failure_increment)
        .bind(Utc::now().timestamp())
        .execute(self.db.pool())
        .await
        .map_err(|e| ledger_error("mark task", e))?;

        debug!(wallet = %wallet, task = task_name, status = %status, "Ledger updated");
        Ok(())
    }

    /// All records for one wallet, ordered by task name
    pub async fn records(&self, wallet_key: &str) -> Result<Vec<ProgressRecord>> {
        let rows = sqlx::query(
            "SELECT wallet_key, task_name, status, failure_count, updated_at
             FROM progress WHERE wallet_key = ? ORDER BY task_name",
        )
        .bind(wallet_key)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| ledger_error("list records", e))?;

        rows.into_iter()
            .map(|row| -> Result<ProgressRecord> {
                let status: String = row.get("status");
                let failure_count: i64 = row.get("failure_count");
                Ok(ProgressRecord {
                    wallet_key: row.get("wallet_key"),
                    task_name: row.get("task_name"),
                    status: status.parse::<TaskStatus>()?,
                    failure_count: u32::try_from(failure_count).unwrap_or(u32::MAX),
                    updated_at: row.get("updated_at"),
                })
            })
            .collect()
    }

    /// Per-wallet status counts, most recently updated first
    pub async fn summaries(&self) -> Result<Vec<WalletSummary>> {
        let rows = sqlx::query(
            "SELECT wallet_key,
                    SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END) AS completed,
                    SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed,
                    SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END) AS pending,
                    MAX(updated_at) AS last_update
             FROM progress
             GROUP BY wallet_key
             ORDER BY last_update DESC",
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| ledger_error("summarize ledger", e))?;

        Ok(rows
            .into_iter()
            .map(|row| WalletSummary {
                wallet_key: row.get("wallet_key"),
                completed: row.get::<i64, _>("completed") as u32,
                failed: row.get::<i64, _>("failed") as u32,
                pending: row.get::<i64, _>("pending") as u32,
                last_update: row.get("last_update"),
            })
            .collect())
    }

    /// Delete records for one wallet, or every wallet when `wallet_key` is None
    pub async fn reset(&self, wallet_key: Option<&str>) -> Result<u64> {
        let result = match wallet_key {
            Some(key) => {
                let lock = self.wallet_lock(key);
                let _guard = lock.lock().await;
                sqlx::query("DELETE FROM progress WHERE wallet_key = ?")
                    .bind(key)
                    .execute(self.db.pool())
                    .await
            }
            None => sqlx::query("DELETE FROM progress").execute(self.db.pool()).await,
        }
        .map_err(|e| ledger_error("reset ledger", e))?;

        info!(rows = result.rows_affected(), scope = wallet_key.unwrap_or("all"), "Ledger reset");
        Ok(result.rows_affected())
    }
}

/// A missing table means `init-db` was never run; everything else is a
/// plain database error
fn ledger_error(action: &str, error: sqlx::Error) -> KiteflowError {
    if let sqlx::Error::Database(ref db_error) = error {
        if db_error.message().contains("no such table") {
            return KiteflowError::LedgerUninitialized(format!(
                "{}: progress table is missing; run `kiteflow init-db` first",
                action
            ));
        }
    }
    KiteflowError::Database(format!("Failed to {}: {}", action, error))
}
