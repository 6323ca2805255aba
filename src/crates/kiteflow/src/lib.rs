//! # kiteflow - per-wallet task orchestration
//!
//! Runs a declarative task list for many testnet wallets: each account's
//! list is resolved into a concrete plan, every task goes through one retry
//! policy, and outcomes land in a SQLite ledger so later runs resume where
//! the previous one stopped.
//!
//! ## Features
//!
//! - **Task grammar** - literal tasks, `any_order` groups and `one_of` choices
//! - **Resumable progress** - completed tasks are skipped on the next run
//! - **Uniform retries** - bounded attempts, randomized backoff, terminal
//!   error matching per capability
//! - **Bounded concurrency** - N accounts at a time with randomized pauses
//! - **Reports** - per-account and batch summaries to the log and Telegram
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kiteflow::{
//!     capabilities::standard_registry, load_config, AccountScheduler, Database,
//!     HttpSessionProvider, LogNotifier, ProgressLedger, TaskDefinitions, TaskRunner,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Arc::new(load_config(None).await?);
//! let definitions = TaskDefinitions::load(&config.files.task_definitions).await?;
//! let spec = Arc::new(definitions.spec_for(&config.flow.tasks)?);
//!
//! let registry = Arc::new(standard_registry(&config)?);
//! registry.validate_spec(&spec)?;
//!
//! let db = Arc::new(Database::new(config.database_path()?).await?);
//! let ledger = ProgressLedger::new(db).with_max_failed_runs(config.flow.max_failed_runs);
//! let sessions = Arc::new(HttpSessionProvider::new(config.http.clone()));
//!
//! let runner = TaskRunner::new(config.clone(), spec, registry, ledger, sessions)?;
//! let accounts = kiteflow::accounts::load_accounts(&config.files, &config.settings).await?;
//! let batch = AccountScheduler::new(runner, Arc::new(LogNotifier)).run(accounts).await;
//! println!("{}", batch.summary());
//! # Ok(())
//! # }
//! ```

pub mod accounts;
pub mod capabilities;
pub mod capability;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod grammar;
pub mod identity;
pub mod ledger;
pub mod logging;
pub mod notify;
pub mod report;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod session;
pub mod shutdown;
pub mod version;

// Error types
pub use error::{CapabilityError, KiteflowError, Result, TaskError, TransientKind};

pub use version::{full_version as version_info, short_version};

pub use accounts::AccountConfig;
pub use capability::{Capability, CapabilityRegistry, CapabilityResult, TaskOutput, SKIP_TASK};
pub use config::{load_config, ConfigLoader, KiteflowConfig};
pub use db::Database;
pub use events::{AttemptStats, ExecutionEvent};
pub use grammar::{ExecutionPlan, TaskDefinitions, TaskElement, TaskGrammar, TaskSpec};
pub use identity::WalletIdentity;
pub use ledger::{PlanProgress, ProgressLedger, ProgressRecord, TaskStatus};
pub use notify::{LogNotifier, Notifier, TelegramNotifier};
pub use report::{AccountOutcome, BatchReport, RunReport};
pub use retry::{ErrorMatcher, PauseWindow, RetryOutcome, RetryPolicy, RetryState};
pub use runner::{RunnerState, TaskRunner};
pub use scheduler::AccountScheduler;
pub use session::{AccountSession, HttpSessionProvider, SessionProvider};
pub use shutdown::ShutdownCoordinator;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info() {
        let info = version_info();
        assert!(info.contains("kiteflow"));
        assert!(info.contains(version::VERSION));
    }
}
