//! Execution events for observability
//!
//! The runner and scheduler describe what they are doing as
//! [`ExecutionEvent`] values and hand them to [`ExecutionEvent::emit`], which
//! logs them through `tracing` with structured fields.

use crate::retry::RetryOutcome;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Retry bookkeeping for one dispatched task
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttemptStats {
    pub attempts: usize,
    pub captcha_failures: usize,
    pub backoff_ms: u64,
}

impl<T> From<&RetryOutcome<T>> for AttemptStats {
    fn from(outcome: &RetryOutcome<T>) -> Self {
        Self {
            attempts: outcome.attempts,
            captcha_failures: outcome.captcha_failures,
            backoff_ms: outcome.backoff.as_millis() as u64,
        }
    }
}

/// Event types for execution tracking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// Account run admitted by the scheduler
    AccountStarted {
        account: usize,
        wallet: String,
        timestamp: i64,
    },
    /// Plan resolved for an account
    PlanResolved {
        account: usize,
        plan: Vec<String>,
        pending: usize,
        timestamp: i64,
    },
    /// Task dispatched to its capability
    TaskStarted {
        account: usize,
        task: String,
        timestamp: i64,
    },
    /// Task succeeded and was marked completed
    TaskCompleted {
        account: usize,
        task: String,
        #[serde(flatten)]
        stats: AttemptStats,
        timestamp: i64,
        duration_ms: u64,
    },
    /// Task failed and was marked failed
    TaskFailed {
        account: usize,
        task: String,
        error: String,
        #[serde(flatten)]
        stats: AttemptStats,
        timestamp: i64,
        duration_ms: u64,
    },
    /// Account run finished, successfully or not
    AccountFinished {
        account: usize,
        completed: usize,
        failed: usize,
        timestamp: i64,
        duration_ms: u64,
    },
}

impl ExecutionEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> i64 {
        match self {
            ExecutionEvent::AccountStarted { timestamp, .. }
            | ExecutionEvent::PlanResolved { timestamp, .. }
            | ExecutionEvent::TaskStarted { timestamp, .. }
            | ExecutionEvent::TaskCompleted { timestamp, .. }
            | ExecutionEvent::TaskFailed { timestamp, .. }
            | ExecutionEvent::AccountFinished { timestamp, .. } => *timestamp,
        }
    }

    /// Account the event belongs to
    pub fn account(&self) -> usize {
        match self {
            ExecutionEvent::AccountStarted { account, .. }
            | ExecutionEvent::PlanResolved { account, .. }
            | ExecutionEvent::TaskStarted { account, .. }
            | ExecutionEvent::TaskCompleted { account, .. }
            | ExecutionEvent::TaskFailed { account, .. }
            | ExecutionEvent::AccountFinished { account, .. } => *account,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            ExecutionEvent::AccountStarted { account, wallet, .. } => {
                format!("Account #{} started ({})", account, wallet)
            }
            ExecutionEvent::PlanResolved { plan, pending, .. } => {
                format!("Plan resolved: {} tasks, {} pending", plan.len(), pending)
            }
            ExecutionEvent::TaskStarted { task, .. } => format!("Task started: {}", task),
            ExecutionEvent::TaskCompleted { task, stats, duration_ms, .. } => {
                format!(
                    "Task completed: {} after {} attempt(s) ({}ms)",
                    task, stats.attempts, duration_ms
                )
            }
            ExecutionEvent::TaskFailed { task, error, .. } => {
                format!("Task failed: {} - {}", task, error)
            }
            ExecutionEvent::AccountFinished { completed, failed, duration_ms, .. } => {
                format!(
                    "Account finished: {} completed, {} failed ({}ms)",
                    completed, failed, duration_ms
                )
            }
        }
    }

    pub fn account_started(account: usize, wallet: impl Into<String>) -> Self {
        ExecutionEvent::AccountStarted {
            account,
            wallet: wallet.into(),
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn plan_resolved(account: usize, plan: Vec<String>, pending: usize) -> Self {
        ExecutionEvent::PlanResolved {
            account,
            plan,
            pending,
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn task_started(account: usize, task: impl Into<String>) -> Self {
        ExecutionEvent::TaskStarted {
            account,
            task: task.into(),
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn task_completed(account: usize, task: impl Into<String>, stats: AttemptStats, duration_ms: u64) -> Self {
        ExecutionEvent::TaskCompleted {
            account,
            task: task.into(),
            stats,
            timestamp: Utc::now().timestamp(),
            duration_ms,
        }
    }

    pub fn task_failed(
        account: usize,
        task: impl Into<String>,
        error: impl Into<String>,
        stats: AttemptStats,
        duration_ms: u64,
    ) -> Self {
        ExecutionEvent::TaskFailed {
            account,
            task: task.into(),
            error: error.into(),
            stats,
            timestamp: Utc::now().timestamp(),
            duration_ms,
        }
    }

    pub fn account_finished(account: usize, completed: usize, failed: usize, duration_ms: u64) -> Self {
        ExecutionEvent::AccountFinished {
            account,
            completed,
            failed,
            timestamp: Utc::now().timestamp(),
            duration_ms,
        }
    }

    /// Log the event with structured fields
    pub fn emit(&self) {
        let account = self.account();
        match self {
            ExecutionEvent::TaskFailed { task, error, stats, .. } => {
                warn!(
                    account,
                    task = %task,
                    attempts = stats.attempts,
                    captcha_failures = stats.captcha_failures,
                    backoff_ms = stats.backoff_ms,
                    error = %error,
                    "{}",
                    self.description()
                );
            }
            ExecutionEvent::TaskCompleted { task, stats, .. } => {
                info!(
                    account,
                    task = %task,
                    attempts = stats.attempts,
                    captcha_failures = stats.captcha_failures,
                    backoff_ms = stats.backoff_ms,
                    "{}",
                    self.description()
                );
            }
            ExecutionEvent::TaskStarted { task, .. } => {
                info!(account, task = %task, "{}", self.description());
            }
            _ => info!(account, "{}", self.description()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_tag() {
        let event = ExecutionEvent::task_started(3, "faucet");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"task_started""#));

        let back: ExecutionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_descriptions() {
        let stats = AttemptStats {
            attempts: 3,
            ..Default::default()
        };
        let event = ExecutionEvent::task_failed(1, "complete_quiz", "HTTP 500", stats, 1200);
        assert_eq!(event.description(), "Task failed: complete_quiz - HTTP 500");
        assert_eq!(event.account(), 1);

        let event = ExecutionEvent::plan_resolved(2, vec!["a".into(), "skip".into()], 1);
        assert_eq!(event.description(), "Plan resolved: 2 tasks, 1 pending");
    }

    #[test]
    fn test_attempt_stats_flatten_into_event() {
        let stats = AttemptStats {
            attempts: 3,
            captcha_failures: 2,
            backoff_ms: 4000,
        };
        let event = ExecutionEvent::task_completed(1, "complete_quiz", stats, 5200);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["attempts"], 3);
        assert_eq!(json["captcha_failures"], 2);
        assert_eq!(json["backoff_ms"], 4000);

        let back: ExecutionEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_timestamp_is_recent() {
        let event = ExecutionEvent::account_finished(1, 2, 0, 10);
        assert!((Utc::now().timestamp() - event.timestamp()).abs() < 5);
    }
}
