//! Per-account and batch run reports

use crate::events::AttemptStats;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How an account run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum AccountOutcome {
    /// Every pending task was attempted
    Finished,
    /// Execution stopped at the first failed task
    StoppedOnFailure,
    /// Planning failed; no task was attempted
    PlanningFailed(String),
    /// Ledger or session setup failed; no task was attempted
    SetupFailed(String),
    /// Login failed; no task was attempted
    AuthenticationFailed(String),
    /// The run panicked or hit an invariant violation
    Aborted(String),
}

impl AccountOutcome {
    /// Whether the account as a whole counts as failed
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Finished)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Finished | Self::StoppedOnFailure => None,
            Self::PlanningFailed(reason)
            | Self::SetupFailed(reason)
            | Self::AuthenticationFailed(reason)
            | Self::Aborted(reason) => Some(reason.as_str()),
        }
    }
}

/// Outcome of one account's run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// 1-based account position
    pub account: usize,
    /// Masked wallet identity
    pub wallet: String,
    /// Resolved plan, including `skip` entries
    pub plan: Vec<String>,
    /// Tasks that succeeded this run, in execution order
    pub completed: Vec<String>,
    /// Tasks that failed this run, in execution order
    pub failed: Vec<String>,
    /// Tasks already completed in an earlier run
    pub skipped: Vec<String>,
    /// Tasks excluded after too many failed runs
    pub exhausted: Vec<String>,
    pub outcome: AccountOutcome,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// Attempts across all tasks that failed on captcha
    #[serde(default)]
    pub captcha_failures: usize,
    /// Time spent in retry backoff across all tasks
    #[serde(default, with = "duration_ms")]
    pub backoff: Duration,
}

impl RunReport {
    pub fn new(account: usize, wallet: impl Into<String>) -> Self {
        Self {
            account,
            wallet: wallet.into(),
            plan: Vec::new(),
            completed: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            exhausted: Vec::new(),
            outcome: AccountOutcome::Finished,
            duration: Duration::ZERO,
            captcha_failures: 0,
            backoff: Duration::ZERO,
        }
    }

    /// Report for an account that never reached execution
    pub fn failed_with(account: usize, wallet: impl Into<String>, outcome: AccountOutcome) -> Self {
        Self {
            outcome,
            ..Self::new(account, wallet)
        }
    }

    /// Fold one task's retry bookkeeping into the account totals
    pub fn record_attempts(&mut self, stats: &AttemptStats) {
        self.captcha_failures += stats.captcha_failures;
        self.backoff += Duration::from_millis(stats.backoff_ms);
    }

    /// Tasks dispatched this run
    pub fn attempted(&self) -> usize {
        self.completed.len() + self.failed.len()
    }

    /// Completed share of attempted tasks, in percent
    ///
    /// A run with nothing to attempt scores 100 unless the account itself
    /// failed.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.attempted();
        if attempted == 0 {
            return if self.outcome.is_failure() { 0.0 } else { 100.0 };
        }
        self.completed.len() as f64 * 100.0 / attempted as f64
    }

    pub fn is_success(&self) -> bool {
        !self.outcome.is_failure() && self.failed.is_empty()
    }

    /// Plain-text summary for notifications
    pub fn to_message(&self) -> String {
        let mut lines = vec![format!(
            "Account #{} ({}) success rate {:.0}%",
            self.account,
            self.wallet,
            self.success_rate()
        )];

        if !self.completed.is_empty() {
            lines.push(format!("Completed: {}", self.completed.join(", ")));
        }
        if !self.failed.is_empty() {
            lines.push(format!("Failed: {}", self.failed.join(", ")));
        }
        if !self.skipped.is_empty() {
            lines.push(format!("Already done: {}", self.skipped.join(", ")));
        }
        if !self.exhausted.is_empty() {
            lines.push(format!("Gave up after repeated failures: {}", self.exhausted.join(", ")));
        }
        if self.captcha_failures > 0 {
            lines.push(format!("Captcha failures: {}", self.captcha_failures));
        }
        if let Some(reason) = self.outcome.reason() {
            lines.push(format!("Error: {}", reason));
        }

        lines.join("\n")
    }
}

/// Aggregate of every account report in one scheduler run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub reports: Vec<RunReport>,
}

impl BatchReport {
    pub fn new(mut reports: Vec<RunReport>) -> Self {
        reports.sort_by_key(|report| report.account);
        Self { reports }
    }

    pub fn accounts(&self) -> usize {
        self.reports.len()
    }

    pub fn successful_accounts(&self) -> usize {
        self.reports.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed_accounts(&self) -> usize {
        self.accounts() - self.successful_accounts()
    }

    pub fn tasks_completed(&self) -> usize {
        self.reports.iter().map(|r| r.completed.len()).sum()
    }

    pub fn tasks_failed(&self) -> usize {
        self.reports.iter().map(|r| r.failed.len()).sum()
    }

    pub fn report_for(&self, account: usize) -> Option<&RunReport> {
        self.reports.iter().find(|r| r.account == account)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} accounts: {} ok, {} with failures; {} tasks completed, {} failed",
            self.accounts(),
            self.successful_accounts(),
            self.failed_accounts(),
            self.tasks_completed(),
            self.tasks_failed()
        )
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(completed: &[&str], failed: &[&str]) -> RunReport {
        let mut report = RunReport::new(1, "abcdef...1234");
        report.completed = completed.iter().map(|s| s.to_string()).collect();
        report.failed = failed.iter().map(|s| s.to_string()).collect();
        report
    }

    #[test]
    fn test_success_rate() {
        assert_eq!(report(&["a", "b", "c"], &["d"]).success_rate(), 75.0);
        assert_eq!(report(&[], &[]).success_rate(), 100.0);

        let failed = RunReport::failed_with(2, "w", AccountOutcome::PlanningFailed("bad".into()));
        assert_eq!(failed.success_rate(), 0.0);
        assert!(!failed.is_success());
    }

    #[test]
    fn test_message_lists_sections() {
        let mut r = report(&["faucet"], &["complete_quiz"]);
        r.skipped = vec!["account_info".to_string()];
        let message = r.to_message();

        assert!(message.contains("success rate 50%"));
        assert!(message.contains("Completed: faucet"));
        assert!(message.contains("Failed: complete_quiz"));
        assert!(message.contains("Already done: account_info"));
    }

    #[test]
    fn test_record_attempts_accumulates() {
        let mut r = report(&["complete_quiz", "faucet"], &[]);
        r.record_attempts(&AttemptStats {
            attempts: 3,
            captcha_failures: 2,
            backoff_ms: 1500,
        });
        r.record_attempts(&AttemptStats {
            attempts: 2,
            captcha_failures: 1,
            backoff_ms: 500,
        });

        assert_eq!(r.captcha_failures, 3);
        assert_eq!(r.backoff, Duration::from_secs(2));
        assert!(r.to_message().contains("Captcha failures: 3"));
        assert!(!report(&["a"], &[]).to_message().contains("Captcha"));
    }

    #[test]
    fn test_batch_totals() {
        let mut second = report(&["a"], &[]);
        second.account = 2;
        let batch = BatchReport::new(vec![second, report(&["a"], &["b"])]);

        assert_eq!(batch.reports[0].account, 1);
        assert_eq!(batch.successful_accounts(), 1);
        assert_eq!(batch.failed_accounts(), 1);
        assert_eq!(batch.tasks_completed(), 2);
        assert!(batch.summary().starts_with("2 accounts"));
    }

    #[test]
    fn test_report_serializes_duration_as_millis() {
        let mut r = report(&[], &[]);
        r.duration = Duration::from_millis(1500);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["duration"], 1500);
        assert_eq!(json["outcome"]["kind"], "finished");
    }
}
