//! Per-account task runner
//!
//! One run moves through `Idle -> Planning -> Executing -> Finalizing -> Done`:
//!
//! - **Planning** resolves the task spec into a plan and splits it against
//!   the ledger. An invalid spec or an uninitialized ledger ends the run here
//!   with zero tasks attempted.
//! - **Executing** opens the account session, logs in once if any pending
//!   task needs it, then dispatches pending tasks in plan order under their
//!   retry policy and records each outcome in the ledger.
//! - **Finalizing** hands the session back to the provider. This happens on
//!   every path out of Executing, including a panicking capability.
//!
//! `skip` entries stay in the plan but are never dispatched, written to the
//! ledger, or followed by a pause.

use crate::accounts::AccountConfig;
use crate::capability::{CapabilityRegistry, LOGIN_TASK, SKIP_TASK};
use crate::config::KiteflowConfig;
use crate::error::{KiteflowError, Result};
use crate::events::{AttemptStats, ExecutionEvent};
use crate::grammar::{ExecutionPlan, TaskSpec};
use crate::ledger::{ProgressLedger, TaskStatus};
use crate::report::{AccountOutcome, RunReport};
use crate::retry::RetryPolicy;
use crate::session::{AccountSession, SessionProvider};
use futures::FutureExt;
use rand::Rng;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Lifecycle of one account run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Planning,
    Executing,
    Finalizing,
    Done,
}

impl std::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
        };
        f.pad(name)
    }
}

struct StateTracker {
    account: usize,
    state: RunnerState,
}

impl StateTracker {
    fn new(account: usize) -> Self {
        Self {
            account,
            state: RunnerState::Idle,
        }
    }

    fn enter(&mut self, next: RunnerState) {
        debug!(account = self.account, from = %self.state, to = %next, "Runner state change");
        self.state = next;
    }
}

/// Executes the resolved plan for one account at a time
///
/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct TaskRunner {
    config: Arc<KiteflowConfig>,
    spec: Arc<TaskSpec>,
    registry: Arc<CapabilityRegistry>,
    ledger: ProgressLedger,
    sessions: Arc<dyn SessionProvider>,
    policies: Arc<HashMap<String, RetryPolicy>>,
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("spec", &self.spec.name)
            .field("registry", &self.registry)
            .field("ledger", &self.ledger)
            .finish()
    }
}

impl TaskRunner {
    /// Build a runner; retry policies are derived from the config up front
    pub fn new(
        config: Arc<KiteflowConfig>,
        spec: Arc<TaskSpec>,
        registry: Arc<CapabilityRegistry>,
        ledger: ProgressLedger,
        sessions: Arc<dyn SessionProvider>,
    ) -> Result<Self> {
        let policies = registry
            .names()
            .map(|name| -> Result<(String, RetryPolicy)> {
                Ok((name.to_string(), config.retry_policy_for(name)?))
            })
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self {
            config,
            spec,
            registry,
            ledger,
            sessions,
            policies: Arc::new(policies),
        })
    }

    pub fn config(&self) -> &KiteflowConfig {
        &self.config
    }

    /// Resolve the task spec into a fresh plan
    pub fn plan<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<ExecutionPlan> {
        self.registry.grammar().resolve(&self.spec, rng)
    }

    /// Run the plan for one account
    ///
    /// Never fails: every error ends up in the returned report.
    pub async fn run<R: Rng + Send>(&self, account: &AccountConfig, rng: &mut R) -> RunReport {
        let started = Instant::now();
        let mut tracker = StateTracker::new(account.index);
        let mut report = RunReport::new(account.index, account.identity.masked());

        tracker.enter(RunnerState::Planning);
        let pending = match self.prepare(account, &mut report, rng).await {
            Ok(pending) => pending,
            Err(outcome) => {
                warn!(account = account.index, reason = ?outcome.reason(), "Account run ended before execution");
                report.outcome = outcome;
                return self.finish(report, &mut tracker, started);
            }
        };

        if pending.is_empty() {
            info!(account = account.index, skipped = report.skipped.len(), "Nothing pending, all tasks already done");
            return self.finish(report, &mut tracker, started);
        }

        let init_pause = self.config.settings.initialization_pause.sample(rng);
        if !init_pause.is_zero() {
            debug!(account = account.index, delay_secs = init_pause.as_secs(), "Initialization pause");
            sleep(init_pause).await;
        }

        let session = match self.sessions.open(account).await {
            Ok(session) => session,
            Err(e) => {
                error!(account = account.index, error = %e, "Failed to open session");
                report.outcome = AccountOutcome::SetupFailed(e.to_string());
                return self.finish(report, &mut tracker, started);
            }
        };

        tracker.enter(RunnerState::Executing);
        let execution = AssertUnwindSafe(self.execute(&session, &pending, &mut report, rng))
            .catch_unwind()
            .await;

        tracker.enter(RunnerState::Finalizing);
        self.sessions.release(session).await;

        match execution {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(account = account.index, error = %e, "Account execution aborted");
                report.outcome = outcome_for(e);
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(account = account.index, panic = %message, "Capability panicked");
                report.outcome = AccountOutcome::Aborted(format!("panic: {}", message));
            }
        }

        self.finish(report, &mut tracker, started)
    }

    /// Planning: resolve the plan and split it against the ledger
    async fn prepare<R: Rng + Send>(
        &self,
        account: &AccountConfig,
        report: &mut RunReport,
        rng: &mut R,
    ) -> std::result::Result<HashSet<String>, AccountOutcome> {
        let plan = self
            .plan(rng)
            .map_err(|e| AccountOutcome::PlanningFailed(e.to_string()))?;
        report.plan = plan.tasks().to_vec();

        let scheduled = plan
            .iter()
            .filter(|task| *task != SKIP_TASK)
            .map(str::to_string)
            .collect::<Vec<_>>();

        let progress = self
            .ledger
            .partition(&account.identity, &scheduled)
            .await
            .map_err(|e| AccountOutcome::SetupFailed(e.to_string()))?;

        ExecutionEvent::plan_resolved(account.index, report.plan.clone(), progress.pending.len()).emit();

        report.skipped = progress.completed;
        report.exhausted = progress.exhausted;
        Ok(progress.pending.into_iter().collect())
    }

    /// Executing: login if needed, then dispatch pending tasks in plan order
    async fn execute<R: Rng + Send>(
        &self,
        session: &AccountSession,
        pending: &HashSet<String>,
        report: &mut RunReport,
        rng: &mut R,
    ) -> Result<()> {
        let account = session.account().index;

        if pending.iter().any(|task| self.config.requires_login(task)) {
            self.login(session).await?;
        }

        let steps = report
            .plan
            .iter()
            .filter(|task| task.as_str() == SKIP_TASK || pending.contains(*task))
            .cloned()
            .collect::<Vec<_>>();
        let mut remaining = steps.iter().filter(|task| task.as_str() != SKIP_TASK).count();

        for task in &steps {
            if task == SKIP_TASK {
                debug!(account, "Skip entry, advancing plan");
                continue;
            }
            remaining -= 1;

            let capability = self.registry.get(task)?;
            let policy = self.policy(task)?;

            ExecutionEvent::task_started(account, task.as_str()).emit();
            let started = Instant::now();

            let result = policy
                .run_with_retry(task, None, || capability.execute(session))
                .await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let (stats, error) = match result {
                Ok(outcome) => (
                    AttemptStats::from(&outcome),
                    outcome.error.map(|e| e.to_string()),
                ),
                Err(e) => (
                    AttemptStats {
                        attempts: policy.max_attempts(),
                        ..Default::default()
                    },
                    Some(e.to_string()),
                ),
            };
            report.record_attempts(&stats);

            if error.is_none() {
                self.ledger
                    .mark(session.identity(), task, TaskStatus::Completed)
                    .await?;
                report.completed.push(task.clone());
                ExecutionEvent::task_completed(account, task.as_str(), stats, elapsed_ms).emit();
            } else {
                self.ledger
                    .mark(session.identity(), task, TaskStatus::Failed)
                    .await?;
                report.failed.push(task.clone());
                ExecutionEvent::task_failed(
                    account,
                    task.as_str(),
                    error.unwrap_or_default(),
                    stats,
                    elapsed_ms,
                )
                .emit();

                if !self.config.flow.skip_failed_tasks {
                    warn!(account, task = %task, "Stopping account after failed task");
                    report.outcome = AccountOutcome::StoppedOnFailure;
                    return Ok(());
                }
            }

            if remaining > 0 {
                let pause = self.config.settings.pause_between_actions.sample(rng);
                debug!(account, delay_secs = pause.as_secs(), "Pause between tasks");
                sleep(pause).await;
            }
        }

        Ok(())
    }

    async fn login(&self, session: &AccountSession) -> Result<()> {
        let capability = self.registry.get(LOGIN_TASK)?;
        let policy = self.policy(LOGIN_TASK)?;

        let outcome = policy
            .run_with_retry(LOGIN_TASK, None, || capability.execute(session))
            .await
            .map_err(|e| KiteflowError::Authentication(e.to_string()))?;

        match outcome.error {
            None => Ok(()),
            Some(e) => Err(KiteflowError::Authentication(e.to_string())),
        }
    }

    fn policy(&self, task: &str) -> Result<&RetryPolicy> {
        self.policies
            .get(task)
            .ok_or_else(|| KiteflowError::TaskNotFound(task.to_string()))
    }

    fn finish(&self, mut report: RunReport, tracker: &mut StateTracker, started: Instant) -> RunReport {
        tracker.enter(RunnerState::Done);
        report.duration = started.elapsed();
        ExecutionEvent::account_finished(
            report.account,
            report.completed.len(),
            report.failed.len(),
            report.duration.as_millis() as u64,
        )
        .emit();
        report
    }
}

fn outcome_for(error: KiteflowError) -> AccountOutcome {
    match error {
        KiteflowError::Authentication(reason) => AccountOutcome::AuthenticationFailed(reason),
        e @ (KiteflowError::LedgerUninitialized(_) | KiteflowError::Database(_)) => {
            AccountOutcome::SetupFailed(e.to_string())
        }
        e => AccountOutcome::Aborted(e.to_string()),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_mapping() {
        assert!(matches!(
            outcome_for(KiteflowError::Authentication("bad token".into())),
            AccountOutcome::AuthenticationFailed(_)
        ));
        assert!(matches!(
            outcome_for(KiteflowError::LedgerUninitialized("x".into())),
            AccountOutcome::SetupFailed(_)
        ));
        assert!(matches!(
            outcome_for(KiteflowError::TaskNotFound("x".into())),
            AccountOutcome::Aborted(_)
        ));
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(RunnerState::Finalizing.to_string(), "finalizing");
    }
}
