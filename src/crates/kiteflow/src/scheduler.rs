//! Account scheduler
//!
//! Fans accounts out over a bounded number of concurrent task runners.
//! Admission is bounded by a semaphore sized from `settings.threads`;
//! accounts past the first `threads` wait a random `pause_between_accounts`
//! before starting. A panic or error in one account becomes that account's
//! failed report and never touches the others.

use crate::accounts::AccountConfig;
use crate::events::ExecutionEvent;
use crate::notify::Notifier;
use crate::report::{AccountOutcome, BatchReport, RunReport};
use crate::runner::TaskRunner;
use crate::shutdown::ShutdownCoordinator;
use futures::FutureExt;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{error, info, warn};

pub struct AccountScheduler {
    runner: TaskRunner,
    notifier: Arc<dyn Notifier>,
    shutdown: ShutdownCoordinator,
    seed: Option<u64>,
}

impl AccountScheduler {
    pub fn new(runner: TaskRunner, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            runner,
            notifier,
            shutdown: ShutdownCoordinator::new(),
            seed: None,
        }
    }

    /// Share a shutdown coordinator (usually one with signal handlers installed)
    pub fn with_shutdown(mut self, shutdown: ShutdownCoordinator) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Make shuffling, plans and pauses reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Run every account and aggregate the reports
    pub async fn run(&self, mut accounts: Vec<AccountConfig>) -> BatchReport {
        let settings = &self.runner.config().settings;
        let threads = settings.threads.max(1);
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        if settings.shuffle_wallets {
            accounts.shuffle(&mut rng);
        }

        info!(accounts = accounts.len(), threads, "Starting account scheduler");

        let semaphore = Arc::new(Semaphore::new(threads));
        let mut running = JoinSet::new();
        let total = accounts.len();
        let mut admitted = 0usize;

        for (position, account) in accounts.into_iter().enumerate() {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            if self.shutdown.is_shutdown_requested() {
                break;
            }
            admitted += 1;

            let start_pause = if position >= threads {
                settings.pause_between_accounts.sample(&mut rng)
            } else {
                std::time::Duration::ZERO
            };
            let mut account_rng = StdRng::seed_from_u64(rng.gen());
            let runner = self.runner.clone();
            let notifier = self.notifier.clone();
            let shutdown = self.shutdown.clone();

            running.spawn(async move {
                let _permit = permit;

                if !start_pause.is_zero() {
                    info!(account = account.index, delay_secs = start_pause.as_secs(), "Waiting before next account");
                    sleep(start_pause).await;
                    if shutdown.is_shutdown_requested() {
                        info!(account = account.index, "Shutdown requested, account not started");
                        return None;
                    }
                }

                ExecutionEvent::account_started(account.index, account.identity.masked()).emit();

                let report = match AssertUnwindSafe(runner.run(&account, &mut account_rng))
                    .catch_unwind()
                    .await
                {
                    Ok(report) => report,
                    Err(_) => {
                        error!(account = account.index, "Account run panicked");
                        RunReport::failed_with(
                            account.index,
                            account.identity.masked(),
                            AccountOutcome::Aborted("account run panicked".to_string()),
                        )
                    }
                };

                match AssertUnwindSafe(notifier.account_report(&report))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(account = account.index, error = %e, "Failed to deliver account report")
                    }
                    Err(_) => error!(account = account.index, "Account report notifier panicked"),
                }
                Some(report)
            });
        }

        if admitted < total {
            warn!(not_started = total - admitted, "Shutdown requested, remaining accounts skipped");
        }

        let mut reports = Vec::with_capacity(admitted);
        while let Some(joined) = running.join_next().await {
            match joined {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(e) => error!(error = %e, "Account task did not complete"),
            }
        }

        let batch = BatchReport::new(reports);
        info!("{}", batch.summary());
        match AssertUnwindSafe(self.notifier.batch_report(&batch))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to deliver batch report"),
            Err(_) => error!("Batch report notifier panicked"),
        }
        batch
    }
}
