//! Account scheduler integration tests
//!
//! Covers bounded concurrency, failure containment between accounts,
//! shutdown admission and seeded ordering.

mod common;

use async_trait::async_trait;
use common::*;
use kiteflow::{
    AccountOutcome, AccountScheduler, AccountSession, BatchReport, Capability, CapabilityResult,
    KiteflowConfig, Notifier, PauseWindow, RunReport, ShutdownCoordinator,
};
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct RecordingNotifier {
    accounts: Mutex<Vec<usize>>,
    batches: Mutex<usize>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn account_report(&self, report: &RunReport) -> kiteflow::Result<()> {
        self.accounts.lock().push(report.account);
        Ok(())
    }

    async fn batch_report(&self, _batch: &BatchReport) -> kiteflow::Result<()> {
        *self.batches.lock() += 1;
        Ok(())
    }
}

/// Panics while reporting one account and while reporting the batch
struct PanickingNotifier {
    account: usize,
}

#[async_trait]
impl Notifier for PanickingNotifier {
    async fn account_report(&self, report: &RunReport) -> kiteflow::Result<()> {
        if report.account == self.account {
            panic!("notifier broke on account {}", report.account);
        }
        Ok(())
    }

    async fn batch_report(&self, _batch: &BatchReport) -> kiteflow::Result<()> {
        panic!("notifier broke on batch");
    }
}

/// Records the order accounts reach the capability
#[derive(Default)]
struct OrderRecorder {
    seen: Arc<Mutex<Vec<usize>>>,
}

#[async_trait]
impl Capability for OrderRecorder {
    fn name(&self) -> &str {
        "record"
    }

    async fn execute(&self, session: &AccountSession) -> CapabilityResult {
        self.seen.lock().push(session.account().index);
        Ok(None)
    }
}

/// Requests shutdown the first time it runs
struct ShutdownTrigger {
    shutdown: ShutdownCoordinator,
}

#[async_trait]
impl Capability for ShutdownTrigger {
    fn name(&self) -> &str {
        "trigger"
    }

    async fn execute(&self, _session: &AccountSession) -> CapabilityResult {
        self.shutdown.request_shutdown();
        Ok(None)
    }
}

fn scheduler_config(threads: usize) -> KiteflowConfig {
    let mut config = test_config();
    config.settings.threads = threads;
    config
}

fn accounts(count: usize) -> Vec<kiteflow::AccountConfig> {
    (1..=count).map(account).collect()
}

#[tokio::test]
async fn test_panicking_account_does_not_affect_others() {
    let (_temp, ledger) = setup_ledger().await;
    let capability: Arc<dyn Capability> = Arc::new(PanicForAccount {
        name: "faucet".to_string(),
        account: 2,
    });
    let runner = build_runner(
        scheduler_config(2),
        literal_spec(&["faucet"]),
        vec![capability],
        ledger,
        Arc::new(MockSessions::default()),
    );
    let notifier = Arc::new(RecordingNotifier::default());

    let batch = AccountScheduler::new(runner, notifier.clone())
        .run(accounts(4))
        .await;

    assert_eq!(batch.accounts(), 4);
    assert_eq!(batch.failed_accounts(), 1);
    assert_eq!(batch.successful_accounts(), 3);
    assert!(matches!(
        batch.report_for(2).unwrap().outcome,
        AccountOutcome::Aborted(_)
    ));
    for index in [1, 3, 4] {
        let report = batch.report_for(index).unwrap();
        assert_eq!(report.outcome, AccountOutcome::Finished);
        assert_eq!(report.completed, vec!["faucet"]);
    }

    let mut notified = notifier.accounts.lock().clone();
    notified.sort_unstable();
    assert_eq!(notified, vec![1, 2, 3, 4]);
    assert_eq!(*notifier.batches.lock(), 1);
}

#[tokio::test]
async fn test_concurrency_bounded_by_threads() {
    let (_temp, ledger) = setup_ledger().await;
    let probe = ConcurrencyProbe::new("probe", Duration::from_millis(100));
    let peak = probe.peak.clone();
    let runner = build_runner(
        scheduler_config(2),
        literal_spec(&["probe"]),
        vec![Arc::new(probe) as Arc<dyn Capability>],
        ledger,
        Arc::new(MockSessions::default()),
    );

    let batch = AccountScheduler::new(runner, Arc::new(RecordingNotifier::default()))
        .run(accounts(6))
        .await;

    assert_eq!(batch.accounts(), 6);
    assert_eq!(batch.tasks_completed(), 6);
    let peak = peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak concurrency {}", peak);
}

#[tokio::test]
async fn test_accounts_beyond_threads_wait_between_starts() {
    let (_temp, ledger) = setup_ledger().await;
    let mut config = scheduler_config(1);
    config.settings.pause_between_accounts = PauseWindow::new(1, 1);
    let runner = build_runner(
        config,
        literal_spec(&["a"]),
        vec![Arc::new(ScriptedCapability::succeed("a")) as Arc<dyn Capability>],
        ledger,
        Arc::new(MockSessions::default()),
    );

    let started = std::time::Instant::now();
    let batch = AccountScheduler::new(runner, Arc::new(RecordingNotifier::default()))
        .run(accounts(2))
        .await;

    assert_eq!(batch.tasks_completed(), 2);
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_shutdown_before_run_starts_nothing() {
    let (_temp, ledger) = setup_ledger().await;
    let a = ScriptedCapability::succeed("a");
    let calls = a.counter();
    let runner = build_runner(
        scheduler_config(2),
        literal_spec(&["a"]),
        vec![Arc::new(a) as Arc<dyn Capability>],
        ledger,
        Arc::new(MockSessions::default()),
    );

    let shutdown = ShutdownCoordinator::new();
    shutdown.request_shutdown();
    let notifier = Arc::new(RecordingNotifier::default());
    let batch = AccountScheduler::new(runner, notifier.clone())
        .with_shutdown(shutdown)
        .run(accounts(3))
        .await;

    assert_eq!(batch.accounts(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(*notifier.batches.lock(), 1);
}

#[tokio::test]
async fn test_shutdown_stops_admission_but_finishes_running_account() {
    let (_temp, ledger) = setup_ledger().await;
    let shutdown = ShutdownCoordinator::new();
    let runner = build_runner(
        scheduler_config(1),
        literal_spec(&["trigger"]),
        vec![Arc::new(ShutdownTrigger {
            shutdown: shutdown.clone(),
        }) as Arc<dyn Capability>],
        ledger,
        Arc::new(MockSessions::default()),
    );

    let batch = AccountScheduler::new(runner, Arc::new(RecordingNotifier::default()))
        .with_shutdown(shutdown)
        .run(accounts(3))
        .await;

    assert_eq!(batch.accounts(), 1);
    let report = &batch.reports[0];
    assert_eq!(report.completed, vec!["trigger"]);
    assert_eq!(report.outcome, AccountOutcome::Finished);
}

#[tokio::test]
async fn test_seeded_shuffle_is_reproducible() {
    let mut orders = Vec::new();
    for _ in 0..2 {
        let (_temp, ledger) = setup_ledger().await;
        let recorder = OrderRecorder::default();
        let seen = recorder.seen.clone();
        let mut config = scheduler_config(1);
        config.settings.shuffle_wallets = true;
        let runner = build_runner(
            config,
            literal_spec(&["record"]),
            vec![Arc::new(recorder) as Arc<dyn Capability>],
            ledger,
            Arc::new(MockSessions::default()),
        );

        AccountScheduler::new(runner, Arc::new(RecordingNotifier::default()))
            .with_seed(42)
            .run(accounts(8))
            .await;

        let order = seen.lock().clone();
        orders.push(order);
    }

    assert_eq!(orders[0], orders[1]);
    let mut sorted = orders[0].clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (1..=8).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_shuffled_reports_keep_their_credentials() {
    let (_temp, ledger) = setup_ledger().await;
    let mut config = scheduler_config(3);
    config.settings.shuffle_wallets = true;
    let runner = build_runner(
        config,
        literal_spec(&["a"]),
        vec![Arc::new(ScriptedCapability::succeed("a")) as Arc<dyn Capability>],
        ledger.clone(),
        Arc::new(MockSessions::default()),
    );

    let batch = AccountScheduler::new(runner, Arc::new(RecordingNotifier::default()))
        .with_seed(9)
        .run(accounts(5))
        .await;

    let indices: Vec<_> = batch.reports.iter().map(|r| r.account).collect();
    assert_eq!(indices, vec![1, 2, 3, 4, 5]);
    for report in &batch.reports {
        let expected = account(report.account);
        assert_eq!(report.wallet, expected.identity.masked());
        let records = ledger.records(expected.identity.key()).await.unwrap();
        assert_eq!(records.len(), 1);
    }
}

#[tokio::test]
async fn test_panicking_notifier_keeps_account_report() {
    let (_temp, ledger) = setup_ledger().await;
    let runner = build_runner(
        scheduler_config(2),
        literal_spec(&["a"]),
        vec![Arc::new(ScriptedCapability::succeed("a")) as Arc<dyn Capability>],
        ledger,
        Arc::new(MockSessions::default()),
    );

    let batch = AccountScheduler::new(runner, Arc::new(PanickingNotifier { account: 2 }))
        .run(accounts(3))
        .await;

    assert_eq!(batch.accounts(), 3);
    let report = batch.report_for(2).unwrap();
    assert_eq!(report.outcome, AccountOutcome::Finished);
    assert_eq!(report.completed, vec!["a"]);
    assert_eq!(batch.tasks_completed(), 3);
}
