//! Common test utilities and setup

#![allow(dead_code)]

use async_trait::async_trait;
use kiteflow::capabilities::NoopCapability;
use kiteflow::{
    AccountConfig, AccountSession, Capability, CapabilityError, CapabilityRegistry,
    CapabilityResult, Database, KiteflowConfig, PauseWindow, ProgressLedger, SessionProvider,
    TaskElement, TaskRunner, TaskSpec,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

static TEST_DB_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Create a migrated ledger database with a unique name
pub async fn setup_test_db() -> (TempDir, Arc<Database>) {
    let (temp_dir, db) = setup_uninitialized_db().await;
    db.run_migrations().await.expect("Failed to migrate test database");
    (temp_dir, db)
}

/// Create a database file without running migrations
pub async fn setup_uninitialized_db() -> (TempDir, Arc<Database>) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    let counter = TEST_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    let db_path = temp_dir.path().join(format!("test_{}.db", counter));

    let db = Database::new(&db_path)
        .await
        .expect("Failed to create test database");

    (temp_dir, Arc::new(db))
}

pub async fn setup_ledger() -> (TempDir, ProgressLedger) {
    let (temp_dir, db) = setup_test_db().await;
    (temp_dir, ProgressLedger::new(db))
}

/// Config with every pause disabled, no login requirements and 3 attempts
pub fn test_config() -> KiteflowConfig {
    let mut config = KiteflowConfig::default();
    config.settings.threads = 1;
    config.settings.attempts = 3;
    config.settings.pause_between_attempts = PauseWindow::zero();
    config.settings.rate_limit_pause = PauseWindow::zero();
    config.settings.pause_between_actions = PauseWindow::zero();
    config.settings.pause_between_accounts = PauseWindow::zero();
    config.settings.initialization_pause = PauseWindow::zero();
    config.settings.shuffle_wallets = false;
    config.flow.tasks = vec!["test".to_string()];
    config.flow.login_required = Vec::new();
    config
}

pub fn literal_spec(names: &[&str]) -> TaskSpec {
    TaskSpec::new("test", names.iter().map(|name| TaskElement::literal(*name)).collect())
}

pub fn account(index: usize) -> AccountConfig {
    AccountConfig::new(index, format!("0x{:064x}", index))
}

/// Behaviour of a scripted capability call
#[derive(Debug, Clone)]
pub enum Script {
    Succeed,
    /// Fail this many calls, then succeed
    FailTimes(usize, String),
    AlwaysFail(String),
    Panic,
}

/// Capability that follows a script and counts calls
pub struct ScriptedCapability {
    name: String,
    script: Script,
    calls: Arc<AtomicUsize>,
}

impl ScriptedCapability {
    pub fn new(name: &str, script: Script) -> Self {
        Self {
            name: name.to_string(),
            script,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn succeed(name: &str) -> Self {
        Self::new(name, Script::Succeed)
    }

    pub fn fail_times(name: &str, times: usize, error: &str) -> Self {
        Self::new(name, Script::FailTimes(times, error.to_string()))
    }

    pub fn always_fail(name: &str, error: &str) -> Self {
        Self::new(name, Script::AlwaysFail(error.to_string()))
    }

    pub fn panicking(name: &str) -> Self {
        Self::new(name, Script::Panic)
    }

    /// Shared call counter, readable after the capability moves into a registry
    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Capability for ScriptedCapability {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _session: &AccountSession) -> CapabilityResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Succeed => Ok(Some(serde_json::json!({ "task": self.name }))),
            Script::FailTimes(times, error) if call < *times => Err(CapabilityError::new(error.clone())),
            Script::FailTimes(..) => Ok(None),
            Script::AlwaysFail(error) => Err(CapabilityError::new(error.clone())),
            Script::Panic => panic!("{} exploded", self.name),
        }
    }
}

/// Panics for one account index, succeeds for every other
pub struct PanicForAccount {
    pub name: String,
    pub account: usize,
}

#[async_trait]
impl Capability for PanicForAccount {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, session: &AccountSession) -> CapabilityResult {
        if session.account().index == self.account {
            panic!("account {} hit a bug", self.account);
        }
        Ok(None)
    }
}

/// Tracks the peak number of simultaneous calls
pub struct ConcurrencyProbe {
    pub name: String,
    pub hold: Duration,
    pub active: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
}

impl ConcurrencyProbe {
    pub fn new(name: &str, hold: Duration) -> Self {
        Self {
            name: name.to_string(),
            hold,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Capability for ConcurrencyProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _session: &AccountSession) -> CapabilityResult {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(None)
    }
}

/// Session provider that hands out detached sessions and counts them
#[derive(Default)]
pub struct MockSessions {
    pub opened: AtomicUsize,
    pub released: AtomicUsize,
    pub fail_open: bool,
}

impl MockSessions {
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Default::default()
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionProvider for MockSessions {
    async fn open(&self, account: &AccountConfig) -> kiteflow::Result<AccountSession> {
        if self.fail_open {
            return Err(kiteflow::KiteflowError::Session("proxy unreachable".to_string()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(AccountSession::detached(account.clone()))
    }

    async fn release(&self, _session: AccountSession) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Registry with `skip` plus the given capabilities
pub fn registry(capabilities: Vec<Arc<dyn Capability>>) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry.register(NoopCapability).expect("register skip");
    for capability in capabilities {
        registry.register_arc(capability).expect("register capability");
    }
    registry
}

pub fn build_runner(
    config: KiteflowConfig,
    spec: TaskSpec,
    capabilities: Vec<Arc<dyn Capability>>,
    ledger: ProgressLedger,
    sessions: Arc<MockSessions>,
) -> TaskRunner {
    TaskRunner::new(
        Arc::new(config),
        Arc::new(spec),
        Arc::new(registry(capabilities)),
        ledger,
        sessions,
    )
    .expect("Failed to build runner")
}
