//! Capability trait and registry
//!
//! A capability is the external operation a task name maps to. The registry
//! is built once at startup, validated against every loaded task spec, and
//! then shared read-only by all task runners.

use crate::error::{CapabilityError, KiteflowError, Result};
use crate::grammar::{TaskGrammar, TaskSpec};
use crate::session::AccountSession;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Optional JSON payload returned by a successful capability
pub type TaskOutput = Option<serde_json::Value>;

/// Result of one capability call
pub type CapabilityResult = std::result::Result<TaskOutput, CapabilityError>;

/// Name of the no-op task that advances the plan without doing anything
pub const SKIP_TASK: &str = "skip";

/// Name of the capability that authenticates an account
pub const LOGIN_TASK: &str = "login";

/// Name of the task that links social accounts and needs their tokens
pub const CONNECT_SOCIALS_TASK: &str = "connect_socials";

/// Task names every standard registry provides
pub const STANDARD_TASKS: &[&str] = &[
    "faucet",
    "faucet_onchain",
    CONNECT_SOCIALS_TASK,
    "complete_quiz",
    "account_info",
    "ozone_staking",
    "claim_badges",
    "ozone_ai_chat",
    "tesseract_swaps",
    "kite_bridge",
];

/// An external operation a task dispatches to
#[async_trait]
pub trait Capability: Send + Sync {
    /// Registry name
    fn name(&self) -> &str;

    /// Run once against an account session
    async fn execute(&self, session: &AccountSession) -> CapabilityResult;
}

/// Task name to capability table
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<String, Arc<dyn Capability>>,
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.capabilities.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability under its own name
    pub fn register<C: Capability + 'static>(&mut self, capability: C) -> Result<()> {
        self.register_arc(Arc::new(capability))
    }

    /// Register a shared capability; duplicate names are rejected
    pub fn register_arc(&mut self, capability: Arc<dyn Capability>) -> Result<()> {
        let name = capability.name().to_string();
        if self.capabilities.contains_key(&name) {
            return Err(KiteflowError::Config(format!(
                "Capability '{}' already registered",
                name
            )));
        }
        self.capabilities.insert(name, capability);
        Ok(())
    }

    /// Look up a capability; a miss is an invariant violation
    pub fn get(&self, name: &str) -> Result<Arc<dyn Capability>> {
        self.capabilities
            .get(name)
            .cloned()
            .ok_or_else(|| KiteflowError::TaskNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.capabilities.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Grammar accepting exactly the registered names
    pub fn grammar(&self) -> TaskGrammar {
        TaskGrammar::new(self.names())
    }

    /// Startup check that a spec only references registered names
    pub fn validate_spec(&self, spec: &TaskSpec) -> Result<()> {
        self.grammar().validate(spec)
    }
}
