use crate::capability::{Capability, CapabilityResult, SKIP_TASK};
use crate::session::AccountSession;
use async_trait::async_trait;

/// The `skip` task. Registered so specs can name it; the runner never
/// dispatches it.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCapability;

#[async_trait]
impl Capability for NoopCapability {
    fn name(&self) -> &str {
        SKIP_TASK
    }

    async fn execute(&self, _session: &AccountSession) -> CapabilityResult {
        Ok(None)
    }
}
