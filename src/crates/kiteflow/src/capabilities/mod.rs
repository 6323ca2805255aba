//! Built-in capabilities and the standard registry

mod endpoint;
mod login;
mod noop;

pub use endpoint::{interpret_response, EndpointCapability};
pub use login::{extract_token, LoginCapability};
pub use noop::NoopCapability;

use crate::capability::{CapabilityRegistry, LOGIN_TASK, SKIP_TASK, STANDARD_TASKS};
use crate::config::KiteflowConfig;
use crate::error::Result;
use tracing::debug;

/// Registry with `skip`, `login`, every standard task, and any extra
/// endpoint declared under `[capabilities]`
pub fn standard_registry(config: &KiteflowConfig) -> Result<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::new();
    registry.register(NoopCapability)?;
    registry.register(LoginCapability::from_config(config.capabilities.get(LOGIN_TASK)))?;

    for name in STANDARD_TASKS {
        registry.register(EndpointCapability::from_config(name, config.capabilities.get(*name)))?;
    }

    for (name, capability) in &config.capabilities {
        if registry.contains(name) || name == SKIP_TASK {
            continue;
        }
        registry.register(EndpointCapability::from_config(name, Some(capability)))?;
    }

    debug!(capabilities = registry.len(), "Capability registry built");
    Ok(registry)
}
