//! Plan preview command handler

use crate::capabilities::standard_registry;
use crate::capability::CapabilityRegistry;
use crate::config::KiteflowConfig;
use crate::error::Result;
use crate::grammar::{TaskDefinitions, TaskSpec};
use colored::Colorize;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Load the selected presets and check them against the standard registry
pub async fn load_spec(config: &KiteflowConfig) -> Result<(TaskSpec, CapabilityRegistry)> {
    let definitions = TaskDefinitions::load(&config.files.task_definitions).await?;
    let spec = definitions.spec_for(&config.flow.tasks)?;
    let registry = standard_registry(config)?;
    registry.validate_spec(&spec)?;
    Ok((spec, registry))
}

/// Handle plan command: resolve one plan and print it without running
pub async fn handle_plan(config: &KiteflowConfig, seed: Option<u64>) -> Result<()> {
    let (spec, registry) = load_spec(config).await?;
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let plan = registry.grammar().resolve(&spec, &mut rng)?;

    println!("{} {}", "Spec:".bold(), spec.name);
    for (position, task) in plan.iter().enumerate() {
        let login = if config.requires_login(task) {
            " (login)".dimmed().to_string()
        } else {
            String::new()
        };
        println!("{:>3}. {}{}", position + 1, task.cyan(), login);
    }
    Ok(())
}
