//! Configuration loader with layered sources
//!
//! Loads configuration from:
//! 1. Default values
//! 2. User-level config: ~/.kiteflow/kiteflow.toml
//! 3. Project-level config: ./kiteflow.toml (or an explicit path)
//! 4. Environment overrides: KITEFLOW_THREADS, KITEFLOW_ATTEMPTS, KITEFLOW_DATABASE
//!
//! Files are merged key by key before deserializing, so a project file that
//! only sets `settings.threads` keeps every other user-level setting.

use crate::config::schema::KiteflowConfig;
use crate::config::{CONFIG_DIR, CONFIG_FILE};
use crate::error::{KiteflowError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Configuration loader that handles user and project configs
pub struct ConfigLoader {
    user_config_path: Option<PathBuf>,
    project_config_path: PathBuf,
}

impl ConfigLoader {
    /// Create a new config loader using the default locations
    pub fn new() -> Self {
        Self {
            user_config_path: dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE)),
            project_config_path: PathBuf::from(CONFIG_FILE),
        }
    }

    /// Create a loader that reads the project layer from an explicit path
    pub fn with_project_path(path: impl Into<PathBuf>) -> Self {
        Self {
            project_config_path: path.into(),
            ..Self::new()
        }
    }

    /// Load, merge, apply env overrides and validate
    pub async fn load(&self) -> Result<KiteflowConfig> {
        let mut merged = toml::Value::Table(toml::map::Map::new());

        if let Some(ref user_path) = self.user_config_path {
            if let Some(user) = Self::read_layer(user_path).await? {
                debug!(path = %user_path.display(), "Loaded user-level config");
                merge_values(&mut merged, user);
            }
        }

        match Self::read_layer(&self.project_config_path).await? {
            Some(project) => {
                debug!(path = %self.project_config_path.display(), "Loaded project-level config");
                merge_values(&mut merged, project);
            }
            None => {
                debug!(path = %self.project_config_path.display(), "Project-level config not found");
            }
        }

        let mut config = merged
            .try_into::<KiteflowConfig>()
            .map_err(|e| KiteflowError::Config(format!("Failed to parse config: {}", e)))?;

        Self::apply_env_overrides(&mut config)?;
        config.resolve_env_vars();
        config.validate()?;

        info!(
            threads = config.settings.threads,
            attempts = config.settings.attempts,
            presets = ?config.flow.tasks,
            "Configuration loaded"
        );
        Ok(config)
    }

    async fn read_layer(path: &Path) -> Result<Option<toml::Value>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            KiteflowError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        let value = toml::from_str::<toml::Value>(&content).map_err(|e| {
            KiteflowError::Config(format!("Failed to parse config {}: {}", path.display(), e))
        })?;

        Ok(Some(value))
    }

    fn apply_env_overrides(config: &mut KiteflowConfig) -> Result<()> {
        if let Ok(threads) = std::env::var("KITEFLOW_THREADS") {
            config.settings.threads = threads
                .parse()
                .map_err(|_| KiteflowError::Config(format!("KITEFLOW_THREADS is not a number: {}", threads)))?;
        }
        if let Ok(attempts) = std::env::var("KITEFLOW_ATTEMPTS") {
            config.settings.attempts = attempts
                .parse()
                .map_err(|_| KiteflowError::Config(format!("KITEFLOW_ATTEMPTS is not a number: {}", attempts)))?;
        }
        if let Ok(path) = std::env::var("KITEFLOW_DATABASE") {
            config.database.path = path;
        }
        Ok(())
    }

    /// User config path, if a home directory exists
    pub fn user_config_path(&self) -> Option<&Path> {
        self.user_config_path.as_deref()
    }

    /// Project config path
    pub fn project_config_path(&self) -> &Path {
        &self.project_config_path
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Recursively merge `overlay` into `base`; tables merge, other values replace
fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
