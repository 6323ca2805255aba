//! Configuration management for kiteflow
//!
//! Supports layered configuration:
//! - User-level: ~/.kiteflow/kiteflow.toml
//! - Project-level: ./kiteflow.toml (or `--config <path>`)
//!
//! Project-level values override user-level values key by key.

mod loader;
mod schema;

pub use loader::ConfigLoader;
pub use schema::{
    CapabilityConfig, DatabaseConfig, FilesConfig, FlowConfig, HttpConfig, HttpMethod, KiteflowConfig,
    LoggingConfig, NotificationConfig, SettingsConfig,
};

use crate::Result;
use std::path::PathBuf;

/// Default configuration directory name under the home directory
pub const CONFIG_DIR: &str = ".kiteflow";

/// Default configuration file name
pub const CONFIG_FILE: &str = "kiteflow.toml";

/// Load configuration from the default locations, or from `path` for the
/// project layer when given
pub async fn load_config(path: Option<PathBuf>) -> Result<KiteflowConfig> {
    let loader = match path {
        Some(path) => ConfigLoader::with_project_path(path),
        None => ConfigLoader::new(),
    };
    loader.load().await
}
