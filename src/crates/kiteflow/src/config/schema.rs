//! Configuration schema for kiteflow

use crate::error::{KiteflowError, Result};
use crate::retry::{ErrorMatcher, PauseWindow, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Main kiteflow configuration
///
/// Built once at startup and shared read-only (behind an `Arc`) by the
/// scheduler, every task runner and the collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KiteflowConfig {
    /// Concurrency, attempts and pause windows
    #[serde(default)]
    pub settings: SettingsConfig,

    /// Task selection and failure handling
    #[serde(default)]
    pub flow: FlowConfig,

    /// Progress ledger database
    #[serde(default)]
    pub database: DatabaseConfig,

    /// HTTP client used by account sessions
    #[serde(default)]
    pub http: HttpConfig,

    /// Per-capability endpoint and retry overrides, keyed by task name
    #[serde(default)]
    pub capabilities: BTreeMap<String, CapabilityConfig>,

    /// Report delivery
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Input files
    #[serde(default)]
    pub files: FilesConfig,
}

/// Scheduling and retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Maximum accounts processed simultaneously
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Attempts per capability call
    #[serde(default = "default_attempts")]
    pub attempts: usize,

    /// Pause between attempts of the same call
    #[serde(default = "default_pause_between_attempts")]
    pub pause_between_attempts: PauseWindow,

    /// Pause after a rate-limited attempt
    #[serde(default = "default_rate_limit_pause")]
    pub rate_limit_pause: PauseWindow,

    /// Pause between tasks of one account
    #[serde(default = "default_pause_between_actions")]
    pub pause_between_actions: PauseWindow,

    /// Pause before starting each account beyond the first `threads`
    #[serde(default = "default_pause_between_accounts")]
    pub pause_between_accounts: PauseWindow,

    /// Pause before an account opens its session
    #[serde(default = "default_initialization_pause")]
    pub initialization_pause: PauseWindow,

    /// Shuffle account processing order
    #[serde(default = "default_shuffle_wallets")]
    pub shuffle_wallets: bool,

    /// 1-based inclusive account range; `[0, 0]` selects every account
    #[serde(default)]
    pub accounts_range: [usize; 2],

    /// Exact 1-based account indices; takes precedence over the range
    #[serde(default)]
    pub exact_accounts: Vec<usize>,
}

fn default_threads() -> usize {
    1
}

fn default_attempts() -> usize {
    5
}

fn default_pause_between_attempts() -> PauseWindow {
    PauseWindow::new(3, 10)
}

fn default_rate_limit_pause() -> PauseWindow {
    PauseWindow::new(30, 60)
}

fn default_pause_between_actions() -> PauseWindow {
    PauseWindow::new(5, 15)
}

fn default_pause_between_accounts() -> PauseWindow {
    PauseWindow::new(10, 30)
}

fn default_initialization_pause() -> PauseWindow {
    PauseWindow::new(1, 5)
}

fn default_shuffle_wallets() -> bool {
    true
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            attempts: default_attempts(),
            pause_between_attempts: default_pause_between_attempts(),
            rate_limit_pause: default_rate_limit_pause(),
            pause_between_actions: default_pause_between_actions(),
            pause_between_accounts: default_pause_between_accounts(),
            initialization_pause: default_initialization_pause(),
            shuffle_wallets: default_shuffle_wallets(),
            accounts_range: [0, 0],
            exact_accounts: Vec::new(),
        }
    }
}

/// Task flow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Preset names from the task definitions file, concatenated in order
    #[serde(default)]
    pub tasks: Vec<String>,

    /// Continue with the next task after a failure instead of stopping
    #[serde(default)]
    pub skip_failed_tasks: bool,

    /// Stop offering a task after it failed this many runs (unbounded if unset)
    #[serde(default)]
    pub max_failed_runs: Option<u32>,

    /// Tasks that need the account to be logged in first
    #[serde(default = "default_login_required")]
    pub login_required: Vec<String>,
}

fn default_login_required() -> Vec<String> {
    [
        "faucet",
        "faucet_onchain",
        "connect_socials",
        "complete_quiz",
        "account_info",
        "ozone_staking",
        "ozone_ai_chat",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            skip_failed_tasks: false,
            max_failed_runs: None,
            login_required: default_login_required(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file path (relative to ~/.kiteflow or absolute)
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Connection pool size
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    "kiteflow.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// HTTP client configuration for account sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Base URL prepended to relative capability endpoints
    #[serde(default)]
    pub base_url: Option<String>,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Accept invalid TLS certificates
    #[serde(default)]
    pub skip_ssl_verification: bool,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            base_url: None,
            user_agent: default_user_agent(),
            skip_ssl_verification: false,
        }
    }
}

/// HTTP method for endpoint capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
}

/// Per-capability configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CapabilityConfig {
    /// Endpoint URL (absolute, or relative to `http.base_url`)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// HTTP method
    #[serde(default)]
    pub method: HttpMethod,

    /// Response body substrings that count as success even on error status
    #[serde(default)]
    pub success_markers: Vec<String>,

    /// Error substrings that stop retrying immediately
    #[serde(default)]
    pub terminal_errors: Vec<String>,

    /// Error regexes that stop retrying immediately
    #[serde(default)]
    pub terminal_patterns: Vec<String>,

    /// Attempt override for this capability
    #[serde(default)]
    pub attempts: Option<usize>,

    /// Re-raise the final error after attempts are exhausted
    #[serde(default)]
    pub must_propagate: bool,

    /// JSON pointer to the access token in a login response
    #[serde(default)]
    pub token_pointer: Option<String>,

    /// Add the account's Twitter and Discord tokens to the request body;
    /// on by default for `connect_socials`
    #[serde(default)]
    pub send_social_tokens: Option<bool>,
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Send reports to Telegram
    #[serde(default)]
    pub telegram_enabled: bool,

    /// Bot token (supports ${VAR} interpolation)
    #[serde(default)]
    pub bot_token: String,

    /// Chat ids receiving reports
    #[serde(default)]
    pub chat_ids: Vec<i64>,

    /// Telegram API base URL
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            telegram_enabled: false,
            bot_token: String::new(),
            chat_ids: Vec::new(),
            api_base: default_telegram_api_base(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "compact", "pretty", "json"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable colored output
    #[serde(default = "default_true")]
    pub colored: bool,

    /// Show timestamps
    #[serde(default = "default_true")]
    pub timestamps: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            colored: true,
            timestamps: true,
        }
    }
}

/// Input file locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    /// One account secret per line
    #[serde(default = "default_private_keys")]
    pub private_keys: PathBuf,

    /// One proxy URL per line, assigned cyclically
    #[serde(default = "default_proxies")]
    pub proxies: PathBuf,

    /// Twitter tokens by account position
    #[serde(default = "default_twitter_tokens")]
    pub twitter_tokens: PathBuf,

    /// Discord tokens by account position
    #[serde(default = "default_discord_tokens")]
    pub discord_tokens: PathBuf,

    /// YAML task preset definitions
    #[serde(default = "default_task_definitions")]
    pub task_definitions: PathBuf,
}

fn default_private_keys() -> PathBuf {
    PathBuf::from("data/private_keys.txt")
}

fn default_proxies() -> PathBuf {
    PathBuf::from("data/proxies.txt")
}

fn default_twitter_tokens() -> PathBuf {
    PathBuf::from("data/twitter_tokens.txt")
}

fn default_discord_tokens() -> PathBuf {
    PathBuf::from("data/discord_tokens.txt")
}

fn default_task_definitions() -> PathBuf {
    PathBuf::from("tasks.yaml")
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            private_keys: default_private_keys(),
            proxies: default_proxies(),
            twitter_tokens: default_twitter_tokens(),
            discord_tokens: default_discord_tokens(),
            task_definitions: default_task_definitions(),
        }
    }
}

impl KiteflowConfig {
    /// Resolve environment variables in configuration values
    ///
    /// Supports ${VAR_NAME} syntax in secret fields
    pub fn resolve_env_vars(&mut self) {
        self.notifications.bot_token = Self::expand_env_var(&self.notifications.bot_token);
        if let Some(ref base_url) = self.http.base_url {
            self.http.base_url = Some(Self::expand_env_var(base_url));
        }
    }

    fn expand_env_var(value: &str) -> String {
        if value.starts_with("${") && value.ends_with('}') {
            let var_name = &value[2..value.len() - 1];
            std::env::var(var_name).unwrap_or_else(|_| value.to_string())
        } else {
            value.to_string()
        }
    }

    /// Check invariants that must hold before any account runs
    pub fn validate(&self) -> Result<()> {
        let settings = &self.settings;
        if settings.threads == 0 {
            return Err(KiteflowError::Config("settings.threads must be at least 1".to_string()));
        }
        if settings.attempts == 0 {
            return Err(KiteflowError::Config("settings.attempts must be at least 1".to_string()));
        }

        let windows = [
            ("pause_between_attempts", settings.pause_between_attempts),
            ("rate_limit_pause", settings.rate_limit_pause),
            ("pause_between_actions", settings.pause_between_actions),
            ("pause_between_accounts", settings.pause_between_accounts),
            ("initialization_pause", settings.initialization_pause),
        ];
        for (name, window) in windows {
            if !window.is_valid() {
                return Err(KiteflowError::Config(format!(
                    "settings.{} has min greater than max: {}",
                    name, window
                )));
            }
        }

        let [start, end] = settings.accounts_range;
        if start > end {
            return Err(KiteflowError::Config(format!(
                "settings.accounts_range start {} is after end {}",
                start, end
            )));
        }

        if self.flow.tasks.is_empty() {
            return Err(KiteflowError::Config(
                "flow.tasks must select at least one task preset".to_string(),
            ));
        }

        if self.notifications.telegram_enabled
            && (self.notifications.bot_token.is_empty() || self.notifications.chat_ids.is_empty())
        {
            return Err(KiteflowError::Config(
                "notifications.telegram_enabled requires bot_token and chat_ids".to_string(),
            ));
        }

        for (name, capability) in &self.capabilities {
            if capability.attempts == Some(0) {
                return Err(KiteflowError::Config(format!(
                    "capabilities.{}.attempts must be at least 1",
                    name
                )));
            }
            for pattern in &capability.terminal_patterns {
                regex::Regex::new(pattern).map_err(|e| {
                    KiteflowError::Config(format!(
                        "capabilities.{}.terminal_patterns: {}",
                        name, e
                    ))
                })?;
            }
        }

        Ok(())
    }

    /// Retry policy for a task, applying per-capability overrides
    pub fn retry_policy_for(&self, task_name: &str) -> Result<RetryPolicy> {
        let mut policy = RetryPolicy::new(self.settings.attempts)
            .with_pause(self.settings.pause_between_attempts)
            .with_rate_limit_pause(self.settings.rate_limit_pause);

        if let Some(capability) = self.capabilities.get(task_name) {
            if let Some(attempts) = capability.attempts {
                policy = RetryPolicy::new(attempts)
                    .with_pause(self.settings.pause_between_attempts)
                    .with_rate_limit_pause(self.settings.rate_limit_pause);
            }
            policy = policy
                .with_terminal_matchers(
                    capability
                        .terminal_errors
                        .iter()
                        .map(|s| ErrorMatcher::contains(s.as_str())),
                )
                .must_propagate(capability.must_propagate);
            for pattern in &capability.terminal_patterns {
                let matcher = ErrorMatcher::pattern(pattern).map_err(|e| {
                    KiteflowError::Config(format!("Invalid terminal pattern for {}: {}", task_name, e))
                })?;
                policy = policy.with_terminal_matcher(matcher);
            }
        }

        Ok(policy)
    }

    /// Whether a task needs the account to be logged in
    pub fn requires_login(&self, task_name: &str) -> bool {
        self.flow
            .login_required
            .iter()
            .any(|name| name.eq_ignore_ascii_case(task_name))
    }

    /// Get the resolved database path
    ///
    /// If path is relative, resolves it relative to ~/.kiteflow
    pub fn database_path(&self) -> Result<PathBuf> {
        let path = PathBuf::from(&self.database.path);

        if path.is_absolute() {
            Ok(path)
        } else {
            let home = dirs::home_dir()
                .ok_or_else(|| KiteflowError::Config("Cannot determine home directory".to_string()))?;
            Ok(home.join(super::CONFIG_DIR).join(path))
        }
    }
}
