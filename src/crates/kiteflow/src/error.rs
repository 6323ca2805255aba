//! Error types for kiteflow
//!
//! Two layers of errors live here:
//!
//! - [`KiteflowError`] covers setup and invariant failures (configuration,
//!   ledger, planning, registry mismatches). These abort an account or the
//!   whole process.
//! - [`TaskError`] classifies a capability failure after it has been matched
//!   against the retry policy. Task errors never escape the task runner; they
//!   become ledger and report entries.

use thiserror::Error;

/// Result type alias for kiteflow operations
pub type Result<T> = std::result::Result<T, KiteflowError>;

/// Main error type for kiteflow operations
#[derive(Debug, Error)]
pub enum KiteflowError {
    /// Configuration error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// The progress table does not exist yet
    #[error("Progress ledger is not initialized: {0}")]
    LedgerUninitialized(String),

    /// Malformed task spec or reference to an unknown task
    #[error("Invalid task spec: {0}")]
    InvalidTaskSpec(String),

    /// A plan referenced a task with no registered capability
    #[error("Task not found in capability registry: {0}")]
    TaskNotFound(String),

    /// Authentication required by login-gated tasks failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Per-account session could not be opened
    #[error("Session error: {0}")]
    Session(String),

    /// Account source files could not be read or parsed
    #[error("Account error: {0}")]
    Account(String),

    /// A capability panicked or the account task was aborted
    #[error("Account run aborted: {0}")]
    Aborted(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// YAML task definition error
    #[error("Task definition error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// SQL error
    #[error("SQL error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// HTTP error outside of a capability call (notifications, session setup)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl KiteflowError {
    /// Whether this error signals a programming or registry mismatch bug
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::TaskNotFound(_))
    }

    /// Whether this error is a setup problem rather than a task failure
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::LedgerUninitialized(_) | Self::InvalidTaskSpec(_)
        )
    }
}

impl From<String> for KiteflowError {
    fn from(msg: String) -> Self {
        Self::Other(msg)
    }
}

impl From<&str> for KiteflowError {
    fn from(msg: &str) -> Self {
        Self::Other(msg.to_string())
    }
}

/// Error returned by a capability call before classification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CapabilityError {
    message: String,
}

impl CapabilityError {
    /// Create a capability error from a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The raw error text, used for terminal/transient matching
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for CapabilityError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for CapabilityError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<reqwest::Error> for CapabilityError {
    fn from(err: reqwest::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for CapabilityError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("Invalid JSON response: {}", err))
    }
}

/// Flavor of a retryable failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    /// Any failure not recognized more specifically
    General,
    /// Captcha solving or verification failed
    Captcha,
    /// Upstream rate limiting; backs off with the longer pause window
    RateLimited,
}

impl std::fmt::Display for TransientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::General => write!(f, "general"),
            Self::Captcha => write!(f, "captcha"),
            Self::RateLimited => write!(f, "rate_limited"),
        }
    }
}

/// Classified capability failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// Retryable failure
    #[error("transient task error ({kind}): {message}")]
    Transient { kind: TransientKind, message: String },

    /// Known non-retryable condition, e.g. an invalid long-lived credential
    #[error("terminal task error: {0}")]
    Terminal(String),
}

impl TaskError {
    /// The underlying error text
    pub fn message(&self) -> &str {
        match self {
            Self::Transient { message, .. } => message,
            Self::Terminal(message) => message,
        }
    }

    /// Whether retrying is pointless
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }

    /// Whether the failure was a rate limit
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Self::Transient {
                kind: TransientKind::RateLimited,
                ..
            }
        )
    }
}
