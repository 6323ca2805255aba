//! Build metadata injected by build.rs

/// Package version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build number (from CI or default to 0)
pub const BUILD_NUMBER: &str = env!("BUILD_NUMBER");

/// Git commit hash (short form)
pub const GIT_COMMIT: &str = env!("GIT_COMMIT");

/// Build timestamp (RFC3339 format)
pub const BUILD_TIMESTAMP: &str = env!("BUILD_TIMESTAMP");

/// Version line printed by `kiteflow version`
///
/// ```
/// let line = kiteflow::version::full_version();
/// assert!(line.starts_with("kiteflow v"));
/// ```
pub fn full_version() -> String {
    format!(
        "kiteflow v{} (build {}, commit {}, built {})",
        VERSION, BUILD_NUMBER, GIT_COMMIT, BUILD_TIMESTAMP
    )
}

pub fn short_version() -> String {
    format!("v{}", VERSION)
}
