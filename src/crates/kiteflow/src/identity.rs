//! Wallet identity derived from an account secret
//!
//! The ledger is keyed by a SHA-256 digest of the secret, so progress
//! survives restarts without ever persisting or logging the secret itself.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable ledger key for one wallet
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletIdentity(String);

impl WalletIdentity {
    /// Derive the identity from an account secret
    pub fn from_secret(secret: &str) -> Self {
        let digest = Sha256::digest(secret.trim().as_bytes());
        let key = digest.iter().map(|byte| format!("{:02x}", byte)).collect::<String>();
        Self(key)
    }

    /// Wrap an already-derived key (as read back from the ledger)
    pub fn from_key(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Full hex key
    pub fn key(&self) -> &str {
        &self.0
    }

    /// Shortened key for logs and reports
    pub fn masked(&self) -> String {
        if self.0.len() <= 10 {
            return self.0.clone();
        }
        format!("{}...{}", &self.0[..6], &self.0[self.0.len() - 4..])
    }
}

impl std::fmt::Display for WalletIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.masked())
    }
}
