//! Account loading and selection
//!
//! Accounts come from a plain text file with one secret per line. Proxies are
//! assigned cyclically, social tokens by position. Selection honors
//! `settings.exact_accounts` first, then `settings.accounts_range`.

use crate::config::{FilesConfig, SettingsConfig};
use crate::error::{KiteflowError, Result};
use crate::identity::WalletIdentity;
use std::path::Path;
use tracing::{debug, info, warn};

/// One credential-bearing account
#[derive(Clone)]
pub struct AccountConfig {
    /// 1-based position in the secrets file
    pub index: usize,
    /// Ledger identity derived from the secret
    pub identity: WalletIdentity,
    /// Proxy URL for this account's session
    pub proxy: Option<String>,
    /// Twitter auth token, if provided
    pub twitter_token: Option<String>,
    /// Discord auth token, if provided
    pub discord_token: Option<String>,
}

impl AccountConfig {
    /// Create an account from its secret
    pub fn new(index: usize, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        Self {
            index,
            identity: WalletIdentity::from_secret(&secret),
            proxy: None,
            twitter_token: None,
            discord_token: None,
        }
    }

    /// Attach a proxy
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }
}

impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("index", &self.index)
            .field("identity", &self.identity.masked())
            .field("proxy", &self.proxy.is_some())
            .field("twitter_token", &self.twitter_token.is_some())
            .field("discord_token", &self.discord_token.is_some())
            .finish()
    }
}

/// Load and select accounts from the configured files
pub async fn load_accounts(files: &FilesConfig, settings: &SettingsConfig) -> Result<Vec<AccountConfig>> {
    let secrets = read_lines(&files.private_keys).await?;
    if secrets.is_empty() {
        return Err(KiteflowError::Account(format!(
            "No account secrets found in {}",
            files.private_keys.display()
        )));
    }

    let proxies = read_optional_lines(&files.proxies).await?;
    let twitter = read_optional_lines(&files.twitter_tokens).await?;
    let discord = read_optional_lines(&files.discord_tokens).await?;

    if proxies.is_empty() {
        warn!("No proxies configured, accounts will connect directly");
    }

    let accounts = secrets
        .into_iter()
        .enumerate()
        .map(|(position, secret)| {
            let mut account = AccountConfig::new(position + 1, secret);
            if !proxies.is_empty() {
                account.proxy = Some(proxies[position % proxies.len()].clone());
            }
            account.twitter_token = twitter.get(position).cloned();
            account.discord_token = discord.get(position).cloned();
            account
        })
        .collect::<Vec<_>>();

    let selected = select_accounts(accounts, settings)?;
    info!(count = selected.len(), "Accounts selected");
    Ok(selected)
}

/// Apply exact-index or range selection
pub fn select_accounts(accounts: Vec<AccountConfig>, settings: &SettingsConfig) -> Result<Vec<AccountConfig>> {
    let total = accounts.len();

    if !settings.exact_accounts.is_empty() {
        if let Some(missing) = settings
            .exact_accounts
            .iter()
            .find(|&&index| index == 0 || index > total)
        {
            return Err(KiteflowError::Account(format!(
                "exact_accounts references account {} but only {} are loaded",
                missing, total
            )));
        }
        return Ok(accounts
            .into_iter()
            .filter(|account| settings.exact_accounts.contains(&account.index))
            .collect());
    }

    match settings.accounts_range {
        [0, 0] => Ok(accounts),
        [start, end] => {
            if start == 0 || start > total {
                return Err(KiteflowError::Account(format!(
                    "accounts_range starts at {} but only {} accounts are loaded",
                    start, total
                )));
            }
            let end = end.min(total);
            debug!(start, end, "Selecting account range");
            Ok(accounts
                .into_iter()
                .filter(|account| account.index >= start && account.index <= end)
                .collect())
        }
    }
}

async fn read_lines(path: &Path) -> Result<Vec<String>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| KiteflowError::Account(format!("Failed to read {}: {}", path.display(), e)))?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

async fn read_optional_lines(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    read_lines(path).await
}
