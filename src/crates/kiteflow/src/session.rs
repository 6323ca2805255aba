//! Per-account sessions
//!
//! An [`AccountSession`] bundles the account, its HTTP client (with the
//! account's proxy) and the bearer token obtained at login. The task runner
//! owns the session for the whole run and hands it back to the
//! [`SessionProvider`] on every exit path.

use crate::accounts::AccountConfig;
use crate::config::HttpConfig;
use crate::error::{KiteflowError, Result};
use crate::identity::WalletIdentity;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::time::Duration;
use tracing::debug;

/// Resources held for one account while its plan executes
#[derive(Debug)]
pub struct AccountSession {
    account: AccountConfig,
    client: reqwest::Client,
    base_url: Option<String>,
    auth_token: RwLock<Option<String>>,
}

impl AccountSession {
    pub fn new(account: AccountConfig, client: reqwest::Client, base_url: Option<String>) -> Self {
        Self {
            account,
            client,
            base_url,
            auth_token: RwLock::new(None),
        }
    }

    /// Session with a default client, for tests and offline capabilities
    pub fn detached(account: AccountConfig) -> Self {
        Self::new(account, reqwest::Client::new(), None)
    }

    pub fn account(&self) -> &AccountConfig {
        &self.account
    }

    pub fn identity(&self) -> &WalletIdentity {
        &self.account.identity
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Resolve an endpoint against the configured base URL; absolute URLs
    /// pass through unchanged
    pub fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        match &self.base_url {
            Some(base) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                endpoint.trim_start_matches('/')
            ),
            None => endpoint.to_string(),
        }
    }

    pub fn set_auth_token(&self, token: impl Into<String>) {
        *self.auth_token.write() = Some(token.into());
    }

    pub fn auth_token(&self) -> Option<String> {
        self.auth_token.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_token.read().is_some()
    }

    /// Attach the bearer token, if logged in
    pub fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Opens and releases per-account sessions
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Acquire the resources one account needs
    async fn open(&self, account: &AccountConfig) -> Result<AccountSession>;

    /// Release a session; called exactly once per successful `open`
    async fn release(&self, session: AccountSession);
}

/// Builds a reqwest client per account from `[http]`, routed through the
/// account's proxy
#[derive(Debug, Clone)]
pub struct HttpSessionProvider {
    http: HttpConfig,
}

impl HttpSessionProvider {
    pub fn new(http: HttpConfig) -> Self {
        Self { http }
    }

    fn build_client(&self, account: &AccountConfig) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.http.timeout_secs))
            .user_agent(self.http.user_agent.clone())
            .danger_accept_invalid_certs(self.http.skip_ssl_verification);

        if let Some(proxy) = &account.proxy {
            let proxy_url = if proxy.contains("://") {
                proxy.clone()
            } else {
                format!("http://{}", proxy)
            };
            let proxy = reqwest::Proxy::all(&proxy_url).map_err(|e| {
                KiteflowError::Session(format!("Invalid proxy for account {}: {}", account.index, e))
            })?;
            builder = builder.proxy(proxy);
        }

        builder
            .build()
            .map_err(|e| KiteflowError::Session(format!("Failed to build HTTP client: {}", e)))
    }
}

#[async_trait]
impl SessionProvider for HttpSessionProvider {
    async fn open(&self, account: &AccountConfig) -> Result<AccountSession> {
        let client = self.build_client(account)?;
        debug!(account = account.index, proxied = account.proxy.is_some(), "Session opened");
        Ok(AccountSession::new(account.clone(), client, self.http.base_url.clone()))
    }

    async fn release(&self, session: AccountSession) {
        debug!(account = session.account().index, "Session released");
        drop(session);
    }
}
