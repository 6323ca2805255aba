//! Report delivery
//!
//! The scheduler hands every finished [`RunReport`] to a [`Notifier`], and
//! the batch summary once all accounts are done. Delivery failures are
//! logged by the caller and never affect the run.

use crate::config::NotificationConfig;
use crate::error::{KiteflowError, Result};
use crate::report::{BatchReport, RunReport};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Receives run reports
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Called once per finished account
    async fn account_report(&self, report: &RunReport) -> Result<()>;

    /// Called once after the whole batch
    async fn batch_report(&self, batch: &BatchReport) -> Result<()>;
}

/// Writes reports to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn account_report(&self, report: &RunReport) -> Result<()> {
        if report.is_success() {
            info!(
                account = report.account,
                wallet = %report.wallet,
                completed = report.completed.len(),
                skipped = report.skipped.len(),
                success_rate = report.success_rate(),
                "Account report"
            );
        } else {
            warn!(
                account = report.account,
                wallet = %report.wallet,
                completed = ?report.completed,
                failed = ?report.failed,
                exhausted = ?report.exhausted,
                reason = ?report.outcome.reason(),
                success_rate = report.success_rate(),
                "Account report"
            );
        }
        Ok(())
    }

    async fn batch_report(&self, batch: &BatchReport) -> Result<()> {
        info!(
            accounts = batch.accounts(),
            ok = batch.successful_accounts(),
            failed = batch.failed_accounts(),
            "{}",
            batch.summary()
        );
        Ok(())
    }
}

/// Sends reports to Telegram chats through the Bot API
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
    chat_ids: Vec<i64>,
}

impl TelegramNotifier {
    pub fn new(config: &NotificationConfig) -> Result<Self> {
        if config.bot_token.is_empty() || config.chat_ids.is_empty() {
            return Err(KiteflowError::Config(
                "Telegram notifications need a bot_token and at least one chat id".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            chat_ids: config.chat_ids.clone(),
        })
    }

    fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }

    /// Deliver to every chat; a failing chat does not stop the rest
    async fn send(&self, text: &str) -> Result<()> {
        let url = self.send_message_url();
        let mut first_error = None;
        for chat_id in &self.chat_ids {
            match self.send_to(&url, *chat_id, text).await {
                Ok(()) => debug!(chat_id, "Telegram message sent"),
                Err(e) => {
                    warn!(chat_id, error = %e, "Telegram delivery failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn send_to(&self, url: &str, chat_id: i64, text: &str) -> Result<()> {
        // The URL carries the bot token and must never reach an error message
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await
            .map_err(|e| {
                KiteflowError::Other(format!(
                    "Telegram sendMessage to {} failed: {}",
                    chat_id,
                    e.without_url()
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KiteflowError::Other(format!(
                "Telegram sendMessage to {} failed with HTTP {}: {}",
                chat_id, status, body
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn account_report(&self, report: &RunReport) -> Result<()> {
        self.send(&report.to_message()).await
    }

    async fn batch_report(&self, batch: &BatchReport) -> Result<()> {
        self.send(&batch.summary()).await
    }
}

/// Fan-out to several notifiers; every one is tried, the first error wins
pub struct CompositeNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl CompositeNotifier {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }
}

#[async_trait]
impl Notifier for CompositeNotifier {
    async fn account_report(&self, report: &RunReport) -> Result<()> {
        let mut first_error = None;
        for notifier in &self.notifiers {
            if let Err(e) = notifier.account_report(report).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn batch_report(&self, batch: &BatchReport) -> Result<()> {
        let mut first_error = None;
        for notifier in &self.notifiers {
            if let Err(e) = notifier.batch_report(batch).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Log notifier, plus Telegram when enabled
pub fn notifier_from_config(config: &NotificationConfig) -> Result<Arc<dyn Notifier>> {
    if !config.telegram_enabled {
        return Ok(Arc::new(LogNotifier));
    }
    let telegram: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(config)?);
    let log: Arc<dyn Notifier> = Arc::new(LogNotifier);
    Ok(Arc::new(CompositeNotifier::new(vec![log, telegram])))
}
