//! Generic HTTP endpoint capability
//!
//! Sends one request per attempt and maps the response to success or a
//! capability error. Bodies containing a configured success marker (for
//! example "Already claimed today") count as success whatever the status.

use crate::capability::{Capability, CapabilityResult, CONNECT_SOCIALS_TASK};
use crate::config::{CapabilityConfig, HttpMethod};
use crate::error::CapabilityError;
use crate::session::AccountSession;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

/// Capability backed by a single HTTP call
#[derive(Debug, Clone)]
pub struct EndpointCapability {
    name: String,
    endpoint: String,
    method: HttpMethod,
    success_markers: Vec<String>,
    send_social_tokens: bool,
}

impl EndpointCapability {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            send_social_tokens: name == CONNECT_SOCIALS_TASK,
            name,
            endpoint: endpoint.into(),
            method: HttpMethod::Post,
            success_markers: Vec::new(),
        }
    }

    /// Build from `[capabilities.<name>]`; the endpoint defaults to `/<name>`
    pub fn from_config(name: &str, config: Option<&CapabilityConfig>) -> Self {
        let mut capability = Self::new(name, format!("/{}", name));
        if let Some(config) = config {
            if let Some(endpoint) = &config.endpoint {
                capability.endpoint = endpoint.clone();
            }
            capability.method = config.method;
            capability.success_markers = config.success_markers.clone();
            if let Some(send) = config.send_social_tokens {
                capability.send_social_tokens = send;
            }
        }
        capability
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// JSON body for POST requests: the wallet key, plus social tokens when enabled
    fn request_body(&self, session: &AccountSession) -> Value {
        let mut body = serde_json::json!({ "wallet_key": session.identity().key() });
        if self.send_social_tokens {
            let account = session.account();
            body["twitter_token"] = serde_json::json!(account.twitter_token);
            body["discord_token"] = serde_json::json!(account.discord_token);
        }
        body
    }

    fn interpret(&self, status: StatusCode, body: &str) -> CapabilityResult {
        interpret_response(status, body, &self.success_markers)
    }
}

#[async_trait]
impl Capability for EndpointCapability {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, session: &AccountSession) -> CapabilityResult {
        let url = session.url(&self.endpoint);
        let request = match self.method {
            HttpMethod::Get => session.client().get(&url),
            HttpMethod::Post => session
                .client()
                .post(&url)
                .json(&self.request_body(session)),
        };

        let response = session.authorize(request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        debug!(task = %self.name, status = status.as_u16(), "Endpoint responded");
        self.interpret(status, &body)
    }
}

/// Map an HTTP response to a capability result
pub fn interpret_response(status: StatusCode, body: &str, success_markers: &[String]) -> CapabilityResult {
    if success_markers.iter().any(|marker| body.contains(marker.as_str())) {
        return Ok(Some(Value::String(body.to_string())));
    }

    if !status.is_success() {
        let reason = status.canonical_reason().unwrap_or("");
        return Err(CapabilityError::new(format!(
            "HTTP {} {}: {}",
            status.as_u16(),
            reason,
            truncate(body, 300)
        )));
    }

    if body.trim().is_empty() {
        return Ok(None);
    }

    match serde_json::from_str::<Value>(body) {
        Ok(json) => Ok(Some(json)),
        Err(_) => Ok(Some(Value::String(body.to_string()))),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
