//! Account authentication
//!
//! Posts the wallet identity to the login endpoint and stores the returned
//! access token on the session, so every later endpoint call carries it as
//! a bearer token.

use crate::capability::{Capability, CapabilityResult, LOGIN_TASK};
use crate::config::CapabilityConfig;
use crate::error::CapabilityError;
use crate::session::AccountSession;
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

const DEFAULT_TOKEN_POINTER: &str = "/data/access_token";

#[derive(Debug, Clone)]
pub struct LoginCapability {
    endpoint: String,
    token_pointer: String,
}

impl LoginCapability {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token_pointer: DEFAULT_TOKEN_POINTER.to_string(),
        }
    }

    pub fn from_config(config: Option<&CapabilityConfig>) -> Self {
        let mut login = Self::new("/auth");
        if let Some(config) = config {
            if let Some(endpoint) = &config.endpoint {
                login.endpoint = endpoint.clone();
            }
            if let Some(pointer) = &config.token_pointer {
                login.token_pointer = pointer.clone();
            }
        }
        login
    }

    fn extract_token(&self, response: &Value) -> Result<String, CapabilityError> {
        extract_token(response, &self.token_pointer)
    }
}

#[async_trait]
impl Capability for LoginCapability {
    fn name(&self) -> &str {
        LOGIN_TASK
    }

    async fn execute(&self, session: &AccountSession) -> CapabilityResult {
        let response = session
            .client()
            .post(session.url(&self.endpoint))
            .json(&serde_json::json!({ "wallet_key": session.identity().key() }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CapabilityError::new(format!(
                "Login failed with HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let json: Value = serde_json::from_str(&body)?;
        let token = self.extract_token(&json)?;
        session.set_auth_token(token);

        info!(account = session.account().index, "Logged in");
        Ok(Some(json))
    }
}

/// Read a non-empty string token at a JSON pointer
pub fn extract_token(response: &Value, pointer: &str) -> Result<String, CapabilityError> {
    response
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CapabilityError::new(format!("Login response has no token at {}", pointer)))
}
