//! One-shot HTTP interaction used when the realtime channel cannot take text.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AgentConfig;
use crate::error::{Result, WidgetError};

/// Sends one user message and returns the agent's reply.
#[async_trait]
pub trait InteractionFallback: Send + Sync {
    /// # Errors
    ///
    /// Returns [`WidgetError::Fallback`] on transport failure, a non-2xx
    /// status, or a reply without text.
    async fn interact(&self, conversation_id: &str, text: &str) -> Result<String>;
}

#[derive(Serialize)]
struct InteractRequest<'a> {
    input: &'a str,
}

#[derive(Deserialize)]
struct InteractResponse {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct InteractErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// `POST {api_base}{interact_path}` with `{"input": text}`.
pub struct HttpInteractionClient {
    client: reqwest::Client,
    config: AgentConfig,
    api_key: Option<String>,
}

impl HttpInteractionClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| WidgetError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            config: config.clone(),
            api_key: config.resolved_api_key(),
        })
    }
}

#[async_trait]
impl InteractionFallback for HttpInteractionClient {
    async fn interact(&self, conversation_id: &str, text: &str) -> Result<String> {
        let url = self.config.interact_url(conversation_id);
        debug!(conversation = conversation_id, "sending text through interaction endpoint");

        let mut request = self.client.post(&url).json(&InteractRequest { input: text });
        if let Some(key) = &self.api_key {
            request = request.header("xi-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| WidgetError::Fallback(format!("request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<InteractErrorBody>(&body)
                .ok()
                .and_then(|b| b.error.or(b.message))
                .unwrap_or(body);
            return Err(WidgetError::Fallback(format!("HTTP {status}: {detail}")));
        }

        let body: InteractResponse = response
            .json()
            .await
            .map_err(|e| WidgetError::Fallback(format!("invalid response: {e}")))?;
        body.response
            .or(body.message)
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| WidgetError::Fallback("response contained no reply".into()))
    }
}
