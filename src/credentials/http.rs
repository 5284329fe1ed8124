use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{CredentialProvider, SignedUrl};
use crate::config::AgentConfig;
use crate::error::{Result, WidgetError};

#[derive(Debug, Deserialize)]
struct SignedUrlResponse {
    #[serde(default)]
    signed_url: Option<String>,
}

/// Fetches signed URLs from the REST API (`GET .../get_signed_url?agent_id=`).
pub struct HttpCredentialProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpCredentialProvider {
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
            endpoint: config.signed_url_endpoint(),
            api_key: config.resolved_api_key(),
        })
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn signed_url(&self, agent_id: &str) -> Result<SignedUrl> {
        if agent_id.trim().is_empty() {
            return Err(WidgetError::Credential("no agent id configured".into()));
        }
        let mut request = self
            .client
            .get(&self.endpoint)
            .query(&[("agent_id", agent_id)]);
        match &self.api_key {
            Some(key) => request = request.header("xi-api-key", key),
            None => warn!("requesting signed URL without an API key"),
        }

        let response = request
            .send()
            .await
            .map_err(|e| WidgetError::Credential(format!("request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WidgetError::Credential(format!("HTTP {status}: {body}")));
        }

        let body: SignedUrlResponse = response
            .json()
            .await
            .map_err(|e| WidgetError::Credential(format!("invalid response: {e}")))?;
        match body.signed_url.filter(|u| !u.trim().is_empty()) {
            Some(url) => {
                debug!("obtained signed URL for agent {agent_id}");
                Ok(SignedUrl::new(url))
            }
            None => Err(WidgetError::Credential(
                "response contained no signed_url".into(),
            )),
        }
    }
}

/// Connects to public agents directly: `websocket_url?agent_id=<id>`.
pub struct PublicAgentCredentials {
    websocket_url: String,
}

impl PublicAgentCredentials {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            websocket_url: config.websocket_url.clone(),
        }
    }
}

#[async_trait]
impl CredentialProvider for PublicAgentCredentials {
    async fn signed_url(&self, agent_id: &str) -> Result<SignedUrl> {
        if agent_id.trim().is_empty() {
            return Err(WidgetError::Credential("no agent id configured".into()));
        }
        let mut url = url::Url::parse(&self.websocket_url)
            .map_err(|e| WidgetError::Credential(format!("invalid websocket_url: {e}")))?;
        url.query_pairs_mut().append_pair("agent_id", agent_id);
        Ok(SignedUrl::new(url.to_string()))
    }
}
