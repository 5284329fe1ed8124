//! Session credentials for the remote agent.
//!
//! A [`CredentialProvider`] turns an agent identifier into a short-lived
//! [`SignedUrl`] that authorizes exactly one realtime session. Private agents
//! need a signed URL from the REST API ([`HttpCredentialProvider`]); public
//! agents can connect with the agent id alone ([`PublicAgentCredentials`]).

mod http;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::AgentConfig;
use crate::error::Result;

pub use http::{HttpCredentialProvider, PublicAgentCredentials};

/// A single-use URL that opens one realtime session.
///
/// The query string carries a secret token, so `Debug` never prints it.
#[derive(Clone, PartialEq, Eq)]
pub struct SignedUrl(String);

impl SignedUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SignedUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let without_query = self.0.split('?').next().unwrap_or_default();
        write!(f, "SignedUrl({without_query}?<redacted>)")
    }
}

/// Issues session credentials for an agent.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Obtain a credential for `agent_id`.
    ///
    /// # Errors
    ///
    /// Returns [`WidgetError::Credential`](crate::error::WidgetError::Credential)
    /// when no credential is available.
    async fn signed_url(&self, agent_id: &str) -> Result<SignedUrl>;
}

/// Build the provider the agent config asks for.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be constructed.
pub fn provider_from_config(config: &AgentConfig) -> Result<Arc<dyn CredentialProvider>> {
    if config.use_signed_url {
        Ok(Arc::new(HttpCredentialProvider::new(config)?))
    } else {
        Ok(Arc::new(PublicAgentCredentials::new(config)))
    }
}
