//! Deployment and DNS provider capabilities
//!
//! Concrete backends (Vercel-like, AWS-like, ...) are variants behind one
//! trait. The HTTP implementations speak a small JSON contract against a
//! configured API base; anything provider-specific lives behind that URL.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use super::http::{HttpClient, HttpRequest, TransportError};
use crate::config::defaults::PROVIDER_TIMEOUT_SECS;
use crate::config::{DnsConfig, ProviderConfig};
use crate::recovery::{Backup, Deployment, DeploymentStatus, DomainMap};

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("provider rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("{0}")]
    Failed(String),
}

#[async_trait]
pub trait DeploymentProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Stand up the given domains on this provider
    async fn deploy(&self, domains: &DomainMap) -> Result<Deployment, ProviderError>;

    /// Push a backup archive into a deployment this provider created
    async fn restore_data(&self, deployment: &Deployment, backup: &Backup) -> Result<(), ProviderError>;
}

#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Point `domain` at `target`, creating or replacing the record
    async fn upsert_record(&self, domain: &str, target: &str) -> Result<(), ProviderError>;
}

// ============================================================================
// HTTP Deployment Provider
// ============================================================================

pub struct HttpDeploymentProvider {
    name: String,
    api_url: String,
    token: Option<String>,
    http: Arc<dyn HttpClient>,
    timeout: Duration,
}

impl HttpDeploymentProvider {
    pub fn new(config: &ProviderConfig, http: Arc<dyn HttpClient>) -> Self {
        Self {
            name: config.name.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            http,
            timeout: Duration::from_secs(PROVIDER_TIMEOUT_SECS),
        }
    }
}

#[async_trait]
impl DeploymentProvider for HttpDeploymentProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deploy(&self, domains: &DomainMap) -> Result<Deployment, ProviderError> {
        let body = serde_json::json!({ "domains": domains });
        let request = HttpRequest::post_json(format!("{}/deployments", self.api_url), body, self.timeout)
            .bearer(self.token.as_deref());

        let resp = self.http.request(request).await?;
        if !resp.is_success() {
            return Err(ProviderError::Rejected {
                status: resp.status,
                body: resp.body,
            });
        }

        // Providers may answer with {"url": "..."}; fall back to the main domain
        let endpoint = serde_json::from_str::<serde_json::Value>(&resp.body)
            .ok()
            .and_then(|v| v.get("url").and_then(|u| u.as_str()).map(str::to_string))
            .or_else(|| domains.primary().map(str::to_string));

        Ok(Deployment {
            provider: self.name.clone(),
            domains: domains.clone(),
            status: DeploymentStatus::Deployed,
            endpoint,
            deployed_at: Utc::now(),
        })
    }

    async fn restore_data(&self, deployment: &Deployment, backup: &Backup) -> Result<(), ProviderError> {
        let body = serde_json::json!({
            "domains": deployment.domains,
            "backup": backup.name,
            "path": backup.path,
            "size": backup.size,
        });
        let request = HttpRequest::post_json(format!("{}/restore", self.api_url), body, self.timeout)
            .bearer(self.token.as_deref());

        let resp = self.http.request(request).await?;
        if resp.is_success() {
            Ok(())
        } else {
            Err(ProviderError::Rejected {
                status: resp.status,
                body: resp.body,
            })
        }
    }
}

// ============================================================================
// HTTP DNS Provider
// ============================================================================

pub struct HttpDnsProvider {
    api_url: String,
    token: Option<String>,
    http: Arc<dyn HttpClient>,
}

impl HttpDnsProvider {
    pub fn new(config: &DnsConfig, http: Arc<dyn HttpClient>) -> Self {
        Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            http,
        }
    }
}

#[async_trait]
impl DnsProvider for HttpDnsProvider {
    async fn upsert_record(&self, domain: &str, target: &str) -> Result<(), ProviderError> {
        let body = serde_json::json!({
            "name": domain,
            "type": "CNAME",
            "content": target,
        });
        let request = HttpRequest::put_json(
            format!("{}/records", self.api_url),
            body,
            Duration::from_secs(PROVIDER_TIMEOUT_SECS),
        )
        .bearer(self.token.as_deref());

        let resp = self.http.request(request).await?;
        if resp.is_success() {
            Ok(())
        } else {
            Err(ProviderError::Rejected {
                status: resp.status,
                body: resp.body,
            })
        }
    }
}
