//! External metadata lookup.
//!
//! The scanner hands every confident title to a [`MetadataResolver`]. A
//! hit attaches an [`ExternalRecord`] to the registered game; a miss or a
//! failed lookup registers the game without metadata.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;

use game_vault_core::models::ExternalRecord;

use crate::config::MetadataConfig;

#[async_trait]
pub trait MetadataResolver: Send + Sync {
    /// Look up `title`. `Ok(None)` means the service has no record.
    async fn resolve(&self, title: &str) -> Result<Option<ExternalRecord>>;
}

/// Resolver used when no provider is configured.
pub struct NoopResolver;

#[async_trait]
impl MetadataResolver for NoopResolver {
    async fn resolve(&self, _title: &str) -> Result<Option<ExternalRecord>> {
        Ok(None)
    }
}

/// `GET {endpoint}?q={title}` returning one JSON [`ExternalRecord`].
/// A 404 is a miss; any other non-success status is an error.
pub struct HttpResolver {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpResolver {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build metadata HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl MetadataResolver for HttpResolver {
    async fn resolve(&self, title: &str) -> Result<Option<ExternalRecord>> {
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("q", title)])
            .send()
            .await
            .with_context(|| format!("metadata lookup for '{}' failed", title))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            anyhow::bail!(
                "metadata lookup for '{}' returned {}",
                title,
                resp.status()
            );
        }

        let record: ExternalRecord = resp
            .json()
            .await
            .with_context(|| format!("metadata response for '{}' is not a record", title))?;
        Ok(Some(record))
    }
}

/// Build the resolver selected by `[metadata].provider`.
pub fn from_config(config: &MetadataConfig) -> Result<Arc<dyn MetadataResolver>> {
    match config.provider.as_str() {
        "none" => Ok(Arc::new(NoopResolver)),
        "http" => {
            let endpoint = config
                .endpoint
                .clone()
                .context("metadata.endpoint must be specified when provider is 'http'")?;
            Ok(Arc::new(HttpResolver::new(
                endpoint,
                Duration::from_secs(config.timeout_secs),
            )?))
        }
        other => anyhow::bail!("Unknown metadata provider: '{}'", other),
    }
}
