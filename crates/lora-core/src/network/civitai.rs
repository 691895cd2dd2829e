//! Civitai REST client used to enrich records with tags and descriptions.

use crate::config::NetworkConfig;
use crate::{LoraError, Result};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Model-level fields the scanner fills in when a sidecar lacks them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RemoteModelMetadata {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Source of remote model metadata.
///
/// Returns the metadata (if the lookup succeeded) together with the HTTP
/// status so callers can distinguish "deleted upstream" (404) from transient
/// failures.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn fetch_model_metadata(
        &self,
        model_id: u64,
    ) -> Result<(Option<RemoteModelMetadata>, u16)>;
}

/// Default [`MetadataProvider`] talking to the public Civitai API.
pub struct CivitaiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl CivitaiClient {
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Self::with_base_url(NetworkConfig::CIVITAI_API_BASE, api_key)
    }

    pub fn with_base_url(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            client: build_http_client(NetworkConfig::REQUEST_TIMEOUT)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    fn model_url(&self, model_id: u64) -> String {
        format!("{}/models/{}", self.base_url, model_id)
    }
}

#[async_trait]
impl MetadataProvider for CivitaiClient {
    async fn fetch_model_metadata(
        &self,
        model_id: u64,
    ) -> Result<(Option<RemoteModelMetadata>, u16)> {
        let url = self.model_url(model_id);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", key));
        }

        let response = request.send().await.map_err(|e| LoraError::Network {
            message: format!("GET {} failed: {}", url, e),
            source: Some(e),
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            debug!("Civitai returned {} for model {}", status, model_id);
            return Ok((None, status.as_u16()));
        }

        let metadata: RemoteModelMetadata = response.json().await.map_err(|e| LoraError::Network {
            message: format!("Invalid model response from {}: {}", url, e),
            source: Some(e),
        })?;
        Ok((Some(metadata), status.as_u16()))
    }
}

/// Shared reqwest client construction.
pub fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(NetworkConfig::USER_AGENT)
        .build()
        .map_err(|e| LoraError::Network {
            message: format!("Failed to create HTTP client: {}", e),
            source: Some(e),
        })
}

/// Download a resource into memory, failing on non-success statuses.
pub async fn download_bytes(client: &Client, url: &str) -> Result<Vec<u8>> {
    let response = client.get(url).send().await.map_err(|e| LoraError::Network {
        message: format!("GET {} failed: {}", url, e),
        source: Some(e),
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(LoraError::Network {
            message: format!("GET {} returned {}", url, status),
            source: None,
        });
    }

    let bytes = response.bytes().await.map_err(|e| LoraError::Network {
        message: format!("Failed to read body from {}: {}", url, e),
        source: Some(e),
    })?;
    Ok(bytes.to_vec())
}
