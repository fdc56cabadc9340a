//! Text-to-image generation providers.
//!
//! A provider only transports the request and hands back the raw reply; interpreting the status
//! and the body is the pipeline's job, so every provider gets the same error semantics.

use crate::config::ProviderConfig;
use crate::errors::{Error, Result, excerpt};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, instrument};
use url::Url;

/// Status and body of a provider call, before any interpretation
#[derive(Debug, Clone)]
pub struct ProviderReply {
    pub status: u16,
    pub body: String,
}

impl ProviderReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Submit `prompt` for generation.
    ///
    /// Only transport failures are errors here; a non-success status is returned as a reply.
    async fn generate(&self, prompt: &str) -> Result<ProviderReply>;
}

/// RapidAPI-hosted text-to-image endpoint.
///
/// Every request carries the same `style_id` and `size`, taken from configuration.
pub struct RapidApiProvider {
    http: Client,
    endpoint: Url,
    host_header: String,
    api_key: String,
    style_id: u32,
    size: String,
}

impl RapidApiProvider {
    pub fn from_config(config: &ProviderConfig, http: Client) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| Error::Misconfiguration {
                message: "provider.api_key is not set (RAPIDAPI_KEY)".to_string(),
            })?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            host_header: config.host_header.clone(),
            api_key,
            style_id: config.style_id,
            size: config.size.clone(),
        })
    }
}

#[async_trait]
impl GenerationProvider for RapidApiProvider {
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn generate(&self, prompt: &str) -> Result<ProviderReply> {
        let payload = json!({
            "prompt": prompt,
            "style_id": self.style_id,
            "size": self.size,
        });

        let response = self
            .http
            .post(self.endpoint.clone())
            .header("x-rapidapi-key", &self.api_key)
            .header("x-rapidapi-host", &self.host_header)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::UpstreamFailure {
                status: None,
                excerpt: excerpt(&e.to_string(), 200),
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| Error::UpstreamFailure {
            status: Some(status),
            excerpt: excerpt(&format!("failed to read response body: {e}"), 200),
        })?;

        debug!(status, body_len = body.len(), "Provider responded");
        Ok(ProviderReply { status, body })
    }
}
