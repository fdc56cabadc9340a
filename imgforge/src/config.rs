//! Application configuration.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The file path
//! defaults to `config.yaml` and can be changed with `-f` or `IMGFORGE_CONFIG`.
//!
//! ## Loading Priority
//!
//! Later sources override earlier ones:
//!
//! 1. **YAML config file** - base configuration
//! 2. **`IMGFORGE_` environment variables** - nested fields use `__`, e.g.
//!    `IMGFORGE_PROVIDER__STYLE_ID=7`
//! 3. **Conventional credentials** - `RAPIDAPI_KEY`, `SUPABASE_URL`, `SUPABASE_ANON_KEY` and
//!    `SUPABASE_SERVICE_ROLE` map onto `provider.api_key`, `storage.url`, `storage.anon_key` and
//!    `storage.service_role_key`
//!
//! ## Example
//!
//! ```yaml
//! host: 0.0.0.0
//! port: 3000
//! provider:
//!   style_id: 4
//!   size: "1-1"
//!   timeout: 60s
//! storage:
//!   bucket: images
//!   table: images
//! limits:
//!   max_prompt_chars: 300
//! ```
//!
//! Secrets are normally left out of the file and supplied through the environment.

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use url::Url;

use crate::errors::Error;

const DEFAULT_PROVIDER_HOST: &str = "ai-text-to-image-generator-flux-free-api.p.rapidapi.com";

/// CLI args - just for specifying the config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "IMGFORGE_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Root configuration, loaded from YAML and environment variables.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Host to bind to (e.g. "0.0.0.0" for all interfaces)
    pub host: String,
    pub port: u16,
    /// Export traces over OTLP (configured via standard `OTEL_*` variables)
    pub enable_otel_export: bool,
    pub provider: ProviderConfig,
    pub storage: StorageConfig,
    pub limits: LimitsConfig,
    pub cors: CorsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            enable_otel_export: false,
            provider: ProviderConfig::default(),
            storage: StorageConfig::default(),
            limits: LimitsConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

/// Text-to-image provider settings.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    pub endpoint: Url,
    /// Value of the `x-rapidapi-host` header
    pub host_header: String,
    /// RapidAPI key, usually supplied as `RAPIDAPI_KEY`
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Fixed style sent with every request
    pub style_id: u32,
    /// Fixed aspect ratio sent with every request
    pub size: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: Url::parse(&format!("https://{DEFAULT_PROVIDER_HOST}/aaaaaaaaaaaaaaaaaiimagegenerator/quick.php"))
                .expect("default provider endpoint is a valid URL"),
            host_header: DEFAULT_PROVIDER_HOST.to_string(),
            api_key: None,
            style_id: 4,
            size: "1-1".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Identity, object storage and gallery table settings.
///
/// All three collaborators live in one Supabase-style project.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Project base URL, usually supplied as `SUPABASE_URL`
    pub url: Option<Url>,
    /// Public key used for session lookups
    #[serde(skip_serializing)]
    pub anon_key: Option<String>,
    /// Privileged key used for uploads and gallery inserts
    #[serde(skip_serializing)]
    pub service_role_key: Option<String>,
    pub bucket: String,
    pub table: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: None,
            anon_key: None,
            service_role_key: None,
            bucket: "images".to_string(),
            table: "images".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Shown in place of a secret in debug output
fn redacted(secret: &Option<String>) -> Option<&'static str> {
    secret.as_ref().map(|_| "<redacted>")
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("endpoint", &self.endpoint.as_str())
            .field("host_header", &self.host_header)
            .field("api_key", &redacted(&self.api_key))
            .field("style_id", &self.style_id)
            .field("size", &self.size)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("url", &self.url.as_ref().map(Url::as_str))
            .field("anon_key", &redacted(&self.anon_key))
            .field("service_role_key", &redacted(&self.service_role_key))
            .field("bucket", &self.bucket)
            .field("table", &self.table)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Bounds applied to requests and to text echoed back from upstreams.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Prompts are trimmed then cut to this many characters
    pub max_prompt_chars: usize,
    /// Characters of a failed provider response kept in the error
    pub upstream_excerpt_chars: usize,
    /// Characters of an unparseable provider body kept in the error
    pub payload_excerpt_chars: usize,
    /// Maximum request body size accepted by the API
    pub max_body_bytes: usize,
    /// Timeout for downloading a remote image
    #[serde(with = "humantime_serde")]
    pub image_fetch_timeout: Duration,
    /// Largest remote image that will be downloaded
    pub max_image_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_prompt_chars: 300,
            upstream_excerpt_chars: 300,
            payload_excerpt_chars: 200,
            max_body_bytes: 64 * 1024,
            image_fetch_timeout: Duration::from_secs(30),
            max_image_bytes: crate::ingest::materializer::DEFAULT_MAX_IMAGE_BYTES,
        }
    }
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Wildcard],
            allow_credentials: false,
            max_age: Some(3600),
        }
    }
}

/// Either a wildcard (`*`) or a specific origin URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Check that every credential the service needs is present and settings are consistent.
    pub fn validate(&self) -> Result<(), Error> {
        let misconfigured = |message: &str| {
            Err(Error::Misconfiguration {
                message: format!("Config validation: {message}"),
            })
        };

        if is_blank(&self.provider.api_key) {
            return misconfigured("provider.api_key is not set. Set RAPIDAPI_KEY or IMGFORGE_PROVIDER__API_KEY.");
        }
        if self.storage.url.is_none() {
            return misconfigured("storage.url is not set. Set SUPABASE_URL or IMGFORGE_STORAGE__URL.");
        }
        if is_blank(&self.storage.anon_key) {
            return misconfigured("storage.anon_key is not set. Set SUPABASE_ANON_KEY.");
        }
        if is_blank(&self.storage.service_role_key) {
            return misconfigured("storage.service_role_key is not set. Set SUPABASE_SERVICE_ROLE.");
        }
        if self.storage.bucket.trim().is_empty() || self.storage.table.trim().is_empty() {
            return misconfigured("storage.bucket and storage.table cannot be empty.");
        }
        if self.limits.max_prompt_chars == 0 {
            return misconfigured("limits.max_prompt_chars must be positive.");
        }

        let has_wildcard = self.cors.allowed_origins.iter().any(|origin| matches!(origin, CorsOrigin::Wildcard));
        if has_wildcard && self.cors.allow_credentials {
            return misconfigured("CORS cannot use wildcard origin '*' with allow_credentials=true. Specify explicit origins.");
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("IMGFORGE_").ignore(&["CONFIG"]).split("__"))
            .merge(Env::raw().only(&["RAPIDAPI_KEY"]).map(|_| "provider.api_key".into()))
            .merge(Env::raw().only(&["SUPABASE_URL"]).map(|_| "storage.url".into()))
            .merge(Env::raw().only(&["SUPABASE_ANON_KEY"]).map(|_| "storage.anon_key".into()))
            .merge(Env::raw().only(&["SUPABASE_SERVICE_ROLE"]).map(|_| "storage.service_role_key".into()))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
