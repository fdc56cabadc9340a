//! Orchestration of a single generation request, from bearer token to gallery entry.

use super::{GenerationProvider, ImageMaterializer, PayloadLocator, addressing};
use crate::collaborators::{
    CollaboratorError, GalleryEntry, GalleryStore, IdentityVerifier, ObjectStore, StoredImage, UploadOptions,
};
use crate::config::LimitsConfig;
use crate::errors::{Error, Result, excerpt};
use crate::types::{UserIdentity, abbrev_id};
use bon::Builder;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Source of the timestamp embedded in storage paths and gallery entries
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Stages of an ingestion, in execution order. Any stage before `Done` can terminate the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    AuthenticateCaller,
    ValidatePrompt,
    InvokeProvider,
    ParseProviderJson,
    LocateImage,
    MaterializeImage,
    UploadBytes,
    InsertGalleryRecord,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::AuthenticateCaller => "authenticate_caller",
            Stage::ValidatePrompt => "validate_prompt",
            Stage::InvokeProvider => "invoke_provider",
            Stage::ParseProviderJson => "parse_provider_json",
            Stage::LocateImage => "locate_image",
            Stage::MaterializeImage => "materialize_image",
            Stage::UploadBytes => "upload_bytes",
            Stage::InsertGalleryRecord => "insert_gallery_record",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Result of a successful ingestion
#[derive(Debug, Clone)]
pub struct IngestionOutcome {
    pub stored: StoredImage,
    pub entry: GalleryEntry,
}

/// Runs the ingestion stages against a fixed set of collaborators.
///
/// Built once at startup and shared between requests; every field is immutable or `Arc`'d, so
/// cloning is cheap and concurrent requests never contend on pipeline state.
///
/// ```ignore
/// let pipeline = IngestionPipeline::builder()
///     .identity(supabase.clone())
///     .provider(Arc::new(provider))
///     .objects(supabase.clone())
///     .gallery(supabase)
///     .materializer(ImageMaterializer::new(http))
///     .limits(config.limits.clone())
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct IngestionPipeline {
    identity: Arc<dyn IdentityVerifier>,
    provider: Arc<dyn GenerationProvider>,
    objects: Arc<dyn ObjectStore>,
    gallery: Arc<dyn GalleryStore>,
    materializer: ImageMaterializer,
    #[builder(default)]
    locator: Arc<PayloadLocator>,
    #[builder(default)]
    limits: LimitsConfig,
    #[builder(default = system_clock())]
    clock: Clock,
}

fn persistence(operation: &str, error: CollaboratorError) -> Error {
    Error::PersistenceFailure {
        operation: operation.to_string(),
        message: error.to_string(),
    }
}

impl IngestionPipeline {
    /// Run every stage for a raw bearer token and a raw prompt.
    pub async fn ingest(&self, bearer_token: Option<&str>, raw_prompt: Option<&str>) -> Result<IngestionOutcome> {
        let identity = self.authenticate(bearer_token).await?;
        let prompt = self.validate_prompt(raw_prompt)?;
        self.generate_for(&identity, &prompt).await
    }

    /// Resolve the caller. A missing, blank, or rejected token is `Unauthorized`.
    pub async fn authenticate(&self, bearer_token: Option<&str>) -> Result<UserIdentity> {
        let Some(token) = bearer_token.map(str::trim).filter(|t| !t.is_empty()) else {
            return Err(Error::Unauthorized {
                message: Some("Missing bearer token".to_string()),
            });
        };

        self.identity.resolve(token).await.map_err(|e| {
            debug!(stage = %Stage::AuthenticateCaller, "Session lookup failed: {}", e);
            Error::Unauthorized {
                message: Some("Invalid session".to_string()),
            }
        })
    }

    /// Trim the prompt and cut it to the configured number of characters.
    pub fn validate_prompt(&self, raw_prompt: Option<&str>) -> Result<String> {
        let Some(raw) = raw_prompt else {
            return Err(Error::InvalidInput {
                message: "Prompt is required".to_string(),
            });
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput {
                message: "Prompt cannot be empty".to_string(),
            });
        }

        Ok(trimmed.chars().take(self.limits.max_prompt_chars).collect())
    }

    /// Generate, store, and record an image for an authenticated caller and a validated prompt.
    #[instrument(skip_all, fields(user = %abbrev_id(&identity.id)), err)]
    pub async fn generate_for(&self, identity: &UserIdentity, prompt: &str) -> Result<IngestionOutcome> {
        let stopped = |stage: Stage| {
            move |e: Error| {
                debug!(%stage, kind = e.kind(), "Ingestion stopped");
                e
            }
        };

        let reply = self.provider.generate(prompt).await.map_err(stopped(Stage::InvokeProvider))?;
        if !reply.is_success() {
            return Err(stopped(Stage::InvokeProvider)(Error::UpstreamFailure {
                status: Some(reply.status),
                excerpt: excerpt(&reply.body, self.limits.upstream_excerpt_chars),
            }));
        }

        let payload: Value = serde_json::from_str(&reply.body).map_err(|_| {
            stopped(Stage::ParseProviderJson)(Error::InvalidUpstreamPayload {
                excerpt: excerpt(&reply.body, self.limits.payload_excerpt_chars),
            })
        })?;

        let reference = self
            .locator
            .locate(&payload)
            .ok_or_else(|| stopped(Stage::LocateImage)(Error::NoImageProduced))?;

        let image = self
            .materializer
            .materialize(&reference)
            .await
            .map_err(stopped(Stage::MaterializeImage))?;

        let now = (self.clock)();
        let storage_path = addressing::storage_path(&identity.id, now.timestamp_millis(), &image.content_hash, &image.extension);
        let options = UploadOptions {
            content_type: image.mime_type.clone(),
            overwrite: false,
        };
        self.objects
            .upload(&storage_path, image.bytes.clone(), options)
            .await
            .map_err(|e| stopped(Stage::UploadBytes)(persistence("upload image", e)))?;
        let stored = StoredImage {
            public_url: self.objects.public_url(&storage_path),
            storage_path,
        };

        let entry = GalleryEntry {
            owner_user_id: identity.id.clone(),
            prompt_text: prompt.to_string(),
            image_url: stored.public_url.clone(),
            created_at: now,
        };
        if let Err(e) = self.gallery.insert(&entry).await {
            warn!(
                storage_path = %stored.storage_path,
                "Gallery insert failed, uploaded object is left without an entry"
            );
            return Err(stopped(Stage::InsertGalleryRecord)(persistence("record gallery entry", e)));
        }

        info!(
            stage = %Stage::Done,
            storage_path = %stored.storage_path,
            reference = reference.kind(),
            size = image.bytes.len(),
            "Image ingested"
        );
        Ok(IngestionOutcome { stored, entry })
    }
}
