//! Supabase-backed collaborators.
//!
//! A single [`SupabaseClient`] covers identity (`/auth/v1`), object storage (`/storage/v1`) and
//! the gallery table (`/rest/v1`). Session lookups use the anon key with the caller's token;
//! writes use the service-role key.

use super::{CollaboratorError, GalleryEntry, GalleryStore, IdentityVerifier, ObjectStore, Result, UploadOptions};
use crate::config::StorageConfig;
use crate::errors::{self, excerpt};
use crate::types::{UserId, UserIdentity};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Response, StatusCode, header};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

const DETAIL_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Clone)]
pub struct SupabaseClient {
    http: Client,
    base_url: String,
    anon_key: String,
    service_role_key: String,
    bucket: String,
    table: String,
}

impl SupabaseClient {
    pub fn from_config(config: &StorageConfig, http: Client) -> errors::Result<Self> {
        let missing = |field: &str| errors::Error::Misconfiguration {
            message: format!("storage.{field} is not set"),
        };
        let non_blank = |value: &Option<String>| value.clone().filter(|v| !v.trim().is_empty());

        let base_url = config.url.as_ref().ok_or_else(|| missing("url"))?;
        Ok(Self {
            http,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            anon_key: non_blank(&config.anon_key).ok_or_else(|| missing("anon_key"))?,
            service_role_key: non_blank(&config.service_role_key).ok_or_else(|| missing("service_role_key"))?,
            bucket: config.bucket.clone(),
            table: config.table.clone(),
        })
    }

    fn transport(service: &'static str) -> impl FnOnce(reqwest::Error) -> CollaboratorError {
        move |e| CollaboratorError::Transport {
            service,
            message: e.to_string(),
        }
    }

    async fn rejected(service: &'static str, response: Response) -> CollaboratorError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        CollaboratorError::Rejected {
            service,
            status,
            message: excerpt(&body, DETAIL_CHARS),
        }
    }
}

/// Storage reports an existing object either as 409 or as a 400 whose body says "Duplicate".
fn is_duplicate(status: StatusCode, body: &str) -> bool {
    status == StatusCode::CONFLICT || body.contains("Duplicate") || body.contains("already exists")
}

#[async_trait]
impl IdentityVerifier for SupabaseClient {
    #[instrument(skip_all)]
    async fn resolve(&self, bearer_token: &str) -> Result<UserIdentity> {
        let response = self
            .http
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer_token)
            .send()
            .await
            .map_err(Self::transport("identity"))?;

        if !response.status().is_success() {
            return Err(Self::rejected("identity", response).await);
        }

        let user: AuthUser = response.json().await.map_err(|e| CollaboratorError::InvalidResponse {
            service: "identity",
            message: e.to_string(),
        })?;
        if user.id.is_empty() {
            return Err(CollaboratorError::InvalidResponse {
                service: "identity",
                message: "session resolved to an empty user id".to_string(),
            });
        }

        Ok(UserIdentity {
            id: UserId::new(user.id),
            email: user.email,
        })
    }
}

#[async_trait]
impl ObjectStore for SupabaseClient {
    #[instrument(skip(self, bytes, options), fields(size = bytes.len()))]
    async fn upload(&self, path: &str, bytes: Bytes, options: UploadOptions) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path))
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
            .header(header::CONTENT_TYPE, options.content_type)
            .header("x-upsert", if options.overwrite { "true" } else { "false" })
            .body(bytes)
            .send()
            .await
            .map_err(Self::transport("storage"))?;

        let status = response.status();
        if status.is_success() {
            debug!("Uploaded object");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if is_duplicate(status, &body) {
            return Err(CollaboratorError::Conflict { path: path.to_string() });
        }
        Err(CollaboratorError::Rejected {
            service: "storage",
            status: status.as_u16(),
            message: excerpt(&body, DETAIL_CHARS),
        })
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base_url, self.bucket, path)
    }
}

#[async_trait]
impl GalleryStore for SupabaseClient {
    #[instrument(skip_all, fields(table = %self.table))]
    async fn insert(&self, entry: &GalleryEntry) -> Result<()> {
        let row = json!({
            "user_id": entry.owner_user_id,
            "prompt": entry.prompt_text,
            "image_url": entry.image_url,
            "created_at": entry.created_at,
        });

        let response = self
            .http
            .post(format!("{}/rest/v1/{}", self.base_url, self.table))
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await
            .map_err(Self::transport("gallery"))?;

        if !response.status().is_success() {
            return Err(Self::rejected("gallery", response).await);
        }
        Ok(())
    }
}
