//! External collaborators the pipeline depends on.
//!
//! The service does not own identity, object storage, or the gallery table; it reaches them through
//! the narrow traits defined here:
//!
//! - [`IdentityVerifier`]: resolve a bearer token to a user
//! - [`ObjectStore`]: non-overwriting uploads plus public URL resolution
//! - [`GalleryStore`]: append-only gallery rows
//!
//! [`supabase::SupabaseClient`] implements all three against a Supabase project.
//! [`memory`] holds in-process implementations for tests and local development.

use crate::types::{UserId, UserIdentity};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub mod memory;
pub mod supabase;

/// Result type for collaborator operations
pub type Result<T> = std::result::Result<T, CollaboratorError>;

/// Errors returned by external collaborators
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("request to {service} failed: {message}")]
    Transport { service: &'static str, message: String },

    #[error("{service} rejected the request with status {status}: {message}")]
    Rejected {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("an object already exists at {path}")]
    Conflict { path: String },

    #[error("unexpected response from {service}: {message}")]
    InvalidResponse { service: &'static str, message: String },
}

/// Options for a single upload
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub content_type: String,
    /// When false, an existing object at the same path is a [`CollaboratorError::Conflict`]
    pub overwrite: bool,
}

/// An image that has been durably written to object storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredImage {
    pub storage_path: String,
    pub public_url: String,
}

/// One row of a user's gallery. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GalleryEntry {
    pub owner_user_id: UserId,
    pub prompt_text: String,
    pub image_url: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Resolve a bearer token to the user it was issued for
    async fn resolve(&self, bearer_token: &str) -> Result<UserIdentity>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, path: &str, bytes: Bytes, options: UploadOptions) -> Result<()>;

    /// Public URL under which an uploaded object is served
    fn public_url(&self, path: &str) -> String;
}

#[async_trait]
pub trait GalleryStore: Send + Sync {
    async fn insert(&self, entry: &GalleryEntry) -> Result<()>;
}
