//! In-process collaborators.
//!
//! These keep everything in memory and never touch the network, which makes them useful for tests
//! and for running the service locally without a Supabase project. Failure modes can be switched on
//! to exercise the pipeline's error handling.

use super::{CollaboratorError, GalleryEntry, GalleryStore, IdentityVerifier, ObjectStore, Result, UploadOptions};
use crate::types::{UserId, UserIdentity};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// Accepts a fixed set of tokens
#[derive(Default)]
pub struct StaticIdentityVerifier {
    users: HashMap<String, UserIdentity>,
}

impl StaticIdentityVerifier {
    pub fn with_user(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        let identity = UserIdentity {
            id: UserId::new(user_id),
            email: None,
        };
        self.users.insert(token.into(), identity);
        self
    }
}

#[async_trait]
impl IdentityVerifier for StaticIdentityVerifier {
    async fn resolve(&self, bearer_token: &str) -> Result<UserIdentity> {
        self.users.get(bearer_token).cloned().ok_or(CollaboratorError::Rejected {
            service: "identity",
            status: 401,
            message: "invalid session".to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Object store backed by an ordered map of path to object
pub struct MemoryObjectStore {
    public_base: String,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    fail_uploads: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new(public_base: impl Into<String>) -> Self {
        Self {
            public_base: public_base.into(),
            objects: Mutex::new(BTreeMap::new()),
            fail_uploads: AtomicBool::new(false),
        }
    }

    /// Make every subsequent upload fail with a transport error
    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub async fn paths(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }

    pub async fn get(&self, path: &str) -> Option<StoredObject> {
        self.objects.lock().await.get(path).cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, path: &str, bytes: Bytes, options: UploadOptions) -> Result<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Transport {
                service: "storage",
                message: "upload failure injected".to_string(),
            });
        }

        let mut objects = self.objects.lock().await;
        if !options.overwrite && objects.contains_key(path) {
            return Err(CollaboratorError::Conflict { path: path.to_string() });
        }
        objects.insert(
            path.to_string(),
            StoredObject {
                bytes,
                content_type: options.content_type,
            },
        );
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.public_base.trim_end_matches('/'), path)
    }
}

/// Append-only list of gallery entries
#[derive(Default)]
pub struct MemoryGallery {
    entries: Mutex<Vec<GalleryEntry>>,
    fail_inserts: AtomicBool,
}

impl MemoryGallery {
    /// Make every subsequent insert fail as if the table rejected it
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub async fn entries(&self) -> Vec<GalleryEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl GalleryStore for MemoryGallery {
    async fn insert(&self, entry: &GalleryEntry) -> Result<()> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Rejected {
                service: "gallery",
                status: 500,
                message: "insert failure injected".to_string(),
            });
        }
        self.entries.lock().await.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png() -> UploadOptions {
        UploadOptions {
            content_type: "image/png".to_string(),
            overwrite: false,
        }
    }

    #[tokio::test]
    async fn test_upload_refuses_overwrite() {
        let store = MemoryObjectStore::new("https://cdn.test/images");
        store.upload("u/1-abc.png", Bytes::from_static(b"one"), png()).await.unwrap();

        let err = store.upload("u/1-abc.png", Bytes::from_static(b"two"), png()).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Conflict { .. }));
        assert_eq!(store.get("u/1-abc.png").await.unwrap().bytes, Bytes::from_static(b"one"));
    }

    #[tokio::test]
    async fn test_public_url() {
        let store = MemoryObjectStore::new("https://cdn.test/images/");
        assert_eq!(store.public_url("u/1.png"), "https://cdn.test/images/u/1.png");
    }

    #[tokio::test]
    async fn test_static_identity() {
        let verifier = StaticIdentityVerifier::default().with_user("token-1", "user-1");
        assert_eq!(verifier.resolve("token-1").await.unwrap().id, UserId::new("user-1"));
        assert!(verifier.resolve("token-2").await.is_err());
    }
}
