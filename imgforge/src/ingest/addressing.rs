//! Content-derived naming for stored images.
//!
//! Paths look like `{user_id}/{timestamp_millis}-{digest}.{ext}`. The digest ties the object to
//! its bytes; the timestamp keeps repeated uploads of the same bytes apart.

use crate::types::UserId;
use sha2::{Digest, Sha256};

/// Number of hex characters of the SHA-256 digest kept in storage paths
pub const DIGEST_PREFIX_LEN: usize = 12;

/// Hex-encoded SHA-256 of `bytes`, truncated to [`DIGEST_PREFIX_LEN`] characters.
pub fn address_of(bytes: &[u8]) -> String {
    let mut digest = hex::encode(Sha256::digest(bytes));
    digest.truncate(DIGEST_PREFIX_LEN);
    digest
}

pub fn storage_path(owner: &UserId, timestamp_millis: i64, digest: &str, extension: &str) -> String {
    format!("{owner}/{timestamp_millis}-{digest}.{extension}")
}
