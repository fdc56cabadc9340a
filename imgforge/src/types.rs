//! Identity types shared between the HTTP layer, the pipeline, and the collaborators.
//!
//! User identifiers are opaque strings issued by the identity service. They are used verbatim as
//! the first segment of every storage path, so they are never parsed or reformatted here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of an authenticated user
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A caller whose bearer token was accepted by the identity service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: UserId,
    pub email: Option<String>,
}

/// Abbreviate an identifier to its first 8 characters for more readable logs and traces
pub fn abbrev_id(id: &UserId) -> &str {
    let s = id.as_str();
    match s.char_indices().nth(8) {
        Some((cut, _)) => &s[..cut],
        None => s,
    }
}
