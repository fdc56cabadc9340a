//! The image ingestion pipeline.
//!
//! A prompt goes in, a public image URL comes out. In between:
//!
//! ```text
//! IngestionPipeline::ingest()
//!   ├─ identity.resolve(bearer)            // AuthenticateCaller
//!   ├─ trim + truncate prompt              // ValidatePrompt
//!   ├─ provider.generate(prompt)           // InvokeProvider
//!   ├─ serde_json::from_str(body)          // ParseProviderJSON
//!   ├─ PayloadLocator::locate()            // LocateImage
//!   ├─ ImageMaterializer::materialize()    // MaterializeImage (decode or GET)
//!   ├─ addressing::address_of() + upload   // UploadBytes (no overwrite)
//!   └─ gallery.insert()                    // InsertGalleryRecord
//! ```
//!
//! Each stage is a potential exit point and maps its failure onto one [`crate::errors::Error`]
//! variant. Nothing is retried: storage paths carry a timestamp, so a client resubmitting after a
//! failure creates a new object rather than clobbering an old one.

pub mod addressing;
pub mod locator;
pub mod materializer;
pub mod pipeline;
pub mod provider;

pub use locator::{Acceptance, ImageMatcher, PayloadLocator};
pub use materializer::{ImageMaterializer, MaterializedImage};
pub use pipeline::{IngestionOutcome, IngestionPipeline, Stage};
pub use provider::{GenerationProvider, ProviderReply, RapidApiProvider};

use crate::errors::Error;
use std::str::FromStr;

/// Where the generated image lives, as extracted from a provider response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    /// Image bytes embedded as `data:image/<subtype>;base64,<payload>`
    InlineData { mime_subtype: String, base64_payload: String },
    /// Image hosted elsewhere, to be fetched with a GET
    RemoteUrl { url: String },
}

impl ImageReference {
    pub fn kind(&self) -> &'static str {
        match self {
            ImageReference::InlineData { .. } => "inline_data",
            ImageReference::RemoteUrl { .. } => "remote_url",
        }
    }

    /// Whether the materializer can store this reference. Remote URLs are judged after download.
    pub fn is_supported(&self) -> bool {
        match self {
            ImageReference::InlineData { mime_subtype, .. } => materializer::inline_extension(mime_subtype).is_some(),
            ImageReference::RemoteUrl { .. } => true,
        }
    }
}

impl FromStr for ImageReference {
    type Err = Error;

    /// Classify a raw candidate string. Anything that is neither an inline-data URI nor an
    /// http(s) URL is rejected as [`Error::UnrecognizedFormat`].
    fn from_str(candidate: &str) -> Result<Self, Self::Err> {
        if let Some((mime_subtype, payload)) = locator::parse_data_uri(candidate) {
            return Ok(ImageReference::InlineData {
                mime_subtype,
                base64_payload: payload.to_string(),
            });
        }
        if locator::is_http_url(candidate) {
            return Ok(ImageReference::RemoteUrl {
                url: candidate.to_string(),
            });
        }
        Err(Error::UnrecognizedFormat {
            message: "expected a data:image URI or an http(s) URL".to_string(),
        })
    }
}
