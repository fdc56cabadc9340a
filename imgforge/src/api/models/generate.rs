use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Body of `POST /api/generate`
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct GenerateImageRequest {
    /// Text description of the image. Trimmed, and cut to 300 characters.
    #[serde(default)]
    #[schema(example = "a red fox in the snow, watercolor")]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GenerateImageResponse {
    /// Public URL of the stored image
    #[serde(rename = "imageUrl")]
    pub image_url: String,
}

/// Error body returned by every failing request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Machine-readable error kind, e.g. `no_image_produced`
    pub error: String,
    pub message: String,
    /// Status returned by the upstream service, when there was one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}
