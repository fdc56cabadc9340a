use crate::{
    AppState,
    api::models::generate::{ErrorResponse, GenerateImageRequest, GenerateImageResponse},
    auth::current_user::CurrentUser,
    errors::{Error, Result},
};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use tracing::instrument;

/// Generate an image from a prompt and store it in the caller's gallery.
///
/// The caller is authenticated before the body is parsed, so a request with no valid token is
/// rejected with 401 even when its body is malformed.
#[utoipa::path(
    post,
    path = "/api/generate",
    tag = "images",
    summary = "Generate image",
    request_body = GenerateImageRequest,
    responses(
        (status = 200, description = "Image generated and stored", body = GenerateImageResponse),
        (status = 400, description = "Missing, empty, or malformed prompt", body = ErrorResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorResponse),
        (status = 405, description = "Method other than POST", body = ErrorResponse),
        (status = 415, description = "Provider returned an image in an unsupported encoding", body = ErrorResponse),
        (status = 500, description = "Storage or configuration failure", body = ErrorResponse),
        (status = 502, description = "Provider failed, returned invalid JSON, or returned no image", body = ErrorResponse),
    ),
    security(("BearerAuth" = []))
)]
#[instrument(skip_all)]
pub async fn generate_image(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
    body: std::result::Result<Json<GenerateImageRequest>, JsonRejection>,
) -> Result<Json<GenerateImageResponse>> {
    let Json(request) = body.map_err(|rejection| Error::InvalidInput {
        message: format!("Invalid request body: {}", rejection.body_text()),
    })?;

    let prompt = state.pipeline.validate_prompt(request.prompt.as_deref())?;
    let outcome = state.pipeline.generate_for(&identity, &prompt).await?;

    Ok(Json(GenerateImageResponse {
        image_url: outcome.stored.public_url,
    }))
}

/// Fallback for any method other than POST on the generation route
pub async fn method_not_allowed() -> Error {
    Error::MethodNotAllowed
}
