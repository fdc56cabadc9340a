use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

/// Every way an ingestion request can terminate without producing an image URL.
///
/// The variants are the authoritative error model; [`Error::status_code`] collapses them onto the
/// HTTP status classes exposed at the boundary.
#[derive(ThisError, Debug)]
pub enum Error {
    /// Bearer credential missing, or rejected by the identity service
    #[error("Not authenticated")]
    Unauthorized { message: Option<String> },

    /// Prompt missing, malformed, or empty after trimming
    #[error("{message}")]
    InvalidInput { message: String },

    /// Endpoint was called with a method other than the one it serves
    #[error("Method not allowed")]
    MethodNotAllowed,

    /// Generation provider answered with a non-success status or could not be reached
    #[error("Upstream provider failure (status {status:?})")]
    UpstreamFailure { status: Option<u16>, excerpt: String },

    /// Generation provider answered with a body that is not JSON
    #[error("Upstream provider returned invalid JSON")]
    InvalidUpstreamPayload { excerpt: String },

    /// Provider response parsed, but no image reference could be located in it
    #[error("No image found in provider response")]
    NoImageProduced,

    /// Remote image referenced by the provider could not be downloaded
    #[error("Fetching remote image {url} failed (status {status:?})")]
    UpstreamFetchFailed { url: String, status: Option<u16> },

    /// Inline image declares a MIME subtype we do not store
    #[error("Unsupported inline image encoding: image/{subtype}")]
    UnsupportedEncoding { subtype: String },

    /// Image reference is neither a decodable data URI nor an http(s) URL
    #[error("Unrecognized image format: {message}")]
    UnrecognizedFormat { message: String },

    /// Upload to object storage or gallery insert failed
    #[error("Failed to {operation}: {message}")]
    PersistenceFailure { operation: String, message: String },

    /// Required configuration is missing or inconsistent
    #[error("Misconfiguration: {message}")]
    Misconfiguration { message: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Error::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Error::UpstreamFailure { .. }
            | Error::InvalidUpstreamPayload { .. }
            | Error::NoImageProduced
            | Error::UpstreamFetchFailed { .. } => StatusCode::BAD_GATEWAY,
            Error::UnsupportedEncoding { .. } | Error::UnrecognizedFormat { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::PersistenceFailure { .. } | Error::Misconfiguration { .. } | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable name of the error kind, returned in the `error` field of responses
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Unauthorized { .. } => "unauthorized",
            Error::InvalidInput { .. } => "invalid_input",
            Error::MethodNotAllowed => "method_not_allowed",
            Error::UpstreamFailure { .. } => "upstream_failure",
            Error::InvalidUpstreamPayload { .. } => "invalid_upstream_payload",
            Error::NoImageProduced => "no_image_produced",
            Error::UpstreamFetchFailed { .. } => "upstream_fetch_failed",
            Error::UnsupportedEncoding { .. } => "unsupported_encoding",
            Error::UnrecognizedFormat { .. } => "unrecognized_format",
            Error::PersistenceFailure { .. } => "persistence_failure",
            Error::Misconfiguration { .. } => "misconfiguration",
            Error::Other(_) => "internal",
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthorized { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::InvalidInput { message } => message.clone(),
            Error::MethodNotAllowed => "Method not allowed".to_string(),
            Error::UpstreamFailure { status: Some(status), excerpt } => format!("Upstream failure ({status}): {excerpt}"),
            Error::UpstreamFailure { status: None, excerpt } => format!("Upstream provider unreachable: {excerpt}"),
            Error::InvalidUpstreamPayload { excerpt } => format!("Invalid JSON from provider: {excerpt}"),
            Error::NoImageProduced => "No image found in provider response".to_string(),
            Error::UpstreamFetchFailed { status: Some(status), .. } => format!("Fetching generated image failed ({status})"),
            Error::UpstreamFetchFailed { status: None, .. } => "Fetching generated image failed".to_string(),
            Error::UnsupportedEncoding { subtype } => format!("Unsupported data URI image type: {subtype}"),
            Error::UnrecognizedFormat { .. } => "Unrecognized image format".to_string(),
            Error::PersistenceFailure { operation, message } => {
                format!("Failed to {operation}: {}", excerpt(message, MAX_DETAIL_CHARS))
            }
            // Configuration details stay in the logs
            Error::Misconfiguration { .. } => "Service is not configured".to_string(),
            Error::Other(_) => "Internal server error".to_string(),
        }
    }

    fn upstream_status(&self) -> Option<u16> {
        match self {
            Error::UpstreamFailure { status, .. } | Error::UpstreamFetchFailed { status, .. } => *status,
            _ => None,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Misconfiguration { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::PersistenceFailure { .. } => {
                tracing::error!("Persistence error: {}", self);
            }
            Error::UpstreamFailure { .. }
            | Error::InvalidUpstreamPayload { .. }
            | Error::NoImageProduced
            | Error::UpstreamFetchFailed { .. } => {
                tracing::warn!("Upstream error: {}", self);
            }
            Error::Unauthorized { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::InvalidInput { .. } | Error::MethodNotAllowed | Error::UnsupportedEncoding { .. } | Error::UnrecognizedFormat { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let mut body = json!({
            "error": self.kind(),
            "message": self.user_message(),
        });
        if let Some(upstream_status) = self.upstream_status() {
            body["status"] = json!(upstream_status);
        }

        (status, Json(body)).into_response()
    }
}

/// Upper bound on collaborator-provided detail strings echoed back to clients
const MAX_DETAIL_CHARS: usize = 200;

/// Bound a diagnostic string to `max_chars` characters, never splitting a UTF-8 sequence.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
