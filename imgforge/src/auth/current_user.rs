use crate::{AppState, errors::Error, types::UserIdentity};
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use tracing::{instrument, trace};

/// The authenticated caller of a request
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserIdentity);

/// Token from the `Authorization` header.
///
/// A leading `Bearer` scheme is stripped when present, otherwise the whole header value is taken
/// as the token. Missing, blank, or non-ASCII headers yield `None`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let token = match value.strip_prefix("Bearer") {
        Some(rest) if rest.starts_with(char::is_whitespace) => rest.trim_start(),
        _ => value,
    };
    (!token.is_empty()).then_some(token)
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers);
        trace!(present = token.is_some(), "Resolving bearer token");
        state.pipeline.authenticate(token).await.map(CurrentUser)
    }
}
