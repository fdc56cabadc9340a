//! Caller authentication.
//!
//! Every generation request carries an `Authorization: Bearer <token>` header issued by the
//! identity service. [`current_user::CurrentUser`] is an axum extractor that resolves the token
//! through the pipeline's [`IdentityVerifier`](crate::collaborators::IdentityVerifier) before the
//! request body is looked at, so an unauthenticated caller always gets a 401.

pub mod current_user;
