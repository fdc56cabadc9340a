//! HTTP API: route handlers and their request/response models.
//!
//! - **[`handlers`]**: axum handlers
//! - **[`models`]**: JSON bodies exchanged with clients
//!
//! The public surface is a single endpoint, `POST /api/generate`, plus `/healthz` and the
//! OpenAPI document served at `/api/openapi.json` (browsable at `/api/docs`).

pub mod handlers;
pub mod models;
