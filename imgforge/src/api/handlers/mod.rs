//! Axum route handlers.
//!
//! - [`generate`]: image generation and the 405 fallback for its route
//! - [`health`]: liveness check

pub mod generate;
pub mod health;
