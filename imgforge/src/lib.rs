//! # imgforge: prompt-to-image ingestion service
//!
//! `imgforge` accepts a text prompt from an authenticated user, asks a third-party text-to-image
//! provider to render it, and keeps the result: the image is written to object storage under a
//! content-derived name and a gallery entry is recorded for the user. The client gets back a
//! public URL.
//!
//! ## Request flow
//!
//! ```text
//! POST /api/generate  { "prompt": "..." }   Authorization: Bearer <session>
//!   │
//!   ├─ CurrentUser extractor ── IdentityVerifier::resolve          → 401
//!   ├─ JSON body + prompt validation (trim, ≤ 300 chars)           → 400
//!   └─ IngestionPipeline::generate_for
//!        ├─ GenerationProvider::generate                           → 502
//!        ├─ PayloadLocator::locate  (direct keys, arrays, BFS)     → 502
//!        ├─ ImageMaterializer::materialize (base64 or GET)         → 415 / 502
//!        ├─ ObjectStore::upload  {user}/{millis}-{sha256[..12]}.{ext}
//!        └─ GalleryStore::insert                                   → 500
//!   ◀─ 200 { "imageUrl": "..." }
//! ```
//!
//! Provider responses are untrusted and arbitrarily shaped, so locating the image is the heart of
//! the service: see [`ingest::locator`].
//!
//! ## Collaborators
//!
//! Identity, storage, and the gallery table are external. The pipeline reaches them through the
//! traits in [`collaborators`]; production uses [`collaborators::supabase::SupabaseClient`], tests
//! use the in-memory doubles in [`collaborators::memory`].
//!
//! ## Configuration
//!
//! See [`config`]. All credentials are required; the service refuses to start without them.

pub mod api;
pub mod auth;
pub mod collaborators;
pub mod config;
pub mod errors;
pub mod ingest;
mod openapi;
pub mod telemetry;
pub mod types;

#[cfg(test)]
mod test;

use crate::{
    api::handlers::{
        generate::{generate_image, method_not_allowed},
        health::healthz,
    },
    collaborators::supabase::SupabaseClient,
    config::CorsOrigin,
    ingest::{ImageMaterializer, IngestionPipeline, RapidApiProvider},
    openapi::ApiDoc,
};
use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{self, HeaderValue, Method},
    routing::{get, post},
};
use bon::Builder;
pub use config::Config;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

/// Build an HTTP client with the given overall request timeout.
///
/// Installs the process-wide rustls crypto provider first if nothing else has.
pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    reqwest::Client::builder().timeout(timeout).build()
}

/// Shared state handed to every request handler.
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .pipeline(pipeline)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub pipeline: IngestionPipeline,
}

/// Wire the production collaborators from configuration.
pub fn build_pipeline(config: &Config) -> anyhow::Result<IngestionPipeline> {
    let supabase = Arc::new(SupabaseClient::from_config(&config.storage, http_client(config.storage.timeout)?)?);
    let provider = RapidApiProvider::from_config(&config.provider, http_client(config.provider.timeout)?)?;
    let materializer =
        ImageMaterializer::new(http_client(config.limits.image_fetch_timeout)?).with_max_bytes(config.limits.max_image_bytes);

    Ok(IngestionPipeline::builder()
        .identity(supabase.clone())
        .provider(Arc::new(provider))
        .objects(supabase.clone())
        .gallery(supabase)
        .materializer(materializer)
        .limits(config.limits.clone())
        .build())
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.cors;
    let allow_origin = if cors_config.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &cors_config.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.origin().ascii_serialization().parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::POST, Method::GET, Method::OPTIONS])
        .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE])
        .allow_credentials(cors_config.allow_credentials);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all routes and middleware.
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let cors_layer = create_cors_layer(&state.config)?;

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/generate", post(generate_image).fallback(method_not_allowed))
        .route("/api/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .merge(Scalar::with_url("/api/docs", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::max(state.config.limits.max_body_bytes))
        .with_state(state.clone())
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}

/// A configured, ready-to-serve instance of the service.
///
/// [`Application::new`] wires the production collaborators; [`Application::with_state`] accepts a
/// prebuilt [`AppState`], which is how tests substitute in-memory collaborators.
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting imgforge with configuration: {:#?}", config);
        let pipeline = build_pipeline(&config)?;
        let state = AppState::builder().config(config).pipeline(pipeline).build();
        Self::with_state(state)
    }

    pub fn with_state(state: AppState) -> anyhow::Result<Self> {
        let router = build_router(&state)?;
        Ok(Self {
            router,
            config: state.config,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Serve until `shutdown` resolves, then let in-flight requests finish.
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("imgforge listening on http://{}", bind_addr);

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();
        Ok(())
    }
}
