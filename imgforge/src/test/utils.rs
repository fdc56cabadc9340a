//! Test utilities for integration testing
use crate::collaborators::memory::{MemoryGallery, MemoryObjectStore, StaticIdentityVerifier};
use crate::config::{Config, ProviderConfig, StorageConfig};
use crate::ingest::{ImageMaterializer, IngestionPipeline, RapidApiProvider};
use crate::{AppState, Application};
use axum_test::TestServer;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const TEST_TOKEN: &str = "session-token";
pub const TEST_USER: &str = "user-1";
pub const PUBLIC_BASE: &str = "https://cdn.test/images";

/// A running test server plus handles on its in-memory collaborators
pub struct TestApp {
    pub server: TestServer,
    pub objects: Arc<MemoryObjectStore>,
    pub gallery: Arc<MemoryGallery>,
}

/// Config whose provider and storage both point at `upstream_uri`
pub fn create_test_config(upstream_uri: &str) -> Config {
    Config {
        provider: ProviderConfig {
            endpoint: Url::parse(&format!("{upstream_uri}/generate")).unwrap(),
            api_key: Some("test-rapidapi-key".to_string()),
            timeout: Duration::from_secs(5),
            ..Default::default()
        },
        storage: StorageConfig {
            url: Some(Url::parse(upstream_uri).unwrap()),
            anon_key: Some("anon".to_string()),
            service_role_key: Some("service".to_string()),
            timeout: Duration::from_secs(5),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Real provider client against `config.provider`, in-memory identity, storage and gallery
pub fn create_test_app(config: Config) -> TestApp {
    let objects = Arc::new(MemoryObjectStore::new(PUBLIC_BASE));
    let gallery = Arc::new(MemoryGallery::default());
    let identity = StaticIdentityVerifier::default().with_user(TEST_TOKEN, TEST_USER);
    let provider = RapidApiProvider::from_config(&config.provider, crate::http_client(Duration::from_secs(5)).unwrap())
        .expect("Failed to create provider");

    let pipeline = IngestionPipeline::builder()
        .identity(Arc::new(identity))
        .provider(Arc::new(provider))
        .objects(objects.clone())
        .gallery(gallery.clone())
        .materializer(ImageMaterializer::new(crate::http_client(Duration::from_secs(5)).unwrap()))
        .limits(config.limits.clone())
        .build();

    let state = AppState::builder().config(config).pipeline(pipeline).build();
    let server = Application::with_state(state)
        .expect("Failed to create application")
        .into_test_server();

    TestApp { server, objects, gallery }
}
