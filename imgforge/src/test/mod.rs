pub mod utils;

use crate::api::models::generate::{ErrorResponse, GenerateImageResponse};
use serde_json::json;
use utils::{PUBLIC_BASE, TEST_TOKEN, TEST_USER, create_test_app, create_test_config};
use wiremock::matchers::{header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mock_provider(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/generate"))
        .and(header("x-rapidapi-key", "test-rapidapi-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Full request path with an inline image: provider call, decode, upload, gallery row
#[test_log::test(tokio::test)]
async fn test_generate_inline_image() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .and(wiremock::matchers::body_partial_json(json!({"prompt": "a red fox", "style_id": 4, "size": "1-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"image": "data:image/png;base64,AAAA"})))
        .expect(1)
        .mount(&upstream)
        .await;

    let app = create_test_app(create_test_config(&upstream.uri()));
    let response = app
        .server
        .post("/api/generate")
        .authorization_bearer(TEST_TOKEN)
        .json(&json!({"prompt": "  a red fox  "}))
        .await;

    assert_eq!(response.status_code().as_u16(), 200);
    let body: GenerateImageResponse = response.json();
    assert!(body.image_url.starts_with(&format!("{PUBLIC_BASE}/{TEST_USER}/")));
    assert!(body.image_url.ends_with(".png"));

    let paths = app.objects.paths().await;
    assert_eq!(paths.len(), 1);
    assert_eq!(format!("{PUBLIC_BASE}/{}", paths[0]), body.image_url);

    let entries = app.gallery.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].prompt_text, "a red fox");
    assert_eq!(entries[0].image_url, body.image_url);
}

#[test_log::test(tokio::test)]
async fn test_generate_remote_image() {
    let upstream = MockServer::start().await;
    mock_provider(&upstream, json!({"results": [{"url": format!("{}/files/out.webp", upstream.uri())}]})).await;
    Mock::given(method("GET"))
        .and(path("/files/out.webp"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(b"RIFF....WEBP".to_vec(), "image/webp"))
        .expect(1)
        .mount(&upstream)
        .await;

    let app = create_test_app(create_test_config(&upstream.uri()));
    let response = app
        .server
        .post("/api/generate")
        .authorization_bearer(TEST_TOKEN)
        .json(&json!({"prompt": "a fox"}))
        .await;

    assert_eq!(response.status_code().as_u16(), 200);
    let body: GenerateImageResponse = response.json();
    assert!(body.image_url.ends_with(".webp"));
    let stored = app.objects.get(&app.objects.paths().await[0]).await.unwrap();
    assert_eq!(stored.bytes.as_ref(), b"RIFF....WEBP");
}

/// No token means 401, even with a malformed body, and the provider is never reached
#[test_log::test(tokio::test)]
async fn test_missing_token_never_reaches_provider() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"image": "data:image/png;base64,AAAA"})))
        .expect(0)
        .mount(&upstream)
        .await;

    let app = create_test_app(create_test_config(&upstream.uri()));

    let response = app.server.post("/api/generate").json(&json!({"prompt": "a fox"})).await;
    assert_eq!(response.status_code().as_u16(), 401);
    let body: ErrorResponse = response.json();
    assert_eq!(body.error, "unauthorized");

    let response = app.server.post("/api/generate").text("{not json").await;
    assert_eq!(response.status_code().as_u16(), 401);

    let response = app
        .server
        .post("/api/generate")
        .authorization_bearer("someone-else")
        .json(&json!({"prompt": "a fox"}))
        .await;
    assert_eq!(response.status_code().as_u16(), 401);
    assert!(app.gallery.entries().await.is_empty());
}

#[test_log::test(tokio::test)]
async fn test_other_methods_are_405() {
    let upstream = MockServer::start().await;
    let app = create_test_app(create_test_config(&upstream.uri()));

    let response = app.server.get("/api/generate").await;
    assert_eq!(response.status_code().as_u16(), 405);
    let body: ErrorResponse = response.json();
    assert_eq!(body.error, "method_not_allowed");

    let response = app.server.put("/api/generate").authorization_bearer(TEST_TOKEN).await;
    assert_eq!(response.status_code().as_u16(), 405);
}

#[test_log::test(tokio::test)]
async fn test_bad_prompt_is_400() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(500)).expect(0).mount(&upstream).await;
    let app = create_test_app(create_test_config(&upstream.uri()));

    for body in [json!({}), json!({"prompt": "   "}), json!({"prompt": 42})] {
        let response = app.server.post("/api/generate").authorization_bearer(TEST_TOKEN).json(&body).await;
        assert_eq!(response.status_code().as_u16(), 400, "body: {body}");
        let error: ErrorResponse = response.json();
        assert_eq!(error.error, "invalid_input");
    }

    let response = app.server.post("/api/generate").authorization_bearer(TEST_TOKEN).text("{not json").await;
    assert_eq!(response.status_code().as_u16(), 400);
}

#[test_log::test(tokio::test)]
async fn test_provider_failure_is_502_with_status() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
        .mount(&upstream)
        .await;
    let app = create_test_app(create_test_config(&upstream.uri()));

    let response = app
        .server
        .post("/api/generate")
        .authorization_bearer(TEST_TOKEN)
        .json(&json!({"prompt": "a fox"}))
        .await;

    assert_eq!(response.status_code().as_u16(), 502);
    let body: ErrorResponse = response.json();
    assert_eq!(body.error, "upstream_failure");
    assert_eq!(body.status, Some(429));
    assert!(body.message.contains("quota exceeded"));
}

#[test_log::test(tokio::test)]
async fn test_non_json_provider_body_is_502() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway hiccup</html>"))
        .mount(&upstream)
        .await;
    let app = create_test_app(create_test_config(&upstream.uri()));

    let response = app
        .server
        .post("/api/generate")
        .authorization_bearer(TEST_TOKEN)
        .json(&json!({"prompt": "a fox"}))
        .await;

    assert_eq!(response.status_code().as_u16(), 502);
    let body: ErrorResponse = response.json();
    assert_eq!(body.error, "invalid_upstream_payload");
    assert!(body.message.contains("<html>gateway hiccup"));
    assert!(app.objects.paths().await.is_empty());
}

#[test_log::test(tokio::test)]
async fn test_no_image_is_502() {
    let upstream = MockServer::start().await;
    mock_provider(&upstream, json!({})).await;
    let app = create_test_app(create_test_config(&upstream.uri()));

    let response = app
        .server
        .post("/api/generate")
        .authorization_bearer(TEST_TOKEN)
        .json(&json!({"prompt": "a fox"}))
        .await;

    assert_eq!(response.status_code().as_u16(), 502);
    let body: ErrorResponse = response.json();
    assert_eq!(body.error, "no_image_produced");
}

#[test_log::test(tokio::test)]
async fn test_bmp_is_415() {
    let upstream = MockServer::start().await;
    mock_provider(&upstream, json!({"image": "data:image/bmp;base64,Qk0="})).await;
    let app = create_test_app(create_test_config(&upstream.uri()));

    let response = app
        .server
        .post("/api/generate")
        .authorization_bearer(TEST_TOKEN)
        .json(&json!({"prompt": "a fox"}))
        .await;

    assert_eq!(response.status_code().as_u16(), 415);
    let body: ErrorResponse = response.json();
    assert_eq!(body.error, "unsupported_encoding");
    assert!(app.objects.paths().await.is_empty());
}

#[test_log::test(tokio::test)]
async fn test_healthz_and_openapi() {
    let upstream = MockServer::start().await;
    let app = create_test_app(create_test_config(&upstream.uri()));

    let response = app.server.get("/healthz").await;
    assert_eq!(response.status_code().as_u16(), 200);
    assert_eq!(response.text(), "OK");

    let response = app.server.get("/api/openapi.json").await;
    assert_eq!(response.status_code().as_u16(), 200);
    let doc: serde_json::Value = response.json();
    assert!(doc["paths"]["/api/generate"]["post"].is_object());
}

/// Production wiring from config: Supabase identity, storage and gallery all served by wiremock
#[test_log::test(tokio::test)]
async fn test_application_wires_supabase_collaborators() {
    let upstream = MockServer::start().await;
    mock_provider(&upstream, json!({"output": "data:image/jpeg;base64,/9j/"})).await;
    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .and(header("apikey", "anon"))
        .and(header("authorization", "Bearer live-session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "user-9"})))
        .expect(1)
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/storage/v1/object/images/user-9/\d+-[0-9a-f]{12}\.jpeg$"))
        .and(header("x-upsert", "false"))
        .and(header("content-type", "image/jpeg"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Key": "ok"})))
        .expect(1)
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/images"))
        .and(wiremock::matchers::body_partial_json(json!({"user_id": "user-9", "prompt": "a fox"})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&upstream)
        .await;

    let server = crate::Application::new(create_test_config(&upstream.uri()))
        .await
        .expect("Failed to create application")
        .into_test_server();

    let response = server
        .post("/api/generate")
        .authorization_bearer("live-session")
        .json(&json!({"prompt": "a fox"}))
        .await;

    assert_eq!(response.status_code().as_u16(), 200);
    let body: GenerateImageResponse = response.json();
    assert!(
        body.image_url
            .starts_with(&format!("{}/storage/v1/object/public/images/user-9/", upstream.uri()))
    );
}
