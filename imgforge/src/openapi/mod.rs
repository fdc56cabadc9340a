//! OpenAPI documentation for the HTTP surface, served at `/api/openapi.json` and rendered with
//! Scalar at `/api/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api::{handlers, models};

struct BearerSecurityAddon;

impl Modify for BearerSecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "BearerAuth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "Session token from the identity service:\n\n```\nAuthorization: Bearer YOUR_SESSION_TOKEN\n```",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "imgforge",
        description = "Generate images from text prompts and keep them in a per-user gallery."
    ),
    paths(handlers::generate::generate_image, handlers::health::healthz),
    components(schemas(
        models::generate::GenerateImageRequest,
        models::generate::GenerateImageResponse,
        models::generate::ErrorResponse,
    )),
    modifiers(&BearerSecurityAddon),
    tags(
        (name = "images", description = "Image generation"),
        (name = "health", description = "Service health"),
    )
)]
pub struct ApiDoc;
