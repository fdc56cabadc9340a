//! Turning an [`ImageReference`] into bytes we can store.

use super::{ImageReference, addressing};
use crate::errors::{Error, Result};
use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use bytes::{Bytes, BytesMut};
use reqwest::Client;
use tracing::{debug, instrument, warn};

/// Content type assumed when a remote host does not declare one
const DEFAULT_CONTENT_TYPE: &str = "image/png";

/// Upper bound on a downloaded image unless configured otherwise
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Standard alphabet; providers emit both padded and unpadded payloads
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Raw image bytes plus everything needed to name and upload them.
#[derive(Debug, Clone)]
pub struct MaterializedImage {
    pub bytes: Bytes,
    /// Content type sent to object storage
    pub mime_type: String,
    /// File extension used in the storage path, without the dot
    pub extension: String,
    /// First 12 hex characters of the SHA-256 of `bytes`
    pub content_hash: String,
}

impl MaterializedImage {
    fn new(bytes: Bytes, mime_type: String, extension: String) -> Self {
        let content_hash = addressing::address_of(&bytes);
        Self {
            bytes,
            mime_type,
            extension,
            content_hash,
        }
    }
}

/// Normalize an inline-data subtype to the extension we store it under.
pub(crate) fn inline_extension(subtype: &str) -> Option<&'static str> {
    match subtype {
        "png" => Some("png"),
        "jpeg" | "jpg" => Some("jpeg"),
        "webp" => Some("webp"),
        "gif" => Some("gif"),
        _ => None,
    }
}

/// Map a declared content type to a file extension.
///
/// Remote hosts are not required to send conformant content types, so anything that is not
/// recognizably jpeg or webp is stored as png.
fn remote_extension(content_type: &str) -> &'static str {
    if content_type.contains("jpeg") {
        "jpeg"
    } else if content_type.contains("webp") {
        "webp"
    } else {
        "png"
    }
}

/// Decodes inline images and downloads remote ones. Performs no retries.
#[derive(Clone)]
pub struct ImageMaterializer {
    http: Client,
    max_bytes: usize,
}

impl ImageMaterializer {
    pub fn new(http: Client) -> Self {
        Self {
            http,
            max_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }

    /// Refuse remote images larger than `max_bytes`
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub async fn materialize(&self, reference: &ImageReference) -> Result<MaterializedImage> {
        match reference {
            ImageReference::InlineData {
                mime_subtype,
                base64_payload,
            } => decode_inline(mime_subtype, base64_payload),
            ImageReference::RemoteUrl { url } => self.fetch_remote(url).await,
        }
    }

    #[instrument(skip(self), err)]
    async fn fetch_remote(&self, url: &str) -> Result<MaterializedImage> {
        let mut response = self.http.get(url).send().await.map_err(|e| {
            debug!("Remote image request failed: {}", e);
            Error::UpstreamFetchFailed {
                url: url.to_string(),
                status: None,
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamFetchFailed {
                url: url.to_string(),
                status: Some(status.as_u16()),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let too_large = || {
            warn!(limit = self.max_bytes, "Remote image exceeds size limit");
            Error::UpstreamFetchFailed {
                url: url.to_string(),
                status: None,
            }
        };
        if response.content_length().is_some_and(|len| len > self.max_bytes as u64) {
            return Err(too_large());
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            debug!("Reading remote image body failed: {}", e);
            Error::UpstreamFetchFailed {
                url: url.to_string(),
                status: Some(status.as_u16()),
            }
        })? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        let bytes = body.freeze();

        let extension = remote_extension(&content_type.to_ascii_lowercase()).to_string();
        debug!(size = bytes.len(), content_type = %content_type, "Fetched remote image");
        Ok(MaterializedImage::new(bytes, content_type, extension))
    }
}

fn decode_inline(mime_subtype: &str, base64_payload: &str) -> Result<MaterializedImage> {
    let extension = inline_extension(mime_subtype).ok_or_else(|| Error::UnsupportedEncoding {
        subtype: mime_subtype.to_string(),
    })?;

    // Providers occasionally wrap long payloads across lines
    let compact: String = base64_payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = BASE64.decode(compact.as_bytes()).map_err(|e| Error::UnrecognizedFormat {
        message: format!("inline image payload is not valid base64: {e}"),
    })?;
    if bytes.is_empty() {
        return Err(Error::UnrecognizedFormat {
            message: "inline image payload is empty".to_string(),
        });
    }

    Ok(MaterializedImage::new(
        Bytes::from(bytes),
        format!("image/{extension}"),
        extension.to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn inline(subtype: &str, payload: &str) -> ImageReference {
        ImageReference::InlineData {
            mime_subtype: subtype.to_string(),
            base64_payload: payload.to_string(),
        }
    }

    fn materializer() -> ImageMaterializer {
        ImageMaterializer::new(crate::http_client(std::time::Duration::from_secs(5)).unwrap())
    }

    #[tokio::test]
    async fn test_inline_png() {
        let image = materializer().materialize(&inline("png", "AAAA")).await.unwrap();
        assert_eq!(image.bytes.as_ref(), &[0u8, 0, 0]);
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.extension, "png");
        assert_eq!(image.content_hash, addressing::address_of(&[0, 0, 0]));
    }

    #[tokio::test]
    async fn test_inline_jpg_normalized() {
        let image = materializer().materialize(&inline("jpg", "/9j/")).await.unwrap();
        assert_eq!(image.extension, "jpeg");
        assert_eq!(image.mime_type, "image/jpeg");
    }

    #[tokio::test]
    async fn test_inline_payload_with_line_breaks() {
        let image = materializer().materialize(&inline("gif", "R0lG\nODlh")).await.unwrap();
        assert_eq!(image.bytes.as_ref(), b"GIF89a");
    }

    #[tokio::test]
    async fn test_inline_bmp_unsupported() {
        let err = materializer().materialize(&inline("bmp", "Qk0=")).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedEncoding { ref subtype } if subtype == "bmp"));
        assert_eq!(err.status_code().as_u16(), 415);
    }

    #[tokio::test]
    async fn test_inline_unpadded_payload() {
        let image = materializer().materialize(&inline("png", "iVBORw0KGgo")).await.unwrap();
        assert_eq!(image.bytes.as_ref(), &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]);

        let padded = materializer().materialize(&inline("png", "iVBORw0KGgo=")).await.unwrap();
        assert_eq!(padded.content_hash, image.content_hash);
    }

    #[tokio::test]
    async fn test_inline_empty_payload_rejected() {
        let reference: ImageReference = "data:image/png;base64,".parse().unwrap();
        let err = materializer().materialize(&reference).await.unwrap_err();
        assert!(matches!(err, Error::UnrecognizedFormat { .. }));
        assert_eq!(err.status_code().as_u16(), 415);

        let err = materializer().materialize(&inline("png", " \n ")).await.unwrap_err();
        assert!(matches!(err, Error::UnrecognizedFormat { .. }));
    }

    #[tokio::test]
    async fn test_inline_invalid_base64() {
        let err = materializer().materialize(&inline("png", "not base64!!")).await.unwrap_err();
        assert!(matches!(err, Error::UnrecognizedFormat { .. }));
    }

    #[tokio::test]
    async fn test_remote_uses_declared_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/out.webp"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(b"RIFFxxxxWEBP".to_vec(), "image/webp"))
            .expect(1)
            .mount(&server)
            .await;

        let reference = ImageReference::RemoteUrl {
            url: format!("{}/out.webp", server.uri()),
        };
        let image = materializer().materialize(&reference).await.unwrap();
        assert_eq!(image.bytes.as_ref(), b"RIFFxxxxWEBP");
        assert_eq!(image.mime_type, "image/webp");
        assert_eq!(image.extension, "webp");
    }

    #[tokio::test]
    async fn test_remote_unknown_content_type_stored_as_png() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/render"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(b"GIF89a".to_vec(), "application/octet-stream"))
            .mount(&server)
            .await;

        let reference = ImageReference::RemoteUrl {
            url: format!("{}/render", server.uri()),
        };
        let image = materializer().materialize(&reference).await.unwrap();
        assert_eq!(image.extension, "png");
        assert_eq!(image.mime_type, "application/octet-stream");
    }

    #[tokio::test]
    async fn test_remote_missing_content_type_defaults_to_png() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/raw"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x89, b'P', b'N', b'G']))
            .mount(&server)
            .await;

        let reference = ImageReference::RemoteUrl {
            url: format!("{}/raw", server.uri()),
        };
        let image = materializer().materialize(&reference).await.unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.extension, "png");
    }

    #[tokio::test]
    async fn test_remote_failure_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let reference = ImageReference::RemoteUrl {
            url: format!("{}/missing.png", server.uri()),
        };
        let err = materializer().materialize(&reference).await.unwrap_err();
        assert!(matches!(err, Error::UpstreamFetchFailed { status: Some(404), .. }));
        assert_eq!(err.status_code().as_u16(), 502);
    }

    #[tokio::test]
    async fn test_remote_connection_refused() {
        // Bind then drop a listener so the port is known to be closed
        let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();

        let reference = ImageReference::RemoteUrl {
            url: format!("http://127.0.0.1:{port}/out.png"),
        };
        let err = materializer().materialize(&reference).await.unwrap_err();
        assert!(matches!(err, Error::UpstreamFetchFailed { status: None, .. }));
        assert_eq!(err.status_code().as_u16(), 502);
    }

    #[tokio::test]
    async fn test_remote_image_over_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big.png"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0u8; 2048], "image/png"))
            .mount(&server)
            .await;

        let reference = ImageReference::RemoteUrl {
            url: format!("{}/big.png", server.uri()),
        };
        let err = materializer().with_max_bytes(1024).materialize(&reference).await.unwrap_err();
        assert!(matches!(err, Error::UpstreamFetchFailed { status: None, .. }));

        let image = materializer().with_max_bytes(2048).materialize(&reference).await.unwrap();
        assert_eq!(image.bytes.len(), 2048);
    }

    #[test]
    fn test_remote_extension_mapping() {
        assert_eq!(remote_extension("image/jpeg"), "jpeg");
        assert_eq!(remote_extension("image/webp; charset=binary"), "webp");
        assert_eq!(remote_extension("image/png"), "png");
        assert_eq!(remote_extension("image/gif"), "png");
        assert_eq!(remote_extension(""), "png");
    }
}
