//! Image inlining shared by the Anthropic and Google encoders (§4.B). Both
//! families need the same bytes; only the wrapping content-block shape
//! differs, so the fetch/validate logic lives here once.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::TranslateError;

pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct InlinedImage {
    pub mime_type: String,
    pub base64_data: String,
}

/// Fetches raw bytes for an image URL. Implemented with a real HTTP client
/// in production and fakeable in tests without touching the network.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<(String, Vec<u8>), TranslateError>;
}

/// `reqwest`-backed fetcher used outside of tests.
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<(String, Vec<u8>), TranslateError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TranslateError::bad_request(format!("image fetch failed: {e}")))?;
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .split(';')
            .next()
            .unwrap_or("application/octet-stream")
            .trim()
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TranslateError::bad_request(format!("image fetch failed: {e}")))?;
        Ok((mime_type, bytes.to_vec()))
    }
}

/// Resolves an `image_url.url` (either a `data:` URL or an `http(s)://` URL)
/// into inlineable base64 bytes, enforcing the size/scheme/mime rules in
/// §4.B. `data:` URLs never touch the network, matching "data URLs handled
/// without network".
pub async fn inline_image(
    url: &str,
    fetcher: &dyn ImageFetcher,
    enforce_https: bool,
) -> Result<InlinedImage, TranslateError> {
    if let Some(rest) = url.strip_prefix("data:") {
        return parse_data_url(rest);
    }

    if enforce_https && !url.starts_with("https://") {
        return Err(TranslateError::bad_request(
            "image URL must use https in production",
        ));
    }
    if !url.starts_with("https://") && !url.starts_with("http://") {
        return Err(TranslateError::bad_request("unsupported image URL scheme"));
    }

    let (mime_type, bytes) = fetcher.fetch(url).await?;
    validate_mime_and_size(&mime_type, bytes.len())?;
    Ok(InlinedImage {
        mime_type,
        base64_data: BASE64.encode(bytes),
    })
}

fn parse_data_url(rest: &str) -> Result<InlinedImage, TranslateError> {
    let (meta, data) = rest
        .split_once(',')
        .ok_or_else(|| TranslateError::bad_request("malformed data URL"))?;
    let mime_type = meta
        .split(';')
        .next()
        .filter(|m| !m.is_empty())
        .unwrap_or("application/octet-stream")
        .to_string();
    let is_base64 = meta.contains(";base64");

    let bytes = if is_base64 {
        BASE64
            .decode(data)
            .map_err(|_| TranslateError::bad_request("malformed base64 data URL"))?
    } else {
        urlencoding_decode(data).into_bytes()
    };

    validate_mime_and_size(&mime_type, bytes.len())?;
    Ok(InlinedImage {
        mime_type,
        base64_data: BASE64.encode(&bytes),
    })
}

fn urlencoding_decode(input: &str) -> String {
    percent_decode(input)
}

fn percent_decode(input: &str) -> String {
    let mut out = Vec::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                if let Ok(value) = u8::from_str_radix(&input[i + 1..i + 3], 16) {
                    out.push(value);
                    i += 3;
                    continue;
                }
                out.push(bytes[i]);
                i += 1;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn validate_mime_and_size(mime_type: &str, size: usize) -> Result<(), TranslateError> {
    if !mime_type.starts_with("image/") {
        return Err(TranslateError::bad_request(format!(
            "unsupported content type for image block: {mime_type}"
        )));
    }
    if size > MAX_IMAGE_BYTES {
        return Err(TranslateError::bad_request("image exceeds 20 MiB limit"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverCalled;

    #[async_trait]
    impl ImageFetcher for NeverCalled {
        async fn fetch(&self, _url: &str) -> Result<(String, Vec<u8>), TranslateError> {
            panic!("data: URLs must not hit the network")
        }
    }

    #[tokio::test]
    async fn data_url_is_inlined_without_network() {
        let url = format!("data:image/png;base64,{}", BASE64.encode(b"fake-png-bytes"));
        let inlined = inline_image(&url, &NeverCalled, true).await.unwrap();
        assert_eq!(inlined.mime_type, "image/png");
        assert_eq!(BASE64.decode(inlined.base64_data).unwrap(), b"fake-png-bytes");
    }

    #[tokio::test]
    async fn non_image_mime_is_rejected() {
        let url = format!("data:text/plain;base64,{}", BASE64.encode(b"hi"));
        let err = inline_image(&url, &NeverCalled, true).await.unwrap_err();
        assert!(matches!(err, TranslateError::BadRequest(_)));
    }

    #[tokio::test]
    async fn http_scheme_rejected_when_https_enforced() {
        let err = inline_image("http://example.com/a.png", &NeverCalled, true)
            .await
            .unwrap_err();
        assert!(matches!(err, TranslateError::BadRequest(_)));
    }
}
