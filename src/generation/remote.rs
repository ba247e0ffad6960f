//! Remote backend - OpenAI-compatible image generation over HTTP.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Backend, GeneratedImage, GenerationError, GenerationErrorKind, GenerationRequest, ImageGenerator};
use crate::config::PipelineConfig;

const CONNECTION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
    url: Option<String>,
}

pub struct RemoteGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    size: String,
    quality: String,
}

impl RemoteGenerator {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        size: impl Into<String>,
        quality: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            size: size.into(),
            quality: quality.into(),
        }
    }

    /// `None` when no API key is configured.
    pub fn from_config(config: &PipelineConfig) -> Option<Self> {
        if !config.has_api_key() {
            return None;
        }
        let key = config.api_key.clone()?;
        Some(Self::new(
            config.api_base_url.clone(),
            key,
            config.image_model.clone(),
            config.image_size.clone(),
            config.image_quality.clone(),
        ))
    }

    async fn request_image(&self, request: &GenerationRequest, timeout: Duration) -> Result<Vec<u8>, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": request.prompt,
            "size": self.size,
            "quality": self.quality,
            "n": 1,
            "response_format": "b64_json",
        });

        let response = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(classify_status(status, &text));
        }

        let parsed: ImagesResponse = response.json().await.map_err(transport_error)?;
        match extract_image(parsed)? {
            ImagePayload::Bytes(bytes) => Ok(bytes),
            ImagePayload::Url(url) => {
                debug!(product_id = %request.product_id, "Downloading generated image");
                let resp = self
                    .client
                    .get(&url)
                    .timeout(timeout)
                    .send()
                    .await
                    .map_err(transport_error)?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(classify_status(status, "image download failed"));
                }
                let bytes = resp.bytes().await.map_err(transport_error)?;
                Ok(bytes.to_vec())
            }
        }
    }
}

#[async_trait]
impl ImageGenerator for RemoteGenerator {
    fn describe(&self) -> String {
        format!("remote ({})", self.model)
    }

    fn backend(&self) -> Backend {
        Backend::Remote
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        timeout: Duration,
    ) -> Result<GeneratedImage, GenerationError> {
        if request.prompt.trim().is_empty() {
            return Err(GenerationError::new(GenerationErrorKind::InvalidRequest, "empty prompt"));
        }
        info!(product_id = %request.product_id, model = %self.model, size = %self.size, "Requesting remote image");

        let bytes = match tokio::time::timeout(timeout, self.request_image(request, timeout)).await {
            Ok(result) => result?,
            Err(_) => return Err(GenerationError::timeout(timeout)),
        };

        info!(product_id = %request.product_id, bytes = bytes.len(), "Remote image received");
        Ok(GeneratedImage::new(bytes, Backend::Remote))
    }

    async fn check_connection(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(CONNECTION_CHECK_TIMEOUT)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(status = %resp.status(), "Image service connection check rejected");
                false
            }
            Err(e) => {
                warn!(error = %e, "Image service unreachable");
                false
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum ImagePayload {
    Bytes(Vec<u8>),
    Url(String),
}

fn extract_image(response: ImagesResponse) -> Result<ImagePayload, GenerationError> {
    let datum = response.data.into_iter().next().ok_or_else(|| {
        GenerationError::new(GenerationErrorKind::Transport, "response contained no images")
    })?;
    if let Some(b64) = datum.b64_json {
        return STANDARD
            .decode(b64.trim())
            .map(ImagePayload::Bytes)
            .map_err(|e| GenerationError::new(GenerationErrorKind::Transport, format!("bad base64 payload: {}", e)));
    }
    match datum.url {
        Some(url) => Ok(ImagePayload::Url(url)),
        None => Err(GenerationError::new(
            GenerationErrorKind::Transport,
            "response carried neither image data nor a URL",
        )),
    }
}

fn classify_status(status: StatusCode, body: &str) -> GenerationError {
    let message = format!("{}: {}", status, body.chars().take(500).collect::<String>());
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GenerationErrorKind::Auth,
        StatusCode::TOO_MANY_REQUESTS => GenerationErrorKind::Quota,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => GenerationErrorKind::Timeout,
        _ if body.contains("insufficient_quota") || body.contains("billing_hard_limit") => GenerationErrorKind::Quota,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => GenerationErrorKind::InvalidRequest,
        _ => GenerationErrorKind::Transport,
    };
    GenerationError::new(kind, message)
}

fn transport_error(e: reqwest::Error) -> GenerationError {
    if e.is_timeout() {
        GenerationError::new(GenerationErrorKind::Timeout, e.to_string())
    } else {
        GenerationError::new(GenerationErrorKind::Transport, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED, "").kind, GenerationErrorKind::Auth);
        assert_eq!(classify_status(StatusCode::FORBIDDEN, "").kind, GenerationErrorKind::Auth);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").kind, GenerationErrorKind::Quota);
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST, r#"{"error":{"code":"insufficient_quota"}}"#).kind,
            GenerationErrorKind::Quota
        );
        assert_eq!(classify_status(StatusCode::BAD_REQUEST, "bad size").kind, GenerationErrorKind::InvalidRequest);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY, "").kind, GenerationErrorKind::Transport);
    }

    #[test]
    fn test_extract_b64_payload() {
        let parsed: ImagesResponse = serde_json::from_str(r#"{"data":[{"b64_json":"aGVsbG8="}]}"#).unwrap();
        assert_eq!(extract_image(parsed).unwrap(), ImagePayload::Bytes(b"hello".to_vec()));
    }

    #[test]
    fn test_extract_url_payload() {
        let parsed: ImagesResponse = serde_json::from_str(r#"{"data":[{"url":"https://x/y.png"}]}"#).unwrap();
        assert_eq!(extract_image(parsed).unwrap(), ImagePayload::Url("https://x/y.png".into()));
    }

    #[test]
    fn test_extract_empty_response() {
        let parsed: ImagesResponse = serde_json::from_str(r#"{"data":[]}"#).unwrap();
        assert_matches!(extract_image(parsed), Err(GenerationError { kind: GenerationErrorKind::Transport, .. }));
    }

    #[test]
    fn test_from_config_requires_key() {
        let mut config = PipelineConfig::for_output("/tmp/out");
        assert!(RemoteGenerator::from_config(&config).is_none());
        config.api_key = Some("   ".into());
        assert!(RemoteGenerator::from_config(&config).is_none());
        config.api_key = Some("sk-test".into());
        assert!(RemoteGenerator::from_config(&config).is_some());
    }

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            product_id: "p".into(),
            product_name: "P".into(),
            prompt: prompt.into(),
            size: (1024, 1024),
        }
    }

    #[tokio::test]
    async fn test_stalled_service_times_out() {
        // accepts connections, never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let gen = RemoteGenerator::new(format!("http://{}", addr), "k", "m", "1024x1024", "standard");
        let started = std::time::Instant::now();
        let err = gen.generate(&request("a red kite"), Duration::from_millis(300)).await.unwrap_err();

        assert_eq!(err.kind, GenerationErrorKind::Timeout);
        assert!(started.elapsed() < Duration::from_secs(5));
        server.abort();
    }

    #[tokio::test]
    async fn test_empty_prompt_rejected_without_network() {
        let gen = RemoteGenerator::new("http://127.0.0.1:9", "k", "m", "1024x1024", "standard");
        let err = gen.generate(&request("  "), Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::InvalidRequest);
    }
}
