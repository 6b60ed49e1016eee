// src/provider/sync_api.rs — Immediate-response image generation (OpenAI images API)

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use super::retry::RetryConfig;
use super::{
    fetch_image, is_content_policy_rejection, AdapterKind, GenerationRequest, GenerationResult,
    ImageProvider, ProviderId,
};
use crate::core::cancel::CancellationToken;
use crate::infra::errors::ShotsmithError;

/// One request, one response. The image comes back inline as base64 or, for
/// some deployments, as a short-lived URL fetched in a second call.
pub struct SyncImageProvider {
    id: ProviderId,
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
    retry: RetryConfig,
}

impl SyncImageProvider {
    pub fn new(id: ProviderId, api_key: String, model: String) -> Self {
        Self::with_base_url(id, api_key, model, "https://api.openai.com/v1".into())
    }

    pub fn with_base_url(id: ProviderId, api_key: String, model: String, base_url: String) -> Self {
        Self {
            id,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(120),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn post_generation(
        &self,
        request: &GenerationRequest,
    ) -> Result<reqwest::Response, ShotsmithError> {
        let response = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| ShotsmithError::from_submit_transport(self.id.as_str(), e))?;
        if !response.status().is_success() {
            return Err(failure_from_response(self.id, response).await);
        }
        Ok(response)
    }

    fn body(&self, request: &GenerationRequest) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "prompt": request.prompt,
            "n": 1,
            "size": request.size_hint.openai_size(),
            "quality": request.quality.openai_quality(),
        })
    }
}

#[async_trait]
impl ImageProvider for SyncImageProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn protocol(&self) -> AdapterKind {
        AdapterKind::Sync
    }

    async fn submit(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult, ShotsmithError> {
        if cancel.is_cancelled() {
            return Err(ShotsmithError::Cancelled {
                provider: self.id.to_string(),
            });
        }

        let started = Instant::now();
        let response = self
            .retry
            .run(self.id, "generate", cancel, || self.post_generation(request))
            .await?;

        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let payload: serde_json::Value =
            response.json().await.map_err(|e| ShotsmithError::Permanent {
                provider: self.id.to_string(),
                message: format!("malformed response: {}", e),
            })?;

        // The job is done and billed from here on; only the download may repeat.
        let (bytes, mime) = decode_image_payload(
            &self.client,
            self.id,
            &payload,
            self.timeout,
            &self.retry,
            cancel,
        )
        .await?;
        let revised = payload["data"][0]["revised_prompt"]
            .as_str()
            .map(String::from);
        let request_id = request_id
            .or_else(|| payload["created"].as_u64().map(|c| format!("img-{}", c)))
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        tracing::debug!(
            provider = %self.id,
            bytes = bytes.len(),
            "Sync generation finished"
        );

        Ok(GenerationResult::new(
            bytes,
            mime,
            request_id,
            started.elapsed().as_millis() as u64,
        )
        .with_diagnostic(revised))
    }
}

/// Content-policy blocks are final whatever status they arrive with.
pub(crate) fn classify_failure(
    id: ProviderId,
    status: reqwest::StatusCode,
    body: &str,
) -> ShotsmithError {
    if is_content_policy_rejection(body) {
        return ShotsmithError::Permanent {
            provider: id.to_string(),
            message: format!(
                "rejected by content policy: {}",
                crate::util::truncate_str(body, 300)
            ),
        };
    }
    ShotsmithError::from_status(id.as_str(), status, body)
}

/// Turn a non-success response into an error, keeping the server's
/// `Retry-After` hint on rate limits.
pub(crate) async fn failure_from_response(
    id: ProviderId,
    response: reqwest::Response,
) -> ShotsmithError {
    let status = response.status();
    let hint = retry_after_ms(response.headers());
    let body = response.text().await.unwrap_or_default();
    match classify_failure(id, status, &body) {
        ShotsmithError::RateLimited { provider, .. } => ShotsmithError::RateLimited {
            provider,
            retry_after_ms: hint.unwrap_or(0),
        },
        other => other,
    }
}

/// `Retry-After` in delta-seconds form, as milliseconds.
fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| secs * 1000)
}

/// Pull the first image out of an images-API response body.
pub(crate) async fn decode_image_payload(
    client: &reqwest::Client,
    id: ProviderId,
    payload: &serde_json::Value,
    timeout: Duration,
    retry: &RetryConfig,
    cancel: &CancellationToken,
) -> Result<(Vec<u8>, String), ShotsmithError> {
    let first = &payload["data"][0];
    if let Some(b64) = first["b64_json"].as_str() {
        let bytes = BASE64.decode(b64).map_err(|e| ShotsmithError::Permanent {
            provider: id.to_string(),
            message: format!("invalid base64 image: {}", e),
        })?;
        if bytes.is_empty() {
            return Err(ShotsmithError::Permanent {
                provider: id.to_string(),
                message: "empty image in response".into(),
            });
        }
        let mime = payload["output_format"]
            .as_str()
            .map(|f| format!("image/{}", if f == "jpg" { "jpeg" } else { f }))
            .unwrap_or_else(|| "image/png".into());
        return Ok((bytes, mime));
    }
    if let Some(url) = first["url"].as_str() {
        return retry
            .run(id, "download", cancel, || fetch_image(client, id, url, timeout))
            .await;
    }
    Err(ShotsmithError::Permanent {
        provider: id.to_string(),
        message: "response contained no image".into(),
    })
}
