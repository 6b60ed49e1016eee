// src/provider/edit.rs — Edit-with-reference generation (multipart images/edits)

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};

use super::retry::RetryConfig;
use super::sync_api::{decode_image_payload, failure_from_response};
use super::{AdapterKind, GenerationRequest, GenerationResult, ImageProvider, ProviderId};
use crate::core::cancel::CancellationToken;
use crate::infra::errors::ShotsmithError;

/// Like the synchronous adapter, but uploads one or more reference images
/// with the prompt and targets the edits endpoint.
pub struct EditImageProvider {
    id: ProviderId,
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
    retry: RetryConfig,
}

impl EditImageProvider {
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
            timeout: Duration::from_secs(180),
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

    async fn post_edit(
        &self,
        request: &GenerationRequest,
    ) -> Result<reqwest::Response, ShotsmithError> {
        let response = self
            .client
            .post(format!("{}/images/edits", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .multipart(self.form(request)?)
            .send()
            .await
            .map_err(|e| ShotsmithError::from_submit_transport(self.id.as_str(), e))?;
        if !response.status().is_success() {
            return Err(failure_from_response(self.id, response).await);
        }
        Ok(response)
    }

    fn form(&self, request: &GenerationRequest) -> Result<Form, ShotsmithError> {
        let mut form = Form::new()
            .text("model", self.model.clone())
            .text("prompt", request.prompt.clone())
            .text("size", request.size_hint.openai_size())
            .text("quality", request.quality.openai_quality())
            .text("n", "1");

        for (i, reference) in request.reference_images.iter().enumerate() {
            let file_name = if reference.name.is_empty() {
                format!(
                    "reference-{}.{}",
                    i + 1,
                    crate::util::extension_for_mime(&reference.mime_type)
                )
            } else {
                reference.name.clone()
            };
            let part = Part::bytes(reference.bytes.clone())
                .file_name(file_name)
                .mime_str(&reference.mime_type)
                .map_err(|e| ShotsmithError::Permanent {
                    provider: self.id.to_string(),
                    message: format!("invalid reference mime '{}': {}", reference.mime_type, e),
                })?;
            form = form.part("image[]", part);
        }
        Ok(form)
    }
}

#[async_trait]
impl ImageProvider for EditImageProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn protocol(&self) -> AdapterKind {
        AdapterKind::Edit
    }

    async fn submit(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult, ShotsmithError> {
        if request.reference_images.is_empty() {
            return Err(ShotsmithError::Permanent {
                provider: self.id.to_string(),
                message: "edit requests need at least one reference image".into(),
            });
        }
        if cancel.is_cancelled() {
            return Err(ShotsmithError::Cancelled {
                provider: self.id.to_string(),
            });
        }

        let started = Instant::now();
        let response = self
            .retry
            .run(self.id, "edit", cancel, || self.post_edit(request))
            .await?;

        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let payload: serde_json::Value =
            response.json().await.map_err(|e| ShotsmithError::Permanent {
                provider: self.id.to_string(),
                message: format!("malformed response: {}", e),
            })?;
        let (bytes, mime) = decode_image_payload(
            &self.client,
            self.id,
            &payload,
            self.timeout,
            &self.retry,
            cancel,
        )
        .await?;

        tracing::debug!(
            provider = %self.id,
            references = request.reference_images.len(),
            "Edit generation finished"
        );

        Ok(GenerationResult::new(
            bytes,
            mime,
            request_id,
            started.elapsed().as_millis() as u64,
        ))
    }
}
