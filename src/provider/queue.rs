// src/provider/queue.rs — Queue-and-poll image generation (fal-style queue API)
//
// Submit returns a request id plus status/response URLs. The status URL is
// polled on a fixed interval until the job completes or fails, or until the
// wall-clock deadline passes. The result is then fetched in a second call and
// the first image downloaded. Once the queue has accepted a job only the
// follow-up calls are repeated; the job itself is never submitted twice.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;

use super::retry::RetryConfig;
use super::sync_api::failure_from_response;
use super::{
    fetch_image, AdapterKind, GenerationRequest, GenerationResult, ImageProvider, ProviderId,
};
use crate::core::cancel::CancellationToken;
use crate::infra::config::QueueConfig;
use crate::infra::errors::ShotsmithError;

/// Poll timing for one queue job.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub deadline: Duration,
    pub request_timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for PollSettings {
    fn from(cfg: &QueueConfig) -> Self {
        Self {
            interval: Duration::from_millis(cfg.poll_interval_ms),
            deadline: Duration::from_secs(cfg.deadline_secs),
            request_timeout: Duration::from_secs(cfg.request_timeout_secs),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    request_id: String,
    status_url: Option<String>,
    response_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    queue_position: Option<u32>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

enum JobState {
    Pending,
    Completed,
    Failed(String),
}

fn job_state(status: &StatusResponse) -> JobState {
    match status.status.to_ascii_uppercase().as_str() {
        "COMPLETED" | "OK" => JobState::Completed,
        "FAILED" | "ERROR" | "CANCELLED" => JobState::Failed(
            status
                .error
                .as_ref()
                .map(|e| match e {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| format!("job ended with status {}", status.status)),
        ),
        _ => JobState::Pending,
    }
}

pub struct QueueImageProvider {
    id: ProviderId,
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
    poll: PollSettings,
    retry: RetryConfig,
}

impl QueueImageProvider {
    pub fn new(id: ProviderId, api_key: String, model: String) -> Self {
        Self::with_base_url(id, api_key, model, "https://queue.fal.run".into())
    }

    pub fn with_base_url(id: ProviderId, api_key: String, model: String, base_url: String) -> Self {
        Self {
            id,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            poll: PollSettings::default(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn body(&self, request: &GenerationRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "prompt": request.prompt,
            "image_size": request.size_hint.queue_preset(),
            "num_images": 1,
        });
        // Image-to-image models take the first reference inline.
        if let Some(reference) = request.reference_images.first() {
            body["image_url"] =
                serde_json::json!(crate::util::data_uri(&reference.mime_type, &reference.bytes));
        }
        body
    }

    fn auth(&self) -> String {
        format!("Key {}", self.api_key)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, ShotsmithError> {
        let response = self
            .client
            .get(url)
            .header("Authorization", self.auth())
            .timeout(self.poll.request_timeout)
            .send()
            .await
            .map_err(|e| ShotsmithError::from_transport(self.id.as_str(), e))?;
        if !response.status().is_success() {
            return Err(failure_from_response(self.id, response).await);
        }
        response.json().await.map_err(|e| ShotsmithError::Permanent {
            provider: self.id.to_string(),
            message: format!("malformed queue response: {}", e),
        })
    }

    async fn enqueue(&self, request: &GenerationRequest) -> Result<SubmitResponse, ShotsmithError> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, self.model))
            .header("Authorization", self.auth())
            .timeout(self.poll.request_timeout)
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| ShotsmithError::from_submit_transport(self.id.as_str(), e))?;
        if !response.status().is_success() {
            return Err(failure_from_response(self.id, response).await);
        }
        response.json().await.map_err(|e| ShotsmithError::Permanent {
            provider: self.id.to_string(),
            message: format!("malformed submit response: {}", e),
        })
    }

    /// Poll until the job leaves the queue. Transient errors on a single
    /// poll are tolerated; the deadline still bounds the whole wait.
    async fn wait_for_completion(
        &self,
        job_id: &str,
        status_url: &str,
        started: Instant,
        cancel: &CancellationToken,
    ) -> Result<(), ShotsmithError> {
        loop {
            if cancel.is_cancelled() {
                tracing::info!(provider = %self.id, job_id, "Queue poll cancelled");
                return Err(ShotsmithError::Cancelled {
                    provider: self.id.to_string(),
                });
            }
            let elapsed = started.elapsed();
            if elapsed >= self.poll.deadline {
                return Err(ShotsmithError::Timeout {
                    provider: self.id.to_string(),
                    job_id: job_id.to_string(),
                    waited_secs: elapsed.as_secs(),
                });
            }

            tokio::time::sleep(self.poll.interval.min(self.poll.deadline - elapsed)).await;

            match self.get_json::<StatusResponse>(status_url).await {
                Ok(status) => match job_state(&status) {
                    JobState::Completed => return Ok(()),
                    JobState::Failed(reason) => {
                        return Err(ShotsmithError::Permanent {
                            provider: self.id.to_string(),
                            message: format!("job {} failed: {}", job_id, reason),
                        })
                    }
                    JobState::Pending => {
                        tracing::debug!(
                            provider = %self.id,
                            job_id,
                            status = %status.status,
                            queue_position = status.queue_position,
                            "Job pending"
                        );
                    }
                },
                Err(e) if e.is_transient() => {
                    tracing::warn!(provider = %self.id, job_id, "Status poll failed: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ImageProvider for QueueImageProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn protocol(&self) -> AdapterKind {
        AdapterKind::Queue
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
        let job = self
            .retry
            .run(self.id, "submit", cancel, || self.enqueue(request))
            .await?;

        let requests_base = format!("{}/{}/requests/{}", self.base_url, self.model, job.request_id);
        let status_url = job
            .status_url
            .unwrap_or_else(|| format!("{}/status", requests_base));
        let response_url = job.response_url.unwrap_or(requests_base);

        tracing::info!(provider = %self.id, job_id = %job.request_id, "Queued generation job");

        self.wait_for_completion(&job.request_id, &status_url, started, cancel)
            .await?;

        let payload: serde_json::Value = self
            .retry
            .run(self.id, "result", cancel, || self.get_json(&response_url))
            .await?;
        if payload["has_nsfw_concepts"]
            .as_array()
            .is_some_and(|flags| flags.iter().any(|f| f.as_bool() == Some(true)))
        {
            return Err(ShotsmithError::Permanent {
                provider: self.id.to_string(),
                message: "rejected by content policy: output flagged as nsfw".into(),
            });
        }
        let image_url = payload["images"][0]["url"]
            .as_str()
            .ok_or_else(|| ShotsmithError::Permanent {
                provider: self.id.to_string(),
                message: format!("job {} returned no image", job.request_id),
            })?;

        let (bytes, mime) = self
            .retry
            .run(self.id, "download", cancel, || {
                fetch_image(&self.client, self.id, image_url, self.poll.request_timeout)
            })
            .await?;
        let diagnostic = payload["description"]
            .as_str()
            .or_else(|| payload["prompt"].as_str())
            .map(String::from);

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(provider = %self.id, job_id = %job.request_id, duration_ms, "Queue job complete");

        Ok(GenerationResult::new(bytes, mime, job.request_id, duration_ms).with_diagnostic(diagnostic))
    }
}
