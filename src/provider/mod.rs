// src/provider/mod.rs — Image provider layer

pub mod catalog;
pub mod edit;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod router;
pub mod sync_api;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::cancel::CancellationToken;
use crate::infra::errors::ShotsmithError;
pub use catalog::{ProviderCatalog, ProviderId, ProviderProfile, PromptSyntax, Protocol};

/// Core trait that every image backend adapter implements.
///
/// Adapters normalize their backend's submission protocol to one
/// [`GenerationResult`]. Errors are classified through [`ShotsmithError`]:
/// adapters repeat individual HTTP calls on transient variants through
/// [`retry::RetryConfig::run`], everything else is final for the attempt.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn id(&self) -> ProviderId;
    fn protocol(&self) -> AdapterKind;

    async fn submit(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult, ShotsmithError>;
}

/// The three submission shapes an adapter can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    Sync,
    Queue,
    Edit,
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterKind::Sync => write!(f, "sync"),
            AdapterKind::Queue => write!(f, "queue"),
            AdapterKind::Edit => write!(f, "edit"),
        }
    }
}

/// A reference image passed alongside a prompt (character sheet, product shot...).
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceImage {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeHint {
    #[default]
    Square,
    Landscape,
    Portrait,
    /// Cinematic wide frame.
    Wide,
}

impl SizeHint {
    /// Pixel size string used by OpenAI-compatible image APIs.
    pub fn openai_size(&self) -> &'static str {
        match self {
            SizeHint::Square => "1024x1024",
            SizeHint::Landscape | SizeHint::Wide => "1536x1024",
            SizeHint::Portrait => "1024x1536",
        }
    }

    /// Named preset used by queue backends.
    pub fn queue_preset(&self) -> &'static str {
        match self {
            SizeHint::Square => "square_hd",
            SizeHint::Landscape => "landscape_4_3",
            SizeHint::Portrait => "portrait_4_3",
            SizeHint::Wide => "landscape_16_9",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Draft,
    #[default]
    Standard,
    High,
}

impl QualityTier {
    pub fn openai_quality(&self) -> &'static str {
        match self {
            QualityTier::Draft => "low",
            QualityTier::Standard => "medium",
            QualityTier::High => "high",
        }
    }
}

/// One immutable generation attempt.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub provider: ProviderId,
    pub reference_images: Vec<ReferenceImage>,
    pub size_hint: SizeHint,
    pub quality: QualityTier,
}

impl GenerationRequest {
    pub fn new(provider: ProviderId, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            provider,
            reference_images: Vec::new(),
            size_hint: SizeHint::default(),
            quality: QualityTier::default(),
        }
    }

    pub fn with_references(mut self, refs: Vec<ReferenceImage>) -> Self {
        self.reference_images = refs;
        self
    }

    pub fn with_size(mut self, size: SizeHint) -> Self {
        self.size_hint = size;
        self
    }

    pub fn with_quality(mut self, quality: QualityTier) -> Self {
        self.quality = quality;
        self
    }
}

/// Normalized output of a single adapter call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Raw image bytes; not persisted, only the fingerprint is.
    #[serde(skip)]
    pub image_bytes: Vec<u8>,
    pub mime_type: String,
    pub provider_request_id: String,
    pub duration_ms: u64,
    /// Revised prompt or other notes returned by the backend.
    pub diagnostic_text: Option<String>,
    pub sha256: String,
}

impl GenerationResult {
    pub fn new(
        image_bytes: Vec<u8>,
        mime_type: impl Into<String>,
        provider_request_id: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        let sha256 = crate::util::sha256_hex(&image_bytes);
        Self {
            image_bytes,
            mime_type: mime_type.into(),
            provider_request_id: provider_request_id.into(),
            duration_ms,
            diagnostic_text: None,
            sha256,
        }
    }

    pub fn with_diagnostic(mut self, text: Option<String>) -> Self {
        self.diagnostic_text = text.filter(|t| !t.trim().is_empty());
        self
    }
}

/// Reject provider error bodies that describe a content-policy block. These
/// come back with assorted status codes and must never be retried.
pub(crate) fn is_content_policy_rejection(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    ["content_policy_violation", "moderation_blocked", "safety system", "nsfw"]
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Download bytes from a result URL returned by a backend.
pub(crate) async fn fetch_image(
    client: &reqwest::Client,
    provider: ProviderId,
    url: &str,
    timeout: std::time::Duration,
) -> Result<(Vec<u8>, String), ShotsmithError> {
    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| ShotsmithError::from_transport(provider.as_str(), e))?;

    if !response.status().is_success() {
        return Err(sync_api::failure_from_response(provider, response).await);
    }

    let mime = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| v.starts_with("image/"))
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
        .unwrap_or_else(|| crate::util::mime_from_path(url).to_string());

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ShotsmithError::from_transport(provider.as_str(), e))?;
    if bytes.is_empty() {
        return Err(ShotsmithError::Permanent {
            provider: provider.to_string(),
            message: format!("empty image body from {}", url),
        });
    }
    Ok((bytes.to_vec(), mime))
}

/// In-process HTTP fixtures shared by the adapter tests.
#[cfg(test)]
pub(crate) mod testing {
    pub async fn serve(router: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }
}
