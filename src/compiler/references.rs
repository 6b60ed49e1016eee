// src/compiler/references.rs — Reference image store (filesystem paths and HTTP URLs)

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::context::BriefContext;
use crate::infra::errors::ShotsmithError;
use crate::provider::ReferenceImage;

/// Resolves a stored reference location to bytes and a MIME type.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn load(&self, location: &str) -> Result<ReferenceImage, ShotsmithError>;
}

/// Default store: `http(s)://` locations are downloaded, everything else is a
/// path resolved against `base_dir`.
pub struct LocalReferenceStore {
    base_dir: PathBuf,
    client: reqwest::Client,
    timeout: Duration,
}

impl LocalReferenceStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn resolve(&self, location: &str) -> PathBuf {
        let path = Path::new(location);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    async fn download(&self, url: &str) -> Result<ReferenceImage, ShotsmithError> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ShotsmithError::from_transport("references", e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ShotsmithError::from_status("references", status, &body));
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
            .map_err(|e| ShotsmithError::from_transport("references", e))?;
        Ok(ReferenceImage {
            name: file_name(url),
            mime_type: mime,
            bytes: bytes.to_vec(),
        })
    }
}

#[async_trait]
impl ReferenceStore for LocalReferenceStore {
    async fn load(&self, location: &str) -> Result<ReferenceImage, ShotsmithError> {
        if location.starts_with("http://") || location.starts_with("https://") {
            return self.download(location).await;
        }
        let path = self.resolve(location);
        let bytes = tokio::fs::read(&path).await?;
        Ok(ReferenceImage {
            name: file_name(location),
            mime_type: crate::util::mime_from_path(location).to_string(),
            bytes,
        })
    }
}

fn file_name(location: &str) -> String {
    let trimmed = location.split(['?', '#']).next().unwrap_or(location);
    trimmed
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or("reference")
        .to_string()
}

/// Load every reference the brief names, in brief order. A missing or
/// unreadable reference is skipped with a warning rather than failing the run.
pub async fn load_for_brief(store: &dyn ReferenceStore, brief: &BriefContext) -> Vec<ReferenceImage> {
    let mut images = Vec::new();
    for location in brief.reference_paths() {
        match store.load(location).await {
            Ok(img) if !img.bytes.is_empty() => images.push(img),
            Ok(_) => tracing::warn!(reference = location, "Reference image is empty, skipping"),
            Err(e) => tracing::warn!(reference = location, "Reference image unavailable: {}", e),
        }
    }
    images
}
