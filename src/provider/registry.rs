// src/provider/registry.rs — Catalog id → adapter wiring and credential discovery

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::catalog::{ProviderCatalog, ProviderId, Protocol};
use super::edit::EditImageProvider;
use super::queue::{PollSettings, QueueImageProvider};
use super::retry::RetryConfig;
use super::sync_api::SyncImageProvider;
use super::{GenerationRequest, ImageProvider};
use crate::infra::config::Config;
use crate::infra::errors::ShotsmithError;

/// API keys for the two backend families.
#[derive(Debug, Clone, Default)]
pub struct ProviderKeys {
    pub openai: Option<String>,
    pub fal: Option<String>,
}

impl ProviderKeys {
    /// Read keys from `OPENAI_API_KEY` and `FAL_KEY`. Blank values count as unset.
    pub fn from_env() -> Self {
        let read = |var: &str| std::env::var(var).ok().filter(|v| !v.trim().is_empty());
        Self {
            openai: read("OPENAI_API_KEY"),
            fal: read("FAL_KEY"),
        }
    }
}

/// Generation adapters keyed by catalog id, plus optional edit adapters for
/// providers that accept reference uploads.
#[derive(Default)]
pub struct ProviderRegistry {
    generators: HashMap<ProviderId, Arc<dyn ImageProvider>>,
    editors: HashMap<ProviderId, Arc<dyn ImageProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ImageProvider>) {
        self.generators.insert(adapter.id(), adapter);
    }

    pub fn register_editor(&mut self, adapter: Arc<dyn ImageProvider>) {
        self.editors.insert(adapter.id(), adapter);
    }

    /// Build every adapter the available credentials allow. Each adapter
    /// applies the configured retry schedule to its individual HTTP calls.
    pub fn from_config(config: &Config, catalog: &ProviderCatalog, keys: &ProviderKeys) -> Self {
        let retry = RetryConfig::from(&config.retry);
        let poll = PollSettings::from(&config.queue);
        let timeout = Duration::from_secs(config.queue.request_timeout_secs.max(1) * 2);

        let mut registry = Self::new();
        for profile in catalog.all().iter().filter(|p| p.api_available) {
            match profile.protocol {
                Protocol::Sync => {
                    let Some(key) = keys.openai.clone() else { continue };
                    if profile.capabilities.generate {
                        registry.register(Arc::new(
                            SyncImageProvider::with_base_url(
                                profile.id,
                                key.clone(),
                                profile.model.clone(),
                                config.endpoints.openai_base_url.clone(),
                            )
                            .with_timeout(timeout)
                            .with_retry(retry.clone()),
                        ));
                    }
                    if profile.capabilities.edit {
                        registry.register_editor(Arc::new(
                            EditImageProvider::with_base_url(
                                profile.id,
                                key,
                                profile.model.clone(),
                                config.endpoints.openai_base_url.clone(),
                            )
                            .with_timeout(timeout)
                            .with_retry(retry.clone()),
                        ));
                    }
                }
                Protocol::Queue if profile.capabilities.generate => {
                    let Some(key) = keys.fal.clone() else { continue };
                    registry.register(Arc::new(
                        QueueImageProvider::with_base_url(
                            profile.id,
                            key,
                            profile.model.clone(),
                            config.endpoints.queue_base_url.clone(),
                        )
                        .with_poll_settings(poll.clone())
                        .with_retry(retry.clone()),
                    ));
                }
                Protocol::Queue => {}
            }
        }

        tracing::debug!(
            generators = registry.generators.len(),
            editors = registry.editors.len(),
            "Provider registry ready"
        );
        registry
    }

    /// Providers with a generation adapter, sorted for stable output.
    pub fn available(&self) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> = self.generators.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn has_editor(&self, id: ProviderId) -> bool {
        self.editors.contains_key(&id)
    }

    /// Pick the adapter for a request: the edit adapter when references are
    /// attached and one exists, otherwise the generation adapter.
    pub fn adapter_for(
        &self,
        request: &GenerationRequest,
    ) -> Result<Arc<dyn ImageProvider>, ShotsmithError> {
        if !request.reference_images.is_empty() {
            if let Some(editor) = self.editors.get(&request.provider) {
                return Ok(editor.clone());
            }
        }
        self.generators
            .get(&request.provider)
            .cloned()
            .ok_or_else(|| ShotsmithError::UnknownProvider(request.provider.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{AdapterKind, ReferenceImage};

    fn keys(openai: bool, fal: bool) -> ProviderKeys {
        ProviderKeys {
            openai: openai.then(|| "sk-test".to_string()),
            fal: fal.then(|| "fal-test".to_string()),
        }
    }

    fn build(openai: bool, fal: bool) -> ProviderRegistry {
        let catalog = ProviderCatalog::builtin().unwrap();
        ProviderRegistry::from_config(&Config::default(), &catalog, &keys(openai, fal))
    }

    #[test]
    fn test_no_keys_no_providers() {
        assert!(build(false, false).available().is_empty());
    }

    #[test]
    fn test_openai_key_enables_sync_and_edit() {
        let registry = build(true, false);
        assert_eq!(registry.available(), vec![ProviderId::GptImage]);
        assert!(registry.has_editor(ProviderId::GptImage));
    }

    #[test]
    fn test_fal_key_enables_queue_providers() {
        let registry = build(false, true);
        let available = registry.available();
        assert!(available.contains(&ProviderId::FluxPro));
        assert!(available.contains(&ProviderId::Seedream));
        assert!(!available.contains(&ProviderId::GptImage));
        // not api_available
        assert!(!available.contains(&ProviderId::Kling));
        // cannot generate
        assert!(!available.contains(&ProviderId::TopazUpscale));
    }

    #[test]
    fn test_references_route_to_editor() {
        let registry = build(true, true);
        let plain = GenerationRequest::new(ProviderId::GptImage, "x");
        assert_eq!(
            registry.adapter_for(&plain).unwrap().protocol(),
            AdapterKind::Sync
        );

        let with_refs = plain.clone().with_references(vec![ReferenceImage {
            name: "a.png".into(),
            mime_type: "image/png".into(),
            bytes: vec![1],
        }]);
        assert_eq!(
            registry.adapter_for(&with_refs).unwrap().protocol(),
            AdapterKind::Edit
        );
    }

    #[test]
    fn test_references_without_editor_use_generator() {
        let registry = build(false, true);
        let req = GenerationRequest::new(ProviderId::FluxKontext, "x").with_references(vec![
            ReferenceImage {
                name: "a.png".into(),
                mime_type: "image/png".into(),
                bytes: vec![1],
            },
        ]);
        assert_eq!(
            registry.adapter_for(&req).unwrap().protocol(),
            AdapterKind::Queue
        );
    }

    #[test]
    fn test_unregistered_provider_is_error() {
        let registry = build(false, false);
        let req = GenerationRequest::new(ProviderId::Imagen, "x");
        assert!(matches!(
            registry.adapter_for(&req),
            Err(ShotsmithError::UnknownProvider(_))
        ));
    }
}
