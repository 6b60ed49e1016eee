// src/provider/catalog.rs — Static provider catalog, validated at load time

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use crate::infra::errors::ShotsmithError;

const BUILTIN_CATALOG: &str = include_str!("catalog.toml");

/// Tag vocabulary shared by `strengths`, `weaknesses`, `best_for` and the
/// router's brief traits.
pub const KNOWN_TAGS: &[&str] = &[
    "photoreal",
    "cinematic",
    "illustration",
    "graphic",
    "character",
    "product",
    "environment",
    "typography",
    "wide",
    "medium",
    "close",
    "lighting",
    "composition",
    "character_consistency",
    "text_rendering",
    "skin_texture",
];

/// Stable identifier of every provider the crate knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderId {
    GptImage,
    FluxPro,
    FluxKontext,
    Ideogram,
    Seedream,
    Imagen,
    Kling,
    TopazUpscale,
}

impl ProviderId {
    pub const ALL: [ProviderId; 8] = [
        ProviderId::GptImage,
        ProviderId::FluxPro,
        ProviderId::FluxKontext,
        ProviderId::Ideogram,
        ProviderId::Seedream,
        ProviderId::Imagen,
        ProviderId::Kling,
        ProviderId::TopazUpscale,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::GptImage => "gpt-image",
            ProviderId::FluxPro => "flux-pro",
            ProviderId::FluxKontext => "flux-kontext",
            ProviderId::Ideogram => "ideogram",
            ProviderId::Seedream => "seedream",
            ProviderId::Imagen => "imagen",
            ProviderId::Kling => "kling",
            ProviderId::TopazUpscale => "topaz-upscale",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ShotsmithError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        ProviderId::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == needle)
            .ok_or_else(|| ShotsmithError::UnknownProvider(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Image,
    Video,
    Utility,
}

/// How the backend accepts generation jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Sync,
    Queue,
}

/// Prompt dialect the backend understands best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptSyntax {
    /// Full sentences describing the shot.
    #[default]
    Natural,
    /// Comma-separated, weighted keyword lists.
    Keywords,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Capabilities {
    #[serde(default)]
    pub generate: bool,
    #[serde(default)]
    pub edit: bool,
    #[serde(default)]
    pub img2img: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderProfile {
    pub id: ProviderId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    pub protocol: Protocol,
    pub model: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub best_for: Vec<String>,
    pub capabilities: Capabilities,
    pub api_available: bool,
    pub cost_per_unit: f64,
    #[serde(default)]
    pub prompt_syntax: PromptSyntax,
}

impl ProviderProfile {
    /// Whether this profile can take part in image routing at all.
    pub fn is_routable_image(&self) -> bool {
        self.kind == ProviderKind::Image && self.api_available && self.capabilities.generate
    }

    pub fn accepts_references(&self) -> bool {
        self.capabilities.edit || self.capabilities.img2img
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    providers: Vec<ProviderProfile>,
}

/// Read-only catalog of provider profiles, in declaration order.
#[derive(Debug, Clone)]
pub struct ProviderCatalog {
    profiles: Vec<ProviderProfile>,
}

impl ProviderCatalog {
    /// The catalog compiled into the binary.
    pub fn builtin() -> Result<Self, ShotsmithError> {
        Self::from_toml(BUILTIN_CATALOG)
    }

    pub fn load_from(path: &Path) -> Result<Self, ShotsmithError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ShotsmithError> {
        let file: CatalogFile =
            toml::from_str(content).map_err(|e| ShotsmithError::Catalog(e.to_string()))?;
        Self::from_profiles(file.providers)
    }

    pub fn from_profiles(profiles: Vec<ProviderProfile>) -> Result<Self, ShotsmithError> {
        validate(&profiles)?;
        Ok(Self { profiles })
    }

    pub fn get(&self, id: ProviderId) -> Option<&ProviderProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn require(&self, id: ProviderId) -> Result<&ProviderProfile, ShotsmithError> {
        self.get(id)
            .ok_or_else(|| ShotsmithError::UnknownProvider(id.to_string()))
    }

    pub fn all(&self) -> &[ProviderProfile] {
        &self.profiles
    }

    /// Position in declaration order; used as the router's tie-breaker.
    pub fn position(&self, id: ProviderId) -> usize {
        self.profiles
            .iter()
            .position(|p| p.id == id)
            .unwrap_or(usize::MAX)
    }

    pub fn image_providers(&self) -> impl Iterator<Item = &ProviderProfile> {
        self.profiles.iter().filter(|p| p.is_routable_image())
    }
}

fn validate(profiles: &[ProviderProfile]) -> Result<(), ShotsmithError> {
    if profiles.is_empty() {
        return Err(ShotsmithError::Catalog("catalog has no providers".into()));
    }

    let mut seen = HashSet::new();
    for p in profiles {
        if !seen.insert(p.id) {
            return Err(ShotsmithError::Catalog(format!(
                "duplicate provider id '{}'",
                p.id
            )));
        }
        if !p.cost_per_unit.is_finite() || p.cost_per_unit < 0.0 {
            return Err(ShotsmithError::Catalog(format!(
                "'{}' has invalid cost_per_unit {}",
                p.id, p.cost_per_unit
            )));
        }
        if p.api_available && p.model.trim().is_empty() {
            return Err(ShotsmithError::Catalog(format!(
                "'{}' is api_available but has no model",
                p.id
            )));
        }
        if p.kind == ProviderKind::Image && !p.capabilities.generate && !p.capabilities.edit {
            return Err(ShotsmithError::Catalog(format!(
                "image provider '{}' can neither generate nor edit",
                p.id
            )));
        }
        for tag in p.strengths.iter().chain(&p.weaknesses).chain(&p.best_for) {
            if !KNOWN_TAGS.contains(&tag.as_str()) {
                return Err(ShotsmithError::Catalog(format!(
                    "'{}' uses unknown tag '{}'",
                    p.id, tag
                )));
            }
        }
    }
    Ok(())
}
