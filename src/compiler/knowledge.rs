// src/compiler/knowledge.rs — Tiered prompt-writing knowledge
//
// Core rules and the provider block always load. Packs load only when the
// brief's traits call for them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::context::{BriefTraits, ShotScale, SubjectKind};
use crate::provider::ProviderId;

const CORE: &str = include_str!("../../knowledge/core.md");

const BUNDLED_PROVIDERS: &[(ProviderId, &str)] = &[
    (ProviderId::GptImage, include_str!("../../knowledge/providers/gpt-image.md")),
    (ProviderId::FluxPro, include_str!("../../knowledge/providers/flux-pro.md")),
    (
        ProviderId::FluxKontext,
        include_str!("../../knowledge/providers/flux-kontext.md"),
    ),
    (ProviderId::Ideogram, include_str!("../../knowledge/providers/ideogram.md")),
    (ProviderId::Seedream, include_str!("../../knowledge/providers/seedream.md")),
    (ProviderId::Imagen, include_str!("../../knowledge/providers/imagen.md")),
];

const BUNDLED_PACKS: &[(Pack, &str)] = &[
    (Pack::Characters, include_str!("../../knowledge/packs/characters.md")),
    (Pack::WideShot, include_str!("../../knowledge/packs/wide_shot.md")),
    (Pack::Typography, include_str!("../../knowledge/packs/typography.md")),
    (Pack::Lighting, include_str!("../../knowledge/packs/lighting.md")),
    (Pack::Product, include_str!("../../knowledge/packs/product.md")),
];

/// Conditional knowledge packs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Pack {
    Characters,
    WideShot,
    Typography,
    Lighting,
    Product,
}

impl Pack {
    pub const ALL: [Pack; 5] = [
        Pack::Characters,
        Pack::WideShot,
        Pack::Typography,
        Pack::Lighting,
        Pack::Product,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Pack::Characters => "characters",
            Pack::WideShot => "wide_shot",
            Pack::Typography => "typography",
            Pack::Lighting => "lighting",
            Pack::Product => "product",
        }
    }

    /// Packs a brief needs, in fixed order.
    pub fn for_traits(traits: &BriefTraits) -> Vec<Pack> {
        let mut packs = Vec::new();
        if traits.has_characters {
            packs.push(Pack::Characters);
        }
        if traits.scale == Some(ShotScale::Wide) {
            packs.push(Pack::WideShot);
        }
        if traits.needs_text {
            packs.push(Pack::Typography);
        }
        if traits.lighting_heavy {
            packs.push(Pack::Lighting);
        }
        if traits.subjects.contains(&SubjectKind::Product) {
            packs.push(Pack::Product);
        }
        packs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Core,
    Provider,
    Pack,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeBlock {
    pub tier: Tier,
    pub name: String,
    pub text: String,
}

/// Where the knowledge base came from.
#[derive(Debug, Clone, PartialEq)]
pub enum KnowledgeSource {
    Bundled,
    Directory(PathBuf),
    Memory,
}

#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    core: String,
    providers: HashMap<ProviderId, String>,
    packs: HashMap<Pack, String>,
    pub source: KnowledgeSource,
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self::bundled()
    }
}

impl KnowledgeBase {
    pub fn bundled() -> Self {
        Self {
            core: CORE.trim().to_string(),
            providers: BUNDLED_PROVIDERS
                .iter()
                .map(|(id, text)| (*id, text.trim().to_string()))
                .collect(),
            packs: BUNDLED_PACKS
                .iter()
                .map(|(p, text)| (*p, text.trim().to_string()))
                .collect(),
            source: KnowledgeSource::Bundled,
        }
    }

    /// Knowledge supplied by the embedding application.
    pub fn from_memory(
        core: impl Into<String>,
        providers: HashMap<ProviderId, String>,
        packs: HashMap<Pack, String>,
    ) -> Self {
        Self {
            core: core.into(),
            providers,
            packs,
            source: KnowledgeSource::Memory,
        }
    }

    /// Load `core.md`, `providers/<id>.md` and `packs/<pack>.md` from `dir`.
    /// Missing files fall back to the bundled text.
    pub fn load_dir(dir: &Path) -> anyhow::Result<Self> {
        if !dir.is_dir() {
            anyhow::bail!("knowledge directory {} does not exist", dir.display());
        }
        let mut kb = Self::bundled();
        if let Some(core) = read_block(&dir.join("core.md")) {
            kb.core = core;
        }
        for id in ProviderId::ALL {
            let path = dir.join("providers").join(format!("{}.md", id.as_str()));
            if let Some(text) = read_block(&path) {
                kb.providers.insert(id, text);
            }
        }
        for pack in Pack::ALL {
            let path = dir.join("packs").join(format!("{}.md", pack.as_str()));
            if let Some(text) = read_block(&path) {
                kb.packs.insert(pack, text);
            }
        }
        kb.source = KnowledgeSource::Directory(dir.to_path_buf());
        tracing::debug!(dir = %dir.display(), "Loaded knowledge base");
        Ok(kb)
    }

    /// Configured directory if set and readable, else the bundled text.
    pub fn load(dir: Option<&Path>) -> Self {
        match dir {
            Some(d) => Self::load_dir(d).unwrap_or_else(|e| {
                tracing::warn!("Knowledge base unavailable, using bundled: {}", e);
                Self::bundled()
            }),
            None => Self::bundled(),
        }
    }

    /// Blocks for one compile, core first.
    pub fn select(&self, provider: ProviderId, traits: &BriefTraits) -> Vec<KnowledgeBlock> {
        let mut blocks = Vec::new();
        if !self.core.is_empty() {
            blocks.push(KnowledgeBlock {
                tier: Tier::Core,
                name: "core".into(),
                text: self.core.clone(),
            });
        }
        if let Some(text) = self.providers.get(&provider) {
            blocks.push(KnowledgeBlock {
                tier: Tier::Provider,
                name: provider.to_string(),
                text: text.clone(),
            });
        }
        for pack in Pack::for_traits(traits) {
            if let Some(text) = self.packs.get(&pack) {
                blocks.push(KnowledgeBlock {
                    tier: Tier::Pack,
                    name: pack.as_str().into(),
                    text: text.clone(),
                });
            }
        }
        blocks
    }
}

fn read_block(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
