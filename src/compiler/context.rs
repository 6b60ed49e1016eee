// src/compiler/context.rs — Hierarchical brief context and inferred traits

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::provider::{QualityTier, SizeHint};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectContext {
    pub name: String,
    /// Project-wide look ("neo-noir, 35mm film grain").
    pub style: String,
    pub notes: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneContext {
    pub description: String,
    pub location: String,
    pub time_of_day: String,
    pub mood: String,
    pub lighting: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShotContext {
    pub id: String,
    pub description: String,
    /// Framing ("wide establishing shot", "close-up").
    pub framing: String,
    pub camera: String,
    pub style: String,
    /// Literal text that must appear in the image.
    pub text: Option<String>,
    pub size: SizeHint,
    pub quality: QualityTier,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterRef {
    pub name: String,
    pub description: String,
    pub wardrobe: String,
    pub reference_images: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectRef {
    pub name: String,
    pub description: String,
    pub reference_images: Vec<String>,
}

/// Everything the compiler, router and auditor know about one shot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BriefContext {
    pub project: ProjectContext,
    pub scene: SceneContext,
    pub shot: ShotContext,
    pub characters: Vec<CharacterRef>,
    pub objects: Vec<ObjectRef>,
}

impl BriefContext {
    /// Quick brief for callers that only have a sentence.
    pub fn from_description(description: impl Into<String>) -> Self {
        Self {
            shot: ShotContext {
                description: description.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut brief: BriefContext = toml::from_str(&content)?;
        if brief.shot.id.is_empty() {
            brief.shot.id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("shot")
                .to_string();
        }
        if let Some(dir) = path.parent() {
            brief.resolve_references(dir);
        }
        Ok(brief)
    }

    /// Make relative reference paths relative to `dir` (the brief's folder).
    /// URLs and absolute paths are left alone.
    pub fn resolve_references(&mut self, dir: &Path) {
        let resolve = |r: &mut String| {
            let is_url = r.starts_with("http://") || r.starts_with("https://");
            if !is_url && Path::new(r.as_str()).is_relative() {
                *r = dir.join(r.as_str()).to_string_lossy().into_owned();
            }
        };
        for c in &mut self.characters {
            c.reference_images.iter_mut().for_each(resolve);
        }
        for o in &mut self.objects {
            o.reference_images.iter_mut().for_each(resolve);
        }
    }

    pub fn shot_id(&self) -> &str {
        if self.shot.id.is_empty() {
            "shot"
        } else {
            &self.shot.id
        }
    }

    pub fn has_characters(&self) -> bool {
        !self.characters.is_empty()
    }

    pub fn reference_paths(&self) -> Vec<&str> {
        self.characters
            .iter()
            .flat_map(|c| c.reference_images.iter())
            .chain(self.objects.iter().flat_map(|o| o.reference_images.iter()))
            .map(String::as_str)
            .collect()
    }

    /// The free-text part of the brief, most specific first.
    pub fn brief_text(&self) -> String {
        [
            self.shot.description.as_str(),
            self.shot.framing.as_str(),
            self.shot.camera.as_str(),
            self.shot.style.as_str(),
            self.scene.description.as_str(),
            self.scene.location.as_str(),
            self.scene.time_of_day.as_str(),
            self.scene.mood.as_str(),
            self.scene.lighting.as_str(),
            self.project.style.as_str(),
        ]
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
    }

    /// Multi-line rendering of the whole brief for model prompts.
    pub fn describe(&self) -> String {
        let mut out = format!("Shot: {}", self.brief_text());
        if let Some(text) = self.shot.text.as_deref().filter(|t| !t.trim().is_empty()) {
            out.push_str(&format!("\nRequired text: \"{}\"", text.trim()));
        }
        for c in &self.characters {
            out.push_str(&format!("\nCharacter {}: {}", c.name, c.description));
            if !c.wardrobe.is_empty() {
                out.push_str(&format!(" (wearing {})", c.wardrobe));
            }
        }
        for o in &self.objects {
            out.push_str(&format!("\nObject {}: {}", o.name, o.description));
        }
        if !self.project.notes.is_empty() {
            out.push_str(&format!("\nNotes: {}", self.project.notes));
        }
        out
    }

    pub fn traits(&self) -> BriefTraits {
        BriefTraits::infer(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    Character,
    Product,
    Environment,
    Typography,
    Mixed,
}

impl SubjectKind {
    fn tag(&self) -> Option<&'static str> {
        match self {
            SubjectKind::Character => Some("character"),
            SubjectKind::Product => Some("product"),
            SubjectKind::Environment => Some("environment"),
            SubjectKind::Typography => Some("typography"),
            SubjectKind::Mixed => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleIntent {
    Photoreal,
    Cinematic,
    Illustration,
    Graphic,
}

impl StyleIntent {
    pub fn tag(&self) -> &'static str {
        match self {
            StyleIntent::Photoreal => "photoreal",
            StyleIntent::Cinematic => "cinematic",
            StyleIntent::Illustration => "illustration",
            StyleIntent::Graphic => "graphic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShotScale {
    Wide,
    Medium,
    Close,
}

impl ShotScale {
    pub fn tag(&self) -> &'static str {
        match self {
            ShotScale::Wide => "wide",
            ShotScale::Medium => "medium",
            ShotScale::Close => "close",
        }
    }
}

/// Characteristics inferred from a brief, in the catalog's tag vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BriefTraits {
    pub subject: SubjectKind,
    /// All subjects mentioned; more than one makes `subject` Mixed.
    pub subjects: Vec<SubjectKind>,
    pub needs_text: bool,
    pub styles: Vec<StyleIntent>,
    pub scale: Option<ShotScale>,
    pub has_characters: bool,
    pub has_references: bool,
    pub lighting_heavy: bool,
}

const CHARACTER_WORDS: &[&str] = &[
    "character", "characters", "person", "people", "man", "woman", "men", "women", "child",
    "girl", "boy", "portrait", "hero", "heroine", "face", "figure", "crowd",
];
const PRODUCT_WORDS: &[&str] = &[
    "product", "packshot", "packaging", "bottle", "label", "sneaker", "watch", "perfume",
];
const ENVIRONMENT_WORDS: &[&str] = &[
    "landscape", "establishing", "cityscape", "skyline", "street", "alley", "interior",
    "environment", "forest", "city", "harbor", "desert", "room",
];
const TEXT_WORDS: &[&str] = &[
    "text", "logo", "poster", "signage", "sign", "typography", "headline", "lettering",
    "title card", "caption",
];
const PHOTOREAL_WORDS: &[&str] = &[
    "photoreal", "photorealistic", "photograph", "photo", "realistic", "35mm", "dslr",
];
const CINEMATIC_WORDS: &[&str] = &[
    "cinematic", "film still", "neo-noir", "noir", "anamorphic", "movie", "widescreen",
];
const ILLUSTRATION_WORDS: &[&str] = &[
    "illustration", "painting", "watercolor", "anime", "cartoon", "sketch", "storybook",
];
const GRAPHIC_WORDS: &[&str] = &["graphic", "flat design", "vector", "minimalist", "infographic"];
const WIDE_WORDS: &[&str] = &[
    "wide", "establishing", "panorama", "panoramic", "aerial", "long shot", "extreme wide",
];
const MEDIUM_WORDS: &[&str] = &["medium shot", "mid shot", "waist-up", "cowboy shot"];
const CLOSE_WORDS: &[&str] = &["close-up", "closeup", "close up", "macro", "extreme close"];
const LIGHTING_WORDS: &[&str] = &[
    "noir", "neon", "chiaroscuro", "golden hour", "backlit", "rim light", "volumetric",
    "candlelit", "low-key", "high-key", "silhouette",
];

const NEGATIONS: &[&str] = &["no", "without", "not", "zero", "none"];

/// Whether the clause leading up to a keyword negates it ("no characters",
/// "without any text"). Only looks back to the nearest punctuation.
fn is_negated(prefix: &str) -> bool {
    let clause = prefix
        .rsplit([',', '.', ';', ':', '(', '\n'])
        .next()
        .unwrap_or(prefix);
    clause
        .split_whitespace()
        .rev()
        .take(3)
        .any(|w| NEGATIONS.contains(&w))
}

/// True when any keyword appears as a whole word and is not negated.
fn mentions(text: &str, words: &[&str]) -> bool {
    words.iter().any(|word| {
        let mut start = 0;
        while let Some(pos) = text[start..].find(word) {
            let idx = start + pos;
            let end = idx + word.len();
            let before_ok = text[..idx]
                .chars()
                .next_back()
                .map_or(true, |c| !c.is_alphanumeric());
            let after_ok = text[end..]
                .chars()
                .next()
                .map_or(true, |c| !c.is_alphanumeric());
            if before_ok && after_ok && !is_negated(&text[..idx]) {
                return true;
            }
            start = end;
        }
        false
    })
}

impl BriefTraits {
    pub fn infer(brief: &BriefContext) -> Self {
        let text = brief.brief_text().to_lowercase();
        let character_text = brief
            .characters
            .iter()
            .map(|c| c.description.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");

        let has_characters = brief.has_characters();
        let mut subjects = Vec::new();
        if has_characters || mentions(&text, CHARACTER_WORDS) {
            subjects.push(SubjectKind::Character);
        }
        if mentions(&text, PRODUCT_WORDS) {
            subjects.push(SubjectKind::Product);
        }
        if mentions(&text, ENVIRONMENT_WORDS) {
            subjects.push(SubjectKind::Environment);
        }

        let literal_text = brief
            .shot
            .text
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        let needs_text = literal_text || mentions(&text, TEXT_WORDS);
        if needs_text {
            subjects.push(SubjectKind::Typography);
        }

        let subject = match subjects.as_slice() {
            [only] => *only,
            _ => SubjectKind::Mixed,
        };

        let mut styles = Vec::new();
        for (intent, words) in [
            (StyleIntent::Photoreal, PHOTOREAL_WORDS),
            (StyleIntent::Cinematic, CINEMATIC_WORDS),
            (StyleIntent::Illustration, ILLUSTRATION_WORDS),
            (StyleIntent::Graphic, GRAPHIC_WORDS),
        ] {
            if mentions(&text, words) {
                styles.push(intent);
            }
        }

        // Most specific framing wins.
        let scale = if mentions(&text, CLOSE_WORDS) {
            Some(ShotScale::Close)
        } else if mentions(&text, MEDIUM_WORDS) {
            Some(ShotScale::Medium)
        } else if mentions(&text, WIDE_WORDS) {
            Some(ShotScale::Wide)
        } else {
            None
        };

        Self {
            subject,
            subjects,
            needs_text,
            styles,
            scale,
            has_characters,
            has_references: !brief.reference_paths().is_empty(),
            lighting_heavy: mentions(&text, LIGHTING_WORDS)
                || mentions(&character_text, &["neon", "backlit"]),
        }
    }

    /// Catalog tags this brief asks for.
    pub fn tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<&'static str> = Vec::new();
        for subject in &self.subjects {
            if let Some(tag) = subject.tag() {
                tags.push(tag);
            }
        }
        tags.extend(self.styles.iter().map(|s| s.tag()));
        if let Some(scale) = self.scale {
            tags.push(scale.tag());
        }
        if self.needs_text {
            tags.push("text_rendering");
        }
        if self.has_characters && self.has_references {
            tags.push("character_consistency");
        }
        if self.lighting_heavy {
            tags.push("lighting");
        }
        tags.sort_unstable();
        tags.dedup();
        tags
    }
}
