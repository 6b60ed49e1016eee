// src/evaluator/rubric.rs — Weighted scoring dimensions

use std::collections::BTreeMap;

use crate::compiler::context::BriefContext;
use crate::core::types::DimensionScore;

pub const BRIEF_FIDELITY: &str = "brief_fidelity";
pub const CHARACTER_IDENTITY: &str = "character_identity";
pub const COMPOSITION: &str = "composition";
pub const LIGHTING: &str = "lighting";
pub const STYLE_ADHERENCE: &str = "style_adherence";
pub const REALISM: &str = "realism";
pub const SHARPNESS: &str = "sharpness";

#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub name: &'static str,
    /// Share of the 0-100 overall score.
    pub weight: u32,
    pub description: &'static str,
}

/// Dimensions and weights used to score one image. Weights always sum to 100.
#[derive(Debug, Clone, PartialEq)]
pub struct Rubric {
    dimensions: Vec<Dimension>,
}

impl Rubric {
    /// Seven dimensions, for briefs with characters.
    pub fn standard() -> Self {
        Self {
            dimensions: vec![
                Dimension {
                    name: BRIEF_FIDELITY,
                    weight: 20,
                    description: "Does the image show what the brief asks for?",
                },
                Dimension {
                    name: CHARACTER_IDENTITY,
                    weight: 20,
                    description: "Do the characters match their descriptions and references?",
                },
                Dimension {
                    name: COMPOSITION,
                    weight: 15,
                    description: "Framing, balance and camera placement for the requested shot.",
                },
                Dimension {
                    name: LIGHTING,
                    weight: 15,
                    description: "Motivated, directional light with believable falloff.",
                },
                Dimension {
                    name: STYLE_ADHERENCE,
                    weight: 10,
                    description: "Matches the requested look and mood.",
                },
                Dimension {
                    name: REALISM,
                    weight: 10,
                    description: "Free of synthetic or rendered artifacts.",
                },
                Dimension {
                    name: SHARPNESS,
                    weight: 10,
                    description: "Detail and focus where the shot needs it.",
                },
            ],
        }
    }

    /// Six dimensions: identity is dropped and its weight split between
    /// fidelity and composition.
    pub fn without_identity() -> Self {
        let dimensions = Self::standard()
            .dimensions
            .into_iter()
            .filter(|d| d.name != CHARACTER_IDENTITY)
            .map(|mut d| {
                if d.name == BRIEF_FIDELITY || d.name == COMPOSITION {
                    d.weight += 10;
                }
                d
            })
            .collect();
        Self { dimensions }
    }

    pub fn for_brief(brief: &BriefContext) -> Self {
        if brief.has_characters() {
            Self::standard()
        } else {
            Self::without_identity()
        }
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.dimensions.iter().map(|d| d.name).collect()
    }

    pub fn total_weight(&self) -> u32 {
        self.dimensions.iter().map(|d| d.weight).sum()
    }

    /// Project 0-10 dimension scores onto 0-100. Missing dimensions count as 0.
    pub fn weighted_score(&self, scores: &BTreeMap<String, DimensionScore>) -> f32 {
        let total = self.total_weight().max(1) as f32;
        let sum: f32 = self
            .dimensions
            .iter()
            .map(|d| {
                let score = scores.get(d.name).map(|s| s.score).unwrap_or(0.0);
                score.clamp(0.0, 10.0) * d.weight as f32
            })
            .sum();
        (sum * 10.0 / total).clamp(0.0, 100.0)
    }

    /// Markdown list used in judge instructions.
    pub fn prompt_block(&self) -> String {
        self.dimensions
            .iter()
            .map(|d| format!("- {} (weight {}): {}", d.name, d.weight, d.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
