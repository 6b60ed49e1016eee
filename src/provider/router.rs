// src/provider/router.rs — Rank image providers for a brief
//
// Pure scoring: every eligible provider starts at a baseline and collects
// fixed deltas from tag matches between the brief's traits and the catalog
// profile. A provider that just failed its audit is pushed down. Ties keep
// catalog order so the same inputs always give the same ranking.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::catalog::{ProviderCatalog, ProviderId, ProviderProfile};
use crate::compiler::context::BriefTraits;
use crate::infra::errors::ShotsmithError;

#[derive(Debug, Clone, PartialEq)]
pub struct RouterWeights {
    pub baseline: i32,
    pub best_for: i32,
    pub strength: i32,
    pub weakness: i32,
    pub text_bonus: i32,
    pub reference_penalty: i32,
    pub prior_failure_penalty: i32,
}

impl Default for RouterWeights {
    fn default() -> Self {
        Self {
            baseline: 50,
            best_for: 12,
            strength: 8,
            weakness: -15,
            text_bonus: 20,
            reference_penalty: -25,
            prior_failure_penalty: -30,
        }
    }
}

/// Per-call routing inputs.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    pub available: Vec<ProviderId>,
    pub prior_provider: Option<ProviderId>,
    pub prior_score: Option<f32>,
}

impl RouteOptions {
    pub fn new(available: Vec<ProviderId>) -> Self {
        Self {
            available,
            ..Default::default()
        }
    }

    pub fn with_prior(mut self, provider: ProviderId, score: f32) -> Self {
        self.prior_provider = Some(provider);
        self.prior_score = Some(score);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub provider: ProviderId,
    pub score: i32,
    pub rationale: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub primary: Candidate,
    pub alternatives: Vec<Candidate>,
}

impl Recommendation {
    /// Highest-ranked candidate other than `current`, if any.
    pub fn first_other_than(&self, current: ProviderId) -> Option<&Candidate> {
        std::iter::once(&self.primary)
            .chain(self.alternatives.iter())
            .find(|c| c.provider != current)
    }
}

pub struct ModelRouter {
    catalog: Arc<ProviderCatalog>,
    weights: RouterWeights,
    acceptance_threshold: f32,
}

impl ModelRouter {
    pub fn new(catalog: Arc<ProviderCatalog>, acceptance_threshold: f32) -> Self {
        Self {
            catalog,
            weights: RouterWeights::default(),
            acceptance_threshold,
        }
    }

    pub fn with_weights(mut self, weights: RouterWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn catalog(&self) -> &ProviderCatalog {
        &self.catalog
    }

    /// Full ranking of eligible providers, best first.
    pub fn rank(&self, traits: &BriefTraits, options: &RouteOptions) -> Vec<Candidate> {
        let tags = traits.tags();
        let mut ranked: Vec<(usize, Candidate)> = self
            .catalog
            .all()
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_routable_image() && options.available.contains(&p.id))
            .map(|(order, p)| (order, self.score(p, traits, &tags, options)))
            .collect();

        ranked.sort_by(|(oa, a), (ob, b)| b.score.cmp(&a.score).then(oa.cmp(ob)));
        ranked.into_iter().map(|(_, c)| c).collect()
    }

    /// Top candidate plus up to two alternatives.
    pub fn recommend(
        &self,
        traits: &BriefTraits,
        options: &RouteOptions,
    ) -> Result<Recommendation, ShotsmithError> {
        let mut ranked = self.rank(traits, options).into_iter();
        let primary = ranked.next().ok_or_else(|| {
            ShotsmithError::Config("no eligible image provider is available".into())
        })?;
        let alternatives: Vec<Candidate> = ranked.take(2).collect();

        tracing::debug!(
            primary = %primary.provider,
            score = primary.score,
            alternatives = alternatives.len(),
            "Routed brief"
        );
        Ok(Recommendation {
            primary,
            alternatives,
        })
    }

    fn score(
        &self,
        profile: &ProviderProfile,
        traits: &BriefTraits,
        tags: &[&str],
        options: &RouteOptions,
    ) -> Candidate {
        let w = &self.weights;
        let mut score = w.baseline;
        let mut rationale = Vec::new();

        for tag in tags {
            if profile.best_for.iter().any(|t| t == tag) {
                score += w.best_for;
                rationale.push(format!("best for {}", tag));
            }
            if profile.strengths.iter().any(|t| t == tag) {
                score += w.strength;
                rationale.push(format!("strong at {}", tag));
            }
            if profile.weaknesses.iter().any(|t| t == tag) {
                score += w.weakness;
                rationale.push(format!("weak at {}", tag));
            }
        }

        if traits.needs_text && profile.strengths.iter().any(|t| t == "text_rendering") {
            score += w.text_bonus;
            rationale.push("renders legible text".into());
        }

        if traits.has_references && !profile.accepts_references() {
            score += w.reference_penalty;
            rationale.push("cannot use reference images".into());
        }

        if let (Some(prior), Some(prior_score)) = (options.prior_provider, options.prior_score) {
            if prior == profile.id && prior_score < self.acceptance_threshold {
                score += w.prior_failure_penalty;
                rationale.push(format!("scored {:.0} on the last attempt", prior_score));
            }
        }

        Candidate {
            provider: profile.id,
            score,
            rationale,
        }
    }
}
