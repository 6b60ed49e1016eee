// src/core/types.rs — Core domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::infra::config::Config;
use crate::provider::{GenerationResult, ProviderId};

// ─── Audit ──────────────────────────────────────────────────────

/// Routing recommendation derived from the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    LockIn,
    Refine,
    Switch,
    Regenerate,
}

impl Verdict {
    pub fn from_score(score: f32, thresholds: &Thresholds) -> Self {
        if score >= thresholds.lock_in {
            Verdict::LockIn
        } else if score >= thresholds.refine {
            Verdict::Refine
        } else if score >= thresholds.switch {
            Verdict::Switch
        } else {
            Verdict::Regenerate
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            Verdict::LockIn => "LOCK_IN",
            Verdict::Refine => "REFINE",
            Verdict::Switch => "SWITCH",
            Verdict::Regenerate => "REGENERATE",
        })
    }
}

/// Lower bounds (0-100) of the recommendation bands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub lock_in: f32,
    pub refine: f32,
    pub switch: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            lock_in: 90.0,
            refine: 75.0,
            switch: 60.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DimensionScore {
    /// 0-10
    pub score: f32,
    pub notes: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    SyntheticLook,
    FlatLighting,
    RenderEngineLook,
    InconsistentLight,
}

impl PatternKind {
    pub const ALL: [PatternKind; 4] = [
        PatternKind::SyntheticLook,
        PatternKind::FlatLighting,
        PatternKind::RenderEngineLook,
        PatternKind::InconsistentLight,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Moderate,
    Severe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailurePattern {
    pub pattern: PatternKind,
    pub severity: Severity,
    pub fix: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Agreement {
    Strong,
    Moderate,
    Weak,
}

impl Agreement {
    pub fn from_spread(spread: f32) -> Self {
        if spread <= 10.0 {
            Agreement::Strong
        } else if spread <= 20.0 {
            Agreement::Moderate
        } else {
            Agreement::Weak
        }
    }
}

/// How several judges agreed on one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consensus {
    pub judges: usize,
    pub scores: Vec<f32>,
    pub spread: f32,
    pub agreement: Agreement,
    pub failed_judges: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    /// 0-100
    pub overall_score: f32,
    pub recommendation: Verdict,
    pub dimensions: BTreeMap<String, DimensionScore>,
    pub issues: Vec<String>,
    pub prompt_adjustments: Vec<String>,
    pub failure_patterns: Vec<FailurePattern>,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus: Option<Consensus>,
}

impl AuditReport {
    pub fn dimension(&self, name: &str) -> Option<&DimensionScore> {
        self.dimensions.get(name)
    }

    /// Dimensions at or above `min`, best first.
    pub fn strong_dimensions(&self, min: f32) -> Vec<(&str, f32)> {
        let mut dims: Vec<(&str, f32)> = self
            .dimensions
            .iter()
            .filter(|(_, d)| d.score >= min)
            .map(|(n, d)| (n.as_str(), d.score))
            .collect();
        dims.sort_by(|a, b| b.1.total_cmp(&a.1));
        dims
    }

    /// Dimensions below `max`, worst first.
    pub fn weak_dimensions(&self, max: f32) -> Vec<(&str, f32)> {
        let mut dims: Vec<(&str, f32)> = self
            .dimensions
            .iter()
            .filter(|(_, d)| d.score < max)
            .map(|(n, d)| (n.as_str(), d.score))
            .collect();
        dims.sort_by(|a, b| a.1.total_cmp(&b.1));
        dims
    }
}

// ─── Iteration ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompileMode {
    /// Compile from the brief alone.
    Fresh,
    /// Edit the previous prompt using the last audit.
    Refine,
}

/// What the controller chose to do after one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Decision {
    Refine,
    Switch { to: ProviderId },
    Regenerate { on: ProviderId },
    Stop { reason: StopReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    LockedIn,
    ScoreRegression,
    MaxIterationsReached,
    BudgetExhausted,
    GenerationFailed,
    CompileFailed,
    AuditFailed,
    Cancelled,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::LockedIn => "locked in",
            StopReason::ScoreRegression => "score regression",
            StopReason::MaxIterationsReached => "max iterations reached",
            StopReason::BudgetExhausted => "budget exhausted",
            StopReason::GenerationFailed => "generation failed",
            StopReason::CompileFailed => "compile failed",
            StopReason::AuditFailed => "audit failed",
            StopReason::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Controller states for one shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Compiling,
    Generating,
    Auditing,
    Deciding,
    Refining,
    Switching,
    Regenerating,
    Stopped,
}

/// One pass of the loop. Success records carry both a result and an audit;
/// terminal error records carry `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u8,
    pub provider: ProviderId,
    pub compile_mode: CompileMode,
    pub prompt: String,
    pub result: Option<GenerationResult>,
    pub audit: Option<AuditReport>,
    pub cost_so_far: f64,
    pub decision: Option<Decision>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl IterationRecord {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.result.is_some() && self.audit.is_some()
    }

    pub fn score(&self) -> Option<f32> {
        self.audit.as_ref().map(|a| a.overall_score)
    }

    pub fn verdict(&self) -> Option<Verdict> {
        self.audit.as_ref().map(|a| a.recommendation)
    }
}

/// Ordered, append-only record of one shot's passes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IterationHistory {
    records: Vec<IterationRecord>,
}

impl IterationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: IterationRecord) {
        debug_assert!(
            self.records
                .last()
                .map_or(true, |prev| prev.cost_so_far <= record.cost_so_far),
            "cost_so_far must not decrease"
        );
        self.records.push(record);
    }

    pub fn records(&self) -> &[IterationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&IterationRecord> {
        self.records.last()
    }

    pub fn last_mut(&mut self) -> Option<&mut IterationRecord> {
        self.records.last_mut()
    }

    /// Index of the highest-scoring success record; earliest wins ties.
    pub fn best_index(&self) -> Option<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_success())
            .fold(None, |best: Option<(usize, f32)>, (i, r)| {
                let score = r.score().unwrap_or(0.0);
                match best {
                    Some((_, b)) if b >= score => best,
                    _ => Some((i, score)),
                }
            })
            .map(|(i, _)| i)
    }

    /// Recommendation of every audited pass, in order.
    pub fn trail(&self) -> Vec<Verdict> {
        self.records.iter().filter_map(|r| r.verdict()).collect()
    }
}

// ─── Progress ───────────────────────────────────────────────────

/// Progress events emitted by the controller.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    IterationStart {
        shot_id: String,
        iteration: u8,
        max_iterations: u8,
        provider: ProviderId,
        mode: CompileMode,
    },
    StateChanged {
        shot_id: String,
        state: LoopState,
    },
    IterationEnd {
        shot_id: String,
        iteration: u8,
        score: Option<f32>,
        verdict: Option<Verdict>,
        cost_so_far: f64,
    },
    BudgetExhausted {
        shot_id: String,
        spent: f64,
        needed: f64,
        ceiling: f64,
    },
    Complete {
        shot_id: String,
        iterations: usize,
        stop_reason: StopReason,
        best_score: Option<f32>,
        total_cost: f64,
    },
}

// ─── Engine config / outcome ────────────────────────────────────

#[derive(Debug, Clone)]
pub struct IterationEngineConfig {
    pub max_iterations: u8,
    pub thresholds: Thresholds,
    pub regression_margin: f32,
    pub acceptance_threshold: f32,
    pub text_call_usd: f64,
    pub audit_call_usd: f64,
}

impl Default for IterationEngineConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl IterationEngineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_iterations: config.iteration.max_iterations,
            thresholds: Thresholds {
                lock_in: config.iteration.lock_in_threshold,
                refine: config.iteration.refine_threshold,
                switch: config.iteration.switch_threshold,
            },
            regression_margin: config.iteration.regression_margin,
            acceptance_threshold: config.iteration.acceptance_threshold,
            text_call_usd: config.pricing.text_call_usd,
            audit_call_usd: config.pricing.audit_call_usd,
        }
    }
}

/// Final result of one shot's loop.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub shot_id: String,
    pub history: IterationHistory,
    pub stop_reason: StopReason,
    pub best: Option<usize>,
    pub total_cost: f64,
}

impl RunOutcome {
    pub fn best_record(&self) -> Option<&IterationRecord> {
        self.best.and_then(|i| self.history.records().get(i))
    }

    pub fn best_score(&self) -> Option<f32> {
        self.best_record().and_then(|r| r.score())
    }
}
