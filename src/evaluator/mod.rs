// src/evaluator/mod.rs — Audit engine

pub mod consensus;
pub mod judge;
pub mod parser;
pub mod patterns;
pub mod rubric;
pub mod utils;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::compiler::context::BriefContext;
use crate::core::types::{
    Agreement, AuditReport, Consensus, DimensionScore, Thresholds, Verdict,
};
use crate::infra::config::Config;
use crate::infra::errors::ShotsmithError;
use crate::llm::{resolve_chat_model, ModelRef};
use crate::provider::GenerationResult;
use judge::{Judge, LlmJudge};
use parser::JudgeOutput;
use rubric::Rubric;
use utils::{clamp_score, dedup_strings};

/// A finished audit plus the number of judges that answered, which is what
/// the audit actually cost.
#[derive(Debug, Clone)]
pub struct AuditOutcome {
    pub report: AuditReport,
    pub responded: usize,
}

/// Scores generated images against their brief with one or more judges.
///
/// Several judges run concurrently and their reports are averaged. Malformed
/// judge output never fails an audit: it degrades to a conservative report.
/// The audit fails only when every judge fails to respond.
pub struct AuditEngine {
    judges: Vec<Arc<dyn Judge>>,
    thresholds: Thresholds,
}

impl AuditEngine {
    pub fn new(judges: Vec<Arc<dyn Judge>>, thresholds: Thresholds) -> Self {
        Self { judges, thresholds }
    }

    /// Build LLM judges for every `models.judges` entry.
    pub fn from_config(config: &Config, openai_key: Option<&str>) -> Result<Self, ShotsmithError> {
        let mut judges: Vec<Arc<dyn Judge>> = Vec::new();
        for raw in &config.models.judges {
            let model_ref = ModelRef::parse(raw).ok_or_else(|| {
                ShotsmithError::Config(format!("judge '{}' is not in provider/model form", raw))
            })?;
            let chat = resolve_chat_model(&model_ref, config, openai_key)?;
            judges.push(Arc::new(LlmJudge::new(&model_ref, chat)));
        }
        let thresholds = Thresholds {
            lock_in: config.iteration.lock_in_threshold,
            refine: config.iteration.refine_threshold,
            switch: config.iteration.switch_threshold,
        };
        Ok(Self::new(judges, thresholds))
    }

    pub fn judge_count(&self) -> usize {
        self.judges.len()
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub async fn audit(
        &self,
        image: &GenerationResult,
        brief: &BriefContext,
    ) -> Result<AuditReport, ShotsmithError> {
        self.assess(image, brief).await.map(|outcome| outcome.report)
    }

    /// Audit and also report how many judges answered. A judge that returned
    /// unreadable text still answered; one that failed in transport did not.
    pub async fn assess(
        &self,
        image: &GenerationResult,
        brief: &BriefContext,
    ) -> Result<AuditOutcome, ShotsmithError> {
        if self.judges.is_empty() {
            return Err(ShotsmithError::Config("no judges configured".into()));
        }
        let rubric = Rubric::for_brief(brief);

        let results = futures::future::join_all(self.judges.iter().map(|judge| {
            let rubric = &rubric;
            async move {
                let name = judge.name().to_string();
                (name, judge.assess(image, brief, rubric).await)
            }
        }))
        .await;

        let mut reports = Vec::new();
        let mut unparsed = Vec::new();
        let mut unreachable = Vec::new();
        let mut last_error = None;
        for (name, result) in results {
            match result {
                Ok(output) => reports.push((name, self.normalize(output, &rubric))),
                Err(ShotsmithError::AuditParse(text)) => {
                    tracing::warn!(judge = %name, "Judge output unreadable: {}", text);
                    unparsed.push(name);
                }
                Err(e) => {
                    tracing::warn!(judge = %name, "Judge call failed: {}", e);
                    unreachable.push(name);
                    last_error = Some(e);
                }
            }
        }

        if reports.is_empty() && unparsed.is_empty() {
            let cause = last_error.map(|e| e.to_string()).unwrap_or_default();
            return Err(ShotsmithError::Permanent {
                provider: "audit".into(),
                message: format!("every judge failed: {}", cause),
            });
        }

        let responded = self.judges.len() - unreachable.len();
        let report = if self.judges.len() == 1 {
            match reports.pop() {
                Some((_, report)) => report,
                None => fallback_report(&rubric),
            }
        } else {
            let mut failed = unparsed;
            failed.extend(unreachable);
            match consensus::combine(reports, failed.clone(), &self.thresholds) {
                Some(report) => report,
                None => {
                    let mut report = fallback_report(&rubric);
                    report.consensus = Some(Consensus {
                        judges: 0,
                        scores: vec![],
                        spread: 0.0,
                        agreement: Agreement::Strong,
                        failed_judges: failed,
                    });
                    report
                }
            }
        };

        tracing::info!(
            score = report.overall_score,
            recommendation = %report.recommendation,
            patterns = report.failure_patterns.len(),
            responded,
            "Audit complete"
        );
        Ok(AuditOutcome { report, responded })
    }

    /// Clamp, fill and score one judge's output.
    pub fn normalize(&self, output: JudgeOutput, rubric: &Rubric) -> AuditReport {
        let dimensions: BTreeMap<String, DimensionScore> = rubric
            .names()
            .into_iter()
            .map(|name| {
                let dim = output
                    .dimensions
                    .get(name)
                    .map(|d| DimensionScore {
                        score: clamp_score(d.score, 10.0),
                        notes: d.notes.trim().to_string(),
                    })
                    .unwrap_or_default();
                (name.to_string(), dim)
            })
            .collect();

        let overall_score = output
            .overall_score
            .map(|s| clamp_score(s, 100.0))
            .unwrap_or_else(|| rubric.weighted_score(&dimensions));

        let issues = dedup_strings(output.issues);
        let summary = output.summary.trim().to_string();
        let evidence = patterns::evidence_text(&issues, &dimensions, &summary);
        let failure_patterns = patterns::detect(&evidence, &dimensions, &output.failure_patterns);
        let prompt_adjustments = dedup_strings(
            output
                .prompt_adjustments
                .into_iter()
                .chain(failure_patterns.iter().map(|p| p.fix.clone())),
        );

        AuditReport {
            overall_score,
            recommendation: Verdict::from_score(overall_score, &self.thresholds),
            dimensions,
            issues,
            prompt_adjustments,
            failure_patterns,
            summary,
            consensus: None,
        }
    }
}

/// Conservative report used when no judge output could be read.
pub fn fallback_report(rubric: &Rubric) -> AuditReport {
    AuditReport {
        overall_score: 0.0,
        recommendation: Verdict::Regenerate,
        dimensions: rubric
            .names()
            .into_iter()
            .map(|n| (n.to_string(), DimensionScore::default()))
            .collect(),
        issues: vec!["judge output could not be read".into()],
        prompt_adjustments: vec![],
        failure_patterns: vec![],
        summary: String::new(),
        consensus: None,
    }
}
