// src/evaluator/consensus.rs — Multi-judge score aggregation

use std::collections::BTreeMap;

use super::patterns;
use super::utils::dedup_strings;
use crate::core::types::{
    Agreement, AuditReport, Consensus, DimensionScore, Thresholds, Verdict,
};

/// Average several normalized reports into one. Returns `None` when no judge
/// produced a report.
pub fn combine(
    reports: Vec<(String, AuditReport)>,
    failed_judges: Vec<String>,
    thresholds: &Thresholds,
) -> Option<AuditReport> {
    if reports.is_empty() {
        return None;
    }

    let scores: Vec<f32> = reports.iter().map(|(_, r)| r.overall_score).collect();
    let n = scores.len() as f32;
    let mean = scores.iter().sum::<f32>() / n;
    let max = scores.iter().copied().fold(f32::MIN, f32::max);
    let min = scores.iter().copied().fold(f32::MAX, f32::min);
    let spread = max - min;

    let mut sums: BTreeMap<String, (f32, usize, String)> = BTreeMap::new();
    for (_, report) in &reports {
        for (name, dim) in &report.dimensions {
            let entry = sums.entry(name.clone()).or_insert((0.0, 0, String::new()));
            entry.0 += dim.score;
            entry.1 += 1;
            if entry.2.is_empty() {
                entry.2 = dim.notes.clone();
            }
        }
    }
    let dimensions = sums
        .into_iter()
        .map(|(name, (sum, count, notes))| {
            (
                name,
                DimensionScore {
                    score: sum / count.max(1) as f32,
                    notes,
                },
            )
        })
        .collect();

    let issues = dedup_strings(reports.iter().flat_map(|(_, r)| r.issues.clone()));
    let prompt_adjustments =
        dedup_strings(reports.iter().flat_map(|(_, r)| r.prompt_adjustments.clone()));
    let pattern_lists: Vec<&[_]> = reports
        .iter()
        .map(|(_, r)| r.failure_patterns.as_slice())
        .collect();
    let failure_patterns = patterns::merge(&pattern_lists);

    let agreement = Agreement::from_spread(spread);
    tracing::debug!(
        judges = reports.len(),
        failed = failed_judges.len(),
        mean,
        spread,
        ?agreement,
        "Judge consensus"
    );

    let summary = reports
        .iter()
        .map(|(_, r)| r.summary.as_str())
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string();

    Some(AuditReport {
        overall_score: mean,
        recommendation: Verdict::from_score(mean, thresholds),
        dimensions,
        issues,
        prompt_adjustments,
        failure_patterns,
        summary,
        consensus: Some(Consensus {
            judges: reports.len(),
            scores,
            spread,
            agreement,
            failed_judges,
        }),
    })
}
