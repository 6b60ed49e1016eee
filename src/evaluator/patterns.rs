// src/evaluator/patterns.rs — Failure-pattern diagnosis
//
// Runs independently of the overall score. Each pattern is triggered by
// keywords in the judge's prose; a low score on the related dimension
// escalates a triggered pattern. Patterns the judge reports directly are
// merged in, and the stronger severity wins.

use std::collections::BTreeMap;

use super::parser::ReportedPattern;
use super::rubric::{LIGHTING, REALISM};
use crate::core::types::{DimensionScore, FailurePattern, PatternKind, Severity};

struct PatternRule {
    kind: PatternKind,
    keywords: &'static [&'static str],
    dimension: &'static str,
    fix: &'static str,
}

const RULES: [PatternRule; 4] = [
    PatternRule {
        kind: PatternKind::SyntheticLook,
        keywords: &[
            "synthetic",
            "plastic",
            "waxy",
            "over-processed",
            "overprocessed",
            "airbrushed",
            "too smooth",
            "artificial",
            "oversaturated",
            "over-sharpened",
        ],
        dimension: REALISM,
        fix: "Add natural imperfections such as real skin texture and fine film grain; avoid glossy perfection.",
    },
    PatternRule {
        kind: PatternKind::FlatLighting,
        keywords: &[
            "flat light",
            "flat lighting",
            "lifeless",
            "no contrast",
            "low contrast",
            "dull light",
            "no shadows",
            "washed out",
            "evenly lit",
        ],
        dimension: LIGHTING,
        fix: "Specify a motivated key light with direction and contrast, e.g. low side light with deep shadow falloff.",
    },
    PatternRule {
        kind: PatternKind::RenderEngineLook,
        keywords: &[
            "cgi",
            "3d render",
            "rendered look",
            "video game",
            "game engine",
            "unreal",
            "octane",
            "cg look",
        ],
        dimension: REALISM,
        fix: "Describe a physical camera and lens (35mm film, f/2.8) and real-world materials instead of CG terms.",
    },
    PatternRule {
        kind: PatternKind::InconsistentLight,
        keywords: &[
            "inconsistent light",
            "light direction",
            "conflicting shadows",
            "inconsistent shadows",
            "mismatched lighting",
            "shadows don't match",
            "multiple light sources",
        ],
        dimension: LIGHTING,
        fix: "Name one dominant light source and its direction, and keep every shadow consistent with it.",
    },
];

/// Fixed remedy for a pattern.
pub fn fix_for(kind: PatternKind) -> &'static str {
    RULES
        .iter()
        .find(|r| r.kind == kind)
        .map(|r| r.fix)
        .unwrap_or_default()
}

/// Map a judge-supplied pattern name onto the taxonomy.
pub fn parse_pattern_kind(name: &str) -> Option<PatternKind> {
    let n = name.trim().to_ascii_lowercase().replace([' ', '-', '/'], "_");
    if n.contains("synthetic") || n.contains("over_processed") || n.contains("overprocessed") {
        Some(PatternKind::SyntheticLook)
    } else if n.contains("flat") || n.contains("lifeless") {
        Some(PatternKind::FlatLighting)
    } else if n.contains("render") || n.contains("cgi") {
        Some(PatternKind::RenderEngineLook)
    } else if n.contains("inconsistent") || n.contains("direction") {
        Some(PatternKind::InconsistentLight)
    } else {
        None
    }
}

pub fn parse_severity(text: &str) -> Severity {
    match text.trim().to_ascii_lowercase().as_str() {
        "severe" | "high" | "major" | "critical" => Severity::Severe,
        "none" | "" => Severity::None,
        _ => Severity::Moderate,
    }
}

/// Text the heuristics scan, lowercased.
pub fn evidence_text(
    issues: &[String],
    dimensions: &BTreeMap<String, DimensionScore>,
    summary: &str,
) -> String {
    let mut text = String::new();
    for piece in issues
        .iter()
        .map(String::as_str)
        .chain(dimensions.values().map(|d| d.notes.as_str()))
        .chain(std::iter::once(summary))
    {
        text.push_str(&piece.to_lowercase());
        text.push('\n');
    }
    text
}

fn heuristic_severity(
    rule: &PatternRule,
    evidence: &str,
    dimensions: &BTreeMap<String, DimensionScore>,
) -> Severity {
    let hits = rule.keywords.iter().filter(|k| evidence.contains(*k)).count();
    if hits == 0 {
        return Severity::None;
    }
    let related = dimensions.get(rule.dimension).map(|d| d.score);
    if hits >= 2 || related.map_or(false, |s| s <= 4.0) {
        Severity::Severe
    } else {
        Severity::Moderate
    }
}

/// Diagnose failure patterns. `none` severities are dropped; output follows
/// the taxonomy order.
pub fn detect(
    evidence: &str,
    dimensions: &BTreeMap<String, DimensionScore>,
    reported: &[ReportedPattern],
) -> Vec<FailurePattern> {
    let mut found: BTreeMap<PatternKind, Severity> = BTreeMap::new();

    for rule in &RULES {
        let severity = heuristic_severity(rule, evidence, dimensions);
        if severity > Severity::None {
            found.insert(rule.kind, severity);
        }
    }

    for r in reported {
        let Some(kind) = parse_pattern_kind(&r.pattern) else {
            tracing::debug!(pattern = %r.pattern, "Ignoring unknown failure pattern");
            continue;
        };
        let severity = r
            .severity
            .as_deref()
            .map(parse_severity)
            .unwrap_or(Severity::Moderate);
        let entry = found.entry(kind).or_insert(Severity::None);
        *entry = (*entry).max(severity);
    }

    found
        .into_iter()
        .filter(|(_, s)| *s > Severity::None)
        .map(|(pattern, severity)| FailurePattern {
            pattern,
            severity,
            fix: fix_for(pattern).to_string(),
        })
        .collect()
}

/// Keep the stronger severity per pattern across several lists.
pub fn merge(lists: &[&[FailurePattern]]) -> Vec<FailurePattern> {
    let mut merged: BTreeMap<PatternKind, Severity> = BTreeMap::new();
    for p in lists.iter().flat_map(|l| l.iter()) {
        let entry = merged.entry(p.pattern).or_insert(Severity::None);
        *entry = (*entry).max(p.severity);
    }
    merged
        .into_iter()
        .filter(|(_, s)| *s > Severity::None)
        .map(|(pattern, severity)| FailurePattern {
            pattern,
            severity,
            fix: fix_for(pattern).to_string(),
        })
        .collect()
}
