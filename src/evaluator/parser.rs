// src/evaluator/parser.rs — Judge response parsing
//
// One boundary for everything a judge model returns: strict JSON first, then
// the first JSON object found in fenced or prose text, then field-by-field
// regex salvage. Clamping and defaults happen later in the engine.

use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::core::types::DimensionScore;
use crate::infra::errors::ShotsmithError;

/// Judge output before normalization. Scores may be out of range here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JudgeOutput {
    pub overall_score: Option<f32>,
    pub dimensions: BTreeMap<String, DimensionScore>,
    pub issues: Vec<String>,
    pub prompt_adjustments: Vec<String>,
    pub failure_patterns: Vec<ReportedPattern>,
    pub summary: String,
}

impl JudgeOutput {
    /// Usable only when it carries at least one score.
    pub fn has_scores(&self) -> bool {
        self.overall_score.is_some() || !self.dimensions.is_empty()
    }
}

/// A failure pattern named directly by the judge.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedPattern {
    pub pattern: String,
    pub severity: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawJudge {
    overall_score: Option<f32>,
    dimensions: BTreeMap<String, RawDimension>,
    issues: Vec<String>,
    prompt_adjustments: Vec<String>,
    failure_patterns: Vec<RawPattern>,
    summary: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDimension {
    Bare(f32),
    Scored {
        score: f32,
        #[serde(default)]
        notes: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPattern {
    Name(String),
    Full {
        pattern: String,
        #[serde(default)]
        severity: Option<String>,
    },
}

/// Parse a judge response, keeping only the named dimensions.
pub fn parse_judge_response(
    text: &str,
    dimension_names: &[&str],
) -> Result<JudgeOutput, ShotsmithError> {
    if let Some(output) = parse_json(text.trim(), dimension_names) {
        return Ok(output);
    }

    if let Some(candidate) = extract_json_object(text) {
        if let Some(output) = parse_json(candidate, dimension_names) {
            tracing::debug!("Judge JSON recovered from surrounding text");
            return Ok(output);
        }
    }

    let salvaged = salvage(text, dimension_names);
    if salvaged.has_scores() {
        tracing::warn!(
            dimensions = salvaged.dimensions.len(),
            has_overall = salvaged.overall_score.is_some(),
            "Judge output salvaged by pattern match"
        );
        return Ok(salvaged);
    }

    Err(ShotsmithError::AuditParse(
        crate::util::truncate_str(text, 200).to_string(),
    ))
}

fn parse_json(text: &str, dimension_names: &[&str]) -> Option<JudgeOutput> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let raw: RawJudge = serde_json::from_value(value.clone()).ok()?;

    let mut dimensions = BTreeMap::new();
    for (name, dim) in raw.dimensions {
        let Some(known) = match_dimension(&name, dimension_names) else {
            continue;
        };
        let score = match dim {
            RawDimension::Bare(score) => DimensionScore {
                score,
                notes: String::new(),
            },
            RawDimension::Scored { score, notes } => DimensionScore { score, notes },
        };
        dimensions.insert(known.to_string(), score);
    }

    // Some judges flatten dimension scores into the top-level object.
    for name in dimension_names {
        if dimensions.contains_key(*name) {
            continue;
        }
        if let Some(score) = value.get(*name).and_then(|v| v.as_f64()) {
            dimensions.insert(
                name.to_string(),
                DimensionScore {
                    score: score as f32,
                    notes: String::new(),
                },
            );
        }
    }

    let failure_patterns = raw
        .failure_patterns
        .into_iter()
        .map(|p| match p {
            RawPattern::Name(pattern) => ReportedPattern {
                pattern,
                severity: None,
            },
            RawPattern::Full { pattern, severity } => ReportedPattern { pattern, severity },
        })
        .collect();

    let output = JudgeOutput {
        overall_score: raw.overall_score,
        dimensions,
        issues: raw.issues,
        prompt_adjustments: raw.prompt_adjustments,
        failure_patterns,
        summary: raw.summary,
    };
    output.has_scores().then_some(output)
}

fn match_dimension<'a>(name: &str, dimension_names: &[&'a str]) -> Option<&'a str> {
    let normalized = name.trim().to_ascii_lowercase().replace([' ', '-'], "_");
    dimension_names.iter().copied().find(|d| *d == normalized)
}

/// Pull the first JSON object out of a fenced block or surrounding prose.
pub(crate) fn extract_json_object(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        // skip an optional language tag
        let body = after.find('\n').map(|i| &after[i + 1..]).unwrap_or(after);
        if let Some(end) = body.find("```") {
            let candidate = body[..end].trim();
            if candidate.starts_with('{') {
                return Some(candidate);
            }
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn overall_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\boverall[_ ]?score"?\s*[:=]\s*"?(-?\d+(?:\.\d+)?)"#).ok()
    })
    .as_ref()
}

fn summary_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)"summary"\s*:\s*"((?:[^"\\]|\\.)*)""#).ok())
        .as_ref()
}

fn capture_number(re: &Regex, text: &str) -> Option<f32> {
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

/// Last resort: pick individual fields out of broken JSON or prose.
fn salvage(text: &str, dimension_names: &[&str]) -> JudgeOutput {
    let mut output = JudgeOutput {
        overall_score: overall_re().and_then(|re| capture_number(re, text)),
        ..Default::default()
    };

    for name in dimension_names {
        let pattern = format!(
            r#"(?i)\b{}\b"?\s*[:=]\s*(?:\{{[^}}]*?"score"\s*:\s*)?"?(-?\d+(?:\.\d+)?)"#,
            regex::escape(name)
        );
        let Ok(re) = Regex::new(&pattern) else { continue };
        if let Some(score) = capture_number(&re, text) {
            output.dimensions.insert(
                name.to_string(),
                DimensionScore {
                    score,
                    notes: String::new(),
                },
            );
        }
    }

    if let Some(caps) = summary_re().and_then(|re| re.captures(text)) {
        if let Some(m) = caps.get(1) {
            output.summary = m.as_str().replace("\\\"", "\"");
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DIMS: &[&str] = &["brief_fidelity", "composition", "lighting", "realism"];

    // ─── strict JSON tests ──────────────────────────────────────

    #[test]
    fn test_strict_json() {
        let text = r#"{
            "overall_score": 82,
            "dimensions": {
                "brief_fidelity": {"score": 8, "notes": "on brief"},
                "lighting": {"score": 6.5, "notes": "a bit flat"},
                "made_up": {"score": 3}
            },
            "issues": ["flat key light"],
            "prompt_adjustments": ["add rim light"],
            "failure_patterns": [{"pattern": "flat_lighting", "severity": "moderate"}],
            "summary": "Solid frame."
        }"#;
        let out = parse_judge_response(text, DIMS).unwrap();
        assert_eq!(out.overall_score, Some(82.0));
        assert_eq!(out.dimensions.len(), 2);
        assert_eq!(out.dimensions["lighting"].notes, "a bit flat");
        assert_eq!(out.issues, vec!["flat key light".to_string()]);
        assert_eq!(out.failure_patterns[0].pattern, "flat_lighting");
        assert_eq!(out.failure_patterns[0].severity.as_deref(), Some("moderate"));
        assert_eq!(out.summary, "Solid frame.");
    }

    #[test]
    fn test_bare_scores_and_name_normalization() {
        let text = r#"{"dimensions": {"Brief Fidelity": 7, "composition": 9}}"#;
        let out = parse_judge_response(text, DIMS).unwrap();
        assert_eq!(out.overall_score, None);
        assert_eq!(out.dimensions["brief_fidelity"].score, 7.0);
        assert_eq!(out.dimensions["composition"].score, 9.0);
    }

    #[test]
    fn test_flattened_dimensions() {
        let text = r#"{"overall_score": 70, "lighting": 4, "realism": 8}"#;
        let out = parse_judge_response(text, DIMS).unwrap();
        assert_eq!(out.dimensions["lighting"].score, 4.0);
        assert_eq!(out.dimensions["realism"].score, 8.0);
    }

    #[test]
    fn test_pattern_names_as_strings() {
        let text = r#"{"overall_score": 50, "failure_patterns": ["synthetic_look"]}"#;
        let out = parse_judge_response(text, DIMS).unwrap();
        assert_eq!(out.failure_patterns[0].pattern, "synthetic_look");
        assert!(out.failure_patterns[0].severity.is_none());
    }

    // ─── extraction tests ───────────────────────────────────────

    #[test]
    fn test_fenced_json() {
        let text = "Here is my assessment:\n```json\n{\"overall_score\": 91, \"summary\": \"great\"}\n```\nThanks!";
        let out = parse_judge_response(text, DIMS).unwrap();
        assert_eq!(out.overall_score, Some(91.0));
        assert_eq!(out.summary, "great");
    }

    #[test]
    fn test_json_in_prose() {
        let text = "My verdict {\"overall_score\": 64, \"dimensions\": {\"realism\": 5}} end";
        let out = parse_judge_response(text, DIMS).unwrap();
        assert_eq!(out.overall_score, Some(64.0));
        assert_eq!(out.dimensions["realism"].score, 5.0);
    }

    #[test]
    fn test_extract_json_object_none() {
        assert_eq!(extract_json_object("no braces here"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    // ─── salvage tests ──────────────────────────────────────────

    #[test]
    fn test_salvage_broken_json() {
        let text = r#"{"overall_score": 77, "dimensions": {"lighting": {"score": 6, "notes": "ok"}, "composition": 8,, "summary": "Moody but \"soft\"" "#;
        let out = parse_judge_response(text, DIMS).unwrap();
        assert_eq!(out.overall_score, Some(77.0));
        assert_eq!(out.dimensions["lighting"].score, 6.0);
        assert_eq!(out.dimensions["composition"].score, 8.0);
        assert_eq!(out.summary, "Moody but \"soft\"");
    }

    #[test]
    fn test_salvage_prose_scores() {
        let text = "Overall score: 58\nlighting: 3/10 (flat)\nrealism = 6";
        let out = parse_judge_response(text, DIMS).unwrap();
        assert_eq!(out.overall_score, Some(58.0));
        assert_eq!(out.dimensions["lighting"].score, 3.0);
        assert_eq!(out.dimensions["realism"].score, 6.0);
    }

    #[test]
    fn test_salvage_ignores_pattern_names() {
        let text = r#"overall_score: 40, "pattern": "flat_lighting", "severity": "severe""#;
        let out = parse_judge_response(text, DIMS).unwrap();
        assert!(!out.dimensions.contains_key("lighting"));
    }

    #[test]
    fn test_unsalvageable_is_parse_error() {
        let err = parse_judge_response("I cannot assess this image.", DIMS).unwrap_err();
        assert!(matches!(err, ShotsmithError::AuditParse(_)));
    }

    #[test]
    fn test_empty_object_is_parse_error() {
        assert!(parse_judge_response("{}", DIMS).is_err());
    }
}
