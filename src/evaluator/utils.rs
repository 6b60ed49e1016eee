// src/evaluator/utils.rs — Helper functions for audits

/// Clamp to `[0, max]`; non-finite values become 0.
pub fn clamp_score(score: f32, max: f32) -> f32 {
    if score.is_finite() {
        score.clamp(0.0, max)
    } else {
        0.0
    }
}

/// Drop blanks and case-insensitive duplicates, keeping first-seen order.
pub fn dedup_strings<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.to_lowercase()))
        .collect()
}

/// Truncate text for judge prompts.
pub fn truncate_for_eval(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
