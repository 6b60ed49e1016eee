// src/cli/progress.rs — Terminal progress renderer for shot runs

use crate::core::types::{LoopState, ProgressEvent};

/// Build a progress callback that writes formatted output to stderr.
///
/// All progress output goes to stderr so stdout stays clean for results.
/// Returns a closure suitable for `IterationController::with_progress()`.
pub fn terminal_progress(verbose: bool) -> impl Fn(ProgressEvent) + Send + Sync + 'static {
    move |event| {
        if let Some(line) = format_event(&event, verbose) {
            eprintln!("{}", line);
        }
    }
}

/// One display line per event. State changes only show in verbose mode.
pub fn format_event(event: &ProgressEvent, verbose: bool) -> Option<String> {
    match event {
        ProgressEvent::IterationStart {
            shot_id,
            iteration,
            max_iterations,
            provider,
            mode,
        } => Some(format!(
            "[{}] iter {}/{} on {} ({:?})",
            shot_id, iteration, max_iterations, provider, mode
        )),
        ProgressEvent::StateChanged { shot_id, state } => {
            (verbose && *state != LoopState::Idle).then(|| format!("[{}]   {:?}", shot_id, state))
        }
        ProgressEvent::IterationEnd {
            shot_id,
            iteration,
            score,
            verdict,
            cost_so_far,
        } => Some(match (score, verdict) {
            (Some(score), Some(verdict)) => format!(
                "[{}] iter {} score={:.1} -> {:<10} (${:.2})",
                shot_id, iteration, score, verdict, cost_so_far
            ),
            _ => format!("[{}] iter {} failed (${:.2})", shot_id, iteration, cost_so_far),
        }),
        ProgressEvent::BudgetExhausted {
            shot_id,
            spent,
            needed,
            ceiling,
        } => Some(format!(
            "[{}] budget: ${:.2} of ${:.2} spent, next call needs ${:.2}",
            shot_id, spent, ceiling, needed
        )),
        ProgressEvent::Complete {
            shot_id,
            iterations,
            stop_reason,
            best_score,
            total_cost,
        } => Some(format!(
            "[{}] done: {} after {} iteration(s), best={} cost=${:.2}",
            shot_id,
            stop_reason,
            iterations,
            best_score.map_or_else(|| "-".to_string(), |s| format!("{:.1}", s)),
            total_cost
        )),
    }
}
