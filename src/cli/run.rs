// src/cli/run.rs — `shotsmith run`: concurrent shot loops sharing one ledger

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::progress::terminal_progress;
use super::Services;
use crate::compiler::context::BriefContext;
use crate::core::cancel::CancellationToken;
use crate::core::cost::{Budget, CostLedger};
use crate::core::orchestrator::IterationController;
use crate::core::sink::JsonlSink;
use crate::core::types::{IterationEngineConfig, RunOutcome};
use crate::infra::paths;
use crate::provider::ProviderId;

pub struct RunArgs {
    pub briefs: Vec<PathBuf>,
    pub provider: Option<ProviderId>,
    pub budget: Option<f64>,
    pub max_iterations: Option<u8>,
    pub out: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
    pub verbose: bool,
}

pub async fn run_shots(services: Services, args: RunArgs) -> anyhow::Result<()> {
    if services.registry.available().is_empty() {
        anyhow::bail!("no image provider has credentials; set OPENAI_API_KEY and/or FAL_KEY");
    }

    let briefs = args
        .briefs
        .iter()
        .map(|path| {
            BriefContext::load(path)
                .map(|b| (path.clone(), b))
                .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut engine_config = IterationEngineConfig::from_config(&services.config);
    if let Some(n) = args.max_iterations {
        engine_config.max_iterations = n.max(1);
    }
    let ceiling = args.budget.unwrap_or(services.config.budget.ceiling_usd);

    paths::ensure_dirs().await?;
    let ledger = Arc::new(CostLedger::with_journal(&paths::ledger_path())?);
    let sink = Arc::new(JsonlSink::new(paths::history_path()));

    let mut controller = IterationController::new(
        services.compiler()?,
        services.registry.clone(),
        services.router.clone(),
        services.auditor()?,
        engine_config,
    )
    .with_sink(sink);
    if !args.quiet {
        controller = controller.with_progress(terminal_progress(args.verbose));
    }
    let controller = Arc::new(controller);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupted, stopping after the current step...");
                cancel.cancel();
            }
        });
    }

    let mut tasks = tokio::task::JoinSet::new();
    for (path, brief) in briefs {
        let controller = controller.clone();
        let ledger = ledger.clone();
        let cancel = cancel.clone();
        let initial = args.provider;
        tasks.spawn(async move {
            let scope = format!("{}-{}", brief.shot_id(), uuid::Uuid::new_v4().simple());
            let budget = Budget::new(ledger, scope, ceiling);
            let outcome = controller.run(&brief, &budget, &cancel, initial).await;
            (path, outcome)
        });
    }

    let out_dir = args.out.clone().unwrap_or_else(paths::renders_dir);
    let mut failures = 0usize;
    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (path, outcome) = joined?;
        match outcome {
            Ok(outcome) => {
                if let Some(saved) = save_best(&outcome, &out_dir)? {
                    eprintln!("[{}] saved {}", outcome.shot_id, saved.display());
                }
                outcomes.push(outcome);
            }
            Err(e) => {
                failures += 1;
                eprintln!("{}: {}", path.display(), e);
            }
        }
    }

    outcomes.sort_by(|a, b| a.shot_id.cmp(&b.shot_id));
    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    } else {
        for outcome in &outcomes {
            println!("{}", summary_line(outcome));
        }
        println!("{}", ledger.summary());
    }

    if failures > 0 {
        anyhow::bail!("{} shot(s) could not start", failures);
    }
    Ok(())
}

/// Write the best-scoring image as `<out>/<shot_id>.<ext>`.
pub fn save_best(outcome: &RunOutcome, out_dir: &Path) -> anyhow::Result<Option<PathBuf>> {
    let Some(result) = outcome.best_record().and_then(|r| r.result.as_ref()) else {
        return Ok(None);
    };
    if result.image_bytes.is_empty() {
        return Ok(None);
    }
    std::fs::create_dir_all(out_dir)?;
    let path = out_dir.join(format!(
        "{}.{}",
        outcome.shot_id,
        crate::util::extension_for_mime(&result.mime_type)
    ));
    std::fs::write(&path, &result.image_bytes)?;
    Ok(Some(path))
}

pub fn summary_line(outcome: &RunOutcome) -> String {
    let trail = outcome
        .history
        .trail()
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" → ");
    let best = outcome
        .best_record()
        .map(|r| format!("{:.1} on {} (iter {})", r.score().unwrap_or(0.0), r.provider, r.iteration))
        .unwrap_or_else(|| "no accepted image".into());
    format!(
        "{}: {} | best {} | ${:.2} | {}",
        outcome.shot_id,
        outcome.stop_reason,
        best,
        outcome.total_cost,
        if trail.is_empty() { "-".into() } else { trail }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{
        AuditReport, CompileMode, IterationHistory, IterationRecord, StopReason, Verdict,
    };
    use crate::provider::GenerationResult;
    use std::collections::BTreeMap;

    fn outcome(with_image: bool) -> RunOutcome {
        let mut history = IterationHistory::new();
        history.push(IterationRecord {
            iteration: 1,
            provider: ProviderId::Seedream,
            compile_mode: CompileMode::Fresh,
            prompt: "p".into(),
            result: Some(GenerationResult::new(
                if with_image { vec![9; 16] } else { vec![] },
                "image/jpeg",
                "r1",
                10,
            )),
            audit: Some(AuditReport {
                overall_score: 92.0,
                recommendation: Verdict::LockIn,
                dimensions: BTreeMap::new(),
                issues: vec![],
                prompt_adjustments: vec![],
                failure_patterns: vec![],
                summary: String::new(),
                consensus: None,
            }),
            cost_so_far: 0.09,
            decision: None,
            error: None,
            created_at: chrono::Utc::now(),
        });
        RunOutcome {
            shot_id: "s01".into(),
            best: history.best_index(),
            history,
            stop_reason: StopReason::LockedIn,
            total_cost: 0.09,
        }
    }

    #[test]
    fn test_save_best_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_best(&outcome(true), dir.path()).unwrap().unwrap();
        assert_eq!(path.file_name().unwrap(), "s01.jpg");
        assert_eq!(std::fs::read(path).unwrap(), vec![9; 16]);
    }

    #[test]
    fn test_save_best_skips_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(save_best(&outcome(false), dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_summary_line() {
        let line = summary_line(&outcome(true));
        assert_eq!(
            line,
            "s01: locked in | best 92.0 on seedream (iter 1) | $0.09 | LOCK_IN"
        );
    }
}
