// tests/orchestrator_test.rs — Integration test: iteration loop with mock provider, judge and compiler

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use shotsmith::compiler::context::{BriefContext, CharacterRef};
use shotsmith::compiler::{CompiledPrompt, PromptCompiler};
use shotsmith::core::cancel::CancellationToken;
use shotsmith::core::cost::{Budget, CostLedger};
use shotsmith::core::orchestrator::IterationController;
use shotsmith::core::sink::{HistoryLine, MemorySink};
use shotsmith::core::types::*;
use shotsmith::evaluator::judge::Judge;
use shotsmith::evaluator::parser::JudgeOutput;
use shotsmith::evaluator::rubric::Rubric;
use shotsmith::evaluator::AuditEngine;
use shotsmith::infra::errors::ShotsmithError;
use shotsmith::provider::registry::ProviderRegistry;
use shotsmith::provider::router::ModelRouter;
use shotsmith::provider::*;

const A: ProviderId = ProviderId::Seedream;
const B: ProviderId = ProviderId::FluxPro;

/// Two interchangeable providers; A wins ties by catalog order.
const CATALOG: &str = r#"
[[providers]]
id = "seedream"
name = "Provider A"
type = "image"
protocol = "queue"
model = "mock/a"
capabilities = { generate = true }
api_available = true
cost_per_unit = 0.05

[[providers]]
id = "flux-pro"
name = "Provider B"
type = "image"
protocol = "queue"
model = "mock/b"
capabilities = { generate = true }
api_available = true
cost_per_unit = 0.04
"#;

/// Same pair, but A takes a reference image inline.
const REFERENCE_CATALOG: &str = r#"
[[providers]]
id = "seedream"
name = "Provider A"
type = "image"
protocol = "queue"
model = "mock/a"
capabilities = { generate = true, img2img = true }
api_available = true
cost_per_unit = 0.05

[[providers]]
id = "flux-pro"
name = "Provider B"
type = "image"
protocol = "queue"
model = "mock/b"
capabilities = { generate = true }
api_available = true
cost_per_unit = 0.04
"#;

// ─── Mocks ──────────────────────────────────────────────────────

/// Returns a tiny PNG-ish payload; optionally fails every call.
struct MockProvider {
    id: ProviderId,
    calls: AtomicUsize,
    references_seen: AtomicUsize,
    fail: bool,
}

impl MockProvider {
    fn new(id: ProviderId) -> Arc<Self> {
        Arc::new(Self {
            id,
            calls: AtomicUsize::new(0),
            references_seen: AtomicUsize::new(0),
            fail: false,
        })
    }

    fn failing(id: ProviderId) -> Arc<Self> {
        Arc::new(Self {
            id,
            calls: AtomicUsize::new(0),
            references_seen: AtomicUsize::new(0),
            fail: true,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Total reference images received across all calls.
    fn references_seen(&self) -> usize {
        self.references_seen.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageProvider for MockProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn protocol(&self) -> AdapterKind {
        AdapterKind::Queue
    }

    async fn submit(
        &self,
        request: &GenerationRequest,
        _cancel: &CancellationToken,
    ) -> Result<GenerationResult, ShotsmithError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.references_seen
            .fetch_add(request.reference_images.len(), Ordering::SeqCst);
        if self.fail {
            return Err(ShotsmithError::Permanent {
                provider: self.id.to_string(),
                message: "content policy violation".into(),
            });
        }
        Ok(GenerationResult::new(
            format!("{}:{}", request.provider, request.prompt).into_bytes(),
            "image/png",
            format!("{}-{}", self.id, n),
            5,
        ))
    }
}

/// Hands out scripted (score, issues) pairs in call order.
struct ScriptedJudge {
    script: Mutex<VecDeque<(f32, Vec<String>)>>,
}

impl ScriptedJudge {
    fn new(scores: &[(f32, &[&str])]) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(
                scores
                    .iter()
                    .map(|(s, issues)| (*s, issues.iter().map(|i| i.to_string()).collect()))
                    .collect(),
            ),
        })
    }

    fn scores(scores: &[f32]) -> Arc<Self> {
        let script: Vec<(f32, &[&str])> = scores.iter().map(|s| (*s, &[][..])).collect();
        Self::new(&script)
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn assess(
        &self,
        _image: &GenerationResult,
        _brief: &BriefContext,
        _rubric: &Rubric,
    ) -> Result<JudgeOutput, ShotsmithError> {
        let (score, issues) = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .expect("judge script exhausted");
        Ok(JudgeOutput {
            overall_score: Some(score),
            issues,
            summary: format!("scored {}", score),
            ..Default::default()
        })
    }
}

/// A judge whose model endpoint is down.
struct OfflineJudge;

#[async_trait]
impl Judge for OfflineJudge {
    fn name(&self) -> &str {
        "offline"
    }

    async fn assess(
        &self,
        _image: &GenerationResult,
        _brief: &BriefContext,
        _rubric: &Rubric,
    ) -> Result<JudgeOutput, ShotsmithError> {
        Err(ShotsmithError::Transient {
            provider: "openai".into(),
            message: "HTTP 503".into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum CompileCall {
    Fresh(ProviderId),
    Refine {
        provider: ProviderId,
        previous: String,
        score: f32,
    },
}

/// Deterministic compiler that records how it was called. `free` makes it
/// behave like a local template compiler.
#[derive(Default)]
struct RecordingCompiler {
    calls: Mutex<Vec<CompileCall>>,
    fail: bool,
    free: bool,
}

impl RecordingCompiler {
    fn calls(&self) -> Vec<CompileCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PromptCompiler for RecordingCompiler {
    fn name(&self) -> &str {
        "recording"
    }

    fn makes_paid_calls(&self) -> bool {
        !self.free
    }

    async fn compile(
        &self,
        brief: &BriefContext,
        profile: &ProviderProfile,
    ) -> Result<CompiledPrompt, ShotsmithError> {
        if self.fail {
            return Err(ShotsmithError::Other(anyhow::anyhow!("writer offline")));
        }
        self.calls.lock().unwrap().push(CompileCall::Fresh(profile.id));
        Ok(CompiledPrompt {
            text: format!("{} [{}]", brief.shot.description, profile.id),
            mode: CompileMode::Fresh,
            knowledge: vec![],
        })
    }

    async fn refine(
        &self,
        _brief: &BriefContext,
        profile: &ProviderProfile,
        previous_prompt: &str,
        audit: &AuditReport,
    ) -> Result<CompiledPrompt, ShotsmithError> {
        self.calls.lock().unwrap().push(CompileCall::Refine {
            provider: profile.id,
            previous: previous_prompt.to_string(),
            score: audit.overall_score,
        });
        let mut text = previous_prompt.to_string();
        for fix in &audit.prompt_adjustments {
            text.push_str(", ");
            text.push_str(fix);
        }
        text.push_str(" (refined)");
        Ok(CompiledPrompt {
            text,
            mode: CompileMode::Refine,
            knowledge: vec![],
        })
    }
}

// ─── Harness ────────────────────────────────────────────────────

struct Harness {
    controller: IterationController,
    compiler: Arc<RecordingCompiler>,
    a: Arc<MockProvider>,
    b: Arc<MockProvider>,
}

fn harness_with(
    judge: Arc<ScriptedJudge>,
    a: Arc<MockProvider>,
    b: Arc<MockProvider>,
    compiler: Arc<RecordingCompiler>,
    config: IterationEngineConfig,
) -> Harness {
    harness_on(CATALOG, vec![judge as Arc<dyn Judge>], a, b, compiler, config)
}

fn harness_on(
    catalog: &str,
    judges: Vec<Arc<dyn Judge>>,
    a: Arc<MockProvider>,
    b: Arc<MockProvider>,
    compiler: Arc<RecordingCompiler>,
    config: IterationEngineConfig,
) -> Harness {
    let catalog = Arc::new(ProviderCatalog::from_toml(catalog).unwrap());
    let mut registry = ProviderRegistry::new();
    registry.register(a.clone());
    registry.register(b.clone());
    let router = Arc::new(ModelRouter::new(catalog, config.acceptance_threshold));
    let auditor = Arc::new(AuditEngine::new(judges, config.thresholds));
    let controller = IterationController::new(
        compiler.clone(),
        Arc::new(registry),
        router,
        auditor,
        config,
    );
    Harness {
        controller,
        compiler,
        a,
        b,
    }
}

fn harness(judge: Arc<ScriptedJudge>) -> Harness {
    harness_with(
        judge,
        MockProvider::new(A),
        MockProvider::new(B),
        Arc::new(RecordingCompiler::default()),
        IterationEngineConfig::default(),
    )
}

fn noir_brief() -> BriefContext {
    let mut brief =
        BriefContext::from_description("wide establishing shot, neo-noir, no characters");
    brief.shot.id = "s01".into();
    brief
}

/// The noir brief with one character whose reference lives at `url`.
fn brief_with_reference(url: &str) -> BriefContext {
    let mut brief = noir_brief();
    brief.characters.push(CharacterRef {
        name: "Mara".into(),
        description: "courier in a yellow raincoat".into(),
        reference_images: vec![url.to_string()],
        ..Default::default()
    });
    brief
}

/// Serve one reference image and count how often it is fetched.
async fn reference_server() -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let router = axum::Router::new().route(
        "/refs/mara.png",
        axum::routing::get(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                ([("content-type", "image/png")], vec![0x89u8, 0x50, 0x4e, 0x47])
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{}/refs/mara.png", addr), hits)
}

fn budget(ledger: &Arc<CostLedger>, scope: &str, ceiling: f64) -> Budget {
    Budget::new(ledger.clone(), scope, ceiling)
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

// ─── End to end ─────────────────────────────────────────────────

#[tokio::test]
async fn test_regenerate_then_refine_then_lock_in() {
    let judge = ScriptedJudge::new(&[
        (55.0, &["flat, lifeless lighting"]),
        (88.0, &[]),
        (96.0, &[]),
    ]);
    let h = harness(judge);
    let ledger = Arc::new(CostLedger::new());
    let budget = budget(&ledger, "s01", 2.0);

    let outcome = h
        .controller
        .run(&noir_brief(), &budget, &CancellationToken::new(), None)
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::LockedIn);
    assert_eq!(
        outcome.history.trail(),
        vec![Verdict::Regenerate, Verdict::Refine, Verdict::LockIn]
    );
    assert_eq!(outcome.history.len(), 3);

    let records = outcome.history.records();
    assert_eq!(records[0].provider, A);
    assert_eq!(records[0].decision, Some(Decision::Regenerate { on: B }));
    let first_audit = records[0].audit.as_ref().unwrap();
    assert!(first_audit
        .failure_patterns
        .iter()
        .any(|p| p.pattern == PatternKind::FlatLighting));

    assert_eq!(records[1].provider, B);
    assert_eq!(records[1].compile_mode, CompileMode::Fresh);
    assert_eq!(records[1].decision, Some(Decision::Refine));
    assert_eq!(records[2].provider, B);
    assert_eq!(records[2].compile_mode, CompileMode::Refine);
    assert_eq!(
        records[2].decision,
        Some(Decision::Stop {
            reason: StopReason::LockedIn
        })
    );

    assert_eq!(
        h.compiler.calls(),
        vec![
            CompileCall::Fresh(A),
            CompileCall::Fresh(B),
            CompileCall::Refine {
                provider: B,
                previous: records[1].prompt.clone(),
                score: 88.0,
            },
        ]
    );
    assert_eq!(h.a.calls(), 1);
    assert_eq!(h.b.calls(), 2);

    assert_eq!(outcome.best, Some(2));
    assert_eq!(outcome.best_score(), Some(96.0));
    // (0.01 + 0.05 + 0.02) + 2 × (0.01 + 0.04 + 0.02)
    assert_close(outcome.total_cost, 0.22);
    assert_close(ledger.scope_total("s01"), 0.22);
}

#[tokio::test]
async fn test_lock_in_on_first_pass() {
    let h = harness(ScriptedJudge::scores(&[93.0]));
    let ledger = Arc::new(CostLedger::new());
    let outcome = h
        .controller
        .run(
            &noir_brief(),
            &budget(&ledger, "s01", 2.0),
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::LockedIn);
    assert_eq!(outcome.history.len(), 1);
    assert_eq!(outcome.best, Some(0));
    assert_eq!(h.b.calls(), 0);
}

#[tokio::test]
async fn test_switch_moves_to_other_provider() {
    let h = harness(ScriptedJudge::scores(&[65.0, 91.0]));
    let ledger = Arc::new(CostLedger::new());
    let outcome = h
        .controller
        .run(
            &noir_brief(),
            &budget(&ledger, "s01", 2.0),
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

    let records = outcome.history.records();
    assert_eq!(records[0].decision, Some(Decision::Switch { to: B }));
    assert_eq!(records[1].provider, B);
    assert_eq!(records[1].compile_mode, CompileMode::Fresh);
    assert_eq!(outcome.stop_reason, StopReason::LockedIn);
}

#[tokio::test]
async fn test_requested_initial_provider_is_used() {
    let h = harness(ScriptedJudge::scores(&[95.0]));
    let ledger = Arc::new(CostLedger::new());
    let outcome = h
        .controller
        .run(
            &noir_brief(),
            &budget(&ledger, "s01", 2.0),
            &CancellationToken::new(),
            Some(B),
        )
        .await
        .unwrap();

    assert_eq!(outcome.history.records()[0].provider, B);
    assert_eq!(h.a.calls(), 0);
}

#[tokio::test]
async fn test_provider_without_adapter_is_setup_error() {
    let h = harness(ScriptedJudge::scores(&[]));
    let ledger = Arc::new(CostLedger::new());
    let result = h
        .controller
        .run(
            &noir_brief(),
            &budget(&ledger, "s01", 2.0),
            &CancellationToken::new(),
            Some(ProviderId::Ideogram),
        )
        .await;
    assert!(result.is_err());
}

// ─── Stop conditions ────────────────────────────────────────────

#[tokio::test]
async fn test_budget_below_text_cost_never_generates() {
    let h = harness(ScriptedJudge::scores(&[]));
    let ledger = Arc::new(CostLedger::new());
    let outcome = h
        .controller
        .run(
            &noir_brief(),
            &budget(&ledger, "s01", 0.005),
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::BudgetExhausted);
    assert!(outcome.history.is_empty());
    assert_eq!(outcome.best, None);
    assert_eq!(h.a.calls() + h.b.calls(), 0);
    assert_close(outcome.total_cost, 0.0);
}

#[tokio::test]
async fn test_budget_runs_out_mid_loop() {
    // One full pass costs 0.08; the second compile fits, its generation does not.
    let h = harness(ScriptedJudge::scores(&[80.0]));
    let ledger = Arc::new(CostLedger::new());
    let budget = budget(&ledger, "s01", 0.10);
    let outcome = h
        .controller
        .run(&noir_brief(), &budget, &CancellationToken::new(), None)
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::BudgetExhausted);
    assert_eq!(outcome.history.len(), 2);
    let last = outcome.history.last().unwrap();
    assert!(last.error.is_some());
    assert!(last.result.is_none());
    assert_eq!(h.a.calls(), 1);
    assert!(outcome.total_cost <= 0.10 + 1e-9);
    assert_close(outcome.total_cost, 0.09);
}

#[tokio::test]
async fn test_score_regression_stops() {
    let h = harness(ScriptedJudge::scores(&[88.0, 48.0]));
    let ledger = Arc::new(CostLedger::new());
    let outcome = h
        .controller
        .run(
            &noir_brief(),
            &budget(&ledger, "s01", 2.0),
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::ScoreRegression);
    assert_eq!(outcome.history.len(), 2);
    // The regressed image is kept in history but the earlier one stays best.
    assert_eq!(outcome.best, Some(0));
}

#[tokio::test]
async fn test_max_iterations_bounds_the_loop() {
    let config = IterationEngineConfig {
        max_iterations: 3,
        ..IterationEngineConfig::default()
    };
    let h = harness_with(
        ScriptedJudge::scores(&[80.0, 81.0, 82.0]),
        MockProvider::new(A),
        MockProvider::new(B),
        Arc::new(RecordingCompiler::default()),
        config,
    );
    let ledger = Arc::new(CostLedger::new());
    let outcome = h
        .controller
        .run(
            &noir_brief(),
            &budget(&ledger, "s01", 5.0),
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::MaxIterationsReached);
    assert_eq!(outcome.history.len(), 3);
    assert_eq!(outcome.best, Some(2));
}

#[tokio::test]
async fn test_generation_failure_records_error() {
    let h = harness_with(
        ScriptedJudge::scores(&[]),
        MockProvider::failing(A),
        MockProvider::new(B),
        Arc::new(RecordingCompiler::default()),
        IterationEngineConfig::default(),
    );
    let ledger = Arc::new(CostLedger::new());
    let outcome = h
        .controller
        .run(
            &noir_brief(),
            &budget(&ledger, "s01", 2.0),
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::GenerationFailed);
    assert_eq!(outcome.history.len(), 1);
    let record = outcome.history.last().unwrap();
    assert!(record.error.as_deref().unwrap().contains("content policy"));
    assert!(!record.is_success());
    assert_eq!(outcome.best, None);
    // Only the compile was charged.
    assert_close(outcome.total_cost, 0.01);
}

#[tokio::test]
async fn test_compile_failure_stops() {
    let compiler = Arc::new(RecordingCompiler {
        fail: true,
        ..Default::default()
    });
    let h = harness_with(
        ScriptedJudge::scores(&[]),
        MockProvider::new(A),
        MockProvider::new(B),
        compiler,
        IterationEngineConfig::default(),
    );
    let ledger = Arc::new(CostLedger::new());
    let outcome = h
        .controller
        .run(
            &noir_brief(),
            &budget(&ledger, "s01", 2.0),
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::CompileFailed);
    assert_eq!(outcome.history.len(), 1);
    assert_eq!(h.a.calls(), 0);
    assert_close(outcome.total_cost, 0.0);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let h = harness(ScriptedJudge::scores(&[]));
    let ledger = Arc::new(CostLedger::new());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = h
        .controller
        .run(&noir_brief(), &budget(&ledger, "s01", 2.0), &cancel, None)
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Cancelled);
    assert!(outcome.history.is_empty());
}

// ─── Accounting ─────────────────────────────────────────────────

#[tokio::test]
async fn test_cost_so_far_is_monotonic() {
    let h = harness(ScriptedJudge::scores(&[55.0, 80.0, 85.0, 86.0, 87.0]));
    let ledger = Arc::new(CostLedger::new());
    let outcome = h
        .controller
        .run(
            &noir_brief(),
            &budget(&ledger, "s01", 5.0),
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

    let costs: Vec<f64> = outcome
        .history
        .records()
        .iter()
        .map(|r| r.cost_so_far)
        .collect();
    assert!(costs.windows(2).all(|w| w[1] > w[0]), "{costs:?}");
    assert_close(*costs.last().unwrap(), outcome.total_cost);
}

#[tokio::test]
async fn test_concurrent_shots_share_one_ledger() {
    let ledger = Arc::new(CostLedger::new());
    let h1 = harness(ScriptedJudge::scores(&[95.0]));
    let h2 = harness(ScriptedJudge::scores(&[82.0, 94.0]));
    let mut brief2 = noir_brief();
    brief2.shot.id = "s02".into();

    let b1 = budget(&ledger, "s01", 1.0);
    let b2 = budget(&ledger, "s02", 1.0);
    let cancel = CancellationToken::new();
    let brief1 = noir_brief();
    let (o1, o2) = tokio::join!(
        h1.controller.run(&brief1, &b1, &cancel, None),
        h2.controller.run(&brief2, &b2, &cancel, None),
    );
    let (o1, o2) = (o1.unwrap(), o2.unwrap());

    assert_eq!(o1.stop_reason, StopReason::LockedIn);
    assert_eq!(o2.stop_reason, StopReason::LockedIn);
    assert_close(ledger.scope_total("s01"), o1.total_cost);
    assert_close(ledger.scope_total("s02"), o2.total_cost);
    assert_close(ledger.total(), o1.total_cost + o2.total_cost);
}

// ─── Observers ──────────────────────────────────────────────────

#[tokio::test]
async fn test_sink_and_progress_see_every_pass() {
    let sink = Arc::new(MemorySink::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    let seen = events.clone();

    let h = harness(ScriptedJudge::scores(&[80.0, 92.0]));
    let controller = h
        .controller
        .with_sink(sink.clone())
        .with_progress(move |e| seen.lock().unwrap().push(e));
    let ledger = Arc::new(CostLedger::new());
    let outcome = controller
        .run(
            &noir_brief(),
            &budget(&ledger, "s01", 2.0),
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

    let lines = sink.lines();
    assert_eq!(lines.len(), outcome.history.len() + 1);
    assert!(matches!(lines[0], HistoryLine::Iteration { ref shot_id, .. } if shot_id == "s01"));
    match lines.last().unwrap() {
        HistoryLine::Outcome(entry) => {
            assert_eq!(entry.stop_reason, StopReason::LockedIn);
            assert_eq!(entry.iterations, 2);
            assert_eq!(entry.best_iteration, Some(2));
        }
        other => panic!("expected outcome line, got {other:?}"),
    }

    let events = events.lock().unwrap();
    let starts = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::IterationStart { .. }))
        .count();
    assert_eq!(starts, 2);
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Complete {
            stop_reason: StopReason::LockedIn,
            ..
        })
    ));
}

// ─── References ─────────────────────────────────────────────────

#[tokio::test]
async fn test_reference_download_waits_for_budget() {
    let (url, hits) = reference_server().await;
    let h = harness(ScriptedJudge::scores(&[]));
    let ledger = Arc::new(CostLedger::new());
    let outcome = h
        .controller
        .run(
            &brief_with_reference(&url),
            &budget(&ledger, "s01", 0.005),
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::BudgetExhausted);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_close(outcome.total_cost, 0.0);
}

#[tokio::test]
async fn test_references_skipped_for_providers_without_reference_input() {
    let (url, hits) = reference_server().await;
    let h = harness(ScriptedJudge::scores(&[95.0]));
    let ledger = Arc::new(CostLedger::new());
    let outcome = h
        .controller
        .run(
            &brief_with_reference(&url),
            &budget(&ledger, "s01", 2.0),
            &CancellationToken::new(),
            Some(A),
        )
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::LockedIn);
    assert_eq!(h.a.calls(), 1);
    assert_eq!(h.a.references_seen(), 0);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_references_fetched_once_for_accepting_provider() {
    let (url, hits) = reference_server().await;
    let judge = ScriptedJudge::scores(&[88.0, 96.0]);
    let h = harness_on(
        REFERENCE_CATALOG,
        vec![judge as Arc<dyn Judge>],
        MockProvider::new(A),
        MockProvider::new(B),
        Arc::new(RecordingCompiler::default()),
        IterationEngineConfig::default(),
    );
    let ledger = Arc::new(CostLedger::new());
    let outcome = h
        .controller
        .run(
            &brief_with_reference(&url),
            &budget(&ledger, "s01", 2.0),
            &CancellationToken::new(),
            Some(A),
        )
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::LockedIn);
    assert_eq!(h.a.calls(), 2);
    assert_eq!(h.a.references_seen(), 2);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

// ─── Charging ───────────────────────────────────────────────────

#[tokio::test]
async fn test_local_compiler_is_not_charged() {
    let compiler = Arc::new(RecordingCompiler {
        free: true,
        ..Default::default()
    });
    let h = harness_with(
        ScriptedJudge::scores(&[96.0]),
        MockProvider::new(A),
        MockProvider::new(B),
        compiler,
        IterationEngineConfig::default(),
    );
    let ledger = Arc::new(CostLedger::new());
    let outcome = h
        .controller
        .run(
            &noir_brief(),
            &budget(&ledger, "s01", 2.0),
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::LockedIn);
    // generate 0.05 + audit 0.02
    assert_close(outcome.total_cost, 0.07);
}

#[tokio::test]
async fn test_unreachable_judge_is_not_charged() {
    let judges: Vec<Arc<dyn Judge>> = vec![
        ScriptedJudge::scores(&[96.0]) as Arc<dyn Judge>,
        Arc::new(OfflineJudge),
    ];
    let h = harness_on(
        CATALOG,
        judges,
        MockProvider::new(A),
        MockProvider::new(B),
        Arc::new(RecordingCompiler::default()),
        IterationEngineConfig::default(),
    );
    let ledger = Arc::new(CostLedger::new());
    let outcome = h
        .controller
        .run(
            &noir_brief(),
            &budget(&ledger, "s01", 2.0),
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::LockedIn);
    let audit = outcome.history.last().unwrap().audit.as_ref().unwrap();
    assert_eq!(audit.consensus.as_ref().unwrap().failed_judges, vec!["offline".to_string()]);
    // compile 0.01 + generate 0.05 + one answering judge 0.02
    assert_close(outcome.total_cost, 0.08);
}
