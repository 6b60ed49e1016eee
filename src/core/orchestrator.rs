// src/core/orchestrator.rs — Iteration controller
//
// compile → generate → audit → decide, one shot at a time. Every pass that
// reaches the compiler appends exactly one record; the loop always ends with
// a stop reason.

use std::sync::Arc;

use super::cancel::CancellationToken;
use super::cost::{Budget, CostAction};
use super::safety::{PolicyOutcome, StopPolicy};
use super::sink::HistorySink;
use super::types::*;
use crate::compiler::context::{BriefContext, BriefTraits};
use crate::compiler::references::{load_for_brief, LocalReferenceStore, ReferenceStore};
use crate::compiler::{CompiledPrompt, PromptCompiler};
use crate::evaluator::AuditEngine;
use crate::infra::errors::ShotsmithError;
use crate::provider::registry::ProviderRegistry;
use crate::provider::router::{ModelRouter, RouteOptions};
use crate::provider::{
    GenerationRequest, GenerationResult, ProviderId, ProviderProfile, ReferenceImage,
};

type ProgressCallback = Box<dyn Fn(ProgressEvent) + Send + Sync>;

/// Drives the loop for one shot per `run` call. Shareable across concurrent
/// runs; all per-shot state lives on the `run` stack.
pub struct IterationController {
    compiler: Arc<dyn PromptCompiler>,
    registry: Arc<ProviderRegistry>,
    router: Arc<ModelRouter>,
    auditor: Arc<AuditEngine>,
    references: Arc<dyn ReferenceStore>,
    config: IterationEngineConfig,
    policy: StopPolicy,
    sink: Option<Arc<dyn HistorySink>>,
    on_progress: Option<ProgressCallback>,
}

/// The pass in flight.
struct Pass<'a> {
    shot_id: &'a str,
    iteration: u8,
    provider: ProviderId,
    mode: CompileMode,
}

/// Brief references, fetched the first time a pass can actually send them.
/// Loading may download remote images, so it waits until a provider that
/// accepts references has passed the generation budget check.
struct References {
    wanted: bool,
    loaded: Option<Vec<ReferenceImage>>,
}

impl References {
    fn new(wanted: bool) -> Self {
        Self {
            wanted,
            loaded: None,
        }
    }

    async fn for_profile(
        &mut self,
        store: &dyn ReferenceStore,
        brief: &BriefContext,
        profile: &ProviderProfile,
    ) -> &[ReferenceImage] {
        if !self.wanted || !profile.accepts_references() {
            return &[];
        }
        if self.loaded.is_none() {
            let images = load_for_brief(store, brief).await;
            tracing::debug!(shot = brief.shot_id(), count = images.len(), "References loaded");
            self.loaded = Some(images);
        }
        self.loaded.as_deref().unwrap_or_default()
    }
}

impl IterationController {
    pub fn new(
        compiler: Arc<dyn PromptCompiler>,
        registry: Arc<ProviderRegistry>,
        router: Arc<ModelRouter>,
        auditor: Arc<AuditEngine>,
        config: IterationEngineConfig,
    ) -> Self {
        Self {
            compiler,
            registry,
            router,
            auditor,
            references: Arc::new(LocalReferenceStore::new(".")),
            policy: StopPolicy::from_config(&config),
            config,
            sink: None,
            on_progress: None,
        }
    }

    pub fn with_references(mut self, store: Arc<dyn ReferenceStore>) -> Self {
        self.references = store;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn HistorySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set a callback for real-time progress events.
    pub fn with_progress(mut self, cb: impl Fn(ProgressEvent) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(cb));
        self
    }

    pub fn config(&self) -> &IterationEngineConfig {
        &self.config
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(ref cb) = self.on_progress {
            cb(event);
        }
    }

    fn set_state(&self, shot_id: &str, state: LoopState) {
        tracing::trace!(shot = shot_id, ?state, "State change");
        self.emit(ProgressEvent::StateChanged {
            shot_id: shot_id.to_string(),
            state,
        });
    }

    /// Append to history and forward to the sink. Sink failures are logged only.
    fn append(&self, shot_id: &str, history: &mut IterationHistory, record: IterationRecord) {
        if let Some(ref sink) = self.sink {
            if let Err(e) = sink.record(shot_id, &record) {
                tracing::warn!(shot = shot_id, "History sink rejected record: {}", e);
            }
        }
        self.emit(ProgressEvent::IterationEnd {
            shot_id: shot_id.to_string(),
            iteration: record.iteration,
            score: record.score(),
            verdict: record.verdict(),
            cost_so_far: record.cost_so_far,
        });
        history.push(record);
    }

    fn budget_stop(&self, shot_id: &str, budget: &Budget, needed: f64) {
        self.emit(ProgressEvent::BudgetExhausted {
            shot_id: shot_id.to_string(),
            spent: budget.spent(),
            needed,
            ceiling: budget.ceiling(),
        });
    }

    /// Pick the starting provider: the caller's choice when it has an adapter,
    /// otherwise the router's primary.
    fn initial_provider(
        &self,
        traits: &BriefTraits,
        available: &[ProviderId],
        requested: Option<ProviderId>,
    ) -> Result<ProviderId, ShotsmithError> {
        match requested {
            Some(id) => {
                self.router.catalog().require(id)?;
                if !available.contains(&id) {
                    return Err(ShotsmithError::Config(format!(
                        "provider '{}' has no configured credentials",
                        id
                    )));
                }
                Ok(id)
            }
            None => Ok(self
                .router
                .recommend(traits, &RouteOptions::new(available.to_vec()))?
                .primary
                .provider),
        }
    }

    /// Run the loop for one brief until it locks in or a stop condition hits.
    ///
    /// Errors are returned only for setup problems (no usable provider).
    /// Failures inside the loop end it with a stop reason instead.
    pub async fn run(
        &self,
        brief: &BriefContext,
        budget: &Budget,
        cancel: &CancellationToken,
        initial_provider: Option<ProviderId>,
    ) -> Result<RunOutcome, ShotsmithError> {
        let shot_id = brief.shot_id().to_string();
        let traits = brief.traits();
        let available = self.registry.available();
        let mut provider = self.initial_provider(&traits, &available, initial_provider)?;

        let mut references = References::new(traits.has_references);

        tracing::info!(
            shot = %shot_id,
            provider = %provider,
            ceiling = budget.ceiling(),
            has_references = traits.has_references,
            "Starting shot"
        );
        self.set_state(&shot_id, LoopState::Idle);

        let mut history = IterationHistory::new();
        let mut mode = CompileMode::Fresh;
        let mut iteration: u8 = 0;

        let stop_reason = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            // Idle → Compiling
            if !budget.can_afford(self.config.text_call_usd) {
                self.budget_stop(&shot_id, budget, self.config.text_call_usd);
                break StopReason::BudgetExhausted;
            }

            iteration = iteration.saturating_add(1);
            let profile = self.router.catalog().require(provider)?.clone();
            let pass = Pass {
                shot_id: &shot_id,
                iteration,
                provider,
                mode,
            };
            self.emit(ProgressEvent::IterationStart {
                shot_id: shot_id.clone(),
                iteration,
                max_iterations: self.config.max_iterations,
                provider,
                mode,
            });

            match self
                .pass(&pass, &profile, brief, budget, cancel, &mut references, &mut history)
                .await
            {
                Step::Stop(reason) => break reason,
                Step::Next { provider: next, mode: next_mode } => {
                    provider = next;
                    mode = next_mode;
                }
            }
        };

        self.set_state(&shot_id, LoopState::Stopped);
        let best = history.best_index();
        let outcome = RunOutcome {
            shot_id: shot_id.clone(),
            total_cost: budget.spent(),
            history,
            stop_reason,
            best,
        };

        tracing::info!(
            shot = %shot_id,
            reason = %stop_reason,
            iterations = outcome.history.len(),
            best_score = outcome.best_score(),
            cost = outcome.total_cost,
            "Shot finished"
        );
        if let Some(ref sink) = self.sink {
            if let Err(e) = sink.outcome(&outcome) {
                tracing::warn!(shot = %shot_id, "History sink rejected outcome: {}", e);
            }
        }
        self.emit(ProgressEvent::Complete {
            shot_id,
            iterations: outcome.history.len(),
            stop_reason,
            best_score: outcome.best_score(),
            total_cost: outcome.total_cost,
        });
        Ok(outcome)
    }

    /// One compile → generate → audit → decide pass.
    #[allow(clippy::too_many_arguments)]
    async fn pass(
        &self,
        pass: &Pass<'_>,
        profile: &ProviderProfile,
        brief: &BriefContext,
        budget: &Budget,
        cancel: &CancellationToken,
        references: &mut References,
        history: &mut IterationHistory,
    ) -> Step {
        let shot_id = pass.shot_id;

        // Compiling
        self.set_state(shot_id, LoopState::Compiling);
        let compiled = match self.compile(pass, profile, brief, history).await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(shot = shot_id, iteration = pass.iteration, "Compile failed: {}", e);
                let record = error_record(
                    pass,
                    String::new(),
                    None,
                    &e,
                    StopReason::CompileFailed,
                    budget.spent(),
                );
                self.append(shot_id, history, record);
                return Step::Stop(StopReason::CompileFailed);
            }
        };
        if self.compiler.makes_paid_calls() {
            budget.charge(
                "compiler",
                self.compiler.name(),
                CostAction::Compile,
                self.config.text_call_usd,
            );
        }

        // Compiling → Generating
        if !budget.can_afford(profile.cost_per_unit) {
            self.budget_stop(shot_id, budget, profile.cost_per_unit);
            let err = ShotsmithError::BudgetExhausted {
                spent: budget.spent(),
                needed: profile.cost_per_unit,
                ceiling: budget.ceiling(),
            };
            let record = error_record(
                pass,
                compiled.text,
                None,
                &err,
                StopReason::BudgetExhausted,
                budget.spent(),
            );
            self.append(shot_id, history, record);
            return Step::Stop(StopReason::BudgetExhausted);
        }

        self.set_state(shot_id, LoopState::Generating);
        let mut request = GenerationRequest::new(pass.provider, compiled.text.clone())
            .with_size(brief.shot.size)
            .with_quality(brief.shot.quality);
        let images = references
            .for_profile(self.references.as_ref(), brief, profile)
            .await;
        if !images.is_empty() {
            request = request.with_references(images.to_vec());
        }

        let result = match self.generate(&request, cancel).await {
            Ok(r) => r,
            Err(e) => {
                let reason = if matches!(e, ShotsmithError::Cancelled { .. }) {
                    StopReason::Cancelled
                } else {
                    tracing::error!(
                        shot = shot_id,
                        provider = %pass.provider,
                        iteration = pass.iteration,
                        "Generation failed: {}",
                        e
                    );
                    StopReason::GenerationFailed
                };
                let record =
                    error_record(pass, compiled.text, None, &e, reason, budget.spent());
                self.append(shot_id, history, record);
                return Step::Stop(reason);
            }
        };
        budget.charge(
            pass.provider.as_str(),
            &profile.model,
            CostAction::Generate,
            profile.cost_per_unit,
        );

        // Auditing
        self.set_state(shot_id, LoopState::Auditing);
        let (audit, responded) = match self.auditor.assess(&result, brief).await {
            Ok(outcome) => (outcome.report, outcome.responded),
            Err(e) => {
                tracing::error!(shot = shot_id, iteration = pass.iteration, "Audit failed: {}", e);
                let record = error_record(
                    pass,
                    compiled.text,
                    Some(result),
                    &e,
                    StopReason::AuditFailed,
                    budget.spent(),
                );
                self.append(shot_id, history, record);
                return Step::Stop(StopReason::AuditFailed);
            }
        };
        // Judges that never answered cost nothing.
        let audit_cost = self.config.audit_call_usd * responded as f64;
        let cost_so_far = budget.charge(
            "audit",
            &format!("{} judge(s)", responded),
            CostAction::Audit,
            audit_cost,
        );

        // Deciding
        self.set_state(shot_id, LoopState::Deciding);
        let previous_score = history.last().filter(|r| r.is_success()).and_then(|r| r.score());
        let decision = self.decide(pass, brief, &audit, previous_score);

        tracing::info!(
            shot = shot_id,
            iteration = pass.iteration,
            provider = %pass.provider,
            score = audit.overall_score,
            recommendation = %audit.recommendation,
            cost = cost_so_far,
            ?decision,
            "Iteration audited"
        );

        let record = IterationRecord {
            iteration: pass.iteration,
            provider: pass.provider,
            compile_mode: pass.mode,
            prompt: compiled.text,
            result: Some(result),
            audit: Some(audit),
            cost_so_far,
            decision: Some(decision),
            error: None,
            created_at: chrono::Utc::now(),
        };
        self.append(shot_id, history, record);

        match decision {
            Decision::Stop { reason } => Step::Stop(reason),
            Decision::Refine => {
                self.set_state(shot_id, LoopState::Refining);
                Step::Next {
                    provider: pass.provider,
                    mode: CompileMode::Refine,
                }
            }
            Decision::Switch { to } => {
                self.set_state(shot_id, LoopState::Switching);
                Step::Next {
                    provider: to,
                    mode: CompileMode::Fresh,
                }
            }
            Decision::Regenerate { on } => {
                self.set_state(shot_id, LoopState::Regenerating);
                Step::Next {
                    provider: on,
                    mode: CompileMode::Fresh,
                }
            }
        }
    }

    async fn compile(
        &self,
        pass: &Pass<'_>,
        profile: &ProviderProfile,
        brief: &BriefContext,
        history: &IterationHistory,
    ) -> Result<CompiledPrompt, ShotsmithError> {
        let anchor = history
            .last()
            .filter(|_| pass.mode == CompileMode::Refine)
            .and_then(|r| r.audit.as_ref().map(|a| (r.prompt.as_str(), a)));
        match anchor {
            Some((previous, audit)) => self.compiler.refine(brief, profile, previous, audit).await,
            None => self.compiler.compile(brief, profile).await,
        }
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult, ShotsmithError> {
        let adapter = self.registry.adapter_for(request)?;
        adapter.submit(request, cancel).await
    }

    /// Apply the stop policy, then turn the audit's verdict into a concrete
    /// next step.
    fn decide(
        &self,
        pass: &Pass<'_>,
        brief: &BriefContext,
        audit: &AuditReport,
        previous_score: Option<f32>,
    ) -> Decision {
        let verdict = match self.policy.decide(pass.iteration, audit, previous_score) {
            PolicyOutcome::Stop(reason) => return Decision::Stop { reason },
            PolicyOutcome::Continue(v) => v,
        };

        let traits = brief.traits();
        let options = RouteOptions::new(self.registry.available())
            .with_prior(pass.provider, audit.overall_score);
        let recommendation = self.router.recommend(&traits, &options).ok();

        match verdict {
            Verdict::LockIn => Decision::Stop {
                reason: StopReason::LockedIn,
            },
            Verdict::Refine => Decision::Refine,
            Verdict::Switch => match recommendation
                .as_ref()
                .and_then(|r| r.first_other_than(pass.provider))
            {
                Some(candidate) => Decision::Switch {
                    to: candidate.provider,
                },
                None => {
                    tracing::info!(
                        provider = %pass.provider,
                        "No other provider to switch to, regenerating"
                    );
                    Decision::Regenerate { on: pass.provider }
                }
            },
            Verdict::Regenerate => Decision::Regenerate {
                on: recommendation
                    .map(|r| r.primary.provider)
                    .unwrap_or(pass.provider),
            },
        }
    }
}

enum Step {
    Stop(StopReason),
    Next {
        provider: ProviderId,
        mode: CompileMode,
    },
}

/// Terminal record for a pass that could not complete.
fn error_record(
    pass: &Pass<'_>,
    prompt: String,
    result: Option<GenerationResult>,
    error: &ShotsmithError,
    reason: StopReason,
    cost_so_far: f64,
) -> IterationRecord {
    IterationRecord {
        iteration: pass.iteration,
        provider: pass.provider,
        compile_mode: pass.mode,
        prompt,
        result,
        audit: None,
        cost_so_far,
        decision: Some(Decision::Stop { reason }),
        error: Some(error.to_string()),
        created_at: chrono::Utc::now(),
    }
}
