// src/core/safety.rs — Stop conditions for the iteration loop

use super::types::{AuditReport, IterationEngineConfig, StopReason, Verdict};

/// What the loop should do after an audited pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyOutcome {
    Stop(StopReason),
    /// Refine, Switch or Regenerate.
    Continue(Verdict),
}

/// Enforces lock-in, regression and iteration limits, in that order.
#[derive(Debug, Clone)]
pub struct StopPolicy {
    pub max_iterations: u8,
    pub regression_margin: f32,
}

impl StopPolicy {
    pub fn from_config(config: &IterationEngineConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            regression_margin: config.regression_margin,
        }
    }

    pub fn decide(
        &self,
        iteration: u8,
        current: &AuditReport,
        previous_score: Option<f32>,
    ) -> PolicyOutcome {
        if current.recommendation == Verdict::LockIn {
            return PolicyOutcome::Stop(StopReason::LockedIn);
        }

        if let Some(prev) = previous_score {
            if prev - current.overall_score > self.regression_margin {
                tracing::info!(
                    previous = prev,
                    current = current.overall_score,
                    margin = self.regression_margin,
                    "Score regressed, stopping"
                );
                return PolicyOutcome::Stop(StopReason::ScoreRegression);
            }
        }

        if iteration >= self.max_iterations {
            return PolicyOutcome::Stop(StopReason::MaxIterationsReached);
        }

        PolicyOutcome::Continue(current.recommendation)
    }
}
