// src/provider/retry.rs — Fixed-schedule retry for single adapter HTTP calls
//
// Adapters wrap each request (generation submit, queue result fetch, image
// download) rather than the whole generation, so a failure after a job was
// accepted never starts a second, separately billed job.
// Retries: rate limits (429), 502/503/504 and connect errors.
// Does NOT retry: bad request, auth, content policy, queue deadline, cancellation.

use std::future::Future;
use std::time::Duration;

use super::ProviderId;
use crate::core::cancel::CancellationToken;
use crate::infra::config::RetryConfigToml;
use crate::infra::errors::ShotsmithError;

/// Delays between attempts. One retry per entry, so the schedule length is
/// the retry bound.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub backoff: Vec<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RetryConfigToml::default())
    }
}

impl From<&RetryConfigToml> for RetryConfig {
    fn from(cfg: &RetryConfigToml) -> Self {
        Self {
            backoff: cfg.backoff_ms.iter().map(|ms| Duration::from_millis(*ms)).collect(),
        }
    }
}

impl RetryConfig {
    pub fn none() -> Self {
        Self { backoff: Vec::new() }
    }

    /// Delay before retry number `attempt` (0-indexed). A server-supplied
    /// rate-limit hint wins when it is longer than the schedule.
    fn delay_for_attempt(&self, attempt: usize, error: &ShotsmithError) -> Duration {
        let scheduled = self.backoff.get(attempt).copied().unwrap_or_default();
        match rate_limit_delay(error) {
            Some(hint) if hint > scheduled => hint,
            _ => scheduled,
        }
    }

    /// Run one HTTP call, repeating it on transient failures. `call` must be
    /// safe to repeat: it may not start work the backend bills separately
    /// unless a failed attempt provably started none.
    pub async fn run<T, F, Fut>(
        &self,
        provider: ProviderId,
        step: &str,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<T, ShotsmithError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ShotsmithError>>,
    {
        let max_retries = self.backoff.len();
        let mut attempt = 0;

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !should_retry(&e) || attempt >= max_retries || cancel.is_cancelled() {
                        return Err(e);
                    }

                    let delay = self.delay_for_attempt(attempt, &e);
                    tracing::warn!(
                        provider = %provider,
                        step,
                        attempt = attempt + 1,
                        max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after error: {}",
                        e
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn should_retry(error: &ShotsmithError) -> bool {
    error.is_transient()
}

fn rate_limit_delay(error: &ShotsmithError) -> Option<Duration> {
    match error {
        ShotsmithError::RateLimited { retry_after_ms, .. } if *retry_after_ms > 0 => {
            Some(Duration::from_millis(*retry_after_ms))
        }
        _ => None,
    }
}
