// src/infra/errors.rs — Error types for shotsmith

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShotsmithError {
    // Provider errors (retried by the adapter wrapper)
    #[error("Provider '{provider}' temporarily unavailable: {message}")]
    Transient { provider: String, message: String },

    #[error("Rate limited by '{provider}', retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    // Provider errors (surfaced immediately)
    #[error("Provider '{provider}' error: {message}")]
    Permanent { provider: String, message: String },

    #[error("Provider '{provider}' job {job_id} did not finish within {waited_secs}s")]
    Timeout {
        provider: String,
        job_id: String,
        waited_secs: u64,
    },

    #[error("Operation on '{provider}' was cancelled")]
    Cancelled { provider: String },

    // Loop control (not a fault)
    #[error("Budget exhausted: ${spent:.2} spent, ${needed:.2} needed, ceiling ${ceiling:.2}")]
    BudgetExhausted {
        spent: f64,
        needed: f64,
        ceiling: f64,
    },

    #[error("Judge output could not be parsed: {0}")]
    AuditParse(String),

    // Catalog / config
    #[error("Unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("Provider catalog invalid: {0}")]
    Catalog(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ShotsmithError {
    /// Only rate limits and temporary unavailability are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ShotsmithError::Transient { .. } | ShotsmithError::RateLimited { .. }
        )
    }

    /// Build the error for a non-success HTTP status, classifying it as
    /// transient (429/502/503/504) or permanent (everything else). The
    /// rate-limit hint is left at zero; adapters holding the response fill it
    /// in from `Retry-After`.
    pub fn from_status(provider: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let provider = provider.to_string();
        match status.as_u16() {
            429 => ShotsmithError::RateLimited {
                provider,
                retry_after_ms: 0,
            },
            502..=504 => ShotsmithError::Transient {
                provider,
                message: format!("HTTP {}", status),
            },
            _ => ShotsmithError::Permanent {
                provider,
                message: format!("HTTP {}: {}", status, crate::util::truncate_str(body, 300)),
            },
        }
    }

    /// Transport failure on a request that starts billable work. Only a
    /// connect failure proves nothing reached the backend; anything later
    /// (a socket timeout mid-response) may have started a job, so it is final.
    pub fn from_submit_transport(provider: &str, err: reqwest::Error) -> Self {
        if err.is_connect() {
            ShotsmithError::Transient {
                provider: provider.to_string(),
                message: err.to_string(),
            }
        } else {
            ShotsmithError::Permanent {
                provider: provider.to_string(),
                message: format!("generation request outcome unknown: {}", err),
            }
        }
    }

    /// Classify a transport-level reqwest failure.
    pub fn from_transport(provider: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            ShotsmithError::Transient {
                provider: provider.to_string(),
                message: err.to_string(),
            }
        } else {
            ShotsmithError::Permanent {
                provider: provider.to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_rate_limit_is_transient() {
        let err = ShotsmithError::from_status("fal", StatusCode::TOO_MANY_REQUESTS, "");
        assert!(err.is_transient());
        assert!(matches!(err, ShotsmithError::RateLimited { .. }));
    }

    #[test]
    fn test_service_unavailable_is_transient() {
        let err = ShotsmithError::from_status("fal", StatusCode::SERVICE_UNAVAILABLE, "down");
        assert!(err.is_transient());
    }

    #[test]
    fn test_bad_request_is_permanent() {
        let err = ShotsmithError::from_status("openai", StatusCode::BAD_REQUEST, "bad size");
        assert!(!err.is_transient());
        assert!(err.to_string().contains("bad size"));
    }

    #[test]
    fn test_auth_failure_is_permanent() {
        let err = ShotsmithError::from_status("openai", StatusCode::UNAUTHORIZED, "");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_internal_server_error_is_permanent() {
        let err = ShotsmithError::from_status("openai", StatusCode::INTERNAL_SERVER_ERROR, "");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_timeout_is_not_transient() {
        let err = ShotsmithError::Timeout {
            provider: "fal".into(),
            job_id: "abc".into(),
            waited_secs: 180,
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("180s"));
    }

    #[test]
    fn test_budget_message() {
        let err = ShotsmithError::BudgetExhausted {
            spent: 1.5,
            needed: 0.04,
            ceiling: 1.5,
        };
        assert_eq!(
            err.to_string(),
            "Budget exhausted: $1.50 spent, $0.04 needed, ceiling $1.50"
        );
    }

    #[tokio::test]
    async fn test_submit_connect_failure_is_transient() {
        // Nothing listens on the discard port, so the connection is refused.
        let err = reqwest::Client::new()
            .post("http://127.0.0.1:9/jobs")
            .send()
            .await
            .unwrap_err();
        let classified = ShotsmithError::from_submit_transport("gpt-image-1", err);
        assert!(classified.is_transient());
    }
}
