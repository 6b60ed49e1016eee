// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub iteration: IterationConfig,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub pricing: PricingConfig,

    #[serde(default)]
    pub retry: RetryConfigToml,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default)]
    pub endpoints: EndpointsConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub knowledge: KnowledgeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IterationConfig {
    pub max_iterations: u8,
    /// Overall score (0-100) at or above which a render is accepted as final.
    pub lock_in_threshold: f32,
    pub refine_threshold: f32,
    pub switch_threshold: f32,
    /// Stop when a score falls more than this many points below the previous one.
    pub regression_margin: f32,
    /// Scores below this mark the prior provider as failing for routing.
    pub acceptance_threshold: f32,
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            lock_in_threshold: 90.0,
            refine_threshold: 75.0,
            switch_threshold: 60.0,
            regression_margin: 10.0,
            acceptance_threshold: 75.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub ceiling_usd: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self { ceiling_usd: 2.0 }
    }
}

/// Flat per-call prices for the text-model steps. Image prices come from the
/// provider catalog's `cost_per_unit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub text_call_usd: f64,
    pub audit_call_usd: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            text_call_usd: 0.01,
            audit_call_usd: 0.02,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfigToml {
    pub backoff_ms: Vec<u64>,
}

impl Default for RetryConfigToml {
    fn default() -> Self {
        Self {
            backoff_ms: vec![1_000, 3_000, 8_000],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub poll_interval_ms: u64,
    pub deadline_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            deadline_secs: 180,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Model used by the LLM prompt compiler ("provider/model"). `None` selects
    /// the deterministic template compiler.
    pub compiler: Option<String>,
    /// One or more judges; more than one enables consensus scoring.
    pub judges: Vec<String>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            compiler: Some("openai/gpt-4.1-mini".into()),
            judges: vec!["openai/gpt-4.1".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub openai_base_url: String,
    pub queue_base_url: String,
    pub chat_base_url: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            openai_base_url: "https://api.openai.com/v1".into(),
            queue_base_url: "https://queue.fal.run".into(),
            chat_base_url: "https://api.openai.com/v1".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Catalog TOML replacing the built-in provider catalog.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Directory with core.md, providers/<id>.md and packs/<pack>.md.
    pub dir: Option<PathBuf>,
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject threshold orderings that would make recommendation bands overlap.
    pub fn validate(&self) -> anyhow::Result<()> {
        let it = &self.iteration;
        if !(it.switch_threshold <= it.refine_threshold
            && it.refine_threshold <= it.lock_in_threshold
            && it.lock_in_threshold <= 100.0)
        {
            anyhow::bail!(
                "iteration thresholds must satisfy switch <= refine <= lock_in <= 100 (got {} / {} / {})",
                it.switch_threshold,
                it.refine_threshold,
                it.lock_in_threshold
            );
        }
        if it.max_iterations == 0 {
            anyhow::bail!("iteration.max_iterations must be at least 1");
        }
        if self.budget.ceiling_usd < 0.0 {
            anyhow::bail!("budget.ceiling_usd must not be negative");
        }
        if self.models.judges.is_empty() {
            anyhow::bail!("models.judges must list at least one judge model");
        }
        Ok(())
    }
}
