// src/cli/mod.rs — CLI definition (clap derive) and shared wiring

pub mod audit;
pub mod progress;
pub mod providers;
pub mod route;
pub mod run;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::compiler::knowledge::KnowledgeBase;
use crate::compiler::{self, PromptCompiler};
use crate::evaluator::AuditEngine;
use crate::infra::config::Config;
use crate::provider::registry::{ProviderKeys, ProviderRegistry};
use crate::provider::router::ModelRouter;
use crate::provider::{ProviderCatalog, ProviderId};

#[derive(Parser)]
#[command(
    name = "shotsmith",
    about = "Budget-bounded image generation: compile, generate, audit, refine",
    version
)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level when RUST_LOG / SHOTSMITH_LOG are unset
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the iteration loop for one or more brief files, concurrently
    Run {
        /// Brief TOML files
        #[arg(required = true)]
        briefs: Vec<PathBuf>,

        /// Start on this provider instead of the router's choice
        #[arg(short, long)]
        provider: Option<ProviderId>,

        /// Spend ceiling per shot, in USD
        #[arg(short, long)]
        budget: Option<f64>,

        /// Maximum passes per shot
        #[arg(short = 'n', long)]
        max_iterations: Option<u8>,

        /// Directory for the best image of each shot
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Print the full run outcome as JSON on stdout
        #[arg(long)]
        json: bool,

        /// Suppress progress output
        #[arg(short, long)]
        quiet: bool,

        /// Show every state change
        #[arg(short, long)]
        verbose: bool,
    },
    /// Show the router's ranking for a brief
    Route {
        brief: PathBuf,

        /// Rank every catalog image provider, not just those with credentials
        #[arg(long)]
        all: bool,
    },
    /// Audit an existing image against a brief
    Audit { image: PathBuf, brief: PathBuf },
    /// List catalog providers and whether they can be used
    Providers,
}

/// Everything a command needs, built once from config and environment.
pub struct Services {
    pub config: Config,
    pub catalog: Arc<ProviderCatalog>,
    pub keys: ProviderKeys,
    pub registry: Arc<ProviderRegistry>,
    pub router: Arc<ModelRouter>,
    pub knowledge: Arc<KnowledgeBase>,
}

impl Services {
    pub fn build(config: Config) -> anyhow::Result<Self> {
        let catalog = Arc::new(match config.catalog.path.as_deref() {
            Some(path) => ProviderCatalog::load_from(path)?,
            None => ProviderCatalog::builtin()?,
        });
        let keys = ProviderKeys::from_env();
        let registry = Arc::new(ProviderRegistry::from_config(&config, &catalog, &keys));
        let router = Arc::new(ModelRouter::new(
            catalog.clone(),
            config.iteration.acceptance_threshold,
        ));
        let knowledge = Arc::new(KnowledgeBase::load(config.knowledge.dir.as_deref()));
        tracing::debug!(source = ?knowledge.source, "Knowledge base ready");
        Ok(Self {
            config,
            catalog,
            keys,
            registry,
            router,
            knowledge,
        })
    }

    pub fn auditor(&self) -> anyhow::Result<Arc<AuditEngine>> {
        Ok(Arc::new(AuditEngine::from_config(
            &self.config,
            self.keys.openai.as_deref(),
        )?))
    }

    pub fn compiler(&self) -> anyhow::Result<Arc<dyn PromptCompiler>> {
        Ok(compiler::from_config(
            &self.config,
            self.knowledge.clone(),
            self.keys.openai.as_deref(),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "shotsmith",
            "run",
            "a.toml",
            "b.toml",
            "--provider",
            "flux-pro",
            "--budget",
            "1.5",
            "-n",
            "3",
            "--out",
            "renders",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                briefs,
                provider,
                budget,
                max_iterations,
                out,
                ..
            } => {
                assert_eq!(briefs.len(), 2);
                assert_eq!(provider, Some(ProviderId::FluxPro));
                assert_eq!(budget, Some(1.5));
                assert_eq!(max_iterations, Some(3));
                assert_eq!(out, Some(PathBuf::from("renders")));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_provider() {
        assert!(Cli::try_parse_from(["shotsmith", "run", "a.toml", "-p", "midjourney"]).is_err());
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["shotsmith", "providers", "--config", "c.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
        assert!(matches!(cli.command, Commands::Providers));
    }

    #[test]
    fn test_services_build_with_defaults() {
        let services = Services::build(Config::default()).unwrap();
        assert_eq!(services.catalog.all().len(), 8);
    }
}
