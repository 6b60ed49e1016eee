// src/compiler/mod.rs — Prompt compilation from hierarchical brief context

pub mod context;
pub mod knowledge;
pub mod llm;
pub mod references;
pub mod template;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::core::types::{AuditReport, CompileMode};
use crate::infra::config::Config;
use crate::infra::errors::ShotsmithError;
use crate::llm::{resolve_chat_model, ModelRef};
use crate::provider::ProviderProfile;
use context::BriefContext;
use knowledge::KnowledgeBase;

/// A prompt ready to submit, with the knowledge blocks that shaped it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledPrompt {
    pub text: String,
    pub mode: CompileMode,
    pub knowledge: Vec<String>,
}

/// Turns a brief into a provider-specific prompt.
///
/// `compile` starts from the brief alone. `refine` keeps the previous prompt
/// as its anchor and applies the audit's findings to it.
#[async_trait]
pub trait PromptCompiler: Send + Sync {
    fn name(&self) -> &str;

    /// Whether compiling calls a billed model. Local compilers are free.
    fn makes_paid_calls(&self) -> bool {
        true
    }

    async fn compile(
        &self,
        brief: &BriefContext,
        profile: &ProviderProfile,
    ) -> Result<CompiledPrompt, ShotsmithError>;

    async fn refine(
        &self,
        brief: &BriefContext,
        profile: &ProviderProfile,
        previous_prompt: &str,
        audit: &AuditReport,
    ) -> Result<CompiledPrompt, ShotsmithError>;
}

/// The LLM compiler when `models.compiler` is set, else the template compiler.
pub fn from_config(
    config: &Config,
    knowledge: Arc<KnowledgeBase>,
    openai_key: Option<&str>,
) -> Result<Arc<dyn PromptCompiler>, ShotsmithError> {
    match config.models.compiler.as_deref() {
        Some(raw) => {
            let model_ref = ModelRef::parse(raw).ok_or_else(|| {
                ShotsmithError::Config(format!("compiler '{}' is not in provider/model form", raw))
            })?;
            let chat = resolve_chat_model(&model_ref, config, openai_key)?;
            Ok(Arc::new(llm::LlmCompiler::new(&model_ref, chat, knowledge)))
        }
        None => Ok(Arc::new(template::TemplateCompiler::new(knowledge)?)),
    }
}
