// src/compiler/llm.rs — Prompt compiler backed by a chat model

use async_trait::async_trait;
use std::sync::Arc;

use super::context::BriefContext;
use super::knowledge::KnowledgeBase;
use super::{CompiledPrompt, PromptCompiler};
use crate::core::types::{AuditReport, CompileMode};
use crate::infra::errors::ShotsmithError;
use crate::llm::{ChatModel, ChatRequest, Message, ModelRef};
use crate::provider::{ProviderProfile, PromptSyntax};

const WRITER_SYSTEM: &str = "You write prompts for image generation models. \
You are given a shot brief and craft notes for the target model. \
Reply with the prompt only: no preamble, no quotes, no markdown.";

/// Scores at or above this are "working"; below the weak mark they need fixing.
const STRONG_MIN: f32 = 8.0;
const WEAK_MAX: f32 = 7.0;

pub struct LlmCompiler {
    name: String,
    model: String,
    chat: Arc<dyn ChatModel>,
    knowledge: Arc<KnowledgeBase>,
}

impl LlmCompiler {
    pub fn new(model_ref: &ModelRef, chat: Arc<dyn ChatModel>, knowledge: Arc<KnowledgeBase>) -> Self {
        Self {
            name: model_ref.to_string(),
            model: model_ref.model.clone(),
            chat,
            knowledge,
        }
    }

    fn system(&self, brief: &BriefContext, profile: &ProviderProfile) -> (String, Vec<String>) {
        let blocks = self.knowledge.select(profile.id, &brief.traits());
        let mut system = WRITER_SYSTEM.to_string();
        for block in &blocks {
            system.push_str(&format!("\n\n## {}\n{}", block.name, block.text));
        }
        (system, blocks.into_iter().map(|b| b.name).collect())
    }

    async fn ask(
        &self,
        system: String,
        user: String,
        temperature: f32,
    ) -> Result<String, ShotsmithError> {
        let response = self
            .chat
            .chat(ChatRequest {
                model: self.model.clone(),
                system: Some(system),
                messages: vec![Message::user(user)],
                max_tokens: Some(600),
                temperature: Some(temperature),
                json_mode: false,
            })
            .await?;

        tracing::debug!(
            compiler = %self.name,
            tokens = response.usage.total(),
            "Prompt written"
        );

        let prompt = clean_reply(&response.content);
        if prompt.is_empty() {
            return Err(ShotsmithError::Permanent {
                provider: self.name.clone(),
                message: "prompt writer returned an empty reply".into(),
            });
        }
        Ok(prompt)
    }
}

fn syntax_instruction(profile: &ProviderProfile) -> String {
    match profile.prompt_syntax {
        PromptSyntax::Natural => format!(
            "Target model: {} ({}). Write flowing natural-language sentences.",
            profile.name, profile.model
        ),
        PromptSyntax::Keywords => format!(
            "Target model: {} ({}). Write a comma-separated keyword list; weight the most \
             important terms as (term:1.3).",
            profile.name, profile.model
        ),
    }
}

fn format_dims(dims: &[(&str, f32)], audit: &AuditReport) -> String {
    dims.iter()
        .map(|(name, score)| {
            let notes = audit
                .dimension(name)
                .map(|d| d.notes.trim())
                .filter(|n| !n.is_empty())
                .map(|n| format!(" ({})", n))
                .unwrap_or_default();
            format!("- {} {:.0}/10{}", name, score, notes)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strip fences, wrapping quotes and a leading "Prompt:" label.
fn clean_reply(reply: &str) -> String {
    let mut text = reply.trim();
    if let Some(inner) = text.strip_prefix("```") {
        let inner = inner.split_once('\n').map_or("", |(_, rest)| rest);
        text = inner.trim_end().trim_end_matches("```").trim();
    }
    for label in ["Prompt:", "prompt:", "PROMPT:"] {
        if let Some(rest) = text.strip_prefix(label) {
            text = rest.trim();
        }
    }
    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        text = &text[1..text.len() - 1];
    }
    text.trim().to_string()
}

#[async_trait]
impl PromptCompiler for LlmCompiler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn compile(
        &self,
        brief: &BriefContext,
        profile: &ProviderProfile,
    ) -> Result<CompiledPrompt, ShotsmithError> {
        let (system, used) = self.system(brief, profile);
        let user = format!(
            "{}\n\n## Brief\n{}\n\nWrite the prompt for this shot.",
            syntax_instruction(profile),
            brief.describe()
        );
        let text = self.ask(system, user, 0.7).await?;
        Ok(CompiledPrompt {
            text,
            mode: CompileMode::Fresh,
            knowledge: used,
        })
    }

    async fn refine(
        &self,
        brief: &BriefContext,
        profile: &ProviderProfile,
        previous_prompt: &str,
        audit: &AuditReport,
    ) -> Result<CompiledPrompt, ShotsmithError> {
        let (system, used) = self.system(brief, profile);

        let strong = audit.strong_dimensions(STRONG_MIN);
        let weak = audit.weak_dimensions(WEAK_MAX);
        let mut user = format!(
            "{}\n\n## Original brief\n{}\n\n## Previous prompt\n{}\n\n\
             The image from the previous prompt scored {:.0}/100.",
            syntax_instruction(profile),
            brief.describe(),
            previous_prompt.trim(),
            audit.overall_score
        );
        if !strong.is_empty() {
            user.push_str(&format!(
                "\n\n## Working, keep as is\n{}",
                format_dims(&strong, audit)
            ));
        }
        if !weak.is_empty() {
            user.push_str(&format!("\n\n## Weak, fix these\n{}", format_dims(&weak, audit)));
        }
        if !audit.prompt_adjustments.is_empty() {
            let fixes = audit
                .prompt_adjustments
                .iter()
                .map(|f| format!("- {}", f))
                .collect::<Vec<_>>()
                .join("\n");
            user.push_str(&format!("\n\n## Fixes\n{}", fixes));
        }
        user.push_str(
            "\n\nRevise the previous prompt. Change only what the fixes require and stay \
             faithful to the original brief.",
        );

        let text = self.ask(system, user, 0.4).await?;
        Ok(CompiledPrompt {
            text,
            mode: CompileMode::Refine,
            knowledge: used,
        })
    }
}
