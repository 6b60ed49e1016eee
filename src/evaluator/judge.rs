// src/evaluator/judge.rs — Vision judges

use async_trait::async_trait;
use std::sync::Arc;

use super::parser::{parse_judge_response, JudgeOutput};
use super::rubric::Rubric;
use super::utils::truncate_for_eval;
use crate::compiler::context::BriefContext;
use crate::infra::errors::ShotsmithError;
use crate::llm::{ChatModel, ChatRequest, Message, ModelRef};
use crate::provider::GenerationResult;

/// One scorer of generated images.
///
/// Transport failures come back as provider errors. Output that cannot be
/// parsed comes back as [`ShotsmithError::AuditParse`]; the engine treats the
/// two differently.
#[async_trait]
pub trait Judge: Send + Sync {
    fn name(&self) -> &str;

    async fn assess(
        &self,
        image: &GenerationResult,
        brief: &BriefContext,
        rubric: &Rubric,
    ) -> Result<JudgeOutput, ShotsmithError>;
}

const JUDGE_SYSTEM: &str = "You are a strict cinematography and image-quality reviewer. \
Score the attached image against the brief. Score each rubric dimension from 0 to 10 and \
give an overall score from 0 to 100. Be specific about visible defects and how the prompt \
should change to fix them.";

/// Judge backed by a vision-capable chat model.
pub struct LlmJudge {
    name: String,
    model: String,
    chat: Arc<dyn ChatModel>,
}

impl LlmJudge {
    pub fn new(model_ref: &ModelRef, chat: Arc<dyn ChatModel>) -> Self {
        Self {
            name: model_ref.to_string(),
            model: model_ref.model.clone(),
            chat,
        }
    }

    fn instructions(brief: &BriefContext, rubric: &Rubric) -> String {
        format!(
            "## Brief\n{}\n\n\
             ## Rubric\n{}\n\n\
             Also look for these failure patterns: synthetic_look (plastic, over-processed), \
             flat_lighting (lifeless, no contrast), render_engine_look (CGI, video game), \
             inconsistent_light (shadows disagree on light direction).\n\n\
             Respond with one JSON object:\n\
             {{\"overall_score\": 0-100, \
             \"dimensions\": {{\"<name>\": {{\"score\": 0-10, \"notes\": \"...\"}}}}, \
             \"issues\": [\"...\"], \
             \"prompt_adjustments\": [\"...\"], \
             \"failure_patterns\": [{{\"pattern\": \"flat_lighting\", \"severity\": \"moderate|severe\"}}], \
             \"summary\": \"...\"}}",
            truncate_for_eval(&brief.describe(), 4000),
            rubric.prompt_block()
        )
    }
}

#[async_trait]
impl Judge for LlmJudge {
    fn name(&self) -> &str {
        &self.name
    }

    async fn assess(
        &self,
        image: &GenerationResult,
        brief: &BriefContext,
        rubric: &Rubric,
    ) -> Result<JudgeOutput, ShotsmithError> {
        let response = self
            .chat
            .chat(ChatRequest {
                model: self.model.clone(),
                system: Some(JUDGE_SYSTEM.to_string()),
                messages: vec![Message::user_with_image(
                    Self::instructions(brief, rubric),
                    &image.mime_type,
                    &image.image_bytes,
                )],
                max_tokens: Some(1500),
                temperature: Some(0.1),
                json_mode: true,
            })
            .await?;

        tracing::debug!(
            judge = %self.name,
            tokens = response.usage.total(),
            "Judge responded"
        );
        parse_judge_response(&response.content, &rubric.names())
    }
}
