// src/llm/mod.rs — Text/vision model layer used by the prompt compiler and judges

pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::infra::config::Config;
use crate::infra::errors::ShotsmithError;

/// Chat-completion backend. Judges attach images to user messages.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn id(&self) -> &str;

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ShotsmithError>;
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Ask the backend for a JSON object response when it supports it.
    pub json_mode: bool,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Inline images as `data:` URIs.
    pub images: Vec<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn user_with_image(content: impl Into<String>, mime: &str, bytes: &[u8]) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images: vec![crate::util::data_uri(mime, bytes)],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Reference to a specific model on a specific backend.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
}

impl ModelRef {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// Parse "provider/model" format
    pub fn parse(s: &str) -> Option<Self> {
        let (provider, model) = s.split_once('/')?;
        if provider.is_empty() || model.is_empty() {
            return None;
        }
        Some(Self {
            provider: provider.to_string(),
            model: model.to_string(),
        })
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Build a chat backend for a `provider/model` reference.
pub fn resolve_chat_model(
    model_ref: &ModelRef,
    config: &Config,
    openai_key: Option<&str>,
) -> Result<Arc<dyn ChatModel>, ShotsmithError> {
    match model_ref.provider.as_str() {
        "openai" => {
            let key = openai_key.ok_or_else(|| {
                ShotsmithError::Config(format!("{} needs OPENAI_API_KEY", model_ref))
            })?;
            Ok(Arc::new(openai::OpenAIChat::with_base_url(
                key.to_string(),
                config.endpoints.chat_base_url.clone(),
            )))
        }
        other => Err(ShotsmithError::Config(format!(
            "unsupported chat provider '{}' in '{}'",
            other, model_ref
        ))),
    }
}
