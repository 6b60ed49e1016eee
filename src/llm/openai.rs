// src/llm/openai.rs — OpenAI Chat Completions backend (text + vision)

use async_trait::async_trait;
use std::time::Duration;

use super::{ChatModel, ChatRequest, ChatResponse, Role, TokenUsage};
use crate::infra::errors::ShotsmithError;

pub struct OpenAIChat {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl OpenAIChat {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, "https://api.openai.com/v1".into())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(90),
        }
    }
}

fn build_body(request: &ChatRequest) -> serde_json::Value {
    let mut msgs = Vec::new();
    if let Some(system) = &request.system {
        msgs.push(serde_json::json!({ "role": "system", "content": system }));
    }
    for m in &request.messages {
        let role = match m.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let content = if m.images.is_empty() {
            serde_json::json!(m.content)
        } else {
            let mut parts = vec![serde_json::json!({ "type": "text", "text": m.content })];
            for url in &m.images {
                parts.push(serde_json::json!({
                    "type": "image_url",
                    "image_url": { "url": url, "detail": "high" },
                }));
            }
            serde_json::Value::Array(parts)
        };
        msgs.push(serde_json::json!({ "role": role, "content": content }));
    }

    let mut body = serde_json::json!({
        "model": request.model,
        "messages": msgs,
    });
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = serde_json::json!(max_tokens);
    }
    if let Some(temp) = request.temperature {
        body["temperature"] = serde_json::json!(temp);
    }
    if request.json_mode {
        body["response_format"] = serde_json::json!({ "type": "json_object" });
    }
    body
}

#[async_trait]
impl ChatModel for OpenAIChat {
    fn id(&self) -> &str {
        "openai"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ShotsmithError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&build_body(&request))
            .send()
            .await
            .map_err(|e| ShotsmithError::from_transport("openai", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ShotsmithError::from_status("openai", status, &error_body));
        }

        let resp: serde_json::Value =
            response.json().await.map_err(|e| ShotsmithError::Permanent {
                provider: "openai".into(),
                message: format!("Failed to parse response: {}", e),
            })?;

        let content = resp["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        let usage = TokenUsage {
            input_tokens: resp["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: resp["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        };

        Ok(ChatResponse { content, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;
    use crate::provider::testing::serve;
    use axum::routing::post;
    use axum::{Json, Router};

    #[test]
    fn test_body_plain_text() {
        let req = ChatRequest {
            model: "gpt-4.1-mini".into(),
            system: Some("be terse".into()),
            messages: vec![Message::user("hello")],
            temperature: Some(0.2),
            ..Default::default()
        };
        let body = build_body(&req);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_body_with_image_and_json_mode() {
        let req = ChatRequest {
            model: "gpt-4.1".into(),
            messages: vec![Message::user_with_image("score it", "image/png", b"abc")],
            json_mode: true,
            ..Default::default()
        };
        let body = build_body(&req);
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["image_url"]["url"], "data:image/png;base64,YWJj");
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[tokio::test]
    async fn test_chat_roundtrip() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async {
                Json(serde_json::json!({
                    "choices": [{ "message": { "content": "a lighthouse, storm, dusk" } }],
                    "usage": { "prompt_tokens": 120, "completion_tokens": 30 }
                }))
            }),
        );
        let base = serve(router).await;
        let chat = OpenAIChat::with_base_url("sk".into(), base);
        let resp = chat
            .chat(ChatRequest {
                model: "gpt-4.1-mini".into(),
                messages: vec![Message::user("write a prompt")],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(resp.content, "a lighthouse, storm, dusk");
        assert_eq!(resp.usage.total(), 150);
    }
}
