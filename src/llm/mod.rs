use std::{env, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use reqwest::Client;
use serde::Deserialize;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// The completion call is the only unbounded external dependency, so the
/// whole request is capped at the client level.
const REQUEST_TIMEOUT_SECS: u64 = 45;

/// Defines the shape of a chat-style interaction with the completion service.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

impl LlmRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
        }
    }
}

/// Individual chat message, compatible with OpenAI compliant providers.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub text: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// Supported chat roles.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MessageRole {
    System,
    User,
}

impl MessageRole {
    fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
        }
    }
}

/// Captures basic token usage metrics associated with a call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub response_tokens: usize,
    pub total_tokens: usize,
}

/// Full response surface returned to callers. The text is an opaque string;
/// callers own all validation of its content.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub token_usage: TokenUsage,
    pub model: String,
    pub raw: serde_json::Value,
}

/// Client for an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl LlmClient {
    /// Build a client using environment variables. `COMPLETION_API_KEY` is
    /// required; `COMPLETION_BASE_URL` overrides the OpenAI default.
    pub fn from_env() -> Result<Self> {
        let api_key =
            env::var("COMPLETION_API_KEY").context("COMPLETION_API_KEY env var is missing")?;
        let base_url = env::var("COMPLETION_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
        })
    }

    pub async fn execute(&self, request: LlmRequest) -> Result<LlmResponse> {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|msg| {
                serde_json::json!({
                    "role": msg.role.as_str(),
                    "content": msg.text,
                })
            })
            .collect();

        let payload = serde_json::json!({
            "model": request.model,
            "messages": messages,
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .context("completion request failed")?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .context("failed to read response body")?;
        let body: serde_json::Value = serde_json::from_str(&response_text).with_context(|| {
            let preview = if response_text.len() > 500 {
                format!("{}...", &response_text[..500])
            } else {
                response_text.clone()
            };
            format!("failed to parse completion response as JSON. Response body: {preview}")
        })?;
        if !status.is_success() {
            bail!("completion call failed with status {}: {}", status, body);
        }

        let (text, usage) = extract_text_and_usage(&body)
            .ok_or_else(|| anyhow!("unexpected completion response payload: {}", body))?;

        let prompt_tokens = approximate_token_count(
            &request
                .messages
                .iter()
                .map(|m| m.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        );
        let mut token_usage = usage.unwrap_or_else(|| TokenUsage {
            prompt_tokens,
            response_tokens: approximate_token_count(&text),
            total_tokens: 0,
        });
        if token_usage.prompt_tokens == 0 {
            token_usage.prompt_tokens = prompt_tokens;
        }
        if token_usage.response_tokens == 0 {
            token_usage.response_tokens = approximate_token_count(&text);
        }
        token_usage.total_tokens = token_usage.prompt_tokens + token_usage.response_tokens;

        Ok(LlmResponse {
            text,
            token_usage,
            model: request.model,
            raw: body,
        })
    }
}

/// Extract assistant text and optional usage metrics from a chat completions payload.
fn extract_text_and_usage(value: &serde_json::Value) -> Option<(String, Option<TokenUsage>)> {
    let chat = serde_json::from_value::<ChatCompletionPayload>(value.clone()).ok()?;

    let text = chat
        .choices
        .into_iter()
        .find_map(|choice| choice.message.content)?;

    let usage = chat.usage.map(|usage| TokenUsage {
        prompt_tokens: usage.prompt_tokens.unwrap_or_default(),
        response_tokens: usage.completion_tokens.unwrap_or_default(),
        total_tokens: usage.total_tokens.unwrap_or_default(),
    });

    Some((text, usage))
}

fn approximate_token_count(input: &str) -> usize {
    if input.trim().is_empty() {
        return 0;
    }
    input
        .split_whitespace()
        .filter(|segment| !segment.is_empty())
        .count()
}

#[derive(Debug, Deserialize)]
struct ChatCompletionPayload {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: Option<usize>,
    #[serde(default)]
    completion_tokens: Option<usize>,
    #[serde(default)]
    total_tokens: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_text_from_chat_completion() {
        let body = serde_json::json!({
            "choices": [
                { "message": { "role": "assistant", "content": "hello" } }
            ],
            "usage": { "prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15 }
        });

        let (text, usage) = extract_text_and_usage(&body).unwrap();
        assert_eq!(text, "hello");
        let usage = usage.unwrap();
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.response_tokens, 3);
    }

    #[test]
    fn rejects_payload_without_choices() {
        let body = serde_json::json!({ "error": { "message": "rate limited" } });
        assert!(extract_text_and_usage(&body).is_none());
    }

    #[test]
    fn approximate_count_ignores_blank_input() {
        assert_eq!(approximate_token_count("   "), 0);
        assert_eq!(approximate_token_count("one two  three"), 3);
    }
}
