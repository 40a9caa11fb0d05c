//! OpenAI-compatible LLM provider.
//!
//! Supports OpenRouter, OpenAI, Groq, Ollama, and any endpoint that follows
//! the OpenAI chat completions API format, including `json_schema` response
//! formats for structured extraction.

use crate::brain::LlmProvider;
use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::types::{
    CompletionRequest, CompletionResponse, Message, ResponseFormat, Role, TokenUsage,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Client for any endpoint speaking the OpenAI chat-completions protocol.
pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    /// `None` for a remote endpoint with no configured key; calls then fail
    /// with `AuthFailed` instead of reaching the network.
    api_key: Option<String>,
    key_env: String,
    provider: String,
    model: String,
    timeout_secs: u64,
}

impl OpenAiCompatibleProvider {
    /// Local endpoints (Ollama, llama.cpp) accept any bearer token. A remote
    /// endpoint without a key still builds; its calls report `AuthFailed`.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let base_url = config.resolved_base_url();
        let is_local = base_url.contains("localhost") || base_url.contains("127.0.0.1");

        let api_key = config.resolve_api_key().or_else(|| {
            if is_local {
                debug!(base_url = %base_url, "Local endpoint without key");
                Some("ollama".to_string())
            } else {
                warn!(
                    provider = %config.provider,
                    env = %config.api_key_env,
                    "No LLM API key configured; completions will fail until it is set"
                );
                None
            }
        });

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("InsightFlow/0.3")
            .build()
            .map_err(|e| LlmError::Connection {
                message: format!("building HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url,
            api_key,
            key_env: config.api_key_env.clone(),
            provider: config.provider.clone(),
            model: config.model.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();
        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "messages": messages,
            "temperature": request.temperature,
            "stream": false,
        });

        if let Some(limit) = request.max_tokens {
            body["max_tokens"] = json!(limit);
        }
        if let Some(ResponseFormat::JsonSchema { name, schema }) = &request.response_format {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": { "name": name, "schema": schema, "strict": true },
            });
        }
        body
    }
}

/// The subset of a chat-completions reply this crate reads.
#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
}

fn parse_completion(raw: &str, fallback_model: &str) -> Result<CompletionResponse, LlmError> {
    let reply: ChatCompletion = serde_json::from_str(raw).map_err(|e| LlmError::ResponseParse {
        message: format!("Invalid JSON: {e}"),
    })?;
    let Some(choice) = reply.choices.into_iter().next() else {
        return Err(LlmError::ResponseParse {
            message: "reply has no choices".to_string(),
        });
    };
    let Some(message) = choice.message else {
        return Err(LlmError::ResponseParse {
            message: "first choice has no message".to_string(),
        });
    };
    let usage = reply.usage.unwrap_or_default();

    Ok(CompletionResponse {
        message: Message::new(Role::Assistant, message.content.unwrap_or_default()),
        usage: TokenUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        },
        model: reply.model.unwrap_or_else(|| fallback_model.to_string()),
        finish_reason: choice.finish_reason,
    })
}

/// Seconds to wait, read from messages like "Rate limit reached ... try again in 7s".
fn retry_after_hint(body: &str) -> Option<u64> {
    let value: Value = serde_json::from_str(body).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?;
    let tail = message.rsplit("in ").next()?;
    tail.trim().trim_end_matches('.').trim_end_matches('s').parse().ok()
}

/// Classify a non-success reply.
fn classify_failure(status: StatusCode, body: &str) -> LlmError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            debug!(body = %body, "Authentication failed");
            LlmError::AuthFailed {
                provider: "OpenAI-compatible endpoint".to_string(),
            }
        }
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited {
            retry_after_secs: retry_after_hint(body).unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        },
        s if s.is_server_error() => LlmError::ApiRequest {
            message: format!("upstream error {s}: {body}"),
        },
        s => LlmError::ApiRequest {
            message: format!("HTTP {s}: {body}"),
        },
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(LlmError::AuthFailed {
                provider: format!("{} (set {})", self.provider, self.key_env),
            });
        };
        let url = format!("{}/chat/completions", self.base_url);
        debug!(
            url = %url,
            model = %self.model,
            structured = request.response_format.is_some(),
            "POST chat completion"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&self.request_body(&request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        timeout_secs: self.timeout_secs,
                    }
                } else {
                    LlmError::Connection {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let raw = response.text().await.map_err(|e| LlmError::Connection {
            message: format!("reading reply body: {e}"),
        })?;
        if !status.is_success() {
            return Err(classify_failure(status, &raw));
        }
        parse_completion(&raw, &self.model)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
