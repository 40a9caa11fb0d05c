//! Brain module: the LLM interface used by every research stage.
//!
//! Wraps an `LlmProvider` with retry and generation defaults, and offers two
//! call shapes: free-text generation and schema-constrained extraction. The
//! extraction path decodes the reply strictly with `serde`; a reply that does
//! not match the expected shape is an error, never something to evaluate.

use crate::config::{LlmConfig, RetryConfig};
use crate::error::LlmError;
use crate::providers::retry_transient;
use crate::types::{
    CompletionRequest, CompletionResponse, Message, ResponseFormat, Role, TokenUsage,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// A provider plus the generation settings the stages share.
#[derive(Clone)]
pub struct Brain {
    provider: Arc<dyn LlmProvider>,
    retry: RetryConfig,
    temperature: f32,
    max_tokens: usize,
}

impl std::fmt::Debug for Brain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Brain")
            .field("model", &self.provider.model_name())
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl Brain {
    pub fn new(provider: Arc<dyn LlmProvider>, config: &LlmConfig) -> Self {
        Self {
            provider,
            retry: config.retry.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// Override the retry policy.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    async fn send(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let provider = self.provider.clone();
        retry_transient(&self.retry, || {
            let provider = provider.clone();
            let request = request.clone();
            async move { provider.complete(request).await }
        })
        .await
    }

    fn build_request(&self, system: Option<&str>, prompt: &str) -> CompletionRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(prompt));
        CompletionRequest {
            messages,
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }

    /// Free-text generation.
    pub async fn generate(&self, system: Option<&str>, prompt: &str) -> Result<String, LlmError> {
        let response = self.send(self.build_request(system, prompt)).await?;
        debug!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Generation complete"
        );
        Ok(response.message.content)
    }

    /// Schema-constrained extraction decoded into `T`.
    ///
    /// Fails with `LlmError::ResponseParse` when the reply is not a JSON
    /// document of the expected shape.
    pub async fn extract<T: DeserializeOwned>(
        &self,
        name: &str,
        schema: serde_json::Value,
        prompt: &str,
    ) -> Result<T, LlmError> {
        let mut request = self.build_request(
            Some("You are a precise research assistant. Reply with a single JSON object and nothing else."),
            prompt,
        );
        request.response_format = Some(ResponseFormat::JsonSchema {
            name: name.to_string(),
            schema,
        });
        let response = self.send(request).await?;
        decode_structured(name, response.text())
    }
}

/// Strictly decode a structured reply, tolerating only surrounding code fences.
pub fn decode_structured<T: DeserializeOwned>(name: &str, raw: &str) -> Result<T, LlmError> {
    let body = strip_code_fences(raw);
    serde_json::from_str(&body).map_err(|e| {
        warn!(schema = name, error = %e, "Structured output failed validation");
        LlmError::ResponseParse {
            message: format!("{name}: {e}"),
        }
    })
}

const LANGUAGE_TAGS: &[&str] = &["markdown", "md", "json", "text", "plaintext", "txt"];

/// Strip markdown code fences the model may have wrapped its reply in.
///
/// A leading fence line is dropped together with its language tag; if the
/// line after a bare fence is only a language tag it is dropped too. A
/// trailing fence is dropped only when it closes a leading one. Nested
/// wrappers are peeled until the text no longer opens with a fence.
pub fn strip_code_fences(text: &str) -> String {
    let mut body = text.trim();

    while let Some(rest) = body.strip_prefix("```") {
        let mut inner = match rest.find('\n') {
            Some(pos) => &rest[pos + 1..],
            None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
        };
        let trimmed = inner.trim_start();
        if let Some(pos) = trimmed.find('\n') {
            let first = trimmed[..pos].trim();
            if LANGUAGE_TAGS.contains(&first.to_ascii_lowercase().as_str()) {
                inner = &trimmed[pos + 1..];
            }
        }
        let inner = inner.trim_end();
        body = inner.strip_suffix("```").unwrap_or(inner).trim();
    }

    body.to_string()
}

enum MockReply {
    Text(String),
    Error(LlmError),
}

/// A mock LLM provider for testing. Replies are served in queue order.
pub struct MockLlmProvider {
    model: String,
    responses: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a text reply for the next `complete` call.
    pub fn queue_text(&self, text: impl Into<String>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(MockReply::Text(text.into()));
    }

    /// Queue a JSON reply for the next `complete` call.
    pub fn queue_json(&self, value: serde_json::Value) {
        self.queue_text(value.to_string());
    }

    /// Queue an error for the next `complete` call.
    pub fn queue_error(&self, error: LlmError) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(MockReply::Error(error));
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests received so far.
    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn text_response(text: String) -> CompletionResponse {
        CompletionResponse {
            message: Message::new(Role::Assistant, text),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        let next = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match next {
            Some(MockReply::Text(text)) => Ok(Self::text_response(text)),
            Some(MockReply::Error(e)) => Err(e),
            None => Ok(Self::text_response(
                "I'm a mock LLM. No queued responses available.".to_string(),
            )),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
