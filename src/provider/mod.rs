//! Provider abstraction: the single network-facing seam.
//!
//! A [`Provider`] turns `(prompt, config)` into a [`ProviderResponse`]
//! holding the full text, optional token usage and optional thinking text.
//! Streaming is an implementation detail: providers drain the stream and
//! return the materialized result, so callers never see partial output.
//!
//! ```text
//! Node ──► for_config(&LlmConfig) ──► Arc<dyn Provider> ──► invoke()
//!                     │
//!     ┌───────────────┼────────────────┐
//! OpenAiProvider  AnthropicProvider  OllamaProvider
//! /chat/completions  /messages       /api/generate
//! /responses         SSE             /api/chat
//! SSE                                NDJSON
//! ```

pub mod anthropic;
pub mod backoff;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod stream;

pub use anthropic::AnthropicProvider;
pub use backoff::{with_backoff, BackoffConfig};
pub use mock::{MockProvider, MockReply};
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{LlmConfig, ProviderKind};
use crate::error::{NodeError, Result};
use crate::usage::TokenUsage;
use stream::SseDecoder;

/// Default HTTP timeout for provider calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A materialized provider answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderResponse {
    /// The generated text.
    pub content: String,
    /// Token usage, when the provider reported it.
    pub usage: Option<TokenUsage>,
    /// Reasoning or thinking text returned separately from the answer.
    pub thinking: Option<String>,
    /// The raw response body (non-streaming calls only).
    pub raw: Option<Value>,
}

impl ProviderResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// A vendor LLM backend behind the uniform invoke contract.
///
/// Object-safe; nodes hold providers as `Arc<dyn Provider>`.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Send one prompt and return the complete answer.
    async fn invoke(&self, prompt: &str, config: &LlmConfig) -> Result<ProviderResponse>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Build the provider matching a configuration's tag, reading credentials
/// from the environment. A missing key does not fail here; the first
/// `invoke` reports it.
pub fn for_config(config: &LlmConfig) -> Arc<dyn Provider> {
    match config.provider() {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::from_env()),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::from_env()),
        ProviderKind::Ollama => Arc::new(OllamaProvider::from_env()),
    }
}

pub(crate) fn http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Read `<PREFIX>_API_KEY`, treating an empty value as unset.
pub(crate) fn env_api_key(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|k| !k.trim().is_empty())
}

/// Show only a key prefix in `Debug` output.
pub(crate) fn redact(key: &Option<String>) -> Option<String> {
    key.as_ref().map(|k| match k.char_indices().nth(6) {
        Some((idx, _)) => format!("{}***", &k[..idx]),
        None => "***".to_string(),
    })
}

pub(crate) fn wrong_config(provider: &'static str, config: &LlmConfig) -> NodeError {
    NodeError::InvalidConfig(format!(
        "{provider} provider cannot use the {} configuration",
        config.provider()
    ))
}

/// Send a request, mapping non-success statuses to [`NodeError::HttpError`].
pub(crate) async fn send_checked(request: RequestBuilder) -> Result<reqwest::Response> {
    let resp = request.send().await?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let retry_after = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(backoff::parse_retry_after);
    let body = resp.text().await.unwrap_or_default();
    Err(NodeError::HttpError {
        status: status.as_u16(),
        body,
        retry_after,
    })
}

/// Text accumulated from a stream, split by event kind.
#[derive(Debug, Default)]
pub(crate) struct StreamedText {
    pub content: String,
    pub thinking: String,
    pub usage: Option<TokenUsage>,
}

impl StreamedText {
    /// Merge a usage fragment. Streams report input and output counts in
    /// separate events, so zero fields never overwrite known values.
    pub fn merge_usage(&mut self, usage: TokenUsage) {
        let current = self.usage.get_or_insert_with(TokenUsage::default);
        if usage.input_tokens > 0 {
            current.input_tokens = usage.input_tokens;
        }
        if usage.output_tokens > 0 {
            current.output_tokens = usage.output_tokens;
        }
        if usage.research_tokens.is_some() {
            current.research_tokens = usage.research_tokens;
        }
    }

    pub fn into_response(self) -> ProviderResponse {
        ProviderResponse {
            content: self.content,
            usage: self.usage,
            thinking: (!self.thinking.is_empty()).then_some(self.thinking),
            raw: None,
        }
    }
}

/// Drain an SSE response, feeding every event to `on_event`.
pub(crate) async fn read_sse<F>(resp: reqwest::Response, mut on_event: F) -> Result<StreamedText>
where
    F: FnMut(&Value, &mut StreamedText) -> Result<()>,
{
    let mut stream = resp.bytes_stream();
    let mut decoder = SseDecoder::new();
    let mut acc = StreamedText::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for event in decoder.decode(&chunk) {
            on_event(&event, &mut acc)?;
        }
    }
    for event in decoder.flush() {
        on_event(&event, &mut acc)?;
    }

    Ok(acc)
}
