//! Anthropic Messages API provider.
//!
//! Endpoint: `POST {base}/messages`. `max_tokens` is mandatory and checked
//! before any request is sent. Extended thinking and the hosted web-search
//! tool are opt-in through [`AnthropicConfig`].

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::backoff::{with_backoff, BackoffConfig};
use super::{
    env_api_key, http_client, read_sse, redact, send_checked, wrong_config, Provider,
    ProviderResponse, StreamedText, DEFAULT_TIMEOUT,
};
use crate::config::{AnthropicConfig, LlmConfig};
use crate::error::{NodeError, Result};
use crate::usage::{extract_usage, TokenUsage};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

const ANTHROPIC_VERSION: &str = "2023-06-01";

const WEB_SEARCH_TOOL: &str = "web_search_20250305";

#[derive(Clone)]
pub struct AnthropicProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    backoff: BackoffConfig,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl Default for AnthropicProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl AnthropicProvider {
    pub fn new() -> Self {
        Self {
            client: http_client(DEFAULT_TIMEOUT),
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            backoff: BackoffConfig::none(),
        }
    }

    /// Read `ANTHROPIC_API_KEY` and optional `ANTHROPIC_BASE_URL`.
    pub fn from_env() -> Self {
        let mut provider = Self::new();
        provider.api_key = env_api_key("ANTHROPIC_API_KEY");
        if let Ok(url) = std::env::var("ANTHROPIC_BASE_URL") {
            provider.base_url = url;
        }
        provider
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn build_body(prompt: &str, config: &AnthropicConfig, max_tokens: u32) -> Value {
        let mut body = json!({
            "model": config.model,
            "max_tokens": max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        });

        if let Some(sys) = config.system_prompt.as_deref().filter(|s| !s.is_empty()) {
            body["system"] = json!(sys);
        }

        // Thinking rejects custom temperature and top_k.
        match config.thinking_budget {
            Some(budget) => {
                body["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
            }
            None => {
                if let Some(t) = config.temperature {
                    body["temperature"] = json!(t);
                }
                if let Some(k) = config.top_k {
                    body["top_k"] = json!(k);
                }
            }
        }
        if let Some(p) = config.top_p {
            body["top_p"] = json!(p);
        }
        if config.web_search {
            body["tools"] = json!([{"type": WEB_SEARCH_TOOL, "name": "web_search"}]);
        }
        if config.stream {
            body["stream"] = json!(true);
        }
        body
    }

    fn parse_message(raw: Value) -> ProviderResponse {
        let mut content = String::new();
        let mut thinking = String::new();

        for block in raw.get("content").and_then(Value::as_array).into_iter().flatten() {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    content.push_str(block.get("text").and_then(Value::as_str).unwrap_or(""));
                }
                Some("thinking") => {
                    thinking.push_str(block.get("thinking").and_then(Value::as_str).unwrap_or(""));
                }
                _ => {}
            }
        }

        ProviderResponse {
            content,
            usage: extract_usage(&raw),
            thinking: (!thinking.is_empty()).then_some(thinking),
            raw: Some(raw),
        }
    }

    fn apply_event(event: &Value, acc: &mut StreamedText) -> Result<()> {
        match event.get("type").and_then(Value::as_str) {
            Some("message_start") => {
                if let Some(usage) = event.get("message").and_then(extract_usage) {
                    acc.merge_usage(usage);
                }
            }
            Some("content_block_delta") => {
                let delta = event.get("delta");
                let text = |key: &str| {
                    delta
                        .and_then(|d| d.get(key))
                        .and_then(Value::as_str)
                        .unwrap_or("")
                };
                match delta.and_then(|d| d.get("type")).and_then(Value::as_str) {
                    Some("text_delta") => acc.content.push_str(text("text")),
                    Some("thinking_delta") => acc.thinking.push_str(text("thinking")),
                    _ => {}
                }
            }
            Some("message_delta") => {
                if let Some(output) = event.pointer("/usage/output_tokens").and_then(Value::as_u64) {
                    acc.merge_usage(TokenUsage::new(0, output));
                }
            }
            Some("error") => {
                let message = event
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("stream reported an error");
                return Err(NodeError::Provider {
                    provider: "anthropic",
                    message: message.to_string(),
                });
            }
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn invoke(&self, prompt: &str, config: &LlmConfig) -> Result<ProviderResponse> {
        config.validate()?;
        let LlmConfig::Anthropic(config) = config else {
            return Err(wrong_config(self.name(), config));
        };
        let max_tokens = config.max_tokens.ok_or_else(|| {
            NodeError::InvalidConfig("Anthropic configuration requires max_tokens".into())
        })?;
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| NodeError::InvalidConfig("ANTHROPIC_API_KEY is not set".into()))?;

        let body = Self::build_body(prompt, config, max_tokens);
        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        let resp = with_backoff(&self.backoff, || {
            send_checked(
                self.client
                    .post(&url)
                    .header("x-api-key", key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&body),
            )
        })
        .await?;

        if config.stream {
            let acc = read_sse(resp, Self::apply_event).await?;
            return Ok(acc.into_response());
        }
        Ok(Self::parse_message(resp.json().await?))
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}
