//! Provider for Ollama's native API.
//!
//! Endpoints: `/api/generate` (prompt only) and `/api/chat` (when a system
//! prompt is set). Streaming uses NDJSON, one `{"response": "..."}` or
//! `{"message": {"content": "..."}}` object per line, with token counts on
//! the final `done` line.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::backoff::{with_backoff, BackoffConfig};
use super::stream::NdjsonDecoder;
use super::{
    env_api_key, http_client, redact, send_checked, wrong_config, Provider, ProviderResponse,
    StreamedText, DEFAULT_TIMEOUT,
};
use crate::config::{LlmConfig, OllamaConfig};
use crate::error::{NodeError, Result};
use crate::usage::extract_usage;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Ollama needs no credentials locally; `OLLAMA_API_KEY` is sent as a
/// bearer token when set, for hosted instances.
#[derive(Clone)]
pub struct OllamaProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    backoff: BackoffConfig,
}

impl std::fmt::Debug for OllamaProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaProvider")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl OllamaProvider {
    pub fn new() -> Self {
        Self {
            client: http_client(DEFAULT_TIMEOUT),
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            backoff: BackoffConfig::none(),
        }
    }

    /// Read optional `OLLAMA_API_KEY` and `OLLAMA_BASE_URL`.
    pub fn from_env() -> Self {
        let mut provider = Self::new();
        provider.api_key = env_api_key("OLLAMA_API_KEY");
        if let Ok(url) = std::env::var("OLLAMA_BASE_URL") {
            provider.base_url = url;
        }
        provider
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

    fn use_chat(config: &OllamaConfig) -> bool {
        config.system_prompt.as_ref().is_some_and(|s| !s.is_empty())
    }

    fn build_options(config: &OllamaConfig) -> Value {
        let mut opts = serde_json::Map::new();
        if let Some(t) = config.temperature {
            opts.insert("temperature".into(), json!(t));
        }
        if let Some(max) = config.max_tokens {
            opts.insert("num_predict".into(), json!(max));
        }
        if let Some(extra) = config.options.as_ref().and_then(Value::as_object) {
            for (k, v) in extra {
                opts.insert(k.clone(), v.clone());
            }
        }
        Value::Object(opts)
    }

    fn build_body(prompt: &str, config: &OllamaConfig) -> Value {
        let mut body = json!({
            "model": config.model,
            "stream": config.stream,
            "options": Self::build_options(config),
        });

        if Self::use_chat(config) {
            body["messages"] = json!([
                {"role": "system", "content": config.system_prompt},
                {"role": "user", "content": prompt},
            ]);
        } else {
            body["prompt"] = json!(prompt);
        }
        if config.json_mode {
            body["format"] = json!("json");
        }
        if config.thinking {
            body["think"] = json!(true);
        }
        body
    }

    /// Pull `(content, thinking)` out of one response object or stream line.
    fn fragments(value: &Value, chat: bool) -> (&str, &str) {
        let (source, content_key) = if chat {
            (value.get("message"), "content")
        } else {
            (Some(value), "response")
        };
        let field = |key: &str| {
            source
                .and_then(|s| s.get(key))
                .and_then(Value::as_str)
                .unwrap_or("")
        };
        (field(content_key), field("thinking"))
    }

    fn parse_response(raw: Value, chat: bool) -> ProviderResponse {
        let (content, thinking) = Self::fragments(&raw, chat);
        ProviderResponse {
            content: content.to_string(),
            thinking: (!thinking.is_empty()).then(|| thinking.to_string()),
            usage: extract_usage(&raw),
            raw: Some(raw),
        }
    }

    fn apply_line(line: &Value, chat: bool, acc: &mut StreamedText) -> Result<()> {
        if let Some(error) = line.get("error") {
            return Err(NodeError::Provider {
                provider: "ollama",
                message: error
                    .as_str()
                    .map_or_else(|| error.to_string(), str::to_string),
            });
        }

        let (content, thinking) = Self::fragments(line, chat);
        acc.content.push_str(content);
        acc.thinking.push_str(thinking);
        if line.get("done").and_then(Value::as_bool) == Some(true) {
            if let Some(usage) = extract_usage(line) {
                acc.merge_usage(usage);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    async fn invoke(&self, prompt: &str, config: &LlmConfig) -> Result<ProviderResponse> {
        let LlmConfig::Ollama(config) = config else {
            return Err(wrong_config(self.name(), config));
        };

        let chat = Self::use_chat(config);
        let path = if chat { "api/chat" } else { "api/generate" };
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let body = Self::build_body(prompt, config);

        let resp = with_backoff(&self.backoff, || {
            let mut request = self.client.post(&url).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }
            send_checked(request)
        })
        .await?;

        if !config.stream {
            return Ok(Self::parse_response(resp.json().await?, chat));
        }

        let mut stream = resp.bytes_stream();
        let mut decoder = NdjsonDecoder::new();
        let mut acc = StreamedText::default();
        while let Some(chunk) = stream.next().await {
            for line in decoder.decode(&chunk?) {
                Self::apply_line(&line, chat, &mut acc)?;
            }
        }
        if let Some(line) = decoder.flush() {
            Self::apply_line(&line, chat, &mut acc)?;
        }
        Ok(acc.into_response())
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}
