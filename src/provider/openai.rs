//! OpenAI provider.
//!
//! Two API shapes are supported:
//!
//! - `/chat/completions` for ordinary chat models
//! - `/responses` for reasoning models (`o1`, `o3`, `o4`, `gpt-5` prefixes)
//!   and whenever web search is enabled
//!
//! If the Responses API answers with a "not found" class of failure (older
//! deployments, compatible servers without `/responses`), the call is
//! retried once against `/chat/completions`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::backoff::{with_backoff, BackoffConfig};
use super::{
    env_api_key, http_client, read_sse, redact, send_checked, wrong_config, Provider,
    ProviderResponse, StreamedText, DEFAULT_TIMEOUT,
};
use crate::config::{LlmConfig, OpenAiConfig};
use crate::error::{NodeError, Result};
use crate::usage::extract_usage;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const REASONING_PREFIXES: [&str; 4] = ["o1", "o3", "o4", "gpt-5"];

/// Provider for the OpenAI API (and compatible servers via `OPENAI_BASE_URL`).
///
/// ```
/// use llm_nodes::provider::OpenAiProvider;
///
/// let provider = OpenAiProvider::new().with_api_key("sk-test");
/// assert!(provider.has_api_key());
/// ```
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    backoff: BackoffConfig,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl Default for OpenAiProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenAiProvider {
    /// A provider with no credentials and the public endpoint.
    pub fn new() -> Self {
        Self {
            client: http_client(DEFAULT_TIMEOUT),
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            backoff: BackoffConfig::none(),
        }
    }

    /// Read `OPENAI_API_KEY` and optional `OPENAI_BASE_URL`.
    pub fn from_env() -> Self {
        let mut provider = Self::new();
        provider.api_key = env_api_key("OPENAI_API_KEY");
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
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

    /// Whether the model name marks an o-series or gpt-5 reasoning model.
    pub fn is_reasoning_model(model: &str) -> bool {
        let model = model.to_ascii_lowercase();
        REASONING_PREFIXES.iter().any(|p| model.starts_with(p))
    }

    fn uses_responses_api(config: &OpenAiConfig) -> bool {
        config.web_search || Self::is_reasoning_model(&config.model)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn chat_body(prompt: &str, config: &OpenAiConfig) -> Value {
        let reasoning = Self::is_reasoning_model(&config.model);

        let mut messages = Vec::new();
        if let Some(sys) = config.system_prompt.as_deref().filter(|s| !s.is_empty()) {
            messages.push(json!({"role": "system", "content": sys}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let mut body = json!({
            "model": config.model,
            "messages": messages,
            "stream": config.stream,
        });

        if let Some(max) = config.max_tokens {
            let key = if reasoning { "max_completion_tokens" } else { "max_tokens" };
            body[key] = json!(max);
        }
        if !reasoning {
            if let Some(t) = config.temperature {
                body["temperature"] = json!(t);
            }
            if let Some(p) = config.top_p {
                body["top_p"] = json!(p);
            }
        }
        if let Some(p) = config.frequency_penalty {
            body["frequency_penalty"] = json!(p);
        }
        if let Some(p) = config.presence_penalty {
            body["presence_penalty"] = json!(p);
        }
        if let Some(effort) = config.reasoning_effort {
            body["reasoning_effort"] = json!(effort.as_str());
        }
        if config.stream {
            body["stream_options"] = json!({"include_usage": true});
        }
        body
    }

    fn responses_body(prompt: &str, config: &OpenAiConfig) -> Value {
        let reasoning = Self::is_reasoning_model(&config.model);

        let mut body = json!({
            "model": config.model,
            "input": prompt,
            "stream": config.stream,
        });

        if let Some(sys) = config.system_prompt.as_deref().filter(|s| !s.is_empty()) {
            body["instructions"] = json!(sys);
        }
        if let Some(max) = config.max_tokens {
            body["max_output_tokens"] = json!(max);
        }
        if !reasoning {
            if let Some(t) = config.temperature {
                body["temperature"] = json!(t);
            }
            if let Some(p) = config.top_p {
                body["top_p"] = json!(p);
            }
        }
        if let Some(effort) = config.reasoning_effort {
            body["reasoning"] = json!({"effort": effort.as_str(), "summary": "auto"});
        }
        if config.web_search {
            body["tools"] = json!([{"type": "web_search_preview"}]);
        }
        body
    }

    fn parse_chat(raw: Value) -> ProviderResponse {
        let message = raw.pointer("/choices/0/message");
        let content = message
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let thinking = message
            .and_then(|m| m.get("reasoning_content"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from);

        ProviderResponse {
            content,
            usage: extract_usage(&raw),
            thinking,
            raw: Some(raw),
        }
    }

    fn parse_responses(raw: Value) -> ProviderResponse {
        let mut content = String::new();
        let mut thinking = String::new();

        for item in raw.get("output").and_then(Value::as_array).into_iter().flatten() {
            match item.get("type").and_then(Value::as_str) {
                Some("message") => {
                    for part in item.get("content").and_then(Value::as_array).into_iter().flatten() {
                        if part.get("type").and_then(Value::as_str) == Some("output_text") {
                            content.push_str(part.get("text").and_then(Value::as_str).unwrap_or(""));
                        }
                    }
                }
                Some("reasoning") => {
                    for part in item.get("summary").and_then(Value::as_array).into_iter().flatten() {
                        if let Some(text) = part.get("text").and_then(Value::as_str) {
                            if !thinking.is_empty() {
                                thinking.push('\n');
                            }
                            thinking.push_str(text);
                        }
                    }
                }
                _ => {}
            }
        }

        if content.is_empty() {
            if let Some(text) = raw.get("output_text").and_then(Value::as_str) {
                content.push_str(text);
            }
        }

        ProviderResponse {
            content,
            usage: extract_usage(&raw),
            thinking: (!thinking.is_empty()).then_some(thinking),
            raw: Some(raw),
        }
    }

    fn apply_chat_event(event: &Value, acc: &mut StreamedText) {
        if let Some(delta) = event.pointer("/choices/0/delta") {
            if let Some(text) = delta.get("content").and_then(Value::as_str) {
                acc.content.push_str(text);
            }
            if let Some(text) = delta.get("reasoning_content").and_then(Value::as_str) {
                acc.thinking.push_str(text);
            }
        }
        if let Some(usage) = extract_usage(event) {
            acc.merge_usage(usage);
        }
    }

    fn apply_responses_event(event: &Value, acc: &mut StreamedText) -> Result<()> {
        let delta = || event.get("delta").and_then(Value::as_str).unwrap_or("");
        match event.get("type").and_then(Value::as_str) {
            Some("response.output_text.delta") => acc.content.push_str(delta()),
            Some("response.reasoning_summary_text.delta") => acc.thinking.push_str(delta()),
            Some("response.completed") => {
                if let Some(usage) = event.get("response").and_then(extract_usage) {
                    acc.merge_usage(usage);
                }
            }
            Some("error") | Some("response.failed") => {
                let message = event
                    .pointer("/response/error/message")
                    .or_else(|| event.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("stream reported an error");
                return Err(NodeError::Provider {
                    provider: "openai",
                    message: message.to_string(),
                });
            }
            _ => {}
        }
        Ok(())
    }

    /// Failures that mean "this deployment has no Responses API".
    fn is_not_found(err: &NodeError) -> bool {
        match err {
            NodeError::HttpError { status: 404, .. } => true,
            NodeError::HttpError { body, .. } => body.to_ascii_lowercase().contains("not found"),
            NodeError::Provider { message, .. } => {
                message.to_ascii_lowercase().contains("not found")
            }
            _ => false,
        }
    }

    async fn post(&self, key: &str, path: &str, body: &Value) -> Result<reqwest::Response> {
        let url = self.url(path);
        with_backoff(&self.backoff, || {
            send_checked(self.client.post(&url).bearer_auth(key).json(body))
        })
        .await
    }

    async fn call_chat(&self, key: &str, prompt: &str, config: &OpenAiConfig) -> Result<ProviderResponse> {
        let body = Self::chat_body(prompt, config);
        let resp = self.post(key, "chat/completions", &body).await?;
        if config.stream {
            let acc = read_sse(resp, |event, acc| {
                Self::apply_chat_event(event, acc);
                Ok(())
            })
            .await?;
            return Ok(acc.into_response());
        }
        Ok(Self::parse_chat(resp.json().await?))
    }

    async fn call_responses(
        &self,
        key: &str,
        prompt: &str,
        config: &OpenAiConfig,
    ) -> Result<ProviderResponse> {
        let body = Self::responses_body(prompt, config);
        let resp = self.post(key, "responses", &body).await?;
        if config.stream {
            let acc = read_sse(resp, Self::apply_responses_event).await?;
            return Ok(acc.into_response());
        }
        Ok(Self::parse_responses(resp.json().await?))
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn invoke(&self, prompt: &str, config: &LlmConfig) -> Result<ProviderResponse> {
        let LlmConfig::OpenAi(config) = config else {
            return Err(wrong_config(self.name(), config));
        };
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| NodeError::InvalidConfig("OPENAI_API_KEY is not set".into()))?;

        if Self::uses_responses_api(config) {
            match self.call_responses(key, prompt, config).await {
                Err(err) if Self::is_not_found(&err) => {
                    tracing::warn!(
                        model = %config.model,
                        error = %err,
                        "responses API unavailable, falling back to chat completions"
                    );
                }
                other => return other,
            }
        }

        self.call_chat(key, prompt, config).await
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReasoningEffort;
    use crate::usage::TokenUsage;

    #[test]
    fn reasoning_model_detection() {
        assert!(OpenAiProvider::is_reasoning_model("o1-mini"));
        assert!(OpenAiProvider::is_reasoning_model("o3"));
        assert!(OpenAiProvider::is_reasoning_model("GPT-5-nano"));
        assert!(!OpenAiProvider::is_reasoning_model("gpt-4o"));
        assert!(!OpenAiProvider::is_reasoning_model("omni"));
    }

    #[test]
    fn api_shape_selection() {
        assert!(!OpenAiProvider::uses_responses_api(&OpenAiConfig::new("gpt-4o")));
        assert!(OpenAiProvider::uses_responses_api(&OpenAiConfig::new("o4-mini")));
        assert!(OpenAiProvider::uses_responses_api(
            &OpenAiConfig::new("gpt-4o").with_web_search(true)
        ));
    }

    #[test]
    fn chat_body_for_chat_model() {
        let mut config = OpenAiConfig::new("gpt-4o")
            .with_system_prompt("Be brief.")
            .with_max_tokens(200)
            .with_penalties(0.1, 0.2);
        config.temperature = Some(0.5);

        let body = OpenAiProvider::chat_body("Hi", &config);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Hi");
        assert_eq!(body["max_tokens"], 200);
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["frequency_penalty"], 0.1);
        assert_eq!(body["stream"], false);
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn chat_body_for_reasoning_model() {
        let mut config = OpenAiConfig::new("o3-mini")
            .with_max_tokens(500)
            .with_reasoning_effort(ReasoningEffort::Low)
            .with_stream(true);
        config.temperature = Some(0.7);

        let body = OpenAiProvider::chat_body("Hi", &config);
        assert_eq!(body["max_completion_tokens"], 500);
        assert!(body.get("max_tokens").is_none());
        assert!(body.get("temperature").is_none());
        assert_eq!(body["reasoning_effort"], "low");
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn responses_body_shape() {
        let config = OpenAiConfig::new("gpt-5")
            .with_system_prompt("sys")
            .with_max_tokens(1000)
            .with_reasoning_effort(ReasoningEffort::High)
            .with_web_search(true);

        let body = OpenAiProvider::responses_body("question", &config);
        assert_eq!(body["input"], "question");
        assert_eq!(body["instructions"], "sys");
        assert_eq!(body["max_output_tokens"], 1000);
        assert_eq!(body["reasoning"]["effort"], "high");
        assert_eq!(body["tools"][0]["type"], "web_search_preview");
    }

    #[test]
    fn parse_chat_response() {
        let raw = json!({
            "choices": [{"message": {"role": "assistant", "content": "Hello"}}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1}
        });
        let response = OpenAiProvider::parse_chat(raw);
        assert_eq!(response.content, "Hello");
        assert_eq!(response.usage, Some(TokenUsage::new(3, 1)));
        assert!(response.thinking.is_none());
        assert!(response.raw.is_some());
    }

    #[test]
    fn parse_responses_output() {
        let raw = json!({
            "output": [
                {"type": "reasoning", "summary": [{"type": "summary_text", "text": "thought"}]},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "Answer "},
                    {"type": "output_text", "text": "here"}
                ]}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 20,
                      "output_tokens_details": {"reasoning_tokens": 15}}
        });
        let response = OpenAiProvider::parse_responses(raw);
        assert_eq!(response.content, "Answer here");
        assert_eq!(response.thinking.as_deref(), Some("thought"));
        assert_eq!(response.usage.unwrap().research_tokens, Some(15));
    }

    #[test]
    fn parse_responses_output_text_fallback() {
        let response = OpenAiProvider::parse_responses(json!({"output_text": "plain"}));
        assert_eq!(response.content, "plain");
        assert!(response.usage.is_none());
    }

    #[test]
    fn chat_stream_events_accumulate() {
        let mut acc = StreamedText::default();
        for event in [
            json!({"choices": [{"delta": {"content": "Hel"}}]}),
            json!({"choices": [{"delta": {"content": "lo"}}]}),
            json!({"choices": [], "usage": {"prompt_tokens": 4, "completion_tokens": 2}}),
        ] {
            OpenAiProvider::apply_chat_event(&event, &mut acc);
        }
        let response = acc.into_response();
        assert_eq!(response.content, "Hello");
        assert_eq!(response.usage, Some(TokenUsage::new(4, 2)));
    }

    #[test]
    fn responses_stream_events_accumulate() {
        let mut acc = StreamedText::default();
        for event in [
            json!({"type": "response.reasoning_summary_text.delta", "delta": "think"}),
            json!({"type": "response.output_text.delta", "delta": "A"}),
            json!({"type": "response.output_text.delta", "delta": "B"}),
            json!({"type": "response.completed", "response": {"usage": {"input_tokens": 1, "output_tokens": 2}}}),
        ] {
            OpenAiProvider::apply_responses_event(&event, &mut acc).unwrap();
        }
        let response = acc.into_response();
        assert_eq!(response.content, "AB");
        assert_eq!(response.thinking.as_deref(), Some("think"));
        assert_eq!(response.usage, Some(TokenUsage::new(1, 2)));
    }

    #[test]
    fn responses_stream_error_event() {
        let mut acc = StreamedText::default();
        let err = OpenAiProvider::apply_responses_event(
            &json!({"type": "error", "message": "overloaded"}),
            &mut acc,
        )
        .unwrap_err();
        assert!(err.to_string().contains("overloaded"));
    }

    #[test]
    fn not_found_detection() {
        let http = |status: u16, body: &str| NodeError::HttpError {
            status,
            body: body.into(),
            retry_after: None,
        };
        assert!(OpenAiProvider::is_not_found(&http(404, "")));
        assert!(OpenAiProvider::is_not_found(&http(400, "Model Not Found")));
        assert!(!OpenAiProvider::is_not_found(&http(500, "boom")));
        assert!(!OpenAiProvider::is_not_found(&NodeError::InvalidConfig("x".into())));
    }

    #[test]
    fn url_joins_base() {
        let provider = OpenAiProvider::new().with_base_url("http://localhost:8000/v1/");
        assert_eq!(provider.url("responses"), "http://localhost:8000/v1/responses");
    }

    #[test]
    fn debug_redacts_api_key() {
        let provider = OpenAiProvider::new().with_api_key("sk-1234567890abcdef");
        let debug = format!("{:?}", provider);
        assert!(!debug.contains("1234567890abcdef"));
        assert!(debug.contains("sk-123***"));
    }

    #[tokio::test]
    async fn missing_key_fails_at_invoke() {
        let provider = OpenAiProvider::new();
        let err = provider
            .invoke("hi", &LlmConfig::openai("gpt-4o"))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::InvalidConfig(ref m) if m.contains("OPENAI_API_KEY")));
    }

    #[tokio::test]
    async fn rejects_foreign_config() {
        let provider = OpenAiProvider::new().with_api_key("sk-test");
        let err = provider
            .invoke("hi", &LlmConfig::anthropic("claude", 100))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::InvalidConfig(_)));
    }
}
