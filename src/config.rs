//! Provider configuration.
//!
//! [`LlmConfig`] is a sum type keyed by the provider tag. Each variant owns
//! exactly the fields its provider understands, and every variant struct
//! rejects unknown fields on deserialization, so a configuration mixing
//! OpenAI and Anthropic options fails to load instead of being silently
//! half-applied.
//!
//! ```
//! use llm_nodes::config::{LlmConfig, ProviderKind};
//!
//! let config: LlmConfig = serde_json::from_str(
//!     r#"{"provider": "anthropic", "model": "claude-sonnet-4-5", "max_tokens": 1024}"#,
//! ).unwrap();
//! assert_eq!(config.provider(), ProviderKind::Anthropic);
//! assert!(config.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{NodeError, Result};

/// Smallest extended-thinking budget Anthropic accepts.
pub const MIN_THINKING_BUDGET: u32 = 1024;

/// Which vendor a configuration targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Ollama,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Ollama => "ollama",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OpenAI reasoning effort for o-series and gpt-5 models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Minimal => "minimal",
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

/// Configuration for a node's provider, discriminated by `provider`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum LlmConfig {
    OpenAi(OpenAiConfig),
    Anthropic(AnthropicConfig),
    Ollama(OllamaConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenAiConfig {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Attach the hosted web-search tool (forces the Responses API).
    #[serde(default)]
    pub web_search: bool,
    #[serde(default)]
    pub stream: bool,
}

impl OpenAiConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            max_tokens: None,
            system_prompt: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            reasoning_effort: None,
            web_search: false,
            stream: false,
        }
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_penalties(mut self, frequency: f64, presence: f64) -> Self {
        self.frequency_penalty = Some(frequency);
        self.presence_penalty = Some(presence);
        self
    }

    pub fn with_reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self
    }

    pub fn with_web_search(mut self, enabled: bool) -> Self {
        self.web_search = enabled;
        self
    }

    pub fn with_stream(mut self, enabled: bool) -> Self {
        self.stream = enabled;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnthropicConfig {
    pub model: String,
    /// Required by the Messages API; `validate` rejects `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Extended-thinking token budget. Must be at least 1024 and below `max_tokens`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,
    #[serde(default)]
    pub web_search: bool,
    #[serde(default)]
    pub stream: bool,
}

impl AnthropicConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_tokens: None,
            temperature: None,
            system_prompt: None,
            top_p: None,
            top_k: None,
            thinking_budget: None,
            web_search: false,
            stream: false,
        }
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_thinking_budget(mut self, budget: u32) -> Self {
        self.thinking_budget = Some(budget);
        self
    }

    pub fn with_web_search(mut self, enabled: bool) -> Self {
        self.web_search = enabled;
        self
    }

    pub fn with_stream(mut self, enabled: bool) -> Self {
        self.stream = enabled;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OllamaConfig {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Enable the model's thinking mode (`think` on the native API).
    #[serde(default)]
    pub thinking: bool,
    /// Request JSON-formatted output (`format: "json"`).
    #[serde(default)]
    pub json_mode: bool,
    /// Custom options merged into the Ollama options object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
    #[serde(default)]
    pub stream: bool,
}

impl OllamaConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            max_tokens: None,
            system_prompt: None,
            thinking: false,
            json_mode: false,
            options: None,
            stream: false,
        }
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_thinking(mut self, enabled: bool) -> Self {
        self.thinking = enabled;
        self
    }

    pub fn with_json_mode(mut self, enabled: bool) -> Self {
        self.json_mode = enabled;
        self
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_stream(mut self, enabled: bool) -> Self {
        self.stream = enabled;
        self
    }
}

impl From<OpenAiConfig> for LlmConfig {
    fn from(config: OpenAiConfig) -> Self {
        LlmConfig::OpenAi(config)
    }
}

impl From<AnthropicConfig> for LlmConfig {
    fn from(config: AnthropicConfig) -> Self {
        LlmConfig::Anthropic(config)
    }
}

impl From<OllamaConfig> for LlmConfig {
    fn from(config: OllamaConfig) -> Self {
        LlmConfig::Ollama(config)
    }
}

impl LlmConfig {
    pub fn openai(model: impl Into<String>) -> Self {
        OpenAiConfig::new(model).into()
    }

    /// Anthropic configuration with the mandatory token limit.
    pub fn anthropic(model: impl Into<String>, max_tokens: u32) -> Self {
        AnthropicConfig::new(model).with_max_tokens(max_tokens).into()
    }

    pub fn ollama(model: impl Into<String>) -> Self {
        OllamaConfig::new(model).into()
    }

    pub fn provider(&self) -> ProviderKind {
        match self {
            LlmConfig::OpenAi(_) => ProviderKind::OpenAi,
            LlmConfig::Anthropic(_) => ProviderKind::Anthropic,
            LlmConfig::Ollama(_) => ProviderKind::Ollama,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            LlmConfig::OpenAi(c) => &c.model,
            LlmConfig::Anthropic(c) => &c.model,
            LlmConfig::Ollama(c) => &c.model,
        }
    }

    pub fn temperature(&self) -> Option<f64> {
        match self {
            LlmConfig::OpenAi(c) => c.temperature,
            LlmConfig::Anthropic(c) => c.temperature,
            LlmConfig::Ollama(c) => c.temperature,
        }
    }

    pub fn max_tokens(&self) -> Option<u32> {
        match self {
            LlmConfig::OpenAi(c) => c.max_tokens,
            LlmConfig::Anthropic(c) => c.max_tokens,
            LlmConfig::Ollama(c) => c.max_tokens,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        match &mut self {
            LlmConfig::OpenAi(c) => c.temperature = Some(temperature),
            LlmConfig::Anthropic(c) => c.temperature = Some(temperature),
            LlmConfig::Ollama(c) => c.temperature = Some(temperature),
        }
        self
    }

    /// Check provider-specific requirements.
    ///
    /// Called by nodes before every provider call, so a bad configuration
    /// fails the first `execute` rather than reaching the network.
    pub fn validate(&self) -> Result<()> {
        if self.model().trim().is_empty() {
            return Err(NodeError::InvalidConfig(format!(
                "{} configuration requires a model name",
                self.provider()
            )));
        }
        if let Some(t) = self.temperature() {
            if !t.is_finite() || t < 0.0 {
                return Err(NodeError::InvalidConfig(format!(
                    "temperature must be a non-negative number, got {t}"
                )));
            }
        }

        if let LlmConfig::Anthropic(c) = self {
            let max_tokens = c.max_tokens.ok_or_else(|| {
                NodeError::InvalidConfig("Anthropic configuration requires max_tokens".into())
            })?;
            if max_tokens == 0 {
                return Err(NodeError::InvalidConfig(
                    "Anthropic max_tokens must be greater than zero".into(),
                ));
            }
            if let Some(budget) = c.thinking_budget {
                if budget < MIN_THINKING_BUDGET {
                    return Err(NodeError::InvalidConfig(format!(
                        "thinking_budget must be at least {MIN_THINKING_BUDGET}, got {budget}"
                    )));
                }
                if budget >= max_tokens {
                    return Err(NodeError::InvalidConfig(format!(
                        "thinking_budget ({budget}) must be less than max_tokens ({max_tokens})"
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tagged_deserialization_selects_variant() {
        let config: LlmConfig = serde_json::from_value(json!({
            "provider": "openai",
            "model": "gpt-4o",
            "temperature": 0.3,
            "reasoning_effort": "high",
            "web_search": true
        }))
        .unwrap();

        match &config {
            LlmConfig::OpenAi(c) => {
                assert_eq!(c.model, "gpt-4o");
                assert_eq!(c.reasoning_effort, Some(ReasoningEffort::High));
                assert!(c.web_search);
                assert!(!c.stream);
            }
            other => panic!("wrong variant: {other:?}"),
        }
        assert_eq!(config.temperature(), Some(0.3));
    }

    #[test]
    fn mixed_provider_fields_are_rejected() {
        let err = serde_json::from_value::<LlmConfig>(json!({
            "provider": "openai",
            "model": "gpt-4o",
            "thinking_budget": 2048
        }))
        .unwrap_err();
        assert!(err.to_string().contains("thinking_budget"));

        assert!(serde_json::from_value::<LlmConfig>(json!({
            "provider": "anthropic",
            "model": "claude",
            "max_tokens": 100,
            "frequency_penalty": 0.5
        }))
        .is_err());
    }

    #[test]
    fn unknown_provider_tag_is_rejected() {
        assert!(serde_json::from_value::<LlmConfig>(json!({
            "provider": "acme",
            "model": "m"
        }))
        .is_err());
    }

    #[test]
    fn serialization_carries_tag() {
        let value = serde_json::to_value(LlmConfig::ollama("llama3.2")).unwrap();
        assert_eq!(value["provider"], "ollama");
        assert_eq!(value["model"], "llama3.2");
        assert!(value.get("temperature").is_none());
    }

    #[test]
    fn anthropic_requires_max_tokens() {
        let config: LlmConfig = AnthropicConfig::new("claude-sonnet-4-5").into();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, NodeError::InvalidConfig(ref m) if m.contains("max_tokens")));

        assert!(LlmConfig::anthropic("claude-sonnet-4-5", 1024).validate().is_ok());
    }

    #[test]
    fn thinking_budget_bounds() {
        let too_small: LlmConfig = AnthropicConfig::new("c")
            .with_max_tokens(4096)
            .with_thinking_budget(512)
            .into();
        assert!(too_small.validate().is_err());

        let too_large: LlmConfig = AnthropicConfig::new("c")
            .with_max_tokens(2048)
            .with_thinking_budget(2048)
            .into();
        assert!(too_large.validate().is_err());

        let ok: LlmConfig = AnthropicConfig::new("c")
            .with_max_tokens(4096)
            .with_thinking_budget(2048)
            .into();
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn empty_model_and_bad_temperature_fail() {
        assert!(LlmConfig::openai("  ").validate().is_err());
        assert!(LlmConfig::openai("gpt-4o")
            .with_temperature(f64::NAN)
            .validate()
            .is_err());
        assert!(LlmConfig::openai("gpt-4o")
            .with_temperature(-0.1)
            .validate()
            .is_err());
    }

    #[test]
    fn common_accessors() {
        let config = LlmConfig::anthropic("claude", 500).with_temperature(0.2);
        assert_eq!(config.provider(), ProviderKind::Anthropic);
        assert_eq!(config.provider().to_string(), "anthropic");
        assert_eq!(config.model(), "claude");
        assert_eq!(config.max_tokens(), Some(500));
        assert_eq!(config.temperature(), Some(0.2));
    }
}
