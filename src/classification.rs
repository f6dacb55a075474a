//! Single-label classification over a declared category set.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};

use crate::config::LlmConfig;
use crate::error::{NodeError, Result};
use crate::node::NodeCore;
use crate::output_parser::parse_json_value;
use crate::pipeline::Executable;
use crate::provider::Provider;
use crate::template::{display_value, numbered_list, section, PromptTemplate};
use crate::usage::{TokenTotals, UsageRecord};

/// Temperature used when the configuration leaves it unset.
pub const DEFAULT_TEMPERATURE: f64 = 0.2;

/// Confidence assumed when the heuristic scan finds no number.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

static CONFIDENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)confidence["']?\s*[:=]\s*"?(-?\d+(?:\.\d+)?|nan)\b"#).expect("valid confidence regex")
});

static EXPLANATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:explanation|reason(?:ing)?)["']?\s*[:=]\s*"?([^"\n]+)"#)
        .expect("valid explanation regex")
});

/// The chosen category with its confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Always one of the declared categories, in its declared case.
    pub category: String,
    /// In `[0, 1]`.
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// A node that assigns exactly one of a fixed set of categories.
pub struct ClassificationNode<I> {
    core: NodeCore<I>,
    categories: Vec<String>,
    guidance: HashMap<String, String>,
    include_explanation: bool,
    input_field: Option<String>,
}

impl<I> Clone for ClassificationNode<I> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            categories: self.categories.clone(),
            guidance: self.guidance.clone(),
            include_explanation: self.include_explanation,
            input_field: self.input_field.clone(),
        }
    }
}

impl<I: Serialize> ClassificationNode<I> {
    /// Fails with [`NodeError::InvalidConfig`] when the category list is
    /// empty or contains duplicates (compared case-sensitively).
    pub fn new<C, S>(
        name: impl Into<String>,
        template: impl Into<PromptTemplate>,
        config: LlmConfig,
        categories: C,
    ) -> Result<Self>
    where
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let categories: Vec<String> = categories.into_iter().map(Into::into).collect();
        if categories.is_empty() {
            return Err(NodeError::InvalidConfig(
                "classification needs at least one category".into(),
            ));
        }
        let mut seen = HashSet::new();
        for category in &categories {
            if !seen.insert(category.as_str()) {
                return Err(NodeError::InvalidConfig(format!(
                    "duplicate category '{category}'"
                )));
            }
        }

        let config = match config.temperature() {
            Some(_) => config,
            None => config.with_temperature(DEFAULT_TEMPERATURE),
        };

        Ok(Self {
            core: NodeCore::new(name, template, config),
            categories,
            guidance: HashMap::new(),
            include_explanation: false,
            input_field: None,
        })
    }

    /// Describe when a category applies. Unknown categories are ignored.
    pub fn with_guidance(mut self, category: &str, guidance: impl Into<String>) -> Self {
        if self.categories.iter().any(|c| c == category) {
            self.guidance.insert(category.to_string(), guidance.into());
        }
        self
    }

    /// Ask the model for a short explanation alongside the label.
    pub fn with_explanation(mut self, enabled: bool) -> Self {
        self.include_explanation = enabled;
        self
    }

    /// Field the template reads the text from. When the input lacks it,
    /// one is derived from `input`/`content`, a bare string, the first
    /// scalar property, or the whole input as JSON.
    pub fn with_input_field(mut self, field: impl Into<String>) -> Self {
        self.input_field = Some(field.into());
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.core.set_provider(provider);
        self
    }

    pub fn with_preprocessor(mut self, f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.core.set_preprocessor(Arc::new(f));
        self
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn config(&self) -> &LlmConfig {
        self.core.config()
    }

    /// The full prompt: rendered template plus category list and response format.
    pub fn render_prompt(&self, input: &I) -> Result<String> {
        let mut value = self.core.prepare_input(input)?;
        if let Some(field) = &self.input_field {
            value = adapt_input(value, field);
        }
        Ok(self.decorate(&self.core.render(&value)))
    }

    pub fn clear_usage(&self) {
        self.core.clear_usage();
    }

    fn decorate(&self, rendered: &str) -> String {
        let listed: Vec<String> = self
            .categories
            .iter()
            .map(|c| match self.guidance.get(c) {
                Some(g) => format!("{c}: {g}"),
                None => c.clone(),
            })
            .collect();

        let quoted: Vec<String> = self.categories.iter().map(|c| format!("\"{c}\"")).collect();
        let mut shape = format!(
            "{{\"category\": {}, \"confidence\": <number between 0 and 1>",
            quoted.join(" | ")
        );
        if self.include_explanation {
            shape.push_str(", \"explanation\": \"<one or two sentences>\"");
        }
        shape.push('}');

        [
            rendered.to_string(),
            section("Categories", &numbered_list(&listed)),
            "Choose exactly one category from the list above.".to_string(),
            section("Response format", &format!("Respond with JSON only:\n{shape}")),
        ]
        .join("\n\n")
    }

    /// Interpret a model response: strict JSON first, then a text scan.
    pub fn parse_response(&self, raw: &str) -> Result<ClassificationResult> {
        let from_json = parse_json_value(raw).ok().and_then(|v| self.from_json(&v));
        let result = match from_json {
            Some(result) => result,
            None => {
                tracing::warn!(
                    node = self.core.name(),
                    "classification response was not valid JSON; scanning text"
                );
                self.from_text(raw)?
            }
        };

        if !(0.0..=1.0).contains(&result.confidence) {
            return Err(NodeError::Classification(format!(
                "confidence {} for '{}' is outside [0, 1]",
                result.confidence, result.category
            )));
        }
        Ok(result)
    }

    fn from_json(&self, value: &Value) -> Option<ClassificationResult> {
        let category = self.canonical(value.get("category")?.as_str()?)?;
        let confidence = match value.get("confidence") {
            Some(Value::Number(n)) => n.as_f64()?,
            Some(Value::String(s)) => s.trim().parse().ok()?,
            _ => DEFAULT_CONFIDENCE,
        };
        let explanation = if self.include_explanation {
            value
                .get("explanation")
                .and_then(Value::as_str)
                .map(str::to_string)
        } else {
            None
        };

        Some(ClassificationResult {
            category,
            confidence,
            explanation,
        })
    }

    fn from_text(&self, raw: &str) -> Result<ClassificationResult> {
        let lowered = raw.to_lowercase();
        let mut by_length: Vec<&String> = self.categories.iter().collect();
        by_length.sort_by_key(|c| std::cmp::Reverse(c.chars().count()));

        // Longest first, so "Unsafe" wins over its substring "Safe".
        let category = by_length
            .into_iter()
            .find(|c| lowered.contains(&c.to_lowercase()))
            .cloned()
            .ok_or_else(|| {
                NodeError::Classification(format!(
                    "no category found in response; expected one of [{}]",
                    self.categories.join(", ")
                ))
            })?;

        let confidence = CONFIDENCE
            .captures(raw)
            .and_then(|caps| caps[1].parse().ok())
            .unwrap_or(DEFAULT_CONFIDENCE);

        let explanation = if self.include_explanation {
            EXPLANATION
                .captures(raw)
                .map(|caps| caps[1].trim().to_string())
                .filter(|e| !e.is_empty())
        } else {
            None
        };

        Ok(ClassificationResult {
            category,
            confidence,
            explanation,
        })
    }

    fn canonical(&self, label: &str) -> Option<String> {
        let label = label.trim().to_lowercase();
        self.categories
            .iter()
            .find(|c| c.to_lowercase() == label)
            .cloned()
    }
}

/// Make sure `field` is present, deriving it from the input's shape.
fn adapt_input(value: Value, field: &str) -> Value {
    if value.get(field).is_some() {
        return value;
    }

    let derived = match &value {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("input")
            .or_else(|| map.get("content"))
            .or_else(|| {
                map.values()
                    .find(|v| matches!(v, Value::String(_) | Value::Number(_) | Value::Bool(_)))
            })
            .map(display_value)
            .unwrap_or_else(|| value.to_string()),
        other => display_value(other),
    };

    match value {
        Value::Object(mut map) => {
            map.insert(field.to_string(), Value::String(derived));
            Value::Object(map)
        }
        _ => {
            let mut map = Map::new();
            map.insert(field.to_string(), Value::String(derived));
            Value::Object(map)
        }
    }
}

#[async_trait]
impl<I> Executable for ClassificationNode<I>
where
    I: Serialize + Send + Sync + 'static,
{
    type Input = I;
    type Output = ClassificationResult;

    async fn execute(&self, input: I) -> Result<ClassificationResult> {
        let prompt = self.render_prompt(&input)?;
        let response = self.core.complete(&prompt).await?;
        let result = self.parse_response(&response.content)?;
        tracing::debug!(
            node = self.core.name(),
            category = %result.category,
            confidence = result.confidence,
            "classified"
        );
        Ok(result)
    }

    fn kind(&self) -> &'static str {
        "classification"
    }

    fn usage_records(&self) -> Vec<UsageRecord> {
        self.core.usage_records()
    }

    fn total_token_usage(&self) -> TokenTotals {
        self.core.total_token_usage()
    }
}
