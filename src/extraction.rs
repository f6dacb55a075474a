//! Named-field extraction from unstructured text.
//!
//! Two strategies:
//!
//! - [`ExtractionStrategy::Direct`]: one call returning a `{data, confidences, warnings}`
//!   envelope. Unparseable responses fall back to a per-field pattern scan.
//! - [`ExtractionStrategy::Iterative`]: one call per field. A failed field becomes a
//!   warning and the remaining fields are still attempted.
//!
//! Neither strategy fails on bad model output; problems are reported in
//! [`ExtractionResult::warnings`].

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::LlmConfig;
use crate::error::{NodeError, Result};
use crate::node::NodeCore;
use crate::output_parser::json::deserialize_value;
use crate::output_parser::parse_json_value;
use crate::pipeline::Executable;
use crate::provider::Provider;
use crate::template::{section, PromptTemplate};
use crate::usage::{TokenTotals, UsageRecord};

/// One field to pull out of the text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionField {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
    /// Defaults to `true`.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Free-form format hint, e.g. `"ISO 8601 date"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl ExtractionField {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            example: None,
            required: true,
            format: None,
        }
    }

    /// Missing values produce no warning.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.example = Some(example.into());
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    fn describe(&self) -> String {
        let mut line = format!(
            "- {} ({}): {}",
            self.name,
            if self.required { "required" } else { "optional" },
            self.description
        );
        if let Some(format) = &self.format {
            line.push_str(&format!(" Format: {format}."));
        }
        if let Some(example) = &self.example {
            line.push_str(&format!(" Example: {example}"));
        }
        line
    }
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStrategy {
    #[default]
    Direct,
    Iterative,
}

/// Extracted values plus best-effort diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidences: Option<HashMap<String, f64>>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ExtractionResult {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// Deserialize the extracted data into a typed struct.
    pub fn parse_data<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(deserialize_value(Value::Object(self.data.clone()))?)
    }
}

pub struct ExtractionNode<I> {
    core: NodeCore<I>,
    fields: Vec<ExtractionField>,
    strategy: ExtractionStrategy,
    include_confidence: bool,
}

impl<I> Clone for ExtractionNode<I> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            fields: self.fields.clone(),
            strategy: self.strategy,
            include_confidence: self.include_confidence,
        }
    }
}

impl<I: Serialize> ExtractionNode<I> {
    /// Fails with [`NodeError::InvalidConfig`] on an empty field list or a
    /// repeated field name.
    pub fn new(
        name: impl Into<String>,
        template: impl Into<PromptTemplate>,
        config: LlmConfig,
        fields: Vec<ExtractionField>,
    ) -> Result<Self> {
        if fields.is_empty() {
            return Err(NodeError::InvalidConfig(
                "extraction needs at least one field".into(),
            ));
        }
        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(NodeError::InvalidConfig(format!(
                    "duplicate extraction field '{}'",
                    field.name
                )));
            }
        }

        Ok(Self {
            core: NodeCore::new(name, template, config),
            fields,
            strategy: ExtractionStrategy::default(),
            include_confidence: true,
        })
    }

    pub fn with_strategy(mut self, strategy: ExtractionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Ask for per-field confidence scores (on by default).
    pub fn with_confidence(mut self, enabled: bool) -> Self {
        self.include_confidence = enabled;
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

    pub fn fields(&self) -> &[ExtractionField] {
        &self.fields
    }

    pub fn strategy(&self) -> ExtractionStrategy {
        self.strategy
    }

    /// The single-call prompt used by the direct strategy.
    pub fn render_prompt(&self, input: &I) -> Result<String> {
        let base = self.core.render(&self.core.prepare_input(input)?);
        Ok(self.direct_prompt(&base))
    }

    pub fn clear_usage(&self) {
        self.core.clear_usage();
    }

    fn direct_prompt(&self, base: &str) -> String {
        let table: Vec<String> = self.fields.iter().map(ExtractionField::describe).collect();
        let data: Vec<String> = self
            .fields
            .iter()
            .map(|f| format!("\"{}\": <value or null>", f.name))
            .collect();
        let mut envelope = format!("{{\"data\": {{{}}}", data.join(", "));
        if self.include_confidence {
            envelope.push_str(", \"confidences\": {\"<field>\": <number between 0 and 1>}");
        }
        envelope.push_str(", \"warnings\": [\"<anything uncertain or missing>\"]}");

        [
            base.to_string(),
            section("Fields to extract", &table.join("\n")),
            section(
                "Response format",
                &format!("Respond with JSON only:\n{envelope}\nUse null for fields the text does not contain."),
            ),
        ]
        .join("\n\n")
    }

    fn field_prompt(&self, base: &str, field: &ExtractionField) -> String {
        let shape = if self.include_confidence {
            "{\"value\": <value or null>, \"confidence\": <number between 0 and 1>}"
        } else {
            "{\"value\": <value or null>}"
        };
        [
            base.to_string(),
            section("Field to extract", &field.describe()),
            format!("Extract only the field '{}'. Respond with JSON only:\n{shape}", field.name),
        ]
        .join("\n\n")
    }

    /// Interpret a direct-strategy response. Never fails.
    pub fn parse_direct(&self, raw: &str) -> ExtractionResult {
        let mut result = match parse_json_value(raw) {
            Ok(Value::Object(envelope)) => from_envelope(envelope),
            _ => {
                tracing::warn!(
                    node = self.core.name(),
                    "extraction response was not valid JSON; scanning text per field"
                );
                let mut result = self.scan_fields(raw);
                result.warnings.insert(
                    0,
                    "response was not valid JSON; fields were recovered by pattern matching".into(),
                );
                result
            }
        };

        for field in self.fields.iter().filter(|f| f.required) {
            if result.data.get(&field.name).map_or(true, Value::is_null) {
                result
                    .warnings
                    .push(format!("required field '{}' is missing", field.name));
            }
        }
        result
    }

    fn scan_fields(&self, raw: &str) -> ExtractionResult {
        let mut data = Map::new();
        for field in &self.fields {
            let pattern = format!(
                r#"(?im)^\s*[-*]?\s*["']?{}["']?\s*[:=]\s*(.+?)\s*,?\s*$"#,
                regex::escape(&field.name)
            );
            let Ok(re) = Regex::new(&pattern) else {
                continue;
            };
            if let Some(caps) = re.captures(raw) {
                let value = caps[1].trim_matches(|c| c == '"' || c == '\'').trim();
                if !value.is_empty() && !value.eq_ignore_ascii_case("null") {
                    data.insert(field.name.clone(), Value::String(value.to_string()));
                }
            }
        }
        ExtractionResult {
            data,
            confidences: None,
            warnings: Vec::new(),
        }
    }

    async fn extract_direct(&self, base: &str) -> Result<ExtractionResult> {
        let response = self.core.complete(&self.direct_prompt(base)).await?;
        Ok(self.parse_direct(&response.content))
    }

    async fn extract_iterative(&self, base: &str) -> Result<ExtractionResult> {
        let mut result = ExtractionResult::default();
        let mut confidences = HashMap::new();

        for field in &self.fields {
            match self.extract_field(base, field).await {
                Ok((Some(value), confidence)) => {
                    result.data.insert(field.name.clone(), value);
                    if let Some(c) = confidence {
                        confidences.insert(field.name.clone(), c);
                    }
                }
                Ok((None, _)) if field.required => result
                    .warnings
                    .push(format!("required field '{}' was not found", field.name)),
                Ok((None, _)) => {}
                Err(err @ NodeError::InvalidConfig(_)) => return Err(err),
                Err(err) => {
                    tracing::warn!(
                        node = self.core.name(),
                        field = %field.name,
                        error = %err,
                        "field extraction failed"
                    );
                    result.warnings.push(if field.required {
                        format!("required field '{}' could not be extracted: {err}", field.name)
                    } else {
                        format!("field '{}' could not be extracted: {err}", field.name)
                    });
                }
            }
        }

        result.confidences = (!confidences.is_empty()).then_some(confidences);
        Ok(result)
    }

    async fn extract_field(
        &self,
        base: &str,
        field: &ExtractionField,
    ) -> Result<(Option<Value>, Option<f64>)> {
        let response = self.core.complete(&self.field_prompt(base, field)).await?;
        let (value, confidence) = match parse_json_value(&response.content)? {
            Value::Object(mut obj) if obj.contains_key("value") => {
                let confidence = obj.get("confidence").and_then(Value::as_f64);
                (obj.remove("value").unwrap_or(Value::Null), confidence)
            }
            other => (other, None),
        };
        Ok(((!value.is_null()).then_some(value), confidence))
    }
}

fn from_envelope(mut envelope: Map<String, Value>) -> ExtractionResult {
    let confidences = match envelope.remove("confidences") {
        Some(Value::Object(map)) => {
            let scores: HashMap<String, f64> = map
                .into_iter()
                .filter_map(|(k, v)| v.as_f64().map(|c| (k, c)))
                .collect();
            (!scores.is_empty()).then_some(scores)
        }
        _ => None,
    };
    let warnings = match envelope.remove("warnings") {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|w| w.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };
    // Tolerate a bare object without the `data` wrapper.
    let data = match envelope.remove("data") {
        Some(Value::Object(data)) => data,
        _ => envelope,
    };

    ExtractionResult {
        data,
        confidences,
        warnings,
    }
}

#[async_trait]
impl<I> Executable for ExtractionNode<I>
where
    I: Serialize + Send + Sync + 'static,
{
    type Input = I;
    type Output = ExtractionResult;

    async fn execute(&self, input: I) -> Result<ExtractionResult> {
        let base = self.core.render(&self.core.prepare_input(&input)?);
        let result = match self.strategy {
            ExtractionStrategy::Direct => self.extract_direct(&base).await?,
            ExtractionStrategy::Iterative => self.extract_iterative(&base).await?,
        };
        tracing::debug!(
            node = self.core.name(),
            fields = result.data.len(),
            warnings = result.warnings.len(),
            "extraction complete"
        );
        Ok(result)
    }

    fn kind(&self) -> &'static str {
        "extraction"
    }

    fn usage_records(&self) -> Vec<UsageRecord> {
        self.core.usage_records()
    }

    fn total_token_usage(&self) -> TokenTotals {
        self.core.total_token_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockProvider, MockReply};
    use serde_json::json;

    fn fields() -> Vec<ExtractionField> {
        vec![
            ExtractionField::new("title", "The book title").with_example("Dune"),
            ExtractionField::new("year", "Publication year")
                .optional()
                .with_format("four digits"),
            ExtractionField::new("author", "Author name"),
        ]
    }

    fn node(mock: Arc<MockProvider>) -> ExtractionNode<Value> {
        ExtractionNode::new("books", "Text: {{text}}", LlmConfig::openai("gpt-4o"), fields())
            .unwrap()
            .with_provider(mock)
    }

    #[test]
    fn fields_are_required_unless_marked_optional() {
        assert!(ExtractionField::new("title", "The title").required);
        assert!(!ExtractionField::new("title", "The title").optional().required);

        let field: ExtractionField =
            serde_json::from_value(json!({"name": "t", "description": "d"})).unwrap();
        assert!(field.required);
        let field: ExtractionField =
            serde_json::from_value(json!({"name": "t", "description": "d", "required": false})).unwrap();
        assert!(!field.required);
    }

    #[tokio::test]
    async fn unmarked_field_warns_when_missing() {
        let mock = Arc::new(MockProvider::fixed(r#"{"data": {"isbn": null}}"#));
        let node = ExtractionNode::<Value>::new(
            "isbn",
            "{{text}}",
            LlmConfig::openai("gpt-4o"),
            vec![ExtractionField::new("isbn", "The ISBN")],
        )
        .unwrap()
        .with_provider(mock);
        let out = node.execute(json!({"text": "no isbn here"})).await.unwrap();
        assert_eq!(out.warnings, vec!["required field 'isbn' is missing"]);
    }

    #[test]
    fn duplicate_fields_rejected() {
        let err = ExtractionNode::<Value>::new(
            "x",
            "t",
            LlmConfig::openai("m"),
            vec![ExtractionField::new("a", "one"), ExtractionField::new("a", "two")],
        )
        .err()
        .unwrap();
        assert!(matches!(err, NodeError::InvalidConfig(ref m) if m.contains("'a'")));
    }

    #[test]
    fn prompt_has_field_table_and_envelope() {
        let prompt = node(Arc::new(MockProvider::fixed("")))
            .render_prompt(&json!({"text": "..."}))
            .unwrap();
        assert!(prompt.starts_with("Text: ...\n\n## Fields to extract\n"));
        assert!(prompt.contains("- title (required): The book title Example: Dune"));
        assert!(prompt.contains("- year (optional): Publication year Format: four digits."));
        assert!(prompt.contains(r#"{"data": {"title": <value or null>"#));
        assert!(prompt.contains(r#""confidences""#));
    }

    #[tokio::test]
    async fn direct_envelope_with_missing_required() {
        let mock = Arc::new(MockProvider::fixed(
            r#"{"data": {"title": "Dune", "year": 1965, "author": null},
                "confidences": {"title": 0.95, "year": 0.8},
                "warnings": ["author not stated"]}"#,
        ));
        let out = node(mock).execute(json!({"text": "Dune (1965)"})).await.unwrap();

        assert_eq!(out.get("title"), Some(&json!("Dune")));
        assert_eq!(out.get("year"), Some(&json!(1965)));
        assert_eq!(out.confidences.as_ref().unwrap()["title"], 0.95);
        assert_eq!(
            out.warnings,
            vec!["author not stated", "required field 'author' is missing"]
        );
    }

    #[tokio::test]
    async fn direct_falls_back_to_pattern_scan() {
        let mock = Arc::new(MockProvider::fixed("Sure!\n- Title: \"Dune\"\nyear: 1965,\n"));
        let out = node(mock).execute(json!({"text": "x"})).await.unwrap();

        assert_eq!(out.get("title"), Some(&json!("Dune")));
        assert_eq!(out.get("year"), Some(&json!("1965")));
        assert!(out.confidences.is_none());
        assert_eq!(out.warnings.len(), 2);
        assert!(out.warnings[0].contains("pattern matching"));
        assert_eq!(out.warnings[1], "required field 'author' is missing");
    }

    #[tokio::test]
    async fn iterative_continues_past_failures() {
        let mock = Arc::new(MockProvider::scripted(vec![
            MockReply::text(r#"{"value": "Dune", "confidence": 0.9}"#),
            MockReply::text(r#"{"value": null}"#),
            MockReply::error("rate limited"),
        ]));
        let node = node(mock.clone()).with_strategy(ExtractionStrategy::Iterative);
        let out = node.execute(json!({"text": "Dune"})).await.unwrap();

        assert_eq!(mock.call_count(), 3);
        let prompts = mock.prompts();
        assert!(prompts[0].contains("Extract only the field 'title'"));
        assert!(prompts[2].contains("Extract only the field 'author'"));

        assert_eq!(out.data.len(), 1);
        assert_eq!(out.confidences.as_ref().unwrap()["title"], 0.9);
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].starts_with("required field 'author' could not be extracted"));
        assert!(out.warnings[0].contains("rate limited"));
    }

    #[tokio::test]
    async fn iterative_warns_for_every_failed_field() {
        let mock = Arc::new(MockProvider::scripted(vec![MockReply::error("down")]));
        let out = node(mock)
            .with_strategy(ExtractionStrategy::Iterative)
            .execute(json!({"text": "x"}))
            .await
            .unwrap();
        assert!(out.data.is_empty());
        assert_eq!(out.warnings.len(), 3);
        assert!(out.warnings[1].starts_with("field 'year'"));
    }

    #[tokio::test]
    async fn iterative_config_error_is_fatal() {
        let mock = Arc::new(MockProvider::fixed("{}"));
        let node = ExtractionNode::<Value>::new("x", "t", LlmConfig::openai(""), fields())
            .unwrap()
            .with_strategy(ExtractionStrategy::Iterative)
            .with_provider(mock.clone());
        assert!(matches!(
            node.execute(json!({})).await,
            Err(NodeError::InvalidConfig(_))
        ));
        assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn typed_data() {
        #[derive(Deserialize)]
        struct Book {
            title: String,
            year: u32,
        }
        let result = ExtractionResult {
            data: json!({"title": "Dune", "year": 1965}).as_object().cloned().unwrap(),
            ..Default::default()
        };
        let book: Book = result.parse_data().unwrap();
        assert_eq!((book.title.as_str(), book.year), ("Dune", 1965));
    }
}
