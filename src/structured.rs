//! Schema-validated structured output with bounded retries.
//!
//! Each attempt parses the response as JSON, validates it against a
//! [`Schema`], then deserializes it into `T`. A validation failure
//! regenerates the prompt for the next attempt with the expected shape and
//! the concrete issues found; other failures (transport, unparseable JSON)
//! retry the original prompt. The stored template is never modified.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::config::LlmConfig;
use crate::error::{format_issues, NodeError, Result};
use crate::node::NodeCore;
use crate::output_parser::json::deserialize_value;
use crate::output_parser::{parse_json_value, ParseError};
use crate::pipeline::Executable;
use crate::provider::Provider;
use crate::schema::{Schema, ValidationIssue};
use crate::template::{section, PromptTemplate};
use crate::usage::{TokenTotals, UsageRecord};

pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Build the prompt for a retry after a schema failure.
///
/// Pure: depends only on its arguments, so a failed attempt never leaks
/// into the node's stored template.
pub fn retry_prompt(original: &str, schema: &dyn Schema, issues: &[ValidationIssue]) -> String {
    [
        original.to_string(),
        "Your previous response did not match the required JSON schema.".to_string(),
        section("Expected shape", &schema.describe()),
        section("Validation errors", &format_issues(issues)),
        "Respond with only a JSON value that matches the expected shape and fixes every error above."
            .to_string(),
    ]
    .join("\n\n")
}

enum AttemptFailure {
    /// Schema or shape mismatch: retry with a regenerated prompt.
    Invalid(Vec<ValidationIssue>),
    /// Transient or unparseable: retry with the original prompt.
    Retryable(NodeError),
    /// Never retried.
    Fatal(NodeError),
}

/// A node whose output must satisfy a schema.
pub struct StructuredOutputNode<I, T> {
    core: NodeCore<I>,
    schema: Arc<dyn Schema>,
    max_retries: u32,
    _output: PhantomData<fn() -> T>,
}

impl<I, T> Clone for StructuredOutputNode<I, T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            schema: Arc::clone(&self.schema),
            max_retries: self.max_retries,
            _output: PhantomData,
        }
    }
}

impl<I: Serialize, T: DeserializeOwned> StructuredOutputNode<I, T> {
    pub fn new(
        name: impl Into<String>,
        template: impl Into<PromptTemplate>,
        config: LlmConfig,
        schema: impl Schema + 'static,
    ) -> Self {
        Self {
            core: NodeCore::new(name, template, config),
            schema: Arc::new(schema),
            max_retries: DEFAULT_MAX_RETRIES,
            _output: PhantomData,
        }
    }

    /// Retries after the first attempt (default 2, so up to 3 calls).
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
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

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn render_prompt(&self, input: &I) -> Result<String> {
        Ok(self.core.render(&self.core.prepare_input(input)?))
    }

    pub fn clear_usage(&self) {
        self.core.clear_usage();
    }

    async fn attempt(&self, prompt: &str) -> std::result::Result<T, AttemptFailure> {
        let response = match self.core.complete(prompt).await {
            Ok(response) => response,
            Err(err @ NodeError::InvalidConfig(_)) => return Err(AttemptFailure::Fatal(err)),
            Err(err) => return Err(AttemptFailure::Retryable(err)),
        };

        let value = parse_json_value(&response.content)
            .map_err(|e| AttemptFailure::Retryable(e.into()))?;
        self.schema.validate(&value).map_err(AttemptFailure::Invalid)?;

        deserialize_value(value).map_err(|e| match e {
            ParseError::Deserialization { reason, .. } => {
                AttemptFailure::Invalid(vec![ValidationIssue::new("$", reason)])
            }
            other => AttemptFailure::Retryable(other.into()),
        })
    }
}

#[async_trait]
impl<I, T> Executable for StructuredOutputNode<I, T>
where
    I: Serialize + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
{
    type Input = I;
    type Output = T;

    async fn execute(&self, input: I) -> Result<T> {
        let original = self.render_prompt(&input)?;
        let total = self.max_retries + 1;
        let mut prompt = original.clone();
        let mut last_error = None;

        for attempt in 1..=total {
            match self.attempt(&prompt).await {
                Ok(value) => return Ok(value),
                Err(AttemptFailure::Fatal(err)) => return Err(err),
                Err(AttemptFailure::Invalid(issues)) => {
                    tracing::warn!(
                        node = self.core.name(),
                        attempt,
                        issues = issues.len(),
                        "structured output failed schema validation"
                    );
                    prompt = retry_prompt(&original, self.schema.as_ref(), &issues);
                    last_error = Some(NodeError::SchemaValidation {
                        attempts: attempt,
                        issues,
                    });
                }
                Err(AttemptFailure::Retryable(err)) => {
                    tracing::warn!(
                        node = self.core.name(),
                        attempt,
                        error = %err,
                        "structured output attempt failed"
                    );
                    prompt = original.clone();
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| NodeError::Other("no attempts were made".into())))
    }

    fn kind(&self) -> &'static str {
        "structured"
    }

    fn usage_records(&self) -> Vec<UsageRecord> {
        self.core.usage_records()
    }

    fn total_token_usage(&self) -> TokenTotals {
        self.core.total_token_usage()
    }
}
