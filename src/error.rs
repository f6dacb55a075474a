use crate::output_parser::ParseError;
use crate::schema::ValidationIssue;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by nodes, providers, and pipelines.
#[derive(Error, Debug)]
pub enum NodeError {
    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON (de)serialization failed at the serde level.
    #[error("JSON processing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration: duplicate categories or fields, a missing
    /// required provider field, a missing API key. Never retried.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The model output could not be parsed.
    #[error("Failed to parse model output: {0}")]
    Parse(#[from] ParseError),

    /// HTTP error with status code, response body, and optional Retry-After hint.
    ///
    /// Returned by [`Provider`](crate::provider::Provider) implementations when
    /// the vendor API answers with a non-success status.
    #[error("HTTP {status}: {body}")]
    HttpError {
        /// HTTP status code (e.g. 404, 429, 503).
        status: u16,
        /// Response body text.
        body: String,
        /// Parsed `Retry-After` header value, if present.
        retry_after: Option<Duration>,
    },

    /// The provider answered, but the answer was unusable.
    #[error("Provider '{provider}' failed: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },

    /// Structured output still failed schema validation after every retry.
    #[error("Schema validation failed after {attempts} attempt(s):\n{}", format_issues(.issues))]
    SchemaValidation {
        attempts: u32,
        issues: Vec<ValidationIssue>,
    },

    /// A classification result was out of range or named an unknown category.
    #[error("Classification failed: {0}")]
    Classification(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl NodeError {
    /// Whether the error is a schema-validation failure (drives prompt regeneration on retry).
    pub fn is_schema_validation(&self) -> bool {
        matches!(self, NodeError::SchemaValidation { .. })
    }
}

impl From<anyhow::Error> for NodeError {
    fn from(err: anyhow::Error) -> Self {
        NodeError::Other(err.to_string())
    }
}

/// Render validation issues as `- path: message` lines.
pub(crate) fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("- {}: {}", issue.path, issue.message))
        .collect::<Vec<_>>()
        .join("\n")
}

pub type Result<T> = std::result::Result<T, NodeError>;
