//! # LLM Nodes
//!
//! Composable LLM nodes: a prompt template, a provider configuration and a
//! response parser bundled into one typed, awaitable unit.
//!
//! ## Core Concepts
//!
//! - **[`Node`]**: renders a template against the input, calls the configured
//!   provider, records token usage and parses the response.
//! - **[`Executable`]**: the async trait every unit implements. `a.pipe(b)`
//!   feeds `a`'s typed output into `b` and aggregates both sides' usage.
//! - **[`LlmConfig`]**: a tagged union over OpenAI, Anthropic and Ollama
//!   settings; each provider only accepts its own fields.
//! - **[`Provider`]**: the network seam. Streaming is drained internally, so
//!   callers always get the full text.
//! - Specialized nodes: [`StructuredOutputNode`] (schema-validated retry),
//!   [`ClassificationNode`], [`ExtractionNode`], [`ChainNode`], plus the
//!   provider-free [`ContextNode`] and [`MergeNode`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use llm_nodes::{Executable, LlmConfig, Node, ClassificationNode};
//! use llm_nodes::output_parser::text_parser;
//! use serde_json::{json, Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let summarize = Node::<Value, String>::new(
//!         "summarize",
//!         "Summarize in one sentence: {{text}}",
//!         LlmConfig::openai("gpt-4o-mini"),
//!         text_parser(),
//!     );
//!     let classify = ClassificationNode::<String>::new(
//!         "sentiment",
//!         "What is the sentiment of: {{text}}",
//!         LlmConfig::anthropic("claude-sonnet-4-5", 512),
//!         ["Positive", "Neutral", "Negative"],
//!     )?
//!     .with_input_field("text");
//!
//!     let pipeline = summarize.pipe(classify);
//!     let label = pipeline.execute(json!({"text": "The launch went great."})).await?;
//!     println!("{} ({:.2})", label.category, label.confidence);
//!     println!("{} tokens", pipeline.total_token_usage().total_tokens);
//!     Ok(())
//! }
//! ```

pub mod chain;
pub mod classification;
pub mod config;
pub mod error;
pub mod extraction;
pub mod node;
pub mod output_parser;
pub mod pipeline;
pub mod provider;
pub mod schema;
pub mod structured;
pub mod template;
pub mod usage;
pub mod utility;

pub use chain::{ChainNode, ChainResult, ChainStrategy, ReasoningStep};
pub use classification::{ClassificationNode, ClassificationResult};
pub use config::{AnthropicConfig, LlmConfig, OllamaConfig, OpenAiConfig, ProviderKind, ReasoningEffort};
pub use error::{NodeError, Result};
pub use extraction::{ExtractionField, ExtractionNode, ExtractionResult, ExtractionStrategy};
pub use node::{Node, NodeCore};
pub use output_parser::{ParseError, ResponseParser};
pub use pipeline::{Executable, Pipe};
pub use provider::{BackoffConfig, MockProvider, Provider, ProviderResponse};
pub use schema::{FieldShape, JsonShape, Schema, ValidationIssue};
pub use structured::StructuredOutputNode;
pub use template::{render, PromptTemplate};
pub use usage::{TokenTotals, TokenUsage, UsageLog, UsageRecord};
pub use utility::{ContextNode, FanOut, FanOutPair, MergeNode};
