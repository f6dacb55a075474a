//! The base LLM node.
//!
//! A [`Node`] combines a prompt template, a provider configuration, a
//! response parser and an optional input preprocessor. Execution is:
//!
//! ```text
//! input ──► serialize ──► preprocess ──► render ──► provider.invoke ──► record usage ──► parse
//! ```
//!
//! The base node never retries. Specialized nodes build on [`NodeCore`],
//! which carries everything except the parser.

use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::LlmConfig;
use crate::error::Result;
use crate::output_parser::ResponseParser;
use crate::pipeline::Executable;
use crate::provider::{self, Provider, ProviderResponse};
use crate::template::PromptTemplate;
use crate::usage::{TokenTotals, UsageLog, UsageRecord};

/// Input transform applied before rendering.
pub type Preprocessor = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Shared execution plumbing for every LLM-backed node.
///
/// Holds the template, configuration, provider handle, preprocessor and
/// usage log. Cloning shares the provider and the usage log.
pub struct NodeCore<I> {
    name: String,
    template: PromptTemplate,
    config: LlmConfig,
    provider: Arc<dyn Provider>,
    preprocessor: Option<Preprocessor>,
    usage: UsageLog,
    _input: PhantomData<fn(I)>,
}

impl<I> Clone for NodeCore<I> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            template: self.template.clone(),
            config: self.config.clone(),
            provider: Arc::clone(&self.provider),
            preprocessor: self.preprocessor.clone(),
            usage: self.usage.clone(),
            _input: PhantomData,
        }
    }
}

impl<I> std::fmt::Debug for NodeCore<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCore")
            .field("name", &self.name)
            .field("template", &self.template)
            .field("config", &self.config)
            .field("provider", &self.provider.name())
            .field("usage_records", &self.usage.len())
            .finish()
    }
}

impl<I: Serialize> NodeCore<I> {
    /// Build a core, resolving the provider from the configuration's tag.
    pub fn new(name: impl Into<String>, template: impl Into<PromptTemplate>, config: LlmConfig) -> Self {
        let provider = provider::for_config(&config);
        Self {
            name: name.into(),
            template: template.into(),
            config,
            provider,
            preprocessor: None,
            usage: UsageLog::new(),
            _input: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    pub fn set_provider(&mut self, provider: Arc<dyn Provider>) {
        self.provider = provider;
    }

    pub fn set_preprocessor(&mut self, preprocessor: Preprocessor) {
        self.preprocessor = Some(preprocessor);
    }

    /// Serialize the input and run the preprocessor over it.
    pub fn prepare_input(&self, input: &I) -> Result<Value> {
        let value = serde_json::to_value(input)?;
        Ok(match &self.preprocessor {
            Some(pre) => pre(value),
            None => value,
        })
    }

    /// Render the stored template against a prepared input.
    pub fn render(&self, input: &Value) -> String {
        self.template.render(input)
    }

    /// Send a prompt to the provider and record any reported usage.
    pub async fn complete(&self, prompt: &str) -> Result<ProviderResponse> {
        self.config.validate()?;

        tracing::debug!(
            node = %self.name,
            provider = self.provider.name(),
            model = self.config.model(),
            prompt_chars = prompt.len(),
            "invoking provider"
        );

        let response = self.provider.invoke(prompt, &self.config).await?;

        if let Some(usage) = response.usage {
            tracing::debug!(
                node = %self.name,
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "provider call complete"
            );
            self.usage.push(UsageRecord::now(
                self.config.provider(),
                self.config.model(),
                usage,
            ));
        }

        Ok(response)
    }

    pub fn usage_records(&self) -> Vec<UsageRecord> {
        self.usage.records()
    }

    pub fn clear_usage(&self) {
        self.usage.clear();
    }

    pub fn total_token_usage(&self) -> TokenTotals {
        self.usage.totals()
    }
}

/// A prompt template, provider configuration and parser.
///
/// # Example
///
/// ```no_run
/// use llm_nodes::{Executable, LlmConfig, Node};
/// use llm_nodes::output_parser::json_field_parser;
/// use serde_json::{json, Value};
///
/// # async fn run() -> llm_nodes::Result<()> {
/// let node = Node::<Value, String>::new(
///     "summarize",
///     "Summarize in one sentence: {{text}}",
///     LlmConfig::openai("gpt-4o-mini"),
///     json_field_parser("summary"),
/// );
/// let summary = node.execute(json!({"text": "..."})).await?;
/// # Ok(())
/// # }
/// ```
pub struct Node<I, O> {
    core: NodeCore<I>,
    parser: ResponseParser<O>,
}

impl<I, O> Clone for Node<I, O> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            parser: Arc::clone(&self.parser),
        }
    }
}

impl<I, O> std::fmt::Debug for Node<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("core", &self.core).finish()
    }
}

impl<I: Serialize, O> Node<I, O> {
    pub fn new(
        name: impl Into<String>,
        template: impl Into<PromptTemplate>,
        config: LlmConfig,
        parser: ResponseParser<O>,
    ) -> Self {
        Self {
            core: NodeCore::new(name, template, config),
            parser,
        }
    }

    /// Replace the environment-resolved provider.
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.core.set_provider(provider);
        self
    }

    pub fn with_preprocessor(mut self, f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.core.set_preprocessor(Arc::new(f));
        self
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn config(&self) -> &LlmConfig {
        self.core.config()
    }

    /// The prompt `execute` would send for this input.
    pub fn render_prompt(&self, input: &I) -> Result<String> {
        let value = self.core.prepare_input(input)?;
        Ok(self.core.render(&value))
    }

    pub fn usage_records(&self) -> Vec<UsageRecord> {
        self.core.usage_records()
    }

    /// Forget recorded usage. Clones of this node share the same log.
    pub fn clear_usage(&self) {
        self.core.clear_usage();
    }

    pub fn total_token_usage(&self) -> TokenTotals {
        self.core.total_token_usage()
    }
}

#[async_trait]
impl<I, O> Executable for Node<I, O>
where
    I: Serialize + Send + Sync + 'static,
    O: Send + 'static,
{
    type Input = I;
    type Output = O;

    async fn execute(&self, input: I) -> Result<O> {
        let prompt = self.render_prompt(&input)?;
        let response = self.core.complete(&prompt).await?;
        Ok((self.parser)(&response.content)?)
    }

    fn kind(&self) -> &'static str {
        "node"
    }

    fn usage_records(&self) -> Vec<UsageRecord> {
        self.core.usage_records()
    }

    fn total_token_usage(&self) -> TokenTotals {
        self.core.total_token_usage()
    }
}
