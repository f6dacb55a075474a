//! Multi-step reasoning.
//!
//! [`ChainNode`] issues one provider call per step. Every step prompt carries
//! the rendered task, strategy framing and all previous question/reasoning
//! pairs. The full trail is returned with the final output.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, LazyLock};

use crate::config::LlmConfig;
use crate::error::Result;
use crate::node::NodeCore;
use crate::output_parser::{parse_labeled_fields, text_parser, ResponseParser};
use crate::pipeline::Executable;
use crate::provider::Provider;
use crate::template::{section, PromptTemplate};
use crate::usage::{TokenTotals, UsageRecord};

pub const DEFAULT_MAX_STEPS: usize = 5;

static CONCLUSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:final\s+answer|conclusion)\s*:").expect("valid conclusion regex")
});

static REASONING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ims)^\s*reasoning\s*:\s*(.+)").expect("valid reasoning regex")
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainStrategy {
    #[default]
    Forward,
    Backward,
    Recursive,
}

impl ChainStrategy {
    fn framing(&self) -> &'static str {
        match self {
            ChainStrategy::Forward => {
                "Reason forward from what is given toward the answer, one step at a time."
            }
            ChainStrategy::Backward => {
                "Start from the goal and work backward, asking what must be true for it to hold."
            }
            ChainStrategy::Recursive => {
                "Split the problem into smaller sub-problems, solve each one, then combine the results."
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    /// 1-based.
    pub index: usize,
    pub question: String,
    pub reasoning: String,
}

impl ReasoningStep {
    /// Whether the reasoning opens with a `Final answer:` (or `Conclusion:`) marker.
    pub fn is_conclusion(&self) -> bool {
        CONCLUSION.is_match(&self.reasoning)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainResult<T> {
    pub steps: Vec<ReasoningStep>,
    pub output: T,
}

pub struct ChainNode<I, T = String> {
    core: NodeCore<I>,
    strategy: ChainStrategy,
    max_steps: usize,
    early_stop: bool,
    parser: ResponseParser<T>,
}

impl<I, T> Clone for ChainNode<I, T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            strategy: self.strategy,
            max_steps: self.max_steps,
            early_stop: self.early_stop,
            parser: Arc::clone(&self.parser),
        }
    }
}

impl<I: Serialize> ChainNode<I, String> {
    /// A forward chain of up to five steps whose output is the last step's
    /// reasoning text.
    pub fn new(name: impl Into<String>, template: impl Into<PromptTemplate>, config: LlmConfig) -> Self {
        Self {
            core: NodeCore::new(name, template, config),
            strategy: ChainStrategy::default(),
            max_steps: DEFAULT_MAX_STEPS,
            early_stop: true,
            parser: text_parser(),
        }
    }
}

impl<I: Serialize, T> ChainNode<I, T> {
    /// Parse the last step's reasoning with `parser` instead.
    pub fn with_output_parser<U>(self, parser: ResponseParser<U>) -> ChainNode<I, U> {
        ChainNode {
            core: self.core,
            strategy: self.strategy,
            max_steps: self.max_steps,
            early_stop: self.early_stop,
            parser,
        }
    }

    pub fn with_strategy(mut self, strategy: ChainStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// At least one step always runs.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Stop as soon as a step signals a conclusion (on by default).
    pub fn with_early_stop(mut self, enabled: bool) -> Self {
        self.early_stop = enabled;
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

    pub fn strategy(&self) -> ChainStrategy {
        self.strategy
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn clear_usage(&self) {
        self.core.clear_usage();
    }

    fn step_prompt(&self, task: &str, previous: &[ReasoningStep]) -> String {
        let mut parts = vec![task.to_string(), section("Approach", self.strategy.framing())];

        if !previous.is_empty() {
            let trail: Vec<String> = previous
                .iter()
                .map(|s| {
                    format!(
                        "Step {}\nQuestion: {}\nReasoning: {}",
                        s.index, s.question, s.reasoning
                    )
                })
                .collect();
            parts.push(section("Previous steps", &trail.join("\n\n")));
        }

        parts.push(format!(
            "This is step {} of at most {}. Answer in exactly this format:\n\
             Question: <the sub-question this step answers>\n\
             Reasoning: <your reasoning for this step>\n\
             When you have reached the answer, start the reasoning with \"Final answer:\".",
            previous.len() + 1,
            self.max_steps
        ));

        parts.join("\n\n")
    }
}

/// Read one step out of a model response.
///
/// Reasoning runs from its label to the end of the response; without a
/// label the whole response is the reasoning.
pub fn parse_step(index: usize, raw: &str) -> ReasoningStep {
    let fields = parse_labeled_fields(raw);
    let question = fields
        .iter()
        .find(|(label, _)| label.eq_ignore_ascii_case("question"))
        .map(|(_, value)| value.clone())
        .unwrap_or_default();
    let reasoning = REASONING
        .captures(raw)
        .map(|caps| caps[1].trim().to_string())
        .unwrap_or_else(|| raw.trim().to_string());

    ReasoningStep {
        index,
        question,
        reasoning,
    }
}

#[async_trait]
impl<I, T> Executable for ChainNode<I, T>
where
    I: Serialize + Send + Sync + 'static,
    T: Send + 'static,
{
    type Input = I;
    type Output = ChainResult<T>;

    async fn execute(&self, input: I) -> Result<ChainResult<T>> {
        let task = self.core.render(&self.core.prepare_input(&input)?);
        let mut steps: Vec<ReasoningStep> = Vec::new();

        while steps.len() < self.max_steps {
            let prompt = self.step_prompt(&task, &steps);
            let response = self.core.complete(&prompt).await?;
            let step = parse_step(steps.len() + 1, &response.content);
            let done = self.early_stop && step.is_conclusion();

            tracing::debug!(
                node = self.core.name(),
                step = step.index,
                done,
                "reasoning step complete"
            );
            steps.push(step);
            if done {
                break;
            }
        }

        let last = steps.last().map(|s| s.reasoning.as_str()).unwrap_or_default();
        let output = (self.parser)(last)?;
        Ok(ChainResult { steps, output })
    }

    fn kind(&self) -> &'static str {
        "chain"
    }

    fn usage_records(&self) -> Vec<UsageRecord> {
        self.core.usage_records()
    }

    fn total_token_usage(&self) -> TokenTotals {
        self.core.total_token_usage()
    }
}
