//! Mock provider for testing without a live LLM.
//!
//! [`MockProvider`] replays scripted replies in order, cycling when they run
//! out, and records every prompt it receives so tests can assert on the
//! rendered text.
//!
//! # Example
//!
//! ```
//! use llm_nodes::provider::MockProvider;
//!
//! let mock = MockProvider::new(vec!["first", "second"]);
//! assert!(mock.prompts().is_empty());
//! ```

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{Provider, ProviderResponse};
use crate::config::LlmConfig;
use crate::error::{NodeError, Result};
use crate::usage::TokenUsage;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    /// Fail the call with [`NodeError::Provider`].
    Error(String),
}

impl MockReply {
    pub fn text(content: impl Into<String>) -> Self {
        MockReply::Text(content.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        MockReply::Error(message.into())
    }
}

/// A provider that answers from a script.
#[derive(Debug)]
pub struct MockProvider {
    replies: Vec<MockReply>,
    index: AtomicUsize,
    usage: Option<TokenUsage>,
    prompts: Mutex<Vec<String>>,
}

impl MockProvider {
    /// Cycle through the given text responses.
    pub fn new<S: Into<String>>(responses: Vec<S>) -> Self {
        Self::scripted(responses.into_iter().map(MockReply::text).collect())
    }

    /// Always return the same response.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::scripted(vec![MockReply::text(response)])
    }

    /// Cycle through replies that may include failures.
    pub fn scripted(replies: Vec<MockReply>) -> Self {
        Self {
            replies,
            index: AtomicUsize::new(0),
            usage: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Report this usage on every successful call.
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn call_count(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn invoke(&self, prompt: &str, _config: &LlmConfig) -> Result<ProviderResponse> {
        match self.prompts.lock() {
            Ok(mut prompts) => prompts.push(prompt.to_string()),
            Err(poisoned) => poisoned.into_inner().push(prompt.to_string()),
        }

        let idx = self.index.fetch_add(1, Ordering::SeqCst);
        if self.replies.is_empty() {
            return Err(NodeError::Provider {
                provider: "mock",
                message: "no scripted replies".into(),
            });
        }

        match &self.replies[idx % self.replies.len()] {
            MockReply::Text(content) => Ok(ProviderResponse {
                content: content.clone(),
                usage: self.usage,
                thinking: None,
                raw: None,
            }),
            MockReply::Error(message) => Err(NodeError::Provider {
                provider: "mock",
                message: message.clone(),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
