//! Token usage accounting.
//!
//! Every provider call that reports usage produces one [`UsageRecord`],
//! appended to the owning node's [`UsageLog`]. Usage extraction is
//! best-effort: a response without recognisable usage metadata yields `None`
//! and never fails the call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::ProviderKind;

/// Tokens consumed by one provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Reasoning or thinking tokens billed separately by some providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_tokens: Option<u64>,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            research_tokens: None,
        }
    }

    pub fn with_research_tokens(mut self, tokens: u64) -> Self {
        self.research_tokens = Some(tokens);
        self
    }
}

/// A timestamped usage entry for one provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub provider: ProviderKind,
    pub model: String,
    pub token_usage: TokenUsage,
}

impl UsageRecord {
    pub fn now(provider: ProviderKind, model: impl Into<String>, token_usage: TokenUsage) -> Self {
        Self {
            timestamp: Utc::now(),
            provider,
            model: model.into(),
            token_usage,
        }
    }
}

/// Summed usage across a set of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub research_tokens: u64,
    /// `input_tokens + output_tokens + research_tokens`.
    pub total_tokens: u64,
}

impl TokenTotals {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a UsageRecord>) -> Self {
        records
            .into_iter()
            .fold(TokenTotals::default(), |mut acc, record| {
                let usage = &record.token_usage;
                acc.input_tokens += usage.input_tokens;
                acc.output_tokens += usage.output_tokens;
                acc.research_tokens += usage.research_tokens.unwrap_or(0);
                acc.total_tokens = acc.input_tokens + acc.output_tokens + acc.research_tokens;
                acc
            })
    }
}

impl std::ops::Add for TokenTotals {
    type Output = TokenTotals;

    fn add(self, rhs: TokenTotals) -> TokenTotals {
        TokenTotals {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
            research_tokens: self.research_tokens + rhs.research_tokens,
            total_tokens: self.total_tokens + rhs.total_tokens,
        }
    }
}

/// Append-only usage history shared by clones of a node.
///
/// Appends from concurrent `execute` calls never interfere with each other;
/// their relative order in the log is unspecified.
#[derive(Debug, Clone, Default)]
pub struct UsageLog {
    records: Arc<Mutex<Vec<UsageRecord>>>,
}

impl UsageLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<UsageRecord>> {
        // A panic while holding the lock cannot leave a Vec half-pushed.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, record: UsageRecord) {
        self.lock().push(record);
    }

    pub fn records(&self) -> Vec<UsageRecord> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn totals(&self) -> TokenTotals {
        TokenTotals::from_records(self.lock().iter())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Pull token usage out of a raw provider response.
///
/// Recognised shapes, first match wins:
/// - `usage.prompt_tokens` / `usage.completion_tokens` (chat completions),
///   reasoning from `usage.completion_tokens_details.reasoning_tokens`,
///   subtracted from the completion count
/// - `usage.input_tokens` / `usage.output_tokens` (Responses API, Anthropic),
///   reasoning from `usage.output_tokens_details.reasoning_tokens`
/// - `usage_metadata.input_tokens` / `usage_metadata.output_tokens`
/// - `response_metadata.tokenUsage.promptTokens` / `completionTokens`
/// - `prompt_eval_count` / `eval_count` (Ollama)
pub fn extract_usage(raw: &Value) -> Option<TokenUsage> {
    let usage = raw.get("usage");

    if let Some(u) = usage {
        if let Some(parsed) = read_pair(u, "prompt_tokens", "completion_tokens") {
            return Some(with_reasoning(
                parsed,
                u.pointer("/completion_tokens_details/reasoning_tokens"),
            ));
        }
        if let Some(parsed) = read_pair(u, "input_tokens", "output_tokens") {
            return Some(with_reasoning(
                parsed,
                u.pointer("/output_tokens_details/reasoning_tokens"),
            ));
        }
    }

    if let Some(parsed) = raw
        .get("usage_metadata")
        .and_then(|m| read_pair(m, "input_tokens", "output_tokens"))
    {
        return Some(parsed);
    }

    if let Some(parsed) = raw
        .pointer("/response_metadata/tokenUsage")
        .and_then(|m| read_pair(m, "promptTokens", "completionTokens"))
    {
        return Some(parsed);
    }

    read_pair(raw, "prompt_eval_count", "eval_count")
}

/// Read an input/output pair; present when at least one side is a number.
fn read_pair(obj: &Value, input_key: &str, output_key: &str) -> Option<TokenUsage> {
    let input = obj.get(input_key).and_then(Value::as_u64);
    let output = obj.get(output_key).and_then(Value::as_u64);
    if input.is_none() && output.is_none() {
        return None;
    }
    Some(TokenUsage::new(input.unwrap_or(0), output.unwrap_or(0)))
}

/// OpenAI counts reasoning inside the output figure; move it to research
/// so `input + output + research` matches the billed total.
fn with_reasoning(mut usage: TokenUsage, reasoning: Option<&Value>) -> TokenUsage {
    match reasoning.and_then(Value::as_u64) {
        Some(tokens) if tokens > 0 => {
            let tokens = tokens.min(usage.output_tokens);
            usage.output_tokens -= tokens;
            if tokens > 0 {
                usage = usage.with_research_tokens(tokens);
            }
            usage
        }
        _ => usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(input: u64, output: u64, research: Option<u64>) -> UsageRecord {
        let mut usage = TokenUsage::new(input, output);
        usage.research_tokens = research;
        UsageRecord::now(ProviderKind::OpenAi, "gpt-4o", usage)
    }

    #[test]
    fn chat_completions_shape() {
        let raw = json!({"usage": {"prompt_tokens": 12, "completion_tokens": 30,
            "completion_tokens_details": {"reasoning_tokens": 8}}});
        assert_eq!(
            extract_usage(&raw),
            Some(TokenUsage::new(12, 22).with_research_tokens(8))
        );
    }

    #[test]
    fn reasoning_tokens_are_not_double_counted() {
        let raw = json!({"usage": {"prompt_tokens": 10, "completion_tokens": 30, "total_tokens": 40,
            "completion_tokens_details": {"reasoning_tokens": 20}}});
        let usage = extract_usage(&raw).unwrap();
        assert_eq!(usage, TokenUsage::new(10, 10).with_research_tokens(20));

        let totals = TokenTotals::from_records(&[UsageRecord::now(ProviderKind::OpenAi, "o3", usage)]);
        assert_eq!(totals.total_tokens, 40);
    }

    #[test]
    fn responses_and_anthropic_shape() {
        let raw = json!({"usage": {"input_tokens": 5, "output_tokens": 9}});
        assert_eq!(extract_usage(&raw), Some(TokenUsage::new(5, 9)));

        let raw = json!({"usage": {"input_tokens": 5, "output_tokens": 9,
            "output_tokens_details": {"reasoning_tokens": 4}}});
        let usage = extract_usage(&raw).unwrap();
        assert_eq!((usage.output_tokens, usage.research_tokens), (5, Some(4)));
    }

    #[test]
    fn zero_reasoning_is_not_research() {
        let raw = json!({"usage": {"prompt_tokens": 1, "completion_tokens": 1,
            "completion_tokens_details": {"reasoning_tokens": 0}}});
        assert_eq!(extract_usage(&raw).unwrap().research_tokens, None);
    }

    #[test]
    fn legacy_metadata_shapes() {
        let raw = json!({"usage_metadata": {"input_tokens": 3, "output_tokens": 4}});
        assert_eq!(extract_usage(&raw), Some(TokenUsage::new(3, 4)));

        let raw = json!({"response_metadata": {"tokenUsage": {"promptTokens": 7, "completionTokens": 2}}});
        assert_eq!(extract_usage(&raw), Some(TokenUsage::new(7, 2)));
    }

    #[test]
    fn ollama_shape() {
        let raw = json!({"response": "hi", "prompt_eval_count": 20, "eval_count": 6});
        assert_eq!(extract_usage(&raw), Some(TokenUsage::new(20, 6)));
    }

    #[test]
    fn absent_usage_is_none() {
        assert_eq!(extract_usage(&json!({"choices": []})), None);
        assert_eq!(extract_usage(&json!({"usage": {"foo": 1}})), None);
        assert_eq!(extract_usage(&json!("text")), None);
    }

    #[test]
    fn totals_include_research() {
        let totals = TokenTotals::from_records(&[record(10, 5, Some(3)), record(1, 1, None)]);
        assert_eq!(
            totals,
            TokenTotals {
                input_tokens: 11,
                output_tokens: 6,
                research_tokens: 3,
                total_tokens: 20,
            }
        );
    }

    #[test]
    fn totals_add() {
        let a = TokenTotals::from_records(&[record(1, 2, None)]);
        let b = TokenTotals::from_records(&[record(3, 4, Some(5))]);
        assert_eq!((a + b).total_tokens, a.total_tokens + b.total_tokens);
    }

    #[test]
    fn log_is_shared_between_clones() {
        let log = UsageLog::new();
        let clone = log.clone();
        clone.push(record(1, 1, None));
        assert_eq!(log.len(), 1);
        assert_eq!(log.totals().total_tokens, 2);
        log.clear();
        assert!(clone.is_empty());
    }

    #[test]
    fn record_serializes_with_timestamp() {
        let value = serde_json::to_value(record(1, 2, None)).unwrap();
        assert_eq!(value["provider"], "openai");
        assert!(value["timestamp"].is_string());
        assert!(value["token_usage"].get("research_tokens").is_none());
    }
}
