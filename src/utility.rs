//! Data-shaping units that never call a provider.
//!
//! - [`ContextNode`] combines the input with a static or asynchronously
//!   produced context value.
//! - [`MergeNode`] combines a tuple (or list) of upstream results.
//! - [`FanOut`] and [`FanOutPair`] run sources concurrently on the same input
//!   and feed their results, in declaration order, to a merge combiner. This
//!   is the only place the crate executes units in parallel.

use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

use crate::error::Result;
use crate::pipeline::Executable;
use crate::usage::{TokenTotals, UsageRecord};

type ContextFn<I, C> = Arc<dyn Fn(&I) -> BoxFuture<'static, Result<C>> + Send + Sync>;

enum ContextSource<I, C> {
    Static(C),
    Dynamic(ContextFn<I, C>),
}

impl<I, C: Clone> Clone for ContextSource<I, C> {
    fn clone(&self) -> Self {
        match self {
            ContextSource::Static(c) => ContextSource::Static(c.clone()),
            ContextSource::Dynamic(f) => ContextSource::Dynamic(Arc::clone(f)),
        }
    }
}

/// Inject context into the input.
///
/// ```ignore
/// let with_style = ContextNode::with_static(json!({"tone": "formal"}), |input: Value, ctx: Value| {
///     json!({"text": input, "tone": ctx["tone"]})
/// });
/// ```
pub struct ContextNode<I, C, O> {
    source: ContextSource<I, C>,
    combiner: Arc<dyn Fn(I, C) -> O + Send + Sync>,
}

impl<I, C: Clone, O> Clone for ContextNode<I, C, O> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            combiner: Arc::clone(&self.combiner),
        }
    }
}

impl<I, C, O> ContextNode<I, C, O> {
    /// Combine every input with a clone of `context`.
    pub fn with_static(context: C, combiner: impl Fn(I, C) -> O + Send + Sync + 'static) -> Self {
        Self {
            source: ContextSource::Static(context),
            combiner: Arc::new(combiner),
        }
    }

    /// Produce the context per call. `source` sees the input and returns an
    /// owned future; its error aborts the call.
    pub fn with_source<F, Fut>(source: F, combiner: impl Fn(I, C) -> O + Send + Sync + 'static) -> Self
    where
        I: 'static,
        C: 'static,
        F: Fn(&I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<C>> + Send + 'static,
    {
        Self {
            source: ContextSource::Dynamic(Arc::new(move |input: &I| source(input).boxed())),
            combiner: Arc::new(combiner),
        }
    }
}

#[async_trait]
impl<I, C, O> Executable for ContextNode<I, C, O>
where
    I: Send + 'static,
    C: Clone + Send + Sync + 'static,
    O: Send + 'static,
{
    type Input = I;
    type Output = O;

    async fn execute(&self, input: I) -> Result<O> {
        let context = match &self.source {
            ContextSource::Static(c) => c.clone(),
            ContextSource::Dynamic(f) => f(&input).await?,
        };
        Ok((self.combiner)(input, context))
    }

    fn kind(&self) -> &'static str {
        "context"
    }
}

/// Combine upstream results with a pure function.
pub struct MergeNode<T, O> {
    combiner: Arc<dyn Fn(T) -> O + Send + Sync>,
}

impl<T, O> Clone for MergeNode<T, O> {
    fn clone(&self) -> Self {
        Self {
            combiner: Arc::clone(&self.combiner),
        }
    }
}

impl<T, O> MergeNode<T, O> {
    pub fn new(combiner: impl Fn(T) -> O + Send + Sync + 'static) -> Self {
        Self {
            combiner: Arc::new(combiner),
        }
    }

    pub fn merge(&self, inputs: T) -> O {
        (self.combiner)(inputs)
    }
}

impl<V, O> MergeNode<Vec<V>, O> {
    /// Run every source concurrently on a clone of the input, then merge
    /// their outputs in declaration order.
    pub fn create_pipeline<I>(
        sources: Vec<Arc<dyn Executable<Input = I, Output = V>>>,
        combiner: impl Fn(Vec<V>) -> O + Send + Sync + 'static,
    ) -> FanOut<I, V, O> {
        FanOut {
            sources,
            merge: MergeNode::new(combiner),
        }
    }
}

impl<A, B, O> MergeNode<(A, B), O> {
    /// Two sources with different output types.
    pub fn pair<SA, SB>(
        first: SA,
        second: SB,
        combiner: impl Fn((A, B)) -> O + Send + Sync + 'static,
    ) -> FanOutPair<SA, SB, O>
    where
        SA: Executable<Output = A>,
        SB: Executable<Input = SA::Input, Output = B>,
    {
        FanOutPair {
            first,
            second,
            merge: MergeNode::new(combiner),
        }
    }
}

#[async_trait]
impl<T, O> Executable for MergeNode<T, O>
where
    T: Send + 'static,
    O: Send + 'static,
{
    type Input = T;
    type Output = O;

    async fn execute(&self, input: T) -> Result<O> {
        Ok(self.merge(input))
    }

    fn kind(&self) -> &'static str {
        "merge"
    }
}

/// Homogeneous fan-out followed by a merge.
pub struct FanOut<I, V, O> {
    sources: Vec<Arc<dyn Executable<Input = I, Output = V>>>,
    merge: MergeNode<Vec<V>, O>,
}

impl<I, V, O> Clone for FanOut<I, V, O> {
    fn clone(&self) -> Self {
        Self {
            sources: self.sources.clone(),
            merge: self.merge.clone(),
        }
    }
}

impl<I, V, O> FanOut<I, V, O> {
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
impl<I, V, O> Executable for FanOut<I, V, O>
where
    I: Clone + Send + Sync + 'static,
    V: Send + 'static,
    O: Send + 'static,
{
    type Input = I;
    type Output = O;

    async fn execute(&self, input: I) -> Result<O> {
        tracing::debug!(sources = self.sources.len(), "fan-out start");
        // Every source settles before the first error (in declaration order) is reported.
        let settled = join_all(self.sources.iter().map(|s| s.execute(input.clone()))).await;
        let values = settled.into_iter().collect::<Result<Vec<V>>>()?;
        Ok(self.merge.merge(values))
    }

    fn kind(&self) -> &'static str {
        "fan_out"
    }

    fn usage_records(&self) -> Vec<UsageRecord> {
        self.sources.iter().flat_map(|s| s.usage_records()).collect()
    }

    fn total_token_usage(&self) -> TokenTotals {
        self.sources
            .iter()
            .fold(TokenTotals::default(), |acc, s| acc + s.total_token_usage())
    }
}

/// Fan-out over two heterogeneous sources.
pub struct FanOutPair<SA, SB, O>
where
    SA: Executable,
    SB: Executable,
{
    first: SA,
    second: SB,
    merge: MergeNode<(SA::Output, SB::Output), O>,
}

#[async_trait]
impl<SA, SB, O> Executable for FanOutPair<SA, SB, O>
where
    SA: Executable,
    SA::Input: Clone + Sync,
    SB: Executable<Input = SA::Input>,
    O: Send + 'static,
{
    type Input = SA::Input;
    type Output = O;

    async fn execute(&self, input: SA::Input) -> Result<O> {
        let (a, b) = futures::join!(self.first.execute(input.clone()), self.second.execute(input));
        Ok(self.merge.merge((a?, b?)))
    }

    fn kind(&self) -> &'static str {
        "fan_out"
    }

    fn usage_records(&self) -> Vec<UsageRecord> {
        let mut records = self.first.usage_records();
        records.extend(self.second.usage_records());
        records
    }

    fn total_token_usage(&self) -> TokenTotals {
        self.first.total_token_usage() + self.second.total_token_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use crate::error::NodeError;
    use crate::node::Node;
    use crate::output_parser::{json_parser, text_parser};
    use crate::provider::MockProvider;
    use crate::usage::TokenUsage;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn json_node(response: &str, usage: TokenUsage) -> Arc<dyn Executable<Input = Value, Output = Value>> {
        Arc::new(
            Node::<Value, Value>::new("src", "{{q}}", LlmConfig::openai("gpt-4o"), json_parser())
                .with_provider(Arc::new(MockProvider::fixed(response).with_usage(usage))),
        )
    }

    fn merge_objects(parts: Vec<Value>) -> Value {
        let mut merged = serde_json::Map::new();
        for part in parts {
            if let Value::Object(map) = part {
                merged.extend(map);
            }
        }
        Value::Object(merged)
    }

    struct Delayed {
        ms: u64,
        value: &'static str,
    }

    #[async_trait]
    impl Executable for Delayed {
        type Input = ();
        type Output = String;

        async fn execute(&self, _: ()) -> Result<String> {
            tokio::time::sleep(Duration::from_millis(self.ms)).await;
            if self.value == "fail" {
                return Err(NodeError::Other(format!("failed after {}ms", self.ms)));
            }
            Ok(self.value.to_string())
        }

        fn kind(&self) -> &'static str {
            "delayed"
        }
    }

    #[tokio::test]
    async fn fan_out_merges_objects() {
        let pipeline = MergeNode::create_pipeline(
            vec![
                json_node(r#"{"x": 1}"#, TokenUsage::new(2, 3)),
                json_node(r#"{"y": 2}"#, TokenUsage::new(4, 5)),
            ],
            merge_objects,
        );
        let out = pipeline.execute(json!({"q": "go"})).await.unwrap();
        assert_eq!(out, json!({"x": 1, "y": 2}));
        assert_eq!(pipeline.usage_records().len(), 2);
        assert_eq!(pipeline.total_token_usage().total_tokens, 14);
    }

    #[tokio::test]
    async fn results_follow_declaration_order() {
        let sources: Vec<Arc<dyn Executable<Input = (), Output = String>>> = vec![
            Arc::new(Delayed { ms: 40, value: "slow" }),
            Arc::new(Delayed { ms: 1, value: "fast" }),
        ];
        let pipeline = MergeNode::create_pipeline(sources, |parts: Vec<String>| parts.join(","));
        assert_eq!(pipeline.execute(()).await.unwrap(), "slow,fast");
    }

    #[tokio::test]
    async fn first_declared_error_wins() {
        let sources: Vec<Arc<dyn Executable<Input = (), Output = String>>> = vec![
            Arc::new(Delayed { ms: 1, value: "ok" }),
            Arc::new(Delayed { ms: 30, value: "fail" }),
            Arc::new(Delayed { ms: 5, value: "fail" }),
        ];
        let pipeline = MergeNode::create_pipeline(sources, |parts: Vec<String>| parts.len());
        let err = pipeline.execute(()).await.unwrap_err();
        assert_eq!(err.to_string(), "failed after 30ms");
    }

    #[tokio::test]
    async fn pair_combines_heterogeneous_outputs() {
        let count = Node::<Value, Value>::new("count", "{{q}}", LlmConfig::openai("m"), json_parser())
            .with_provider(Arc::new(MockProvider::fixed("[1, 2, 3]")));
        let label = Node::<Value, String>::new("label", "{{q}}", LlmConfig::openai("m"), text_parser())
            .with_provider(Arc::new(MockProvider::fixed("  numbers ")));

        let pipeline = MergeNode::pair(count, label, |(list, name): (Value, String)| {
            format!("{name}: {}", list.as_array().map_or(0, Vec::len))
        });
        assert_eq!(pipeline.execute(json!({"q": "?"})).await.unwrap(), "numbers: 3");
        assert_eq!(pipeline.kind(), "fan_out");
    }

    #[tokio::test]
    async fn merge_node_on_tuple() {
        let merge = MergeNode::new(|(a, b): (i64, i64)| a + b);
        assert_eq!(merge.execute((2, 3)).await.unwrap(), 5);
        assert!(merge.usage_records().is_empty());
    }

    #[tokio::test]
    async fn static_context_is_injected() {
        let node = ContextNode::with_static(json!({"tone": "formal"}), |input: Value, ctx: Value| {
            json!({"text": input, "tone": ctx["tone"]})
        });
        let out = node.execute(json!("hello")).await.unwrap();
        assert_eq!(out, json!({"text": "hello", "tone": "formal"}));
        assert_eq!(node.kind(), "context");
    }

    #[tokio::test]
    async fn async_context_sees_input() {
        let node = ContextNode::with_source(
            |input: &String| {
                let key = input.clone();
                async move { Ok::<_, NodeError>(format!("docs about {key}")) }
            },
            |input: String, ctx: String| format!("{input} | {ctx}"),
        );
        assert_eq!(node.execute("rust".into()).await.unwrap(), "rust | docs about rust");
    }

    #[tokio::test]
    async fn context_errors_propagate() {
        let node = ContextNode::with_source(
            |_: &()| async { Err::<String, _>(NodeError::Other("lookup failed".into())) },
            |_: (), ctx: String| ctx,
        );
        assert!(node.execute(()).await.is_err());
    }

    #[tokio::test]
    async fn fan_out_feeds_downstream_pipe() {
        let fan = MergeNode::create_pipeline(
            vec![json_node(r#"{"a": 1}"#, TokenUsage::new(1, 1))],
            merge_objects,
        );
        let tail = MergeNode::new(|v: Value| v["a"].as_i64().unwrap_or_default());
        assert_eq!(fan.pipe(tail).execute(json!({})).await.unwrap(), 1);
    }
}
