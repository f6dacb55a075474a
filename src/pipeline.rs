//! Pipeline composition.
//!
//! Every node family implements [`Executable`]. [`Executable::pipe`] chains
//! two units so the first one's typed output feeds the second, and the
//! composite reports the union of both sides' usage.
//!
//! ```ignore
//! let pipeline = summarize.pipe(classify);
//! let label = pipeline.execute(article).await?;
//! println!("{} tokens", pipeline.total_token_usage().total_tokens);
//! ```

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::usage::{TokenTotals, UsageRecord};

/// An asynchronous unit that turns an input into an output.
///
/// Usage accessors default to "no usage", so units that never call a
/// provider contribute zero to pipeline totals.
#[async_trait]
pub trait Executable: Send + Sync {
    type Input: Send + 'static;
    type Output: Send + 'static;

    async fn execute(&self, input: Self::Input) -> Result<Self::Output>;

    /// Short label for logs (`"node"`, `"classification"`, `"pipe"`, ...).
    fn kind(&self) -> &'static str;

    fn usage_records(&self) -> Vec<UsageRecord> {
        Vec::new()
    }

    fn total_token_usage(&self) -> TokenTotals {
        TokenTotals::from_records(&self.usage_records())
    }

    /// Chain `next` after this unit.
    fn pipe<N>(self, next: N) -> Pipe<Self, N>
    where
        Self: Sized,
        N: Executable<Input = Self::Output>,
    {
        Pipe {
            first: self,
            second: next,
        }
    }
}

/// Two units run in sequence.
#[derive(Clone)]
pub struct Pipe<A, B> {
    first: A,
    second: B,
}

impl<A, B> Pipe<A, B> {
    pub fn first(&self) -> &A {
        &self.first
    }

    pub fn second(&self) -> &B {
        &self.second
    }
}

#[async_trait]
impl<A, B> Executable for Pipe<A, B>
where
    A: Executable,
    B: Executable<Input = A::Output>,
{
    type Input = A::Input;
    type Output = B::Output;

    async fn execute(&self, input: A::Input) -> Result<B::Output> {
        let intermediate = self.first.execute(input).await?;
        self.second.execute(intermediate).await
    }

    fn kind(&self) -> &'static str {
        "pipe"
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

#[async_trait]
impl<E> Executable for Arc<E>
where
    E: Executable + ?Sized,
{
    type Input = E::Input;
    type Output = E::Output;

    async fn execute(&self, input: E::Input) -> Result<E::Output> {
        (**self).execute(input).await
    }

    fn kind(&self) -> &'static str {
        (**self).kind()
    }

    fn usage_records(&self) -> Vec<UsageRecord> {
        (**self).usage_records()
    }

    fn total_token_usage(&self) -> TokenTotals {
        (**self).total_token_usage()
    }
}
