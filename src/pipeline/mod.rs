//! Composable request-execution stages.
//!
//! A stage turns an input into an output given the call's
//! [`ExecutionContext`]. Wrapping stages hold the next stage and decorate
//! it; request-to-request stages are joined to the rest with [`Chain`].
//!
//! Every stage type implements [`RequestStage`] (blocking) and, where it
//! makes sense, [`AsyncRequestStage`] (non-blocking) over the same decision
//! logic, so the two execution models behave the same.

mod api_call;
mod attempt;
mod checksum;
mod reporting;
mod retry;
mod signing;
mod transmit;

pub use api_call::ApiCallTimeoutStage;
pub use attempt::AttemptTimeoutStage;
pub use checksum::{ClientType, HttpChecksumStage};
pub use reporting::FailureReportingStage;
pub use retry::{RetryStage, INVOCATION_ID_HEADER, SDK_REQUEST_HEADER};
pub use signing::SigningStage;
pub use transmit::TransmitStage;

use crate::execution::ExecutionContext;
use crate::Result;
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;

/// A blocking stage.
pub trait RequestStage<I, O>: Send + Sync {
    /// Run the stage on the calling thread.
    fn execute(&self, input: I, context: &mut ExecutionContext) -> Result<O>;
}

/// A non-blocking stage.
#[async_trait]
pub trait AsyncRequestStage<I, O>: Send + Sync
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Run the stage.
    async fn execute(&self, input: I, context: &mut ExecutionContext) -> Result<O>;
}

impl<I, O, S> RequestStage<I, O> for Arc<S>
where
    S: RequestStage<I, O> + ?Sized,
{
    fn execute(&self, input: I, context: &mut ExecutionContext) -> Result<O> {
        (**self).execute(input, context)
    }
}

#[async_trait]
impl<I, O, S> AsyncRequestStage<I, O> for Arc<S>
where
    I: Send + 'static,
    O: Send + 'static,
    S: AsyncRequestStage<I, O> + ?Sized,
{
    async fn execute(&self, input: I, context: &mut ExecutionContext) -> Result<O> {
        (**self).execute(input, context).await
    }
}

/// Runs `first`, then feeds its output to `second`.
pub struct Chain<A, B, M> {
    first: A,
    second: B,
    _intermediate: PhantomData<fn(M)>,
}

impl<A, B, M> Chain<A, B, M> {
    /// Join two stages.
    pub fn new(first: A, second: B) -> Self {
        Self {
            first,
            second,
            _intermediate: PhantomData,
        }
    }
}

impl<I, M, O, A, B> RequestStage<I, O> for Chain<A, B, M>
where
    A: RequestStage<I, M>,
    B: RequestStage<M, O>,
{
    fn execute(&self, input: I, context: &mut ExecutionContext) -> Result<O> {
        let intermediate = self.first.execute(input, context)?;
        self.second.execute(intermediate, context)
    }
}

#[async_trait]
impl<I, M, O, A, B> AsyncRequestStage<I, O> for Chain<A, B, M>
where
    I: Send + 'static,
    M: Send + 'static,
    O: Send + 'static,
    A: AsyncRequestStage<I, M>,
    B: AsyncRequestStage<M, O>,
{
    async fn execute(&self, input: I, context: &mut ExecutionContext) -> Result<O> {
        let intermediate = self.first.execute(input, context).await?;
        self.second.execute(intermediate, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::execution::{InterceptorChain, SdkRequest};
    use crate::http::HttpRequest;

    struct AddHeader(&'static str);

    impl RequestStage<HttpRequest, HttpRequest> for AddHeader {
        fn execute(&self, input: HttpRequest, _context: &mut ExecutionContext) -> Result<HttpRequest> {
            Ok(input.with_header(self.0, "1"))
        }
    }

    #[async_trait]
    impl AsyncRequestStage<HttpRequest, HttpRequest> for AddHeader {
        async fn execute(
            &self,
            input: HttpRequest,
            _context: &mut ExecutionContext,
        ) -> Result<HttpRequest> {
            Ok(input.with_header(self.0, "1"))
        }
    }

    struct CountHeaders;

    impl RequestStage<HttpRequest, usize> for CountHeaders {
        fn execute(&self, input: HttpRequest, _context: &mut ExecutionContext) -> Result<usize> {
            Ok(input.headers.len())
        }
    }

    fn context() -> ExecutionContext {
        ExecutionContext::new(
            SdkRequest::new(HttpRequest::new("GET", "https://example.com")),
            Arc::new(ClientConfig::builder().build().unwrap()),
            InterceptorChain::default(),
        )
    }

    #[test]
    fn test_chain_runs_in_order() {
        let chain: Chain<_, Chain<_, _, HttpRequest>, HttpRequest> =
            Chain::new(AddHeader("a"), Chain::new(AddHeader("b"), CountHeaders));
        let count = RequestStage::execute(
            &chain,
            HttpRequest::new("GET", "https://example.com"),
            &mut context(),
        )
        .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_async_chain_runs_in_order() {
        let chain: Chain<_, _, HttpRequest> = Chain::new(AddHeader("a"), AddHeader("b"));
        let request = AsyncRequestStage::execute(
            &chain,
            HttpRequest::new("GET", "https://example.com"),
            &mut context(),
        )
        .await
        .unwrap();
        assert!(request.has_header("a") && request.has_header("b"));
    }
}
