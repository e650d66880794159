//! Whole-call timeout.

use super::{AsyncRequestStage, RequestStage};
use crate::error::AbortedError;
use crate::execution::ExecutionContext;
use crate::timeout::{disambiguate, TimeoutKind, TimeoutTracker};
use crate::Result;
use async_trait::async_trait;
use tracing::debug;

/// Bounds the whole call, retries and backoff included, by the configured
/// call timeout.
///
/// When the call timer fires the signal stays set, so anything still running
/// on behalf of the call observes the cancellation.
#[derive(Debug, Clone)]
pub struct ApiCallTimeoutStage<S> {
    inner: S,
}

impl<S> ApiCallTimeoutStage<S> {
    /// Wrap the rest of the pipeline.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

fn arm(context: &mut ExecutionContext) -> TimeoutTracker {
    let config = context.config().clone();
    let tracker = TimeoutTracker::start(
        TimeoutKind::ApiCall,
        config.api_call_timeout,
        &config.scheduler,
        context.signal(),
    );
    context.set_call_timeout_tracker(tracker.clone());
    tracker
}

fn settle<O>(tracker: &TimeoutTracker, result: Result<O>, context: &ExecutionContext) -> Result<O> {
    tracker.cancel();
    match result {
        Ok(output) => {
            if tracker.has_executed() {
                debug!("Call completed after its timeout fired");
                context.signal().clear();
            }
            Ok(output)
        }
        Err(error) => Err(disambiguate(
            error,
            tracker,
            context.attempt_timeout_tracker(),
            context.signal(),
        )),
    }
}

impl<S, I, O> RequestStage<I, O> for ApiCallTimeoutStage<S>
where
    S: RequestStage<I, O>,
{
    fn execute(&self, input: I, context: &mut ExecutionContext) -> Result<O> {
        let tracker = arm(context);
        let result = self.inner.execute(input, context);
        settle(&tracker, result, context)
    }
}

#[async_trait]
impl<S, I, O> AsyncRequestStage<I, O> for ApiCallTimeoutStage<S>
where
    I: Send + 'static,
    O: Send + 'static,
    S: AsyncRequestStage<I, O>,
{
    async fn execute(&self, input: I, context: &mut ExecutionContext) -> Result<O> {
        let tracker = arm(context);
        let signal = context.signal().clone();
        let result = {
            let call = self.inner.execute(input, context);
            tokio::select! {
                biased;
                result = call => result,
                _ = signal.cancelled() => Err(AbortedError::Interrupted.into()),
            }
        };
        settle(&tracker, result, context)
    }
}
