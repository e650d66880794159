//! Per-attempt timeout.

use super::{AsyncRequestStage, RequestStage};
use crate::error::AbortedError;
use crate::execution::ExecutionContext;
use crate::timeout::{disambiguate, TimeoutKind, TimeoutTracker};
use crate::Result;
use async_trait::async_trait;

/// Bounds a single attempt by the configured attempt timeout.
///
/// A fresh tracker is armed for every attempt and installed on the context
/// so the call-level stage can tell the two timers apart. When the attempt
/// timer fires the signal is cleared again before control leaves the stage,
/// whatever the attempt produced, leaving the next attempt free to run.
#[derive(Debug, Clone)]
pub struct AttemptTimeoutStage<S> {
    inner: S,
}

impl<S> AttemptTimeoutStage<S> {
    /// Wrap the stages that make up one attempt.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

fn arm(context: &mut ExecutionContext) -> TimeoutTracker {
    let config = context.config().clone();
    let tracker = TimeoutTracker::start(
        TimeoutKind::ApiCallAttempt,
        config.api_call_attempt_timeout,
        &config.scheduler,
        context.signal(),
    );
    context.set_attempt_timeout_tracker(tracker.clone());
    tracker
}

fn settle<O>(tracker: TimeoutTracker, result: Result<O>, context: &ExecutionContext) -> Result<O> {
    tracker.cancel();
    let call_tracker = context.call_timeout_tracker();
    let result = result.map_err(|error| {
        disambiguate(error, call_tracker, &tracker, context.signal())
    });
    // Late outcomes keep their own result; the next attempt must start uncancelled.
    if tracker.has_executed() && !call_tracker.has_executed() {
        context.signal().clear();
    }
    result
}

impl<S, I, O> RequestStage<I, O> for AttemptTimeoutStage<S>
where
    S: RequestStage<I, O>,
{
    fn execute(&self, input: I, context: &mut ExecutionContext) -> Result<O> {
        let tracker = arm(context);
        let result = self.inner.execute(input, context);
        settle(tracker, result, context)
    }
}

#[async_trait]
impl<S, I, O> AsyncRequestStage<I, O> for AttemptTimeoutStage<S>
where
    I: Send + 'static,
    O: Send + 'static,
    S: AsyncRequestStage<I, O>,
{
    async fn execute(&self, input: I, context: &mut ExecutionContext) -> Result<O> {
        let tracker = arm(context);
        let signal = context.signal().clone();
        let result = {
            let attempt = self.inner.execute(input, context);
            tokio::select! {
                biased;
                result = attempt => result,
                _ = signal.cancelled() => Err(AbortedError::Interrupted.into()),
            }
        };
        settle(tracker, result, context)
    }
}
