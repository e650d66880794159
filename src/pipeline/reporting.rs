//! Outermost stage: tells interceptors how the call ended.

use super::{AsyncRequestStage, RequestStage};
use crate::error::PipelineError;
use crate::execution::ExecutionContext;
use crate::Result;
use async_trait::async_trait;
use tracing::debug;

/// Runs `after_execution` on success and the failure hooks otherwise.
///
/// A failure in `after_execution` is itself reported as the call's failure.
/// Interceptors may replace the surfaced error through `modify_exception`.
#[derive(Debug, Clone)]
pub struct FailureReportingStage<S> {
    inner: S,
}

impl<S> FailureReportingStage<S> {
    /// Wrap the full pipeline.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

fn report<O>(result: Result<O>, context: &ExecutionContext) -> Result<O> {
    let error = match result {
        Ok(output) => match context
            .interceptors()
            .after_execution(context.interceptor_context(), context.attributes())
        {
            Ok(()) => return Ok(output),
            Err(error) => error,
        },
        Err(error) => error,
    };
    Err(surface(error, context))
}

fn surface(error: PipelineError, context: &ExecutionContext) -> PipelineError {
    let interceptors = context.interceptors();
    let surfaced =
        interceptors.modify_exception(context.interceptor_context(), context.attributes(), error);
    interceptors.on_execution_failure(context.interceptor_context(), context.attributes(), &surfaced);
    debug!(
        error = %surfaced,
        attempts = context.attempt_number(),
        "Call failed"
    );
    surfaced
}

impl<S, I, O> RequestStage<I, O> for FailureReportingStage<S>
where
    S: RequestStage<I, O>,
{
    fn execute(&self, input: I, context: &mut ExecutionContext) -> Result<O> {
        let result = self.inner.execute(input, context);
        report(result, context)
    }
}

#[async_trait]
impl<S, I, O> AsyncRequestStage<I, O> for FailureReportingStage<S>
where
    I: Send + 'static,
    O: Send + 'static,
    S: AsyncRequestStage<I, O>,
{
    async fn execute(&self, input: I, context: &mut ExecutionContext) -> Result<O> {
        let result = self.inner.execute(input, context).await;
        report(result, context)
    }
}
