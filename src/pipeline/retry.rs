//! Retries failed attempts under the configured retry policy.

use super::{AsyncRequestStage, RequestStage};
use crate::error::{AbortedError, ClientError, PipelineError};
use crate::execution::ExecutionContext;
use crate::http::{AsyncRequestBody, HttpRequest, HttpResponse};
use crate::metrics::Metric;
use crate::retry::{Acquisition, RateLimitingTokenBucket, RetryMode, RetryPolicy};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Header carrying an id shared by every attempt of one call.
pub const INVOCATION_ID_HEADER: &str = "amz-sdk-invocation-id";

/// Header carrying the attempt number and the attempt limit.
pub const SDK_REQUEST_HEADER: &str = "amz-sdk-request";

/// Tokens taken from the adaptive bucket per attempt.
const SEND_TOKEN_COST: f64 = 1.0;

/// Runs attempts until one succeeds or the policy gives up.
///
/// In [`RetryMode::Adaptive`] every attempt first takes a send token from the
/// client's [`RateLimitingTokenBucket`], and every outcome feeds the bucket's
/// sending rate.
#[derive(Debug, Clone)]
pub struct RetryStage<S> {
    inner: S,
}

impl<S> RetryStage<S> {
    /// Wrap the per-attempt stages.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

/// Per-call retry bookkeeping shared by both execution models.
struct RetryController {
    policy: Arc<dyn RetryPolicy>,
    bucket: Option<Arc<RateLimitingTokenBucket>>,
    invocation_id: String,
    attempts: u32,
    payload: Option<AsyncRequestBody>,
}

impl RetryController {
    fn new(context: &ExecutionContext) -> Self {
        let config = context.config();
        let policy = config.retry_policy.clone();
        let bucket = (policy.mode() == RetryMode::Adaptive).then(|| config.token_bucket.clone());
        Self {
            policy,
            bucket,
            invocation_id: Uuid::new_v4().to_string(),
            attempts: 0,
            payload: context.request_provider().cloned(),
        }
    }

    /// Open the next attempt and stamp its request.
    ///
    /// The streaming payload is reset to what it was when the call entered
    /// this stage, so wrapping applied by a previous attempt's signer never
    /// stacks.
    fn next_attempt(&mut self, request: &HttpRequest, context: &mut ExecutionContext) -> HttpRequest {
        self.attempts += 1;
        context.begin_attempt(self.attempts);
        context.set_request_provider(self.payload.clone());

        let mut request = request.clone();
        request.put_header(INVOCATION_ID_HEADER, self.invocation_id.clone());
        request.put_header(
            SDK_REQUEST_HEADER,
            format!("attempt={}; max={}", self.attempts, self.policy.max_attempts()),
        );
        request
    }

    /// Take a send token. `Ok(Some(wait))` asks the caller to wait first.
    fn acquire_send_token(&self) -> Result<Option<Duration>> {
        let Some(bucket) = &self.bucket else {
            return Ok(None);
        };
        match bucket.acquire(SEND_TOKEN_COST, self.policy.fast_fail_rate_limiting()) {
            Acquisition::Ready => Ok(None),
            Acquisition::Wait(wait) => Ok(Some(wait)),
            Acquisition::Refused => {
                warn!(
                    attempt = self.attempts,
                    "Send token unavailable, failing fast"
                );
                Err(ClientError::SendTokenUnavailable.into())
            }
        }
    }

    fn on_success(&self) {
        if let Some(bucket) = &self.bucket {
            bucket.update_sending_rate(false);
        }
        if self.attempts > 1 {
            debug!(attempt = self.attempts, "Request succeeded after retry");
        }
    }

    /// Decide what follows a failed attempt: the backoff to sleep, or the
    /// error to surface.
    fn on_failure(&self, error: PipelineError, context: &ExecutionContext) -> Result<Duration> {
        if error.is_fault() {
            return Err(error);
        }

        if let Some(bucket) = &self.bucket {
            bucket.update_sending_rate(error.is_throttling());
        }

        if let Err(hook_error) = context.interceptors().on_attempt_failure(
            context.interceptor_context(),
            context.attributes(),
            &error,
        ) {
            warn!(error = %hook_error, "Interceptor failed while observing attempt failure");
        }

        if !self.policy.is_retryable(&error, self.attempts) {
            warn!(
                attempt = self.attempts,
                max_attempts = self.policy.max_attempts(),
                error = %error,
                "Request failed, not retrying"
            );
            return Err(error);
        }

        let backoff = self.policy.backoff(&error, self.attempts);
        debug!(
            attempt = self.attempts,
            backoff_ms = backoff.as_millis() as u64,
            error = %error,
            "Retrying request after backoff"
        );
        Ok(backoff)
    }

    fn record(&self, context: &ExecutionContext) {
        let retries = self.attempts.saturating_sub(1);
        if retries > 0 {
            context.metrics().increment(Metric::RetryCount, u64::from(retries));
        }
    }
}

impl<S> RetryStage<S>
where
    S: RequestStage<HttpRequest, HttpResponse>,
{
    fn run_blocking(
        &self,
        request: &HttpRequest,
        context: &mut ExecutionContext,
        controller: &mut RetryController,
    ) -> Result<HttpResponse> {
        loop {
            let attempt_request = controller.next_attempt(request, context);
            let outcome = match controller.acquire_send_token() {
                Ok(wait) => {
                    if let Some(wait) = wait {
                        context.signal().sleep(wait)?;
                        context
                            .attempt_metrics()
                            .record_duration(Metric::RateLimitWaitDuration, wait);
                    }
                    self.inner.execute(attempt_request, context)
                }
                Err(refused) => Err(refused),
            };

            match outcome {
                Ok(response) => {
                    controller.on_success();
                    return Ok(response);
                }
                Err(error) => {
                    let backoff = controller.on_failure(error, context)?;
                    context.signal().sleep(backoff)?;
                }
            }
        }
    }
}

impl<S> RequestStage<HttpRequest, HttpResponse> for RetryStage<S>
where
    S: RequestStage<HttpRequest, HttpResponse>,
{
    fn execute(&self, request: HttpRequest, context: &mut ExecutionContext) -> Result<HttpResponse> {
        let mut controller = RetryController::new(context);
        let result = self.run_blocking(&request, context, &mut controller);
        controller.record(context);
        result
    }
}

impl<S> RetryStage<S>
where
    S: AsyncRequestStage<HttpRequest, HttpResponse>,
{
    async fn run_async(
        &self,
        request: &HttpRequest,
        context: &mut ExecutionContext,
        controller: &mut RetryController,
    ) -> Result<HttpResponse> {
        loop {
            let attempt_request = controller.next_attempt(request, context);
            let outcome = match controller.acquire_send_token() {
                Ok(wait) => {
                    if let Some(wait) = wait {
                        delay(context, wait).await?;
                        context
                            .attempt_metrics()
                            .record_duration(Metric::RateLimitWaitDuration, wait);
                    }
                    self.inner.execute(attempt_request, context).await
                }
                Err(refused) => Err(refused),
            };

            match outcome {
                Ok(response) => {
                    controller.on_success();
                    return Ok(response);
                }
                Err(error) => {
                    let backoff = controller.on_failure(error, context)?;
                    delay(context, backoff).await?;
                }
            }
        }
    }
}

#[async_trait]
impl<S> AsyncRequestStage<HttpRequest, HttpResponse> for RetryStage<S>
where
    S: AsyncRequestStage<HttpRequest, HttpResponse>,
{
    async fn execute(&self, request: HttpRequest, context: &mut ExecutionContext) -> Result<HttpResponse> {
        let mut controller = RetryController::new(context);
        let result = self.run_async(&request, context, &mut controller).await;
        controller.record(context);
        result
    }
}

/// Wait on the client's scheduler, giving up early if the call is cancelled.
async fn delay(context: &ExecutionContext, duration: Duration) -> Result<()> {
    if duration.is_zero() {
        return Ok(());
    }
    let signal = context.signal().clone();
    let timer = context.config().scheduler.delay(duration);
    tokio::select! {
        biased;
        _ = signal.cancelled() => Err(AbortedError::Interrupted.into()),
        _ = timer => Ok(()),
    }
}
