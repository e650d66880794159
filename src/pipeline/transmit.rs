//! Hands the finished request to the transport.

use super::{AsyncRequestStage, RequestStage};
use crate::error::{clock_skew_seconds, map_response_error, PipelineError};
use crate::execution::ExecutionContext;
use crate::http::{HttpRequest, HttpResponse, HttpTransport, SyncHttpTransport};
use crate::metrics::Metric;
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Sends one attempt and classifies the response.
///
/// Successful responses are returned as-is. Unsuccessful ones become
/// [`ServiceError`](crate::error::ServiceError)s; when the service complains
/// about the signing time, the client's clock-skew offset is corrected from
/// the response `Date` header before the error is returned, so the next
/// attempt signs with the adjusted clock.
pub struct TransmitStage<T: ?Sized> {
    transport: Arc<T>,
}

impl<T: ?Sized> TransmitStage<T> {
    /// Send through `transport`.
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }
}

impl<T: ?Sized> Clone for TransmitStage<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for TransmitStage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransmitStage").finish_non_exhaustive()
    }
}

impl<T> RequestStage<HttpRequest, HttpResponse> for TransmitStage<T>
where
    T: SyncHttpTransport + ?Sized,
{
    fn execute(&self, request: HttpRequest, context: &mut ExecutionContext) -> Result<HttpResponse> {
        before_send(&request, context)?;

        let started = Instant::now();
        let outcome = self.transport.send(request, context.signal());
        context
            .attempt_metrics()
            .record_duration(Metric::ServiceCallDuration, started.elapsed());

        after_receive(outcome?, context)
    }
}

#[async_trait]
impl<T> AsyncRequestStage<HttpRequest, HttpResponse> for TransmitStage<T>
where
    T: HttpTransport + ?Sized,
{
    async fn execute(&self, request: HttpRequest, context: &mut ExecutionContext) -> Result<HttpResponse> {
        before_send(&request, context)?;

        let payload = context.request_provider().cloned();
        let started = Instant::now();
        let outcome = self.transport.send(request, payload).await;
        context
            .attempt_metrics()
            .record_duration(Metric::ServiceCallDuration, started.elapsed());

        after_receive(outcome?, context)
    }
}

fn before_send(request: &HttpRequest, context: &mut ExecutionContext) -> Result<()> {
    context.interceptor_context_mut().http_request = Some(request.clone());
    debug!(
        method = %request.method,
        url = %request.url,
        attempt = context.attempt_number(),
        "Sending request"
    );
    context
        .interceptors()
        .before_transmission(context.interceptor_context(), context.attributes())
}

fn after_receive(response: HttpResponse, context: &mut ExecutionContext) -> Result<HttpResponse> {
    debug!(
        status = response.status,
        request_id = response.request_id().unwrap_or("-"),
        "Received response"
    );
    context.interceptor_context_mut().http_response = Some(response.clone());
    context
        .interceptors()
        .before_unmarshalling(context.interceptor_context(), context.attributes())?;

    if response.is_success() {
        return Ok(response);
    }

    let error = map_response_error(&response);
    if error.is_clock_skew() {
        if let Some(skew) = clock_skew_seconds(&response) {
            warn!(
                code = error.code.as_deref().unwrap_or("-"),
                offset_seconds = skew,
                "Adjusting for clock skew"
            );
            context.config().update_time_offset(skew);
        }
    }
    Err(PipelineError::Service(error))
}
