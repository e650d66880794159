//! Integration tests for call and attempt timeouts.

use aws_pipeline::error::{AbortedError, PipelineError, TimeoutError};
use aws_pipeline::mocks::{MockSyncTransport, MockTransport, RecordingInterceptor};
use aws_pipeline::retry::RetryConfig;
use aws_pipeline::{
    CancellationSignal, ClientConfig, HttpRequest, HttpResponse, RetryMode, Scheduler, SdkClient,
    SdkRequest, SyncHttpTransport,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn get() -> SdkRequest {
    SdkRequest::new(HttpRequest::new("GET", "https://service.example.com/items/1"))
}

fn sync_client(config: ClientConfig, transport: Arc<MockSyncTransport>) -> SdkClient {
    SdkClient::builder()
        .config(config)
        .sync_transport(transport)
        .build()
        .unwrap()
}

#[test]
fn test_slow_attempt_reports_attempt_timeout() {
    let transport = Arc::new(
        MockSyncTransport::new()
            .with_response(HttpResponse::new(200))
            .with_delay(Duration::from_millis(600)),
    );
    let config = ClientConfig::builder()
        .api_call_attempt_timeout(Duration::from_millis(500))
        .max_attempts(1)
        .build()
        .unwrap();
    let client = sync_client(config, transport.clone());

    let started = Instant::now();
    let err = client.execute(get()).unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Timeout(TimeoutError::ApiCallAttemptTimeout { timeout })
            if timeout == Duration::from_millis(500)
    ));
    assert!(started.elapsed() < Duration::from_millis(600));
    assert_eq!(transport.requests().len(), 1);
}

/// A blocking client that cannot be interrupted: the first response lands
/// well after the attempt timeout.
struct UninterruptibleTransport {
    sends: AtomicUsize,
    delay: Duration,
}

impl SyncHttpTransport for UninterruptibleTransport {
    fn send(
        &self,
        _request: HttpRequest,
        _signal: &CancellationSignal,
    ) -> aws_pipeline::Result<HttpResponse> {
        if self.sends.fetch_add(1, Ordering::SeqCst) == 0 {
            thread::sleep(self.delay);
            return Ok(HttpResponse::new(500));
        }
        Ok(HttpResponse::new(200))
    }
}

#[test]
fn test_late_server_error_after_attempt_timeout_is_retried() {
    let transport = Arc::new(UninterruptibleTransport {
        sends: AtomicUsize::new(0),
        delay: Duration::from_millis(600),
    });
    let config = ClientConfig::builder()
        .api_call_attempt_timeout(Duration::from_millis(300))
        .retry_config(
            RetryConfig::new(2)
                .with_initial_backoff(Duration::from_millis(10))
                .with_jitter(false),
        )
        .build()
        .unwrap();
    let client = SdkClient::builder()
        .config(config)
        .sync_transport(transport.clone())
        .build()
        .unwrap();

    let response = client.execute(get()).unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(transport.sends.load(Ordering::SeqCst), 2);
}

#[test]
fn test_call_timeout_spans_attempts() {
    let transport = Arc::new(
        MockSyncTransport::new()
            .with_response(HttpResponse::new(200))
            .with_delay(Duration::from_secs(5)),
    );
    let config = ClientConfig::builder()
        .api_call_timeout(Duration::from_millis(200))
        .api_call_attempt_timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let client = sync_client(config, transport.clone());

    let err = client.execute(get()).unwrap_err();

    assert!(matches!(err, PipelineError::Timeout(TimeoutError::ApiCallTimeout { .. })));
    assert_eq!(transport.requests().len(), 1);
}

#[test]
fn test_fast_call_is_untouched_by_timeouts() {
    let transport = Arc::new(MockSyncTransport::new().with_response(HttpResponse::new(200)));
    let config = ClientConfig::builder()
        .api_call_timeout(Duration::from_secs(5))
        .api_call_attempt_timeout(Duration::from_secs(1))
        .build()
        .unwrap();
    let client = sync_client(config, transport);
    let signal = CancellationSignal::new();

    let response = client.execute(get().with_cancellation(signal.clone())).unwrap();

    assert_eq!(response.status, 200);
    assert!(!signal.is_cancelled());
}

#[test]
fn test_caller_cancellation_is_reported_as_abort() {
    let transport = Arc::new(
        MockSyncTransport::new()
            .with_response(HttpResponse::new(200))
            .with_delay(Duration::from_secs(5)),
    );
    let recorder = Arc::new(RecordingInterceptor::new());
    let config = ClientConfig::builder()
        .api_call_timeout(Duration::from_secs(10))
        .build()
        .unwrap();
    let client = SdkClient::builder()
        .config(config)
        .sync_transport(transport)
        .interceptor(recorder.clone())
        .build()
        .unwrap();
    let signal = CancellationSignal::new();
    signal.cancel();

    let err = client.execute(get().with_cancellation(signal)).unwrap_err();

    assert!(matches!(err, PipelineError::Aborted(AbortedError::Interrupted)));
    assert_eq!(recorder.count("on_execution_failure"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_async_attempt_timeouts_are_retried() {
    let transport = Arc::new(
        MockTransport::new()
            .with_response(HttpResponse::new(200))
            .with_delay(Duration::from_secs(30)),
    );
    let config = ClientConfig::builder()
        .retry_mode(RetryMode::Standard)
        .max_attempts(2)
        .api_call_attempt_timeout(Duration::from_millis(500))
        .scheduler(Scheduler::from_handle(tokio::runtime::Handle::current()))
        .build()
        .unwrap();
    let client = SdkClient::builder()
        .config(config)
        .transport(transport.clone())
        .build()
        .unwrap();

    let err = client.execute_async(get()).await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Timeout(TimeoutError::ApiCallAttemptTimeout { .. })
    ));
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_async_call_timeout() {
    let transport = Arc::new(
        MockTransport::new()
            .with_response(HttpResponse::new(200))
            .with_delay(Duration::from_secs(30)),
    );
    let config = ClientConfig::builder()
        .api_call_timeout(Duration::from_secs(1))
        .api_call_attempt_timeout(Duration::from_secs(10))
        .scheduler(Scheduler::from_handle(tokio::runtime::Handle::current()))
        .build()
        .unwrap();
    let client = SdkClient::builder()
        .config(config)
        .transport(transport)
        .build()
        .unwrap();

    let err = client.execute_async(get()).await.unwrap_err();

    assert!(matches!(err, PipelineError::Timeout(TimeoutError::ApiCallTimeout { .. })));
}
