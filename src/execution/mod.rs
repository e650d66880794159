//! Per-call state carried through every pipeline stage.

pub mod attributes;
mod interceptor;

pub use attributes::{AttributeKey, AttributeValue, ExecutionAttributes, SignerProperties};
pub use interceptor::{ExecutionInterceptor, InterceptorChain, InterceptorContext};

use crate::config::ClientConfig;
use crate::http::{AsyncRequestBody, HttpRequest};
use crate::metrics::MetricCollector;
use crate::signing::{LegacySigner, SelectedAuthScheme, SigningMode};
use crate::timeout::{CancellationSignal, TimeoutKind, TimeoutTracker};
use std::fmt;
use std::sync::Arc;

/// A logical operation invocation, as handed to a client.
#[derive(Debug, Clone)]
pub struct SdkRequest {
    http_request: HttpRequest,
    async_body: Option<AsyncRequestBody>,
    attributes: ExecutionAttributes,
    legacy_signer: Option<LegacySigner>,
    auth_scheme: Option<SelectedAuthScheme>,
    signal: Option<CancellationSignal>,
    metrics: Option<MetricCollector>,
}

impl SdkRequest {
    /// Wrap a marshalled HTTP request.
    pub fn new(http_request: HttpRequest) -> Self {
        Self {
            http_request,
            async_body: None,
            attributes: ExecutionAttributes::new(),
            legacy_signer: None,
            auth_scheme: None,
            signal: None,
            metrics: None,
        }
    }

    /// Attach a streaming payload for non-blocking execution.
    pub fn with_async_body(mut self, body: AsyncRequestBody) -> Self {
        self.async_body = Some(body);
        self
    }

    /// Replace the attribute bag.
    pub fn with_attributes(mut self, attributes: ExecutionAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Set a single attribute.
    pub fn with_attribute<T: AttributeValue>(mut self, key: AttributeKey<T>, value: T) -> Self {
        self.attributes.put(key, value);
        self
    }

    /// Sign with a legacy signer.
    pub fn with_legacy_signer(mut self, signer: LegacySigner) -> Self {
        self.legacy_signer = Some(signer);
        self
    }

    /// Sign through a selected auth scheme.
    pub fn with_auth_scheme(mut self, scheme: SelectedAuthScheme) -> Self {
        self.attributes
            .put(attributes::SELECTED_AUTH_SCHEME_ID, scheme.scheme_id().to_string());
        self.auth_scheme = Some(scheme);
        self
    }

    /// Let the caller cancel the call through `signal`.
    pub fn with_cancellation(mut self, signal: CancellationSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Record the call's metrics into `collector`.
    pub fn with_metrics(mut self, collector: MetricCollector) -> Self {
        self.metrics = Some(collector);
        self
    }

    /// The marshalled request.
    pub fn http_request(&self) -> &HttpRequest {
        &self.http_request
    }
}

/// Fields replaced wholesale at the start of every attempt.
#[derive(Debug)]
struct AttemptScope {
    number: u32,
    metrics: MetricCollector,
    timeout_tracker: TimeoutTracker,
}

impl AttemptScope {
    fn initial(metrics: &MetricCollector) -> Self {
        Self {
            number: 0,
            metrics: metrics.clone(),
            timeout_tracker: TimeoutTracker::disabled(TimeoutKind::ApiCallAttempt),
        }
    }
}

/// Mutable state for one call.
///
/// Created once per invocation. Stages read and write it in program order;
/// attempt-scoped fields are swapped out by [`begin_attempt`](Self::begin_attempt).
pub struct ExecutionContext {
    original_request: HttpRequest,
    attributes: ExecutionAttributes,
    interceptors: InterceptorChain,
    interceptor_context: InterceptorContext,
    request_provider: Option<AsyncRequestBody>,
    signing_mode: SigningMode,
    signal: CancellationSignal,
    config: Arc<ClientConfig>,
    metrics: MetricCollector,
    attempt: AttemptScope,
    call_timeout_tracker: TimeoutTracker,
}

impl ExecutionContext {
    /// Set up the state for `request`.
    pub fn new(
        request: SdkRequest,
        config: Arc<ClientConfig>,
        interceptors: InterceptorChain,
    ) -> Self {
        let SdkRequest {
            http_request,
            async_body,
            mut attributes,
            legacy_signer,
            auth_scheme,
            signal,
            metrics,
        } = request;

        attributes.put(attributes::TIME_OFFSET, config.time_offset());
        let metrics = metrics.unwrap_or_else(|| MetricCollector::new("ApiCall"));
        let interceptor_context = InterceptorContext {
            http_request: Some(http_request.clone()),
            async_request_body: async_body.clone(),
            http_response: None,
        };

        Self {
            original_request: http_request,
            attributes,
            interceptors,
            interceptor_context,
            request_provider: async_body,
            signing_mode: SigningMode::resolve(legacy_signer, auth_scheme),
            signal: signal.unwrap_or_default(),
            config,
            attempt: AttemptScope::initial(&metrics),
            metrics,
            call_timeout_tracker: TimeoutTracker::disabled(TimeoutKind::ApiCall),
        }
    }

    /// The request as the caller handed it in.
    pub fn original_request(&self) -> &HttpRequest {
        &self.original_request
    }

    /// Cross-stage attributes.
    pub fn attributes(&self) -> &ExecutionAttributes {
        &self.attributes
    }

    /// Mutable cross-stage attributes.
    pub fn attributes_mut(&mut self) -> &mut ExecutionAttributes {
        &mut self.attributes
    }

    /// Registered interceptors.
    pub fn interceptors(&self) -> &InterceptorChain {
        &self.interceptors
    }

    /// What interceptors currently see.
    pub fn interceptor_context(&self) -> &InterceptorContext {
        &self.interceptor_context
    }

    /// Mutable interceptor view.
    pub fn interceptor_context_mut(&mut self) -> &mut InterceptorContext {
        &mut self.interceptor_context
    }

    /// The streaming payload for this attempt, if the call has one.
    pub fn request_provider(&self) -> Option<&AsyncRequestBody> {
        self.request_provider.as_ref()
    }

    /// Replace the streaming payload for this attempt.
    pub fn set_request_provider(&mut self, provider: Option<AsyncRequestBody>) {
        self.interceptor_context.async_request_body = provider.clone();
        self.request_provider = provider;
    }

    /// Signing protocol resolved for this call.
    pub fn signing_mode(&self) -> &SigningMode {
        &self.signing_mode
    }

    /// Cancellation signal shared by the call's timers and its in-flight work.
    pub fn signal(&self) -> &CancellationSignal {
        &self.signal
    }

    /// Client-wide configuration.
    pub fn config(&self) -> &Arc<ClientConfig> {
        &self.config
    }

    /// Call-level metric collector.
    pub fn metrics(&self) -> &MetricCollector {
        &self.metrics
    }

    /// Metric collector of the current attempt.
    pub fn attempt_metrics(&self) -> &MetricCollector {
        &self.attempt.metrics
    }

    /// 1-based number of the current attempt; 0 before the first one.
    pub fn attempt_number(&self) -> u32 {
        self.attempt.number
    }

    /// Start attempt `number`.
    ///
    /// Installs a fresh metric collector and a disabled attempt tracker, and
    /// forgets the previous attempt's response.
    pub fn begin_attempt(&mut self, number: u32) {
        self.attempt = AttemptScope {
            number,
            metrics: self.metrics.create_child("ApiCallAttempt"),
            timeout_tracker: TimeoutTracker::disabled(TimeoutKind::ApiCallAttempt),
        };
        self.interceptor_context.http_response = None;
    }

    /// The tracker for the current attempt.
    pub fn attempt_timeout_tracker(&self) -> &TimeoutTracker {
        &self.attempt.timeout_tracker
    }

    /// Install the tracker for the current attempt.
    pub fn set_attempt_timeout_tracker(&mut self, tracker: TimeoutTracker) {
        self.attempt.timeout_tracker = tracker;
    }

    /// The tracker spanning the whole call.
    pub fn call_timeout_tracker(&self) -> &TimeoutTracker {
        &self.call_timeout_tracker
    }

    /// Install the call tracker.
    pub fn set_call_timeout_tracker(&mut self, tracker: TimeoutTracker) {
        self.call_timeout_tracker = tracker;
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("request", &self.original_request)
            .field("attributes", &self.attributes)
            .field("signing_mode", &self.signing_mode)
            .field("attempt", &self.attempt.number)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeout::Scheduler;
    use std::time::Duration;

    fn config() -> Arc<ClientConfig> {
        Arc::new(ClientConfig::builder().time_offset(42).build().unwrap())
    }

    #[test]
    fn test_new_context_records_time_offset() {
        let request = SdkRequest::new(HttpRequest::new("GET", "https://example.com"));
        let context = ExecutionContext::new(request, config(), InterceptorChain::default());

        assert_eq!(context.attributes().get(attributes::TIME_OFFSET), Some(42));
        assert!(matches!(context.signing_mode(), SigningMode::Unsigned));
        assert_eq!(context.attempt_number(), 0);
    }

    #[test]
    fn test_begin_attempt_replaces_scope() {
        let scheduler = Scheduler::new().unwrap();
        let request = SdkRequest::new(HttpRequest::new("PUT", "https://example.com"))
            .with_async_body(AsyncRequestBody::from_bytes("payload"));
        let mut context = ExecutionContext::new(request, config(), InterceptorChain::default());

        context.begin_attempt(1);
        let first_metrics = context.attempt_metrics().clone();
        let tracker = TimeoutTracker::start(
            TimeoutKind::ApiCallAttempt,
            Some(Duration::from_secs(60)),
            &scheduler,
            context.signal(),
        );
        context.set_attempt_timeout_tracker(tracker.clone());
        context.set_request_provider(None);

        tracker.cancel();
        context.begin_attempt(2);

        assert_eq!(context.attempt_number(), 2);
        assert!(!context.attempt_metrics().ptr_eq(&first_metrics));
        assert!(!context.attempt_timeout_tracker().is_enabled());
        assert!(context.request_provider().is_none());
        assert!(context.interceptor_context().async_request_body.is_none());
        assert_eq!(context.metrics().children().len(), 2);
    }
}
