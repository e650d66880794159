//! Signs each attempt with the call's resolved signing protocol.

use super::{AsyncRequestStage, RequestStage};
use crate::error::SigningError;
use crate::execution::attributes::{SIGNING_CLOCK, TIME_OFFSET};
use crate::execution::{ExecutionContext, SignerProperties};
use crate::http::HttpRequest;
use crate::metrics::Metric;
use crate::signing::{
    AsyncSignRequest, LegacySigner, SelectedAuthScheme, SignRequest, SigningClock, SigningMode,
};
use crate::Result;
use async_trait::async_trait;
use std::time::Instant;
use tracing::debug;

/// Signs the outgoing request.
///
/// Runs once per attempt so every attempt carries a fresh signature with the
/// latest clock-skew offset. Calls without a signer, and calls using the
/// no-auth scheme, pass through unchanged and record no signing metric.
#[derive(Debug, Clone, Copy, Default)]
pub struct SigningStage;

impl SigningStage {
    /// Create the stage.
    pub fn new() -> Self {
        Self
    }
}

impl RequestStage<HttpRequest, HttpRequest> for SigningStage {
    fn execute(&self, request: HttpRequest, context: &mut ExecutionContext) -> Result<HttpRequest> {
        prepare(&request, context);

        let signed = match context.signing_mode().clone() {
            SigningMode::Unsigned => return Ok(request),
            SigningMode::Selected(scheme) if scheme.is_no_auth() => return Ok(request),
            SigningMode::Selected(scheme) => {
                let identity = scheme.identity().resolve_blocking()?;
                let properties = signer_properties(&scheme, context);
                let started = Instant::now();
                let signed = scheme.signer().sign(SignRequest {
                    request,
                    identity,
                    properties,
                })?;
                record_signing(context, started, scheme.scheme_id());
                signed.request
            }
            SigningMode::Legacy(LegacySigner::Plain(signer)) => {
                let started = Instant::now();
                let signed = signer.sign(request, context.attributes())?;
                record_signing(context, started, "legacy");
                signed
            }
            SigningMode::Legacy(LegacySigner::BodyAware(signer)) => {
                let started = Instant::now();
                let signed = signer.sign(request, context.attributes())?;
                record_signing(context, started, "legacy");
                signed
            }
            SigningMode::Legacy(LegacySigner::Async(_)) => {
                return Err(SigningError::Unsupported {
                    message: "An asynchronous signer cannot sign a blocking request".to_string(),
                }
                .into());
            }
        };

        context.interceptor_context_mut().http_request = Some(signed.clone());
        Ok(signed)
    }
}

#[async_trait]
impl AsyncRequestStage<HttpRequest, HttpRequest> for SigningStage {
    async fn execute(&self, request: HttpRequest, context: &mut ExecutionContext) -> Result<HttpRequest> {
        prepare(&request, context);

        let signed = match context.signing_mode().clone() {
            SigningMode::Unsigned => return Ok(request),
            SigningMode::Selected(scheme) if scheme.is_no_auth() => return Ok(request),
            SigningMode::Selected(scheme) => {
                let identity = scheme.identity().resolve().await?;
                let properties = signer_properties(&scheme, context);
                let payload = context.request_provider().cloned();
                let started = Instant::now();
                let signed = scheme
                    .signer()
                    .sign_async(AsyncSignRequest {
                        request,
                        payload,
                        identity,
                        properties,
                    })
                    .await?;
                record_signing(context, started, scheme.scheme_id());
                if let Some(payload) = signed.payload {
                    context.set_request_provider(Some(payload));
                }
                signed.request
            }
            SigningMode::Legacy(LegacySigner::Plain(signer)) => {
                let started = Instant::now();
                let signed = signer.sign(request, context.attributes())?;
                record_signing(context, started, "legacy");
                signed
            }
            SigningMode::Legacy(LegacySigner::BodyAware(signer)) => {
                let started = Instant::now();
                let signed = signer.sign(request, context.attributes())?;
                if let Some(payload) = context.request_provider().cloned() {
                    let payload =
                        signer.sign_async_request_body(&signed, payload, context.attributes())?;
                    context.set_request_provider(Some(payload));
                }
                record_signing(context, started, "legacy");
                signed
            }
            SigningMode::Legacy(LegacySigner::Async(signer)) => {
                let attributes = context.attributes().copy();
                let payload = context.request_provider().cloned();
                let started = Instant::now();
                let signed = signer.sign(request, payload, &attributes).await?;
                record_signing(context, started, "legacy");
                signed
            }
        };

        context.interceptor_context_mut().http_request = Some(signed.clone());
        Ok(signed)
    }
}

/// Publish the unsigned request and refresh the clock-skew offset.
fn prepare(request: &HttpRequest, context: &mut ExecutionContext) {
    context.interceptor_context_mut().http_request = Some(request.clone());
    let offset = context.config().time_offset();
    context.attributes_mut().put(TIME_OFFSET, offset);
}

fn signer_properties(scheme: &SelectedAuthScheme, context: &ExecutionContext) -> SignerProperties {
    let mut properties = scheme.properties().clone();
    if !properties.contains(SIGNING_CLOCK) {
        let offset = context.attributes().get(TIME_OFFSET).unwrap_or(0);
        properties.put(SIGNING_CLOCK, SigningClock::with_offset(offset));
    }
    properties
}

fn record_signing(context: &ExecutionContext, started: Instant, scheme: &str) {
    let elapsed = started.elapsed();
    context.attempt_metrics().record_duration(Metric::SigningDuration, elapsed);
    debug!(
        scheme,
        attempt = context.attempt_number(),
        duration_ms = elapsed.as_millis() as u64,
        "Request signed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::error::{IdentityError, PipelineError};
    use crate::execution::{InterceptorChain, SdkRequest};
    use crate::http::AsyncRequestBody;
    use crate::mocks::{MockHttpSigner, MockLegacySigner};
    use crate::signing::{Identity, IdentityHandle, NO_AUTH_SCHEME_ID};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn config(offset: i64) -> Arc<ClientConfig> {
        Arc::new(ClientConfig::builder().time_offset(offset).build().unwrap())
    }

    fn request() -> HttpRequest {
        HttpRequest::new("GET", "https://example.com/resource")
    }

    fn context(sdk_request: SdkRequest, offset: i64) -> ExecutionContext {
        let mut context = ExecutionContext::new(sdk_request, config(offset), InterceptorChain::default());
        context.begin_attempt(1);
        context
    }

    fn scheme(id: &str, signer: Arc<MockHttpSigner>) -> SelectedAuthScheme {
        SelectedAuthScheme::new(
            id,
            IdentityHandle::ready(Identity::new("AKID", "secret")),
            signer,
        )
    }

    #[test]
    fn test_legacy_signer_sees_time_offset() {
        let signer = Arc::new(MockLegacySigner::new());
        let mut context = context(
            SdkRequest::new(request()).with_legacy_signer(LegacySigner::Plain(signer.clone())),
            100,
        );

        let signed = RequestStage::execute(&SigningStage, request(), &mut context).unwrap();

        assert_eq!(signed.get_header("Authorization"), Some("LegacySigner"));
        let seen = signer.last_attributes().unwrap();
        assert_eq!(seen.get(TIME_OFFSET), Some(100));
        assert_eq!(
            context.interceptor_context().http_request.as_ref().unwrap().get_header("Authorization"),
            Some("LegacySigner")
        );
        assert!(context.attempt_metrics().has_recorded(Metric::SigningDuration));
    }

    #[test]
    fn test_offset_change_is_picked_up_on_next_attempt() {
        let signer = Arc::new(MockLegacySigner::new());
        let mut context = context(
            SdkRequest::new(request()).with_legacy_signer(LegacySigner::Plain(signer.clone())),
            0,
        );
        context.config().update_time_offset(-15);

        RequestStage::execute(&SigningStage, request(), &mut context).unwrap();
        assert_eq!(signer.last_attributes().unwrap().get(TIME_OFFSET), Some(-15));
    }

    #[test]
    fn test_selected_scheme_gets_signing_clock() {
        let signer = Arc::new(MockHttpSigner::new());
        let mut context = context(
            SdkRequest::new(request()).with_auth_scheme(scheme("aws.auth#sigv4", signer.clone())),
            100,
        );

        let signed = RequestStage::execute(&SigningStage, request(), &mut context).unwrap();

        assert_eq!(signed.get_header("Authorization"), Some("MockSigner AKID"));
        let properties = signer.last_properties().unwrap();
        assert_eq!(
            properties.get(SIGNING_CLOCK),
            Some(SigningClock::with_offset(100))
        );
        assert_eq!(signer.calls(), 1);
    }

    #[test]
    fn test_existing_signing_clock_is_kept() {
        let fixed = SigningClock::Fixed(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        let signer = Arc::new(MockHttpSigner::new());
        let selected = scheme("aws.auth#sigv4", signer.clone())
            .with_properties(SignerProperties::new().with(SIGNING_CLOCK, fixed));
        let mut context = context(SdkRequest::new(request()).with_auth_scheme(selected), 100);

        RequestStage::execute(&SigningStage, request(), &mut context).unwrap();

        assert_eq!(signer.last_properties().unwrap().get(SIGNING_CLOCK), Some(fixed));
    }

    #[test]
    fn test_legacy_signer_excludes_selected_scheme() {
        let legacy = Arc::new(MockLegacySigner::new());
        let http_signer = Arc::new(MockHttpSigner::new());
        let mut context = context(
            SdkRequest::new(request())
                .with_auth_scheme(scheme("aws.auth#sigv4", http_signer.clone()))
                .with_legacy_signer(LegacySigner::Plain(legacy.clone())),
            0,
        );

        RequestStage::execute(&SigningStage, request(), &mut context).unwrap();

        assert_eq!(legacy.calls(), 1);
        assert_eq!(http_signer.calls(), 0);
    }

    #[test]
    fn test_unsigned_request_passes_through() {
        let mut context = context(SdkRequest::new(request()), 0);
        let out = RequestStage::execute(&SigningStage, request(), &mut context).unwrap();

        assert!(out.headers.is_empty());
        assert!(!context.attempt_metrics().has_recorded(Metric::SigningDuration));
    }

    #[test]
    fn test_identity_failure_surfaces() {
        let selected = SelectedAuthScheme::new(
            "aws.auth#sigv4",
            IdentityHandle::failed(IdentityError::NotFound {
                message: "no profile".to_string(),
            }),
            Arc::new(MockHttpSigner::new()),
        );
        let mut context = context(SdkRequest::new(request()).with_auth_scheme(selected), 0);

        let err = RequestStage::execute(&SigningStage, request(), &mut context).unwrap_err();
        assert!(matches!(err, PipelineError::Identity(IdentityError::NotFound { .. })));
    }

    #[test]
    fn test_async_legacy_signer_rejected_for_blocking_call() {
        let signer = Arc::new(MockLegacySigner::new());
        let mut context = context(
            SdkRequest::new(request()).with_legacy_signer(LegacySigner::Async(signer)),
            0,
        );

        let err = RequestStage::execute(&SigningStage, request(), &mut context).unwrap_err();
        assert!(matches!(err, PipelineError::Signing(SigningError::Unsupported { .. })));
    }

    #[tokio::test]
    async fn test_async_no_auth_leaves_request_untouched() {
        let signer = Arc::new(MockHttpSigner::new());
        let mut context = context(
            SdkRequest::new(request()).with_auth_scheme(scheme(NO_AUTH_SCHEME_ID, signer.clone())),
            0,
        );

        let out = AsyncRequestStage::execute(&SigningStage, request(), &mut context)
            .await
            .unwrap();

        assert!(out.headers.is_empty());
        assert_eq!(signer.calls(), 0);
        assert!(!context.attempt_metrics().has_recorded(Metric::SigningDuration));
    }

    #[tokio::test]
    async fn test_async_selected_scheme_replaces_payload() {
        let signer = Arc::new(
            MockHttpSigner::new().with_signed_payload(AsyncRequestBody::from_bytes("framed")),
        );
        let mut context = context(
            SdkRequest::new(request())
                .with_async_body(AsyncRequestBody::from_bytes("raw"))
                .with_auth_scheme(scheme("aws.auth#sigv4", signer.clone())),
            0,
        );

        AsyncRequestStage::execute(&SigningStage, request(), &mut context)
            .await
            .unwrap();

        let payload = context.request_provider().unwrap().collect().await.unwrap();
        assert_eq!(payload, "framed");
        assert!(context.attempt_metrics().has_recorded(Metric::SigningDuration));
    }

    #[tokio::test]
    async fn test_async_body_aware_signer_wraps_payload() {
        let signer = Arc::new(MockLegacySigner::new());
        let mut context = context(
            SdkRequest::new(request())
                .with_async_body(AsyncRequestBody::from_bytes("raw"))
                .with_legacy_signer(LegacySigner::BodyAware(signer.clone())),
            0,
        );

        let signed = AsyncRequestStage::execute(&SigningStage, request(), &mut context)
            .await
            .unwrap();

        assert_eq!(signed.get_header("Authorization"), Some("LegacySigner"));
        assert_eq!(signer.body_calls(), 1);
        let payload = context.request_provider().unwrap().collect().await.unwrap();
        assert_eq!(payload, "signed:raw");
    }

    #[tokio::test]
    async fn test_async_legacy_signer_sees_payload_and_offset() {
        let signer = Arc::new(MockLegacySigner::new());
        let mut context = context(
            SdkRequest::new(request())
                .with_async_body(AsyncRequestBody::from_bytes("raw"))
                .with_legacy_signer(LegacySigner::Async(signer.clone())),
            42,
        );

        let signed = AsyncRequestStage::execute(&SigningStage, request(), &mut context)
            .await
            .unwrap();

        assert_eq!(signed.get_header("Authorization"), Some("LegacySigner"));
        assert_eq!(signer.last_attributes().unwrap().get(TIME_OFFSET), Some(42));
        assert!(signer.saw_payload());
    }
}
