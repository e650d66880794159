//! Client entry point.
//!
//! An [`SdkClient`] owns the configuration, the transports and the
//! interceptors, and runs every [`SdkRequest`] through the same stage
//! pipeline:
//!
//! ```text
//! FailureReportingStage
//!   ApiCallTimeoutStage
//!     HttpChecksumStage
//!     RetryStage
//!       AttemptTimeoutStage
//!         SigningStage
//!         TransmitStage
//! ```

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::execution::{ExecutionContext, ExecutionInterceptor, InterceptorChain, SdkRequest};
use crate::http::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, SyncHttpTransport};
use crate::pipeline::{
    ApiCallTimeoutStage, AsyncRequestStage, AttemptTimeoutStage, Chain, ClientType,
    FailureReportingStage, HttpChecksumStage, RequestStage, RetryStage, SigningStage,
    TransmitStage,
};
use crate::Result;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::debug;

/// Stages that run once per attempt.
type AttemptStages<T> =
    AttemptTimeoutStage<Chain<SigningStage, TransmitStage<T>, HttpRequest>>;

/// The full pipeline over transport `T`.
type Pipeline<T> = FailureReportingStage<
    ApiCallTimeoutStage<Chain<HttpChecksumStage, RetryStage<AttemptStages<T>>, HttpRequest>>,
>;

fn build_pipeline<T: ?Sized>(client_type: ClientType, transport: Arc<T>) -> Pipeline<T> {
    let attempt = AttemptTimeoutStage::new(Chain::new(
        SigningStage::new(),
        TransmitStage::new(transport),
    ));
    FailureReportingStage::new(ApiCallTimeoutStage::new(Chain::new(
        HttpChecksumStage::new(client_type),
        RetryStage::new(attempt),
    )))
}

/// Executes requests against a service.
pub struct SdkClient {
    config: Arc<ClientConfig>,
    interceptors: InterceptorChain,
    sync_transport: Option<Arc<dyn SyncHttpTransport>>,
    async_transport: Option<Arc<dyn HttpTransport>>,

    // Lazy-initialized pipelines
    sync_pipeline: OnceCell<Pipeline<dyn SyncHttpTransport>>,
    async_pipeline: OnceCell<Pipeline<dyn HttpTransport>>,
}

impl SdkClient {
    /// Create a new builder.
    pub fn builder() -> SdkClientBuilder {
        SdkClientBuilder::new()
    }

    /// Get the client configuration.
    pub fn config(&self) -> &Arc<ClientConfig> {
        &self.config
    }

    /// Run `request` on the calling thread.
    ///
    /// Fails with [`ClientError::InvalidRequest`] when the client has no
    /// blocking transport.
    pub fn execute(&self, request: SdkRequest) -> Result<HttpResponse> {
        let Some(transport) = &self.sync_transport else {
            return Err(missing_transport("blocking"));
        };
        let pipeline = self
            .sync_pipeline
            .get_or_init(|| build_pipeline(ClientType::Sync, transport.clone()));

        let mut context = self.context(request);
        let http_request = context.original_request().clone();
        RequestStage::execute(pipeline, http_request, &mut context)
    }

    /// Run `request` without blocking.
    ///
    /// Fails with [`ClientError::InvalidRequest`] when the client has no
    /// non-blocking transport.
    pub async fn execute_async(&self, request: SdkRequest) -> Result<HttpResponse> {
        let Some(transport) = &self.async_transport else {
            return Err(missing_transport("non-blocking"));
        };
        let pipeline = self
            .async_pipeline
            .get_or_init(|| build_pipeline(ClientType::Async, transport.clone()));

        let mut context = self.context(request);
        let http_request = context.original_request().clone();
        AsyncRequestStage::execute(pipeline, http_request, &mut context).await
    }

    fn context(&self, request: SdkRequest) -> ExecutionContext {
        debug!(
            method = %request.http_request().method,
            url = %request.http_request().url,
            "Executing request"
        );
        ExecutionContext::new(request, self.config.clone(), self.interceptors.clone())
    }
}

fn missing_transport(kind: &str) -> crate::error::PipelineError {
    ClientError::InvalidRequest {
        message: format!("Client has no {kind} transport"),
    }
    .into()
}

impl std::fmt::Debug for SdkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkClient")
            .field("config", &self.config)
            .field("interceptors", &self.interceptors)
            .field("sync_transport", &self.sync_transport.is_some())
            .field("async_transport", &self.async_transport.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`SdkClient`].
pub struct SdkClientBuilder {
    config: Option<ClientConfig>,
    from_env: bool,
    sync_transport: Option<Arc<dyn SyncHttpTransport>>,
    async_transport: Option<Arc<dyn HttpTransport>>,
    interceptors: InterceptorChain,
}

impl SdkClientBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: None,
            from_env: false,
            sync_transport: None,
            async_transport: None,
            interceptors: InterceptorChain::default(),
        }
    }

    /// Use the provided configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Load configuration from environment variables.
    pub fn from_env(mut self) -> Self {
        self.from_env = true;
        self
    }

    /// Use a blocking transport for [`SdkClient::execute`].
    pub fn sync_transport(mut self, transport: Arc<dyn SyncHttpTransport>) -> Self {
        self.sync_transport = Some(transport);
        self
    }

    /// Use a non-blocking transport for [`SdkClient::execute_async`].
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.async_transport = Some(transport);
        self
    }

    /// Register an interceptor. Interceptors run in registration order.
    pub fn interceptor(mut self, interceptor: Arc<dyn ExecutionInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Build the client.
    ///
    /// Without any transport the client gets a reqwest-backed non-blocking
    /// one.
    pub fn build(self) -> Result<SdkClient> {
        let config = if let Some(config) = self.config {
            config
        } else if self.from_env {
            ClientConfig::builder().from_env().build()?
        } else {
            ClientConfig::builder().build()?
        };

        let async_transport = match (self.async_transport, &self.sync_transport) {
            (Some(transport), _) => Some(transport),
            (None, Some(_)) => None,
            (None, None) => Some(Arc::new(ReqwestTransport::new()?) as Arc<dyn HttpTransport>),
        };

        Ok(SdkClient {
            config: Arc::new(config),
            interceptors: self.interceptors,
            sync_transport: self.sync_transport,
            async_transport,
            sync_pipeline: OnceCell::new(),
            async_pipeline: OnceCell::new(),
        })
    }
}

impl Default for SdkClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
