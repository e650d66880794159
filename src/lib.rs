//! Request-execution core for HTTP service clients.
//!
//! Runs one logical API call through a pipeline of composable stages,
//! in a blocking and a non-blocking flavour over the same logic.
//!
//! # Features
//!
//! - **Timeouts**: Call and attempt deadlines, reported as distinct errors
//! - **Checksums**: Content-MD5, checksum headers and `aws-chunked` trailers
//! - **Signing**: Legacy signers and selected auth schemes
//! - **Retries**: Standard and adaptive modes, with a CUBIC send-rate limiter
//! - **Interceptors**: Hooks around transmission and failure reporting
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use aws_pipeline::{ClientConfig, HttpRequest, SdkClient, SdkRequest};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), aws_pipeline::PipelineError> {
//!     let config = ClientConfig::builder()
//!         .api_call_attempt_timeout(Duration::from_secs(2))
//!         .build()?;
//!     let client = SdkClient::builder().config(config).build()?;
//!
//!     let response = client
//!         .execute_async(SdkRequest::new(HttpRequest::new("GET", "https://example.com")))
//!         .await?;
//!
//!     println!("Status: {}", response.status);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod checksum;
pub mod client;
pub mod config;
pub mod error;
pub mod execution;
pub mod http;
pub mod metrics;
pub mod mocks;
pub mod pipeline;
pub mod retry;
pub mod signing;
pub mod timeout;

// Re-export main types at crate root
pub use checksum::{ChecksumAlgorithm, ChecksumSpecs};
pub use client::{SdkClient, SdkClientBuilder};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use error::{
    AbortedError, ChecksumError, ClientError, IdentityError, InterceptorError, NetworkError,
    PipelineError, ServiceError, SigningError, TimeoutError,
};
pub use execution::{
    ExecutionAttributes, ExecutionContext, ExecutionInterceptor, InterceptorChain, SdkRequest,
};
pub use http::{
    AsyncRequestBody, HttpRequest, HttpResponse, HttpTransport, RequestBody, SyncHttpTransport,
};
pub use metrics::{Metric, MetricCollector};
pub use pipeline::{AsyncRequestStage, RequestStage};
pub use retry::{RateLimitingTokenBucket, RetryMode, RetryPolicy, StandardRetryPolicy};
pub use signing::{HttpSigner, Identity, LegacySigner, SelectedAuthScheme};
pub use timeout::{CancellationSignal, Scheduler, TimeoutTracker};

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
