//! Error types for the request pipeline.
//!
//! Errors are grouped by where they originate so that each stage can decide
//! which ones it is allowed to reinterpret. Everything else flows through
//! unchanged.

mod mapping;

pub use mapping::{
    clock_skew_seconds, is_clock_skew_code, is_throttling_code, map_response_error,
    parse_retry_after,
};

use std::time::Duration;
use thiserror::Error;

/// Top-level error type surfaced by every pipeline stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Client-side configuration or precondition failures.
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// A call-level or attempt-level timeout fired.
    #[error("Timeout: {0}")]
    Timeout(#[from] TimeoutError),

    /// The call was cancelled by something other than its own timers.
    #[error("Aborted: {0}")]
    Aborted(#[from] AbortedError),

    /// Transport-level failures.
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// A modeled failure returned by the service.
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// Signer failures.
    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),

    /// Identity resolution failures.
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Checksum computation or framing failures.
    #[error("Checksum error: {0}")]
    Checksum(#[from] ChecksumError),

    /// Failures raised by interceptors.
    #[error("Interceptor error: {0}")]
    Interceptor(#[from] InterceptorError),

    /// An unmodeled runtime fault. Never wrapped, never retried.
    #[error("Unexpected fault: {0}")]
    Fault(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl PipelineError {
    /// Wrap an arbitrary error as an unmodeled fault.
    pub fn fault(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        PipelineError::Fault(error.into())
    }

    /// Returns true if the error is retryable under the default classification.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Network(e) => e.is_retryable(),
            PipelineError::Service(e) => e.is_retryable(),
            PipelineError::Timeout(TimeoutError::ApiCallAttemptTimeout { .. }) => true,
            PipelineError::Checksum(ChecksumError::Io { .. }) => true,
            _ => false,
        }
    }

    /// Returns true if the service asked the client to slow down.
    pub fn is_throttling(&self) -> bool {
        matches!(self, PipelineError::Service(e) if e.is_throttling())
    }

    /// Returns true for unmodeled runtime faults.
    pub fn is_fault(&self) -> bool {
        matches!(self, PipelineError::Fault(_))
    }

    /// Returns true for failures that behave like an interrupted I/O operation.
    pub fn is_io_like(&self) -> bool {
        matches!(
            self,
            PipelineError::Network(_) | PipelineError::Checksum(ChecksumError::Io { .. })
        )
    }

    /// Returns true if the failure is a cancellation or interruption signal.
    pub fn is_abort(&self) -> bool {
        matches!(self, PipelineError::Aborted(_))
    }

    /// Returns true for either kind of timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PipelineError::Timeout(_))
    }

    /// Returns the retry delay hint if available.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PipelineError::Service(e) => e.retry_after,
            _ => None,
        }
    }

    /// Returns the HTTP status code if applicable.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            PipelineError::Service(e) => Some(e.status),
            _ => None,
        }
    }

    /// Returns the AWS request ID if available.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            PipelineError::Service(e) => e.request_id.as_deref(),
            _ => None,
        }
    }
}

/// Client-side configuration and precondition errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// MD5 was mandated but the payload is only available as a non-blocking stream.
    #[error(
        "This operation requires a content-MD5 checksum, but one cannot be calculated for non-blocking content"
    )]
    Md5ForNonBlockingContent,

    /// Adaptive rate limiting refused to hand out a send token.
    #[error(
        "Unable to acquire a send token immediately without waiting. Adaptive retry mode with fast-fail rate \
         limiting is engaged because of prior throttled requests; the request will not be executed"
    )]
    SendTokenUnavailable,

    /// Invalid configuration value.
    #[error("Invalid configuration: {field} - {message}")]
    InvalidConfiguration {
        /// The configuration field name.
        field: String,
        /// Error message.
        message: String,
    },

    /// The request could not be built or sent as described.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Details about the problem.
        message: String,
    },
}

/// Timeout errors, disambiguated by which tracker fired.
#[derive(Debug, Error)]
pub enum TimeoutError {
    /// The whole call, across all attempts, ran out of time.
    #[error("Client execution did not complete before the specified timeout configuration: {} millis", .timeout.as_millis())]
    ApiCallTimeout {
        /// The configured call timeout.
        timeout: Duration,
    },

    /// A single attempt ran out of time.
    #[error("HTTP request execution did not complete before the specified timeout configuration: {} millis", .timeout.as_millis())]
    ApiCallAttemptTimeout {
        /// The configured attempt timeout.
        timeout: Duration,
    },
}

/// Cooperative cancellation that no timer of this call accounts for.
#[derive(Debug, Error)]
pub enum AbortedError {
    /// The in-flight operation observed the cancellation signal.
    #[error("Thread was interrupted")]
    Interrupted,

    /// The operation was explicitly aborted.
    #[error("Operation aborted: {reason}")]
    Aborted {
        /// Why the operation stopped.
        reason: String,
    },
}

/// Network and transport errors.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Connection failed.
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        /// Error message.
        message: String,
    },

    /// The transport's own socket timeout elapsed.
    #[error("Request timed out after {duration:?}")]
    Timeout {
        /// The timeout duration.
        duration: Duration,
    },

    /// TLS/SSL error.
    #[error("TLS error: {message}")]
    TlsError {
        /// Error message.
        message: String,
    },

    /// Connection reset.
    #[error("Connection reset by peer")]
    ConnectionReset,

    /// Reading or writing the body failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetworkError {
    /// Returns true if the error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NetworkError::ConnectionFailed { .. }
                | NetworkError::Timeout { .. }
                | NetworkError::ConnectionReset
                | NetworkError::Io(_)
        )
    }
}

/// A modeled failure returned by the service.
#[derive(Debug, Clone, Error)]
#[error("HTTP {status} {}: {}", .code.as_deref().unwrap_or("UnknownError"), .message.as_deref().unwrap_or("no message"))]
pub struct ServiceError {
    /// HTTP status code of the response.
    pub status: u16,
    /// Service error code, when the response carried one.
    pub code: Option<String>,
    /// Error message from the service.
    pub message: Option<String>,
    /// AWS request ID.
    pub request_id: Option<String>,
    /// Retry-After hint.
    pub retry_after: Option<Duration>,
}

impl ServiceError {
    /// Create an error for the given status.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            code: None,
            message: None,
            request_id: None,
            retry_after: None,
        }
    }

    /// Set the error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Set the error message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set the request ID.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Returns true if this is a throttling-class failure.
    pub fn is_throttling(&self) -> bool {
        self.status == http::StatusCode::TOO_MANY_REQUESTS.as_u16()
            || self.code.as_deref().map(is_throttling_code).unwrap_or(false)
    }

    /// Returns true if the service rejected the request's signing time.
    pub fn is_clock_skew(&self) -> bool {
        self.code.as_deref().map(is_clock_skew_code).unwrap_or(false)
    }

    /// Returns true if the error is retryable.
    pub fn is_retryable(&self) -> bool {
        if self.is_throttling() || self.is_clock_skew() {
            return true;
        }
        matches!(self.status, 500 | 502 | 503 | 504)
            || matches!(
                self.code.as_deref(),
                Some("RequestTimeout" | "RequestTimeoutException" | "InternalError")
            )
    }
}

/// Signer failures.
#[derive(Debug, Error)]
pub enum SigningError {
    /// The signer rejected the request.
    #[error("Signature calculation failed: {message}")]
    CalculationFailed {
        /// Details about the calculation error.
        message: String,
    },

    /// The configured signer cannot handle this kind of request.
    #[error("Unsupported signer: {message}")]
    Unsupported {
        /// Details about the mismatch.
        message: String,
    },
}

/// Identity resolution failures.
#[derive(Debug, Clone, Error)]
pub enum IdentityError {
    /// No identity could be resolved.
    #[error("Identity not found: {message}")]
    NotFound {
        /// Details about the lookup.
        message: String,
    },

    /// The identity has expired.
    #[error("Identity expired at {expiration}")]
    Expired {
        /// When the identity expired.
        expiration: String,
    },

    /// Resolution was abandoned before it produced a value.
    #[error("Identity resolution was cancelled")]
    Cancelled,
}

/// Checksum computation and framing errors.
#[derive(Debug, Error)]
pub enum ChecksumError {
    /// Reading the payload to checksum it failed.
    #[error("Failed to read payload for checksum: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Unsupported algorithm name.
    #[error("Unsupported checksum algorithm: {algorithm}")]
    UnsupportedAlgorithm {
        /// The unsupported algorithm.
        algorithm: String,
    },

    /// The aws-chunked frame could not be decoded.
    #[error("Malformed aws-chunked payload: {message}")]
    MalformedChunkedEncoding {
        /// What was wrong with the frame.
        message: String,
    },

    /// Checksum mismatch.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    Mismatch {
        /// Expected checksum.
        expected: String,
        /// Actual checksum.
        actual: String,
    },
}

/// Errors raised by interceptors.
#[derive(Debug, Error)]
pub enum InterceptorError {
    /// An interceptor hook failed.
    #[error("Interceptor hook '{hook}' failed: {message}")]
    Hook {
        /// The hook that failed.
        hook: &'static str,
        /// Error message.
        message: String,
    },

    /// An interceptor failed while the pipeline was reporting another failure.
    #[error("{source} (while reporting: {suppressed})")]
    WhileReportingFailure {
        /// The interceptor's own failure.
        source: Box<PipelineError>,
        /// The failure that was being reported.
        suppressed: Box<PipelineError>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_is_retryable() {
        let network = PipelineError::Network(NetworkError::ConnectionReset);
        assert!(network.is_retryable());

        let server = PipelineError::Service(ServiceError::new(503));
        assert!(server.is_retryable());

        let attempt_timeout = PipelineError::Timeout(TimeoutError::ApiCallAttemptTimeout {
            timeout: Duration::from_millis(500),
        });
        assert!(attempt_timeout.is_retryable());

        let call_timeout = PipelineError::Timeout(TimeoutError::ApiCallTimeout {
            timeout: Duration::from_secs(1),
        });
        assert!(!call_timeout.is_retryable());

        let not_found = PipelineError::Service(ServiceError::new(404).with_code("NoSuchKey"));
        assert!(!not_found.is_retryable());

        let token = PipelineError::Client(ClientError::SendTokenUnavailable);
        assert!(!token.is_retryable());
    }

    #[test]
    fn test_throttling_by_status_and_code() {
        assert!(PipelineError::Service(ServiceError::new(429)).is_throttling());
        assert!(PipelineError::Service(ServiceError::new(400).with_code("ThrottlingException"))
            .is_throttling());
        assert!(PipelineError::Service(ServiceError::new(503).with_code("SlowDown")).is_throttling());
        assert!(!PipelineError::Service(ServiceError::new(500)).is_throttling());
        assert!(!PipelineError::Network(NetworkError::ConnectionReset).is_throttling());
    }

    #[test]
    fn test_fault_is_terminal() {
        let fault = PipelineError::fault("boom");
        assert!(fault.is_fault());
        assert!(!fault.is_retryable());
        assert!(!fault.is_throttling());
    }

    #[test]
    fn test_timeout_messages() {
        let err = TimeoutError::ApiCallAttemptTimeout {
            timeout: Duration::from_millis(500),
        };
        assert!(err.to_string().contains("500 millis"));
    }

    #[test]
    fn test_service_error_display() {
        let err = ServiceError::new(429)
            .with_code("Throttling")
            .with_message("Rate exceeded");
        assert_eq!(err.to_string(), "HTTP 429 Throttling: Rate exceeded");
    }
}
