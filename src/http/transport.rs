//! Transport collaborators.
//!
//! A transport turns a fully signed, checksummed request into a response or a
//! transport-level failure. Retries, signing and timeouts live in the pipeline.

use super::{AsyncRequestBody, HttpRequest, HttpResponse};
use crate::error::{AbortedError, ClientError, NetworkError, PipelineError};
use crate::timeout::CancellationSignal;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Non-blocking transport.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a request. A streaming payload, when present, replaces `request.body`.
    async fn send(
        &self,
        request: HttpRequest,
        payload: Option<AsyncRequestBody>,
    ) -> Result<HttpResponse>;
}

/// Blocking transport.
pub trait SyncHttpTransport: Send + Sync {
    /// Send a request, occupying the calling thread until it completes.
    ///
    /// Implementations should give up with [`AbortedError::Interrupted`] once
    /// `signal` is cancelled, at whatever granularity the client allows.
    fn send(&self, request: HttpRequest, signal: &CancellationSignal) -> Result<HttpResponse>;
}

/// Default non-blocking transport using reqwest.
pub struct ReqwestTransport {
    client: reqwest::Client,
    read_timeout: Duration,
}

impl ReqwestTransport {
    /// Create a new transport with default settings.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Create a transport builder.
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        request: HttpRequest,
        payload: Option<AsyncRequestBody>,
    ) -> Result<HttpResponse> {
        let method = parse_method(&request.method)?;
        let url = parse_url(&request.url)?;
        let mut req_builder = self.client.request(method, url);

        for (name, value) in &request.headers {
            req_builder = req_builder.header(name, value);
        }

        if let Some(payload) = payload {
            req_builder = req_builder.body(reqwest::Body::wrap_stream(payload.subscribe()));
        } else if let Some(body) = &request.body {
            req_builder = req_builder.body(body.read_all().map_err(NetworkError::Io)?);
        }

        let response = req_builder
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.read_timeout))?;

        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(e, self.read_timeout))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport").finish_non_exhaustive()
    }
}

/// Blocking transport using reqwest's blocking client.
///
/// The blocking client cannot be interrupted mid-flight, so the cancellation
/// signal is checked before the request is written and after the response
/// arrives.
pub struct BlockingReqwestTransport {
    client: reqwest::blocking::Client,
    read_timeout: Duration,
}

impl BlockingReqwestTransport {
    /// Create a new transport with default settings.
    pub fn new() -> Result<Self> {
        ReqwestTransportBuilder::new().build_blocking()
    }
}

impl SyncHttpTransport for BlockingReqwestTransport {
    fn send(&self, request: HttpRequest, signal: &CancellationSignal) -> Result<HttpResponse> {
        if signal.is_cancelled() {
            return Err(AbortedError::Interrupted.into());
        }

        let method = parse_method(&request.method)?;
        let url = parse_url(&request.url)?;
        let mut req_builder = self.client.request(method, url);

        for (name, value) in &request.headers {
            req_builder = req_builder.header(name, value);
        }

        if let Some(body) = &request.body {
            let reader = body.new_stream().map_err(NetworkError::Io)?;
            let body = match body.content_length() {
                Some(length) => reqwest::blocking::Body::sized(reader, length),
                None => reqwest::blocking::Body::new(reader),
            };
            req_builder = req_builder.body(body);
        }

        let response = req_builder
            .send()
            .map_err(|e| map_reqwest_error(e, self.read_timeout))?;

        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response
            .bytes()
            .map_err(|e| map_reqwest_error(e, self.read_timeout))?;

        if signal.is_cancelled() {
            return Err(AbortedError::Interrupted.into());
        }

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl std::fmt::Debug for BlockingReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingReqwestTransport").finish_non_exhaustive()
    }
}

fn parse_method(method: &str) -> Result<reqwest::Method> {
    method.parse::<reqwest::Method>().map_err(|e| {
        PipelineError::Client(ClientError::InvalidRequest {
            message: format!("Invalid HTTP method: {}", e),
        })
    })
}

fn parse_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| {
        PipelineError::Client(ClientError::InvalidRequest {
            message: format!("Invalid URL '{}': {}", raw, e),
        })
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ClientError::InvalidRequest {
            message: format!("Unsupported URL scheme: {}", scheme),
        }
        .into()),
    }
}

fn collect_headers(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
        .collect()
}

fn map_reqwest_error(error: reqwest::Error, read_timeout: Duration) -> PipelineError {
    if error.is_timeout() {
        NetworkError::Timeout {
            duration: read_timeout,
        }
        .into()
    } else if error.is_builder() {
        ClientError::InvalidRequest {
            message: error.to_string(),
        }
        .into()
    } else {
        NetworkError::ConnectionFailed {
            message: error.to_string(),
        }
        .into()
    }
}

/// Builder for reqwest transports.
pub struct ReqwestTransportBuilder {
    connect_timeout: Duration,
    read_timeout: Duration,
    user_agent: String,
}

impl ReqwestTransportBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
            user_agent: format!("aws-request-pipeline/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the socket read timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the User-Agent header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Build the non-blocking transport.
    pub fn build(self) -> Result<ReqwestTransport> {
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.read_timeout)
            .user_agent(&self.user_agent)
            .build()
            .map_err(|e| NetworkError::TlsError {
                message: e.to_string(),
            })?;

        Ok(ReqwestTransport {
            client,
            read_timeout: self.read_timeout,
        })
    }

    /// Build the blocking transport.
    ///
    /// Must not be called from within an async runtime.
    pub fn build_blocking(self) -> Result<BlockingReqwestTransport> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.read_timeout)
            .user_agent(&self.user_agent)
            .build()
            .map_err(|e| NetworkError::TlsError {
                message: e.to_string(),
            })?;

        Ok(BlockingReqwestTransport {
            client,
            read_timeout: self.read_timeout,
        })
    }
}

impl Default for ReqwestTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}
