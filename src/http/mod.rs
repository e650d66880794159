//! HTTP request and response descriptions exchanged between pipeline stages.
//!
//! Header names are matched case-insensitively. Stages mutate requests with
//! [`HttpRequest::put_header`] (replace) and [`HttpRequest::append_header`]
//! (comma-join with any existing value).

mod body;
mod transport;

pub use body::{
    AsyncRequestBody, BodyStream, BytesContentProvider, ContentStreamProvider, RequestBody,
};
pub use transport::{
    BlockingReqwestTransport, HttpTransport, ReqwestTransport, ReqwestTransportBuilder,
    SyncHttpTransport,
};

use bytes::Bytes;
use std::collections::HashMap;

/// Header carrying the base64 MD5 of the payload.
pub const CONTENT_MD5: &str = "Content-MD5";
/// Header carrying the size of the body on the wire.
pub const CONTENT_LENGTH: &str = "Content-Length";
/// Header carrying the content coding(s) applied to the body.
pub const CONTENT_ENCODING: &str = "Content-Encoding";

/// HTTP request to be sent.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: String,
    /// Request URL.
    pub url: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Request body, when the payload is available to blocking readers.
    pub body: Option<RequestBody>,
}

impl HttpRequest {
    /// Create a new HTTP request.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    /// Set the request body.
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Add a header, replacing any existing value.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.put_header(name, value);
        self
    }

    /// Get a header value by name (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns true if a header with this name is present.
    pub fn has_header(&self, name: &str) -> bool {
        self.get_header(name).is_some()
    }

    /// Set a header, replacing every existing spelling of the same name.
    pub fn put_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove_header(&name);
        self.headers.insert(name, value.into());
    }

    /// Append a value to a header, joining with any existing value.
    pub fn append_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.remove_header(&name) {
            Some(existing) if !existing.is_empty() => {
                self.headers.insert(name, format!("{}, {}", existing, value));
            }
            _ => {
                self.headers.insert(name, value);
            }
        }
    }

    /// Remove a header (case-insensitive), returning its value.
    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        let key = self
            .headers
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned()?;
        self.headers.remove(&key)
    }

    /// Returns the declared `Content-Length`, if it parses.
    pub fn content_length(&self) -> Option<u64> {
        self.get_header(CONTENT_LENGTH).and_then(|v| v.trim().parse().ok())
    }
}

/// HTTP response received.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: Bytes,
}

impl HttpResponse {
    /// Create an empty response with the given status.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Bytes::new(),
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the response body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Check if the response indicates success (2xx status).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Get a header value by name (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get the AWS request ID from response headers.
    pub fn request_id(&self) -> Option<&str> {
        self.get_header("x-amz-request-id")
            .or_else(|| self.get_header("x-amzn-requestid"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_header_replaces_any_case() {
        let mut request = HttpRequest::new("PUT", "https://example.com")
            .with_header("content-length", "10");
        request.put_header("Content-Length", "20");

        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.get_header("CONTENT-LENGTH"), Some("20"));
        assert_eq!(request.content_length(), Some(20));
    }

    #[test]
    fn test_append_header() {
        let mut request =
            HttpRequest::new("PUT", "https://example.com").with_header("Content-Encoding", "gzip");
        request.append_header("content-encoding", "aws-chunked");
        assert_eq!(request.get_header("Content-Encoding"), Some("gzip, aws-chunked"));

        let mut fresh = HttpRequest::new("PUT", "https://example.com");
        fresh.append_header("Content-Encoding", "aws-chunked");
        assert_eq!(fresh.get_header("content-encoding"), Some("aws-chunked"));
    }

    #[test]
    fn test_remove_header() {
        let mut request =
            HttpRequest::new("GET", "https://example.com").with_header("Content-MD5", "abc");
        assert_eq!(request.remove_header("content-md5").as_deref(), Some("abc"));
        assert!(!request.has_header("Content-MD5"));
        assert!(request.remove_header("content-md5").is_none());
    }

    #[test]
    fn test_http_response_headers() {
        let response = HttpResponse::new(200)
            .with_header("x-amzn-RequestId", "ABC123")
            .with_header("Content-Type", "application/json");

        assert!(response.is_success());
        assert_eq!(response.get_header("content-type"), Some("application/json"));
        assert_eq!(response.request_id(), Some("ABC123"));
        assert!(!HttpResponse::new(503).is_success());
    }
}
