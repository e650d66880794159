//! Mapping of unsuccessful HTTP responses to service errors.

use super::ServiceError;
use crate::http::HttpResponse;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::time::Duration;

/// Error codes that services use to ask the client to back off.
static THROTTLING_CODES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "Throttling",
        "ThrottlingException",
        "ThrottledException",
        "RequestThrottledException",
        "TooManyRequestsException",
        "ProvisionedThroughputExceededException",
        "TransactionInProgressException",
        "RequestLimitExceeded",
        "BandwidthLimitExceeded",
        "LimitExceededException",
        "RequestThrottled",
        "SlowDown",
        "PriorRequestNotComplete",
        "EC2ThrottledException",
    ]
    .into_iter()
    .collect()
});

/// Returns true if the service error code signals throttling.
pub fn is_throttling_code(code: &str) -> bool {
    THROTTLING_CODES.contains(code)
}

/// Error codes that mean the request's signing time was off.
static CLOCK_SKEW_CODES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "RequestTimeTooSkewed",
        "RequestExpired",
        "InvalidSignatureException",
        "SignatureDoesNotMatch",
        "AuthFailure",
        "RequestInTheFuture",
    ]
    .into_iter()
    .collect()
});

/// Returns true if the service error code signals clock skew.
pub fn is_clock_skew_code(code: &str) -> bool {
    CLOCK_SKEW_CODES.contains(code)
}

/// Seconds the local clock runs ahead of the server, from a response `Date` header.
pub fn clock_skew_seconds(response: &HttpResponse) -> Option<i64> {
    let date = response.get_header("date")?;
    let server = DateTime::parse_from_rfc2822(date.trim()).ok()?;
    Some((Utc::now() - server.with_timezone(&Utc)).num_seconds())
}

/// Map an unsuccessful HTTP response to a [`ServiceError`].
///
/// The error code is taken from the `x-amzn-errortype` header, a JSON
/// `__type`/`code` member, or an XML `<Code>` element, in that order.
pub fn map_response_error(response: &HttpResponse) -> ServiceError {
    let body = String::from_utf8_lossy(&response.body);
    let (body_code, message) = parse_error_body(&body);

    let code = response
        .get_header("x-amzn-errortype")
        .map(|value| strip_code(value).to_string())
        .or(body_code);

    ServiceError {
        status: response.status,
        code,
        message,
        request_id: response.request_id().map(|s| s.to_string()),
        retry_after: response.get_header("retry-after").and_then(parse_retry_after),
    }
}

/// Parse a `Retry-After` header value, either delta-seconds or an HTTP date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&Utc) - Utc::now();
    delta.to_std().ok()
}

fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    let trimmed = body.trim_start();
    if trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
            let code = value
                .get("__type")
                .or_else(|| value.get("code"))
                .or_else(|| value.get("Code"))
                .and_then(|v| v.as_str())
                .map(|s| strip_code(s).to_string());
            let message = value
                .get("message")
                .or_else(|| value.get("Message"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            return (code, message);
        }
        return (None, None);
    }
    if trimmed.starts_with('<') {
        return (xml_element(trimmed, "Code"), xml_element(trimmed, "Message"));
    }
    (None, None)
}

/// `aws.protocoltests#FooError:http://...` and `ns#FooError` both reduce to `FooError`.
fn strip_code(raw: &str) -> &str {
    let without_uri = raw.split(':').next().unwrap_or(raw);
    without_uri.rsplit('#').next().unwrap_or(without_uri)
}

fn xml_element(xml: &str, name: &str) -> Option<String> {
    let open = format!("<{}>", name);
    let close = format!("</{}>", name);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse::new(status).with_body(Bytes::from(body.to_string()))
    }

    #[test]
    fn test_map_xml_error() {
        let resp = response(
            503,
            "<Error><Code>SlowDown</Code><Message>Please reduce your request rate.</Message></Error>",
        )
        .with_header("x-amz-request-id", "REQ123");

        let err = map_response_error(&resp);
        assert_eq!(err.status, 503);
        assert_eq!(err.code.as_deref(), Some("SlowDown"));
        assert_eq!(err.message.as_deref(), Some("Please reduce your request rate."));
        assert_eq!(err.request_id.as_deref(), Some("REQ123"));
        assert!(err.is_throttling());
    }

    #[test]
    fn test_map_json_error() {
        let resp = response(
            400,
            r#"{"__type":"com.amazonaws.dynamodb#ProvisionedThroughputExceededException","message":"slow"}"#,
        );
        let err = map_response_error(&resp);
        assert_eq!(
            err.code.as_deref(),
            Some("ProvisionedThroughputExceededException")
        );
        assert!(err.is_throttling());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_type_header_wins() {
        let resp = response(400, r#"{"__type":"ValidationException"}"#)
            .with_header("x-amzn-ErrorType", "ThrottlingException:http://internal.amazon.com/");
        let err = map_response_error(&resp);
        assert_eq!(err.code.as_deref(), Some("ThrottlingException"));
    }

    #[test]
    fn test_retry_after_seconds() {
        let resp = response(429, "").with_header("Retry-After", "7");
        let err = map_response_error(&resp);
        assert_eq!(err.retry_after, Some(Duration::from_secs(7)));
        assert!(err.code.is_none());
        assert!(err.is_throttling());
    }

    #[test]
    fn test_unparseable_body() {
        let err = map_response_error(&response(500, "gateway exploded"));
        assert!(err.code.is_none());
        assert!(err.message.is_none());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_clock_skew_detection() {
        let skewed_date = (Utc::now() - chrono::Duration::minutes(15)).to_rfc2822();
        let resp = response(403, "<Error><Code>RequestTimeTooSkewed</Code></Error>")
            .with_header("Date", skewed_date);
        let err = map_response_error(&resp);

        assert!(err.is_clock_skew());
        assert!(err.is_retryable());
        let skew = clock_skew_seconds(&resp).unwrap();
        assert!((899..=901).contains(&skew));
    }
}
