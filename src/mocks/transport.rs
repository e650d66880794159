//! Scripted transports.
//!
//! Outcomes are served in the order they were queued. The last one is
//! repeated once the queue runs down, so a single queued outcome answers
//! every attempt.

use super::MockOutcome;
use crate::error::{NetworkError, PipelineError};
use crate::http::{AsyncRequestBody, HttpRequest, HttpResponse, HttpTransport, SyncHttpTransport};
use crate::timeout::CancellationSignal;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Script {
    outcomes: Mutex<VecDeque<MockOutcome>>,
    requests: Mutex<Vec<HttpRequest>>,
    payloads: Mutex<Vec<Option<Bytes>>>,
}

impl Script {
    fn push(&self, outcome: MockOutcome) {
        self.outcomes.lock().push_back(outcome);
    }

    fn record(&self, request: HttpRequest, payload: Option<Bytes>) {
        self.requests.lock().push(request);
        self.payloads.lock().push(payload);
    }

    fn next(&self) -> Result<HttpResponse> {
        let mut outcomes = self.outcomes.lock();
        let outcome = if outcomes.len() > 1 {
            outcomes.pop_front()
        } else {
            outcomes.front().cloned()
        };
        match outcome {
            Some(outcome) => outcome.produce(),
            None => Err(NetworkError::ConnectionFailed {
                message: "No mock response available".to_string(),
            }
            .into()),
        }
    }
}

macro_rules! scripted_transport {
    ($name:ident) => {
        impl $name {
            /// Queue a response.
            pub fn with_response(self, response: HttpResponse) -> Self {
                self.script.push(MockOutcome::Response(response));
                self
            }

            /// Queue a failure, built fresh every time it is served.
            pub fn with_error<F>(self, error: F) -> Self
            where
                F: Fn() -> PipelineError + Send + Sync + 'static,
            {
                self.script.push(MockOutcome::Error(Arc::new(error)));
                self
            }

            /// Take this long before answering.
            pub fn with_delay(mut self, delay: Duration) -> Self {
                self.delay = Some(delay);
                self
            }

            /// Every request sent so far.
            pub fn requests(&self) -> Vec<HttpRequest> {
                self.script.requests.lock().clone()
            }

            /// The body bytes of every request, where one was sent.
            pub fn payloads(&self) -> Vec<Option<Bytes>> {
                self.script.payloads.lock().clone()
            }

            /// The most recent request.
            pub fn last_request(&self) -> Option<HttpRequest> {
                self.script.requests.lock().last().cloned()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("queued", &self.script.outcomes.lock().len())
                    .field("recorded", &self.script.requests.lock().len())
                    .finish()
            }
        }
    };
}

/// Mock non-blocking transport.
pub struct MockTransport {
    script: Script,
    delay: Option<Duration>,
}

impl MockTransport {
    /// A transport with nothing queued.
    pub fn new() -> Self {
        Self {
            script: Script::default(),
            delay: None,
        }
    }
}

scripted_transport!(MockTransport);

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest, payload: Option<AsyncRequestBody>) -> Result<HttpResponse> {
        let body = match (&payload, &request.body) {
            (Some(payload), _) => Some(payload.collect().await.map_err(NetworkError::Io)?),
            (None, Some(body)) => Some(body.read_all().map_err(NetworkError::Io)?),
            (None, None) => None,
        };
        self.script.record(request, body);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script.next()
    }
}

/// Mock blocking transport. A configured delay is spent parked on the call's
/// cancellation signal, the way a real client gives up on interruption.
pub struct MockSyncTransport {
    script: Script,
    delay: Option<Duration>,
}

impl MockSyncTransport {
    /// A transport with nothing queued.
    pub fn new() -> Self {
        Self {
            script: Script::default(),
            delay: None,
        }
    }
}

scripted_transport!(MockSyncTransport);

impl SyncHttpTransport for MockSyncTransport {
    fn send(&self, request: HttpRequest, signal: &CancellationSignal) -> Result<HttpResponse> {
        let body = match &request.body {
            Some(body) => Some(body.read_all().map_err(NetworkError::Io)?),
            None => None,
        };
        self.script.record(request, body);

        if let Some(delay) = self.delay {
            signal.sleep(delay)?;
        }
        self.script.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_outcome_repeats() {
        let transport = MockSyncTransport::new()
            .with_response(HttpResponse::new(500))
            .with_response(HttpResponse::new(200));
        let signal = CancellationSignal::new();

        let statuses: Vec<u16> = (0..3)
            .map(|_| {
                transport
                    .send(HttpRequest::new("GET", "https://example.com"), &signal)
                    .unwrap()
                    .status
            })
            .collect();

        assert_eq!(statuses, vec![500, 200, 200]);
        assert_eq!(transport.requests().len(), 3);
    }

    #[test]
    fn test_empty_script_fails() {
        let transport = MockSyncTransport::new();
        let err = transport
            .send(HttpRequest::new("GET", "https://example.com"), &CancellationSignal::new())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Network(NetworkError::ConnectionFailed { .. })));
    }

    #[tokio::test]
    async fn test_async_payload_is_recorded() {
        let transport = MockTransport::new().with_response(HttpResponse::new(200));
        transport
            .send(
                HttpRequest::new("PUT", "https://example.com"),
                Some(AsyncRequestBody::from_bytes("data")),
            )
            .await
            .unwrap();

        assert_eq!(transport.payloads(), vec![Some(Bytes::from_static(b"data"))]);
    }
}
