//! Recording signers.

use crate::error::SigningError;
use crate::execution::{ExecutionAttributes, SignerProperties};
use crate::http::{AsyncRequestBody, BodyStream, HttpRequest};
use crate::signing::{
    AsyncRequestBodySigner, AsyncSignRequest, AsyncSignedRequest, AsyncSigner, HttpSigner,
    Identity, SignRequest, SignedRequest, Signer,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Mock signer for selected auth schemes.
///
/// Adds `Authorization: MockSigner <access key id>` and records what it was
/// given.
#[derive(Debug, Default)]
pub struct MockHttpSigner {
    calls: AtomicUsize,
    last_properties: Mutex<Option<SignerProperties>>,
    last_identity: Mutex<Option<Identity>>,
    signed_payload: Option<AsyncRequestBody>,
}

impl MockHttpSigner {
    /// Create a new mock signer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the streaming payload with `payload` when signing asynchronously.
    pub fn with_signed_payload(mut self, payload: AsyncRequestBody) -> Self {
        self.signed_payload = Some(payload);
        self
    }

    /// Number of sign calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Properties passed to the latest call.
    pub fn last_properties(&self) -> Option<SignerProperties> {
        self.last_properties.lock().clone()
    }

    /// Identity passed to the latest call.
    pub fn last_identity(&self) -> Option<Identity> {
        self.last_identity.lock().clone()
    }

    fn sign_headers(&self, mut request: HttpRequest, identity: Identity, properties: SignerProperties) -> HttpRequest {
        self.calls.fetch_add(1, Ordering::SeqCst);
        request.put_header(
            "Authorization",
            format!("MockSigner {}", identity.access_key_id()),
        );
        *self.last_properties.lock() = Some(properties);
        *self.last_identity.lock() = Some(identity);
        request
    }
}

#[async_trait]
impl HttpSigner for MockHttpSigner {
    fn sign(&self, request: SignRequest) -> Result<SignedRequest, SigningError> {
        Ok(SignedRequest {
            request: self.sign_headers(request.request, request.identity, request.properties),
        })
    }

    async fn sign_async(&self, request: AsyncSignRequest) -> Result<AsyncSignedRequest, SigningError> {
        let AsyncSignRequest {
            request,
            payload,
            identity,
            properties,
        } = request;
        Ok(AsyncSignedRequest {
            request: self.sign_headers(request, identity, properties),
            payload: self.signed_payload.clone().or(payload),
        })
    }
}

/// Mock legacy signer in all three shapes.
///
/// Adds `Authorization: LegacySigner`. As a body-aware signer it prefixes the
/// payload with `signed:`.
#[derive(Debug, Default)]
pub struct MockLegacySigner {
    calls: AtomicUsize,
    body_calls: AtomicUsize,
    saw_payload: AtomicBool,
    last_attributes: Mutex<Option<ExecutionAttributes>>,
}

const BODY_PREFIX: &[u8] = b"signed:";

impl MockLegacySigner {
    /// Create a new mock signer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of header-signing calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of payload-signing calls.
    pub fn body_calls(&self) -> usize {
        self.body_calls.load(Ordering::SeqCst)
    }

    /// Whether the asynchronous signer was offered a payload.
    pub fn saw_payload(&self) -> bool {
        self.saw_payload.load(Ordering::SeqCst)
    }

    /// Attributes passed to the latest call.
    pub fn last_attributes(&self) -> Option<ExecutionAttributes> {
        self.last_attributes.lock().clone()
    }

    fn sign_headers(&self, mut request: HttpRequest, attributes: &ExecutionAttributes) -> HttpRequest {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_attributes.lock() = Some(attributes.copy());
        request.put_header("Authorization", "LegacySigner");
        request
    }
}

impl Signer for MockLegacySigner {
    fn sign(
        &self,
        request: HttpRequest,
        attributes: &ExecutionAttributes,
    ) -> Result<HttpRequest, SigningError> {
        Ok(self.sign_headers(request, attributes))
    }
}

impl AsyncRequestBodySigner for MockLegacySigner {
    fn sign_async_request_body(
        &self,
        _request: &HttpRequest,
        body: AsyncRequestBody,
        _attributes: &ExecutionAttributes,
    ) -> Result<AsyncRequestBody, SigningError> {
        self.body_calls.fetch_add(1, Ordering::SeqCst);
        let length = body.content_length().map(|len| len + BODY_PREFIX.len() as u64);
        Ok(body.map_stream(length, |inner| -> BodyStream {
            Box::pin(stream::iter(vec![Ok(Bytes::from_static(BODY_PREFIX))]).chain(inner))
        }))
    }
}

#[async_trait]
impl AsyncSigner for MockLegacySigner {
    async fn sign(
        &self,
        request: HttpRequest,
        payload: Option<AsyncRequestBody>,
        attributes: &ExecutionAttributes,
    ) -> Result<HttpRequest, SigningError> {
        self.saw_payload.store(payload.is_some(), Ordering::SeqCst);
        Ok(self.sign_headers(request, attributes))
    }
}
