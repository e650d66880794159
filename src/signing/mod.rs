//! Signer capabilities consumed by the signing stage.
//!
//! Two mutually exclusive protocols exist. A *selected auth scheme* pairs an
//! [`IdentityHandle`] with an [`HttpSigner`] and signer properties. The
//! *legacy* protocol hands a [`LegacySigner`] the whole attribute bag. Which
//! one a call uses is resolved once into a [`SigningMode`].

mod identity;

pub use identity::{Identity, IdentityHandle};

use crate::error::SigningError;
use crate::execution::attributes::{ExecutionAttributes, SignerProperties};
use crate::http::{AsyncRequestBody, HttpRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// Scheme id that means "send the request unsigned".
pub const NO_AUTH_SCHEME_ID: &str = "smithy.api#noAuth";

/// How the signer treats the request payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningMethod {
    /// The payload is not covered by the signature.
    UnsignedPayload,
    /// The payload hash is part of the header signature.
    HeaderSignature,
    /// The payload is signed chunk by chunk while it streams.
    StreamingSignature,
}

impl SigningMethod {
    /// Returns true if the payload is excluded from the signature.
    pub fn is_unsigned_payload(&self) -> bool {
        matches!(self, SigningMethod::UnsignedPayload)
    }
}

/// Clock a signer stamps requests with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningClock {
    /// Wall clock corrected by a clock-skew offset in seconds.
    System {
        /// Seconds the local clock runs ahead of the service.
        offset_seconds: i64,
    },
    /// A fixed instant.
    Fixed(DateTime<Utc>),
}

impl SigningClock {
    /// Wall clock corrected by `offset_seconds`.
    pub fn with_offset(offset_seconds: i64) -> Self {
        SigningClock::System { offset_seconds }
    }

    /// The instant to sign with.
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            SigningClock::System { offset_seconds } => {
                Utc::now() - chrono::Duration::seconds(*offset_seconds)
            }
            SigningClock::Fixed(instant) => *instant,
        }
    }
}

/// Input to a blocking [`HttpSigner::sign`].
#[derive(Debug, Clone)]
pub struct SignRequest {
    /// The request to sign, including its body.
    pub request: HttpRequest,
    /// Who is signing.
    pub identity: Identity,
    /// Scheme-specific properties, including the signing clock.
    pub properties: SignerProperties,
}

/// Output of [`HttpSigner::sign`].
#[derive(Debug, Clone)]
pub struct SignedRequest {
    /// The signed request.
    pub request: HttpRequest,
}

/// Input to [`HttpSigner::sign_async`].
#[derive(Debug, Clone)]
pub struct AsyncSignRequest {
    /// The request to sign.
    pub request: HttpRequest,
    /// Streaming payload, if any.
    pub payload: Option<AsyncRequestBody>,
    /// Who is signing.
    pub identity: Identity,
    /// Scheme-specific properties, including the signing clock.
    pub properties: SignerProperties,
}

/// Output of [`HttpSigner::sign_async`].
#[derive(Debug, Clone)]
pub struct AsyncSignedRequest {
    /// The signed request.
    pub request: HttpRequest,
    /// The payload to send, possibly re-framed by the signer.
    pub payload: Option<AsyncRequestBody>,
}

/// Identity-based signer used by selected auth schemes.
#[async_trait]
pub trait HttpSigner: Send + Sync + fmt::Debug {
    /// Sign a request whose body is fully available.
    fn sign(&self, request: SignRequest) -> Result<SignedRequest, SigningError>;

    /// Sign a request whose payload streams.
    ///
    /// The default signs headers with [`sign`](Self::sign) and passes the
    /// payload through untouched.
    async fn sign_async(&self, request: AsyncSignRequest) -> Result<AsyncSignedRequest, SigningError> {
        let AsyncSignRequest {
            request,
            payload,
            identity,
            properties,
        } = request;
        let signed = self.sign(SignRequest {
            request,
            identity,
            properties,
        })?;
        Ok(AsyncSignedRequest {
            request: signed.request,
            payload,
        })
    }
}

/// The auth scheme chosen for a call.
#[derive(Clone)]
pub struct SelectedAuthScheme {
    scheme_id: String,
    identity: IdentityHandle,
    signer: Arc<dyn HttpSigner>,
    properties: SignerProperties,
}

impl SelectedAuthScheme {
    /// Pair an identity with a signer.
    pub fn new(
        scheme_id: impl Into<String>,
        identity: IdentityHandle,
        signer: Arc<dyn HttpSigner>,
    ) -> Self {
        Self {
            scheme_id: scheme_id.into(),
            identity,
            signer,
            properties: SignerProperties::new(),
        }
    }

    /// Set the signer properties.
    pub fn with_properties(mut self, properties: SignerProperties) -> Self {
        self.properties = properties;
        self
    }

    /// The scheme id.
    pub fn scheme_id(&self) -> &str {
        &self.scheme_id
    }

    /// The identity to sign with.
    pub fn identity(&self) -> &IdentityHandle {
        &self.identity
    }

    /// The signer.
    pub fn signer(&self) -> &Arc<dyn HttpSigner> {
        &self.signer
    }

    /// Signer-specific properties.
    pub fn properties(&self) -> &SignerProperties {
        &self.properties
    }

    /// Returns true for the scheme that skips signing.
    pub fn is_no_auth(&self) -> bool {
        self.scheme_id == NO_AUTH_SCHEME_ID
    }
}

impl fmt::Debug for SelectedAuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectedAuthScheme")
            .field("scheme_id", &self.scheme_id)
            .field("signer", &self.signer)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

/// Legacy signer that sees the whole attribute bag.
pub trait Signer: Send + Sync + fmt::Debug {
    /// Sign the request.
    fn sign(
        &self,
        request: HttpRequest,
        attributes: &ExecutionAttributes,
    ) -> Result<HttpRequest, SigningError>;
}

/// Legacy signer that can also sign a streaming payload.
pub trait AsyncRequestBodySigner: Signer {
    /// Wrap the payload of an already signed request.
    fn sign_async_request_body(
        &self,
        request: &HttpRequest,
        body: AsyncRequestBody,
        attributes: &ExecutionAttributes,
    ) -> Result<AsyncRequestBody, SigningError>;
}

/// Fully asynchronous legacy signer.
#[async_trait]
pub trait AsyncSigner: Send + Sync + fmt::Debug {
    /// Sign the request; the payload is offered for inspection only.
    async fn sign(
        &self,
        request: HttpRequest,
        payload: Option<AsyncRequestBody>,
        attributes: &ExecutionAttributes,
    ) -> Result<HttpRequest, SigningError>;
}

/// The shapes a legacy signer comes in.
#[derive(Clone, Debug)]
pub enum LegacySigner {
    /// Signs headers only.
    Plain(Arc<dyn Signer>),
    /// Signs headers and wraps a streaming payload.
    BodyAware(Arc<dyn AsyncRequestBodySigner>),
    /// Signs asynchronously.
    Async(Arc<dyn AsyncSigner>),
}

/// Signing protocol for one call.
#[derive(Clone, Debug)]
pub enum SigningMode {
    /// Sign with a legacy signer.
    Legacy(LegacySigner),
    /// Sign through a selected auth scheme.
    Selected(SelectedAuthScheme),
    /// Nothing to sign with.
    Unsigned,
}

impl SigningMode {
    /// Pick the protocol. A legacy signer takes precedence over a scheme.
    pub fn resolve(legacy: Option<LegacySigner>, scheme: Option<SelectedAuthScheme>) -> Self {
        match (legacy, scheme) {
            (Some(signer), _) => SigningMode::Legacy(signer),
            (None, Some(scheme)) => SigningMode::Selected(scheme),
            (None, None) => SigningMode::Unsigned,
        }
    }

    /// Returns true when a selected auth scheme drives signing.
    pub fn is_selected(&self) -> bool {
        matches!(self, SigningMode::Selected(_))
    }
}
