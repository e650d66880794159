//! Identities consumed by selected-auth-scheme signers.

use crate::error::IdentityError;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Credentials a signer signs with.
#[derive(Clone)]
pub struct Identity {
    access_key_id: String,
    secret_access_key: Arc<SecretString>,
    session_token: Option<Arc<SecretString>>,
    expiration: Option<DateTime<Utc>>,
}

impl Identity {
    /// Long-term credentials.
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: Arc::new(SecretString::new(secret_access_key.into())),
            session_token: None,
            expiration: None,
        }
    }

    /// Attach a session token.
    pub fn with_session_token(mut self, session_token: impl Into<String>) -> Self {
        self.session_token = Some(Arc::new(SecretString::new(session_token.into())));
        self
    }

    /// Attach an expiration time.
    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Get the access key ID.
    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    /// Get the secret access key.
    ///
    /// Note: This exposes the secret. Use carefully and avoid logging.
    pub fn secret_access_key(&self) -> &str {
        self.secret_access_key.expose_secret()
    }

    /// Get the session token, if any.
    pub fn session_token(&self) -> Option<&str> {
        self.session_token
            .as_ref()
            .map(|s| s.expose_secret().as_str())
    }

    /// Get the expiration time, if any.
    pub fn expiration(&self) -> Option<&DateTime<Utc>> {
        self.expiration.as_ref()
    }

    /// Check if the identity has expired.
    pub fn is_expired(&self) -> bool {
        match &self.expiration {
            Some(exp) => Utc::now() >= *exp,
            None => false,
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expiration", &self.expiration)
            .finish()
    }
}

type IdentityFuture = Shared<BoxFuture<'static, Result<Identity, IdentityError>>>;

/// An identity that may still be resolving.
///
/// Resolution starts upstream of the pipeline; the signing stage awaits it.
/// Clones share one resolution, so every attempt sees the same result.
#[derive(Clone)]
pub struct IdentityHandle {
    inner: IdentityFuture,
}

impl IdentityHandle {
    /// An already-resolved identity.
    pub fn ready(identity: Identity) -> Self {
        Self::from_future(futures::future::ready(Ok(identity)))
    }

    /// A resolution that already failed.
    pub fn failed(error: IdentityError) -> Self {
        Self::from_future(futures::future::ready(Err(error)))
    }

    /// Wrap an in-flight resolution.
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<Identity, IdentityError>> + Send + 'static,
    {
        Self {
            inner: future.boxed().shared(),
        }
    }

    /// Wait for the identity.
    pub async fn resolve(&self) -> Result<Identity, IdentityError> {
        let identity = self.inner.clone().await?;
        if identity.is_expired() {
            return Err(IdentityError::Expired {
                expiration: identity
                    .expiration()
                    .map(|e| e.to_rfc3339())
                    .unwrap_or_default(),
            });
        }
        Ok(identity)
    }

    /// Block the calling thread until the identity is available.
    ///
    /// The underlying future must not depend on the caller's runtime to make
    /// progress.
    pub fn resolve_blocking(&self) -> Result<Identity, IdentityError> {
        futures::executor::block_on(self.resolve())
    }

    /// The identity if resolution has already completed.
    pub fn peek(&self) -> Option<Result<Identity, IdentityError>> {
        self.inner.peek().cloned()
    }
}

impl fmt::Debug for IdentityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityHandle")
            .field("resolved", &self.inner.peek().is_some())
            .finish()
    }
}
