//! Mock implementations for testing.
//!
//! Scripted transports, recording signers and a recording interceptor, for
//! exercising the pipeline without a network.

mod interceptor;
mod signer;
mod transport;

pub use interceptor::RecordingInterceptor;
pub use signer::{MockHttpSigner, MockLegacySigner};
pub use transport::{MockSyncTransport, MockTransport};

use crate::error::PipelineError;
use crate::http::HttpResponse;
use std::sync::Arc;

/// One scripted transport outcome.
#[derive(Clone)]
pub(crate) enum MockOutcome {
    Response(HttpResponse),
    Error(Arc<dyn Fn() -> PipelineError + Send + Sync>),
}

impl MockOutcome {
    pub(crate) fn produce(&self) -> Result<HttpResponse, PipelineError> {
        match self {
            MockOutcome::Response(response) => Ok(response.clone()),
            MockOutcome::Error(factory) => Err(factory()),
        }
    }
}
