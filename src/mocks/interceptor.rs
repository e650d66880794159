//! Interceptor that records which hooks ran.

use crate::error::PipelineError;
use crate::execution::{ExecutionAttributes, ExecutionInterceptor, InterceptorContext};
use crate::http::HttpRequest;
use crate::Result;
use parking_lot::Mutex;

/// Records hook invocations and what the hooks saw.
#[derive(Debug, Default)]
pub struct RecordingInterceptor {
    hooks: Mutex<Vec<&'static str>>,
    transmitted: Mutex<Vec<HttpRequest>>,
    last_error_status: Mutex<Option<u16>>,
}

impl RecordingInterceptor {
    /// Create a new recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hook names in invocation order.
    pub fn hooks(&self) -> Vec<&'static str> {
        self.hooks.lock().clone()
    }

    /// How often `hook` ran.
    pub fn count(&self, hook: &str) -> usize {
        self.hooks.lock().iter().filter(|h| **h == hook).count()
    }

    /// The request visible to `before_transmission`, per attempt.
    pub fn transmitted(&self) -> Vec<HttpRequest> {
        self.transmitted.lock().clone()
    }

    /// Status code of the failure passed to `on_execution_failure`.
    pub fn last_error_status(&self) -> Option<u16> {
        *self.last_error_status.lock()
    }

    fn record(&self, hook: &'static str) {
        self.hooks.lock().push(hook);
    }
}

impl ExecutionInterceptor for RecordingInterceptor {
    fn before_transmission(
        &self,
        context: &InterceptorContext,
        _attributes: &ExecutionAttributes,
    ) -> Result<()> {
        self.record("before_transmission");
        if let Some(request) = &context.http_request {
            self.transmitted.lock().push(request.clone());
        }
        Ok(())
    }

    fn before_unmarshalling(
        &self,
        _context: &InterceptorContext,
        _attributes: &ExecutionAttributes,
    ) -> Result<()> {
        self.record("before_unmarshalling");
        Ok(())
    }

    fn after_execution(
        &self,
        _context: &InterceptorContext,
        _attributes: &ExecutionAttributes,
    ) -> Result<()> {
        self.record("after_execution");
        Ok(())
    }

    fn on_attempt_failure(
        &self,
        _context: &InterceptorContext,
        _attributes: &ExecutionAttributes,
        _error: &PipelineError,
    ) -> Result<()> {
        self.record("on_attempt_failure");
        Ok(())
    }

    fn modify_exception(
        &self,
        _context: &InterceptorContext,
        _attributes: &ExecutionAttributes,
        _error: &PipelineError,
    ) -> Result<Option<PipelineError>> {
        self.record("modify_exception");
        Ok(None)
    }

    fn on_execution_failure(
        &self,
        _context: &InterceptorContext,
        _attributes: &ExecutionAttributes,
        error: &PipelineError,
    ) -> Result<()> {
        self.record("on_execution_failure");
        *self.last_error_status.lock() = error.status_code();
        Ok(())
    }
}
