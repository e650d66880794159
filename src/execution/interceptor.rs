//! User hooks that observe a call as it moves through the pipeline.

use super::attributes::ExecutionAttributes;
use crate::error::{InterceptorError, PipelineError};
use crate::http::{AsyncRequestBody, HttpRequest, HttpResponse};
use crate::Result;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// What interceptors can see of the call so far.
#[derive(Debug, Clone, Default)]
pub struct InterceptorContext {
    /// The latest request handed to the transport, or about to be.
    pub http_request: Option<HttpRequest>,
    /// The latest streaming payload, for non-blocking calls.
    pub async_request_body: Option<AsyncRequestBody>,
    /// The response, once one arrived.
    pub http_response: Option<HttpResponse>,
}

/// Hooks invoked at fixed points of a call.
///
/// Every hook has a no-op default. A hook that fails on the success path
/// fails the call; failures while a failure is being reported are attached
/// to it instead.
#[allow(unused_variables)]
pub trait ExecutionInterceptor: Send + Sync {
    /// Called right before each attempt is sent.
    fn before_transmission(
        &self,
        context: &InterceptorContext,
        attributes: &ExecutionAttributes,
    ) -> Result<()> {
        Ok(())
    }

    /// Called once a response arrived, before it is handed back.
    fn before_unmarshalling(
        &self,
        context: &InterceptorContext,
        attributes: &ExecutionAttributes,
    ) -> Result<()> {
        Ok(())
    }

    /// Called once the call succeeded.
    fn after_execution(
        &self,
        context: &InterceptorContext,
        attributes: &ExecutionAttributes,
    ) -> Result<()> {
        Ok(())
    }

    /// Called after every failed attempt, retried or not.
    fn on_attempt_failure(
        &self,
        context: &InterceptorContext,
        attributes: &ExecutionAttributes,
        error: &PipelineError,
    ) -> Result<()> {
        Ok(())
    }

    /// Offer a replacement for the failure the caller will see.
    fn modify_exception(
        &self,
        context: &InterceptorContext,
        attributes: &ExecutionAttributes,
        error: &PipelineError,
    ) -> Result<Option<PipelineError>> {
        Ok(None)
    }

    /// Called once the call failed for good.
    fn on_execution_failure(
        &self,
        context: &InterceptorContext,
        attributes: &ExecutionAttributes,
        error: &PipelineError,
    ) -> Result<()> {
        Ok(())
    }
}

/// Interceptors registered on a client, run in registration order.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn ExecutionInterceptor>>,
}

impl InterceptorChain {
    /// Create a chain.
    pub fn new(interceptors: Vec<Arc<dyn ExecutionInterceptor>>) -> Self {
        Self { interceptors }
    }

    /// Append an interceptor.
    pub fn push(&mut self, interceptor: Arc<dyn ExecutionInterceptor>) {
        self.interceptors.push(interceptor);
    }

    /// Number of registered interceptors.
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Returns true if no interceptor is registered.
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run `before_transmission` on every interceptor.
    pub fn before_transmission(
        &self,
        context: &InterceptorContext,
        attributes: &ExecutionAttributes,
    ) -> Result<()> {
        self.interceptors
            .iter()
            .try_for_each(|i| i.before_transmission(context, attributes))
    }

    /// Run `before_unmarshalling` on every interceptor.
    pub fn before_unmarshalling(
        &self,
        context: &InterceptorContext,
        attributes: &ExecutionAttributes,
    ) -> Result<()> {
        self.interceptors
            .iter()
            .try_for_each(|i| i.before_unmarshalling(context, attributes))
    }

    /// Run `after_execution` on every interceptor.
    pub fn after_execution(
        &self,
        context: &InterceptorContext,
        attributes: &ExecutionAttributes,
    ) -> Result<()> {
        self.interceptors
            .iter()
            .try_for_each(|i| i.after_execution(context, attributes))
    }

    /// Run `on_attempt_failure` on every interceptor.
    pub fn on_attempt_failure(
        &self,
        context: &InterceptorContext,
        attributes: &ExecutionAttributes,
        error: &PipelineError,
    ) -> Result<()> {
        self.interceptors
            .iter()
            .try_for_each(|i| i.on_attempt_failure(context, attributes, error))
    }

    /// Let every interceptor replace the failure in turn.
    ///
    /// If a hook itself fails, its failure is returned with the failure being
    /// reported attached as suppressed, and later hooks are skipped.
    pub fn modify_exception(
        &self,
        context: &InterceptorContext,
        attributes: &ExecutionAttributes,
        error: PipelineError,
    ) -> PipelineError {
        let mut current = error;
        for interceptor in &self.interceptors {
            match interceptor.modify_exception(context, attributes, &current) {
                Ok(Some(replacement)) => current = replacement,
                Ok(None) => {}
                Err(own) => {
                    return InterceptorError::WhileReportingFailure {
                        source: Box::new(own),
                        suppressed: Box::new(current),
                    }
                    .into();
                }
            }
        }
        current
    }

    /// Run `on_execution_failure` on every interceptor, logging hook failures.
    pub fn on_execution_failure(
        &self,
        context: &InterceptorContext,
        attributes: &ExecutionAttributes,
        error: &PipelineError,
    ) {
        for interceptor in &self.interceptors {
            if let Err(e) = interceptor.on_execution_failure(context, attributes, error) {
                warn!(error = %e, original = %error, "Interceptor failed while reporting execution failure");
            }
        }
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{NetworkError, ServiceError};

    struct Replacing(u16);

    impl ExecutionInterceptor for Replacing {
        fn modify_exception(
            &self,
            _context: &InterceptorContext,
            _attributes: &ExecutionAttributes,
            _error: &PipelineError,
        ) -> Result<Option<PipelineError>> {
            Ok(Some(ServiceError::new(self.0).into()))
        }
    }

    struct Failing;

    impl ExecutionInterceptor for Failing {
        fn modify_exception(
            &self,
            _context: &InterceptorContext,
            _attributes: &ExecutionAttributes,
            _error: &PipelineError,
        ) -> Result<Option<PipelineError>> {
            Err(InterceptorError::Hook {
                hook: "modify_exception",
                message: "boom".to_string(),
            }
            .into())
        }

        fn on_execution_failure(
            &self,
            _context: &InterceptorContext,
            _attributes: &ExecutionAttributes,
            _error: &PipelineError,
        ) -> Result<()> {
            Err(InterceptorError::Hook {
                hook: "on_execution_failure",
                message: "boom".to_string(),
            }
            .into())
        }
    }

    #[test]
    fn test_replacements_apply_in_order() {
        let chain = InterceptorChain::new(vec![Arc::new(Replacing(500)), Arc::new(Replacing(418))]);
        let surfaced = chain.modify_exception(
            &InterceptorContext::default(),
            &ExecutionAttributes::new(),
            NetworkError::ConnectionReset.into(),
        );
        assert_eq!(surfaced.status_code(), Some(418));
    }

    #[test]
    fn test_failing_hook_keeps_original_as_suppressed() {
        let chain = InterceptorChain::new(vec![Arc::new(Replacing(503)), Arc::new(Failing)]);
        let surfaced = chain.modify_exception(
            &InterceptorContext::default(),
            &ExecutionAttributes::new(),
            NetworkError::ConnectionReset.into(),
        );

        match surfaced {
            PipelineError::Interceptor(InterceptorError::WhileReportingFailure {
                source,
                suppressed,
            }) => {
                assert!(matches!(*source, PipelineError::Interceptor(InterceptorError::Hook { .. })));
                assert_eq!(suppressed.status_code(), Some(503));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_execution_failure_hook_errors_are_swallowed() {
        let chain = InterceptorChain::new(vec![Arc::new(Failing)]);
        chain.on_execution_failure(
            &InterceptorContext::default(),
            &ExecutionAttributes::new(),
            &NetworkError::ConnectionReset.into(),
        );
    }
}
