//! Long-lived background scheduler for timers and delayed sends.

use crate::error::ClientError;
use crate::Result;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::trace;

/// Shared timer service owned by a client.
///
/// Either drives its own single-worker runtime, or borrows an existing
/// runtime through its [`Handle`]. Individual calls only ever schedule work
/// on it; the owned runtime is shut down when the last clone is dropped.
#[derive(Clone)]
pub struct Scheduler {
    handle: Handle,
    owned: Option<Arc<OwnedRuntime>>,
}

struct OwnedRuntime {
    runtime: Option<Runtime>,
}

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl Scheduler {
    /// Start a dedicated scheduler thread.
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("aws-pipeline-scheduler")
            .enable_time()
            .build()
            .map_err(|e| ClientError::InvalidConfiguration {
                field: "scheduler".to_string(),
                message: format!("Failed to start scheduler runtime: {}", e),
            })?;

        Ok(Self {
            handle: runtime.handle().clone(),
            owned: Some(Arc::new(OwnedRuntime {
                runtime: Some(runtime),
            })),
        })
    }

    /// Schedule on an existing runtime.
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            owned: None,
        }
    }

    /// Schedule on the runtime of the calling task, if there is one.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::from_handle)
    }

    /// Run `action` after `delay` unless the returned task is cancelled first.
    pub fn schedule<F>(&self, delay: Duration, action: F) -> ScheduledTask
    where
        F: FnOnce() + Send + 'static,
    {
        trace!(delay_ms = delay.as_millis() as u64, "Scheduling task");
        let handle = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            action();
        });
        ScheduledTask { handle }
    }

    /// A future that resolves after `delay`, driven by the scheduler's timer.
    pub fn delay(&self, delay: Duration) -> impl Future<Output = ()> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        let task = self.schedule(delay, move || {
            let _ = tx.send(());
        });
        async move {
            let _guard = CancelOnDrop(task);
            let _ = rx.await;
        }
    }
}

struct CancelOnDrop(ScheduledTask);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("owned", &self.owned.is_some())
            .finish_non_exhaustive()
    }
}

/// Handle to a scheduled action.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Cancel the action if it has not run yet.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Returns true once the action has run or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
