//! Cooperative cancellation shared by timers and in-flight work.

use crate::error::AbortedError;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Cancellation flag observed by both blocking and non-blocking work.
///
/// Timers set the flag with [`cancel`](Self::cancel). Blocking code parks in
/// [`sleep`](Self::sleep) or polls [`is_cancelled`](Self::is_cancelled);
/// non-blocking code races its work against [`cancelled`](Self::cancelled).
/// Clones share the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationSignal {
    inner: Arc<SignalState>,
}

#[derive(Debug, Default)]
struct SignalState {
    flag: AtomicBool,
    lock: Mutex<()>,
    condvar: Condvar,
    notify: Notify,
}

impl CancellationSignal {
    /// Create a signal in the "not cancelled" state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the signal is currently set.
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// Set the signal and wake everything waiting on it.
    ///
    /// Returns true if this call flipped the flag.
    pub fn cancel(&self) -> bool {
        let first = self
            .inner
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        {
            let _guard = self.inner.lock.lock();
            self.inner.condvar.notify_all();
        }
        self.inner.notify.notify_waiters();
        first
    }

    /// Reset the signal, returning whether it was set.
    pub fn clear(&self) -> bool {
        self.inner.flag.swap(false, Ordering::AcqRel)
    }

    /// Block the current thread for `duration` unless the signal fires first.
    ///
    /// A signal that is already set interrupts immediately. The flag is left
    /// untouched either way.
    pub fn sleep(&self, duration: Duration) -> Result<(), AbortedError> {
        let deadline = Instant::now() + duration;
        let mut guard = self.inner.lock.lock();
        loop {
            if self.is_cancelled() {
                return Err(AbortedError::Interrupted);
            }
            if self.inner.condvar.wait_until(&mut guard, deadline).timed_out() {
                return if self.is_cancelled() {
                    Err(AbortedError::Interrupted)
                } else {
                    Ok(())
                };
            }
        }
    }

    /// Resolve once the signal is set.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_cancel_and_clear() {
        let signal = CancellationSignal::new();
        assert!(!signal.is_cancelled());
        assert!(signal.cancel());
        assert!(!signal.cancel());
        assert!(signal.clone().is_cancelled());
        assert!(signal.clear());
        assert!(!signal.is_cancelled());
        assert!(!signal.clear());
    }

    #[test]
    fn test_sleep_completes_without_cancellation() {
        let signal = CancellationSignal::new();
        assert!(signal.sleep(Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn test_sleep_interrupted_by_other_thread() {
        let signal = CancellationSignal::new();
        let remote = signal.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        let started = Instant::now();
        let result = signal.sleep(Duration::from_secs(5));
        handle.join().unwrap();

        assert!(matches!(result, Err(AbortedError::Interrupted)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(signal.is_cancelled());
    }

    #[test]
    fn test_sleep_with_flag_already_set() {
        let signal = CancellationSignal::new();
        signal.cancel();
        assert!(signal.sleep(Duration::from_secs(5)).is_err());
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_async_cancelled_resolves() {
        let signal = CancellationSignal::new();
        let remote = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            remote.cancel();
        });
        signal.cancelled().await;
        assert!(signal.is_cancelled());
    }
}
