//! Scheduled cancellation bound to one logical timer.

use super::{CancellationSignal, ScheduledTask, Scheduler};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Which timer a tracker belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Spans every attempt of a call.
    ApiCall,
    /// Spans a single attempt.
    ApiCallAttempt,
}

/// Lifecycle of a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// No timeout configured; nothing was scheduled.
    Disabled,
    /// Timer scheduled and still pending.
    Armed,
    /// Timer ran and cancelled the in-flight work.
    Fired,
    /// Work finished first and the timer was cancelled.
    Cancelled,
}

/// Scheduled cancellation for a call or an attempt.
///
/// A disabled tracker behaves like an armed one that never fires, so callers
/// only ever ask [`has_executed`](Self::has_executed).
#[derive(Clone)]
pub struct TimeoutTracker {
    kind: TimeoutKind,
    armed: Option<Arc<ArmedTimer>>,
}

struct ArmedTimer {
    timeout: Duration,
    state: Mutex<TrackerState>,
    task: Mutex<Option<ScheduledTask>>,
}

impl TimeoutTracker {
    /// A tracker that never fires.
    pub fn disabled(kind: TimeoutKind) -> Self {
        Self { kind, armed: None }
    }

    /// Arm a tracker that cancels `signal` once `timeout` elapses.
    ///
    /// `None` or a zero duration yields a disabled tracker.
    pub fn start(
        kind: TimeoutKind,
        timeout: Option<Duration>,
        scheduler: &Scheduler,
        signal: &CancellationSignal,
    ) -> Self {
        let timeout = match timeout {
            Some(timeout) if !timeout.is_zero() => timeout,
            _ => return Self::disabled(kind),
        };

        let armed = Arc::new(ArmedTimer {
            timeout,
            state: Mutex::new(TrackerState::Armed),
            task: Mutex::new(None),
        });

        let timer = armed.clone();
        let signal = signal.clone();
        let task = scheduler.schedule(timeout, move || {
            let mut state = timer.state.lock();
            if *state == TrackerState::Armed {
                *state = TrackerState::Fired;
                debug!(
                    kind = ?kind,
                    timeout_ms = timer.timeout.as_millis() as u64,
                    "Timeout fired, cancelling in-flight work"
                );
                signal.cancel();
            }
        });
        *armed.task.lock() = Some(task);

        Self {
            kind,
            armed: Some(armed),
        }
    }

    /// Which timer this is.
    pub fn kind(&self) -> TimeoutKind {
        self.kind
    }

    /// The configured duration, if enabled.
    pub fn timeout(&self) -> Option<Duration> {
        self.armed.as_ref().map(|a| a.timeout)
    }

    /// Returns true if a timeout is configured.
    pub fn is_enabled(&self) -> bool {
        self.armed.is_some()
    }

    /// Returns true if the timer ran its cancellation action.
    pub fn has_executed(&self) -> bool {
        self.state() == TrackerState::Fired
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TrackerState {
        match &self.armed {
            Some(armed) => *armed.state.lock(),
            None => TrackerState::Disabled,
        }
    }

    /// Stop the timer if it has not fired yet.
    pub fn cancel(&self) {
        let Some(armed) = &self.armed else {
            return;
        };
        let mut state = armed.state.lock();
        if *state == TrackerState::Armed {
            *state = TrackerState::Cancelled;
            if let Some(task) = armed.task.lock().take() {
                task.cancel();
            }
        }
    }
}

impl fmt::Debug for TimeoutTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutTracker")
            .field("kind", &self.kind)
            .field("timeout", &self.timeout())
            .field("state", &self.state())
            .finish()
    }
}
