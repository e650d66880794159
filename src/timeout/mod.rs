//! Call-level and attempt-level timeouts.
//!
//! Each timer is a [`TimeoutTracker`] that cancels the call's
//! [`CancellationSignal`] when it fires. Because the signal carries no cause,
//! failures that look like interruptions are attributed afterwards by
//! [`disambiguate`], which consults the trackers.

mod scheduler;
mod signal;
mod tracker;

pub use scheduler::{ScheduledTask, Scheduler};
pub use signal::CancellationSignal;
pub use tracker::{TimeoutKind, TimeoutTracker, TrackerState};

use crate::error::{PipelineError, TimeoutError};
use tracing::debug;

/// Attribute an interruption-like failure to the timer that caused it.
///
/// Only I/O-like and abort failures are considered; everything else is
/// returned untouched.
///
/// | fired        | surfaced                 | signal afterwards                  |
/// |--------------|--------------------------|------------------------------------|
/// | call         | `ApiCallTimeout`         | left set                           |
/// | attempt only | `ApiCallAttemptTimeout`  | cleared                            |
/// | neither      | original failure         | kept for aborts, cleared otherwise |
pub fn disambiguate(
    error: PipelineError,
    call_tracker: &TimeoutTracker,
    attempt_tracker: &TimeoutTracker,
    signal: &CancellationSignal,
) -> PipelineError {
    if !(error.is_io_like() || error.is_abort()) {
        return error;
    }

    if call_tracker.has_executed() {
        if let Some(timeout) = call_tracker.timeout() {
            debug!(error = %error, "Failure attributed to api call timeout");
            return TimeoutError::ApiCallTimeout { timeout }.into();
        }
    }

    if attempt_tracker.has_executed() {
        if let Some(timeout) = attempt_tracker.timeout() {
            debug!(error = %error, "Failure attributed to api call attempt timeout");
            signal.clear();
            return TimeoutError::ApiCallAttemptTimeout { timeout }.into();
        }
    }

    if !error.is_abort() {
        signal.clear();
    }
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AbortedError, NetworkError, ServiceError};
    use std::time::Duration;
    use test_case::test_case;

    #[derive(Debug, Clone, Copy)]
    enum Fired {
        Call,
        Attempt,
        Both,
        Neither,
    }

    #[derive(Debug, Clone, Copy)]
    enum Failure {
        Io,
        Interrupted,
        Aborted,
    }

    fn fired_tracker(
        kind: TimeoutKind,
        scheduler: &Scheduler,
        signal: &CancellationSignal,
    ) -> TimeoutTracker {
        let tracker = TimeoutTracker::start(kind, Some(Duration::from_millis(1)), scheduler, signal);
        while !tracker.has_executed() {
            std::thread::sleep(Duration::from_millis(1));
        }
        tracker
    }

    fn failure(kind: Failure) -> PipelineError {
        match kind {
            Failure::Io => NetworkError::ConnectionReset.into(),
            Failure::Interrupted => AbortedError::Interrupted.into(),
            Failure::Aborted => AbortedError::Aborted {
                reason: "stream closed".to_string(),
            }
            .into(),
        }
    }

    #[test_case(Fired::Call, Failure::Io)]
    #[test_case(Fired::Call, Failure::Interrupted)]
    #[test_case(Fired::Call, Failure::Aborted)]
    #[test_case(Fired::Attempt, Failure::Io)]
    #[test_case(Fired::Attempt, Failure::Interrupted)]
    #[test_case(Fired::Attempt, Failure::Aborted)]
    #[test_case(Fired::Both, Failure::Io)]
    #[test_case(Fired::Both, Failure::Interrupted)]
    #[test_case(Fired::Neither, Failure::Io)]
    #[test_case(Fired::Neither, Failure::Interrupted)]
    #[test_case(Fired::Neither, Failure::Aborted)]
    fn test_disambiguation_matrix(fired: Fired, kind: Failure) {
        let scheduler = Scheduler::new().unwrap();
        let signal = CancellationSignal::new();
        let disabled_call = TimeoutTracker::disabled(TimeoutKind::ApiCall);
        let disabled_attempt = TimeoutTracker::disabled(TimeoutKind::ApiCallAttempt);

        let (call, attempt) = match fired {
            Fired::Call => (
                fired_tracker(TimeoutKind::ApiCall, &scheduler, &signal),
                disabled_attempt,
            ),
            Fired::Attempt => (
                disabled_call,
                fired_tracker(TimeoutKind::ApiCallAttempt, &scheduler, &signal),
            ),
            Fired::Both => (
                fired_tracker(TimeoutKind::ApiCall, &scheduler, &signal),
                fired_tracker(TimeoutKind::ApiCallAttempt, &scheduler, &signal),
            ),
            Fired::Neither => {
                signal.cancel();
                (disabled_call, disabled_attempt)
            }
        };
        assert!(signal.is_cancelled());

        let surfaced = disambiguate(failure(kind), &call, &attempt, &signal);

        match fired {
            Fired::Call | Fired::Both => {
                assert!(matches!(
                    surfaced,
                    PipelineError::Timeout(TimeoutError::ApiCallTimeout { .. })
                ));
                assert!(signal.is_cancelled());
            }
            Fired::Attempt => {
                assert!(matches!(
                    surfaced,
                    PipelineError::Timeout(TimeoutError::ApiCallAttemptTimeout { .. })
                ));
                assert!(!signal.is_cancelled());
            }
            Fired::Neither => match kind {
                Failure::Io => {
                    assert!(matches!(surfaced, PipelineError::Network(_)));
                    assert!(!signal.is_cancelled());
                }
                Failure::Interrupted | Failure::Aborted => {
                    assert!(matches!(surfaced, PipelineError::Aborted(_)));
                    assert!(signal.is_cancelled());
                }
            },
        }
    }

    #[test]
    fn test_caller_cancellation_with_attempt_timeout() {
        let scheduler = Scheduler::new().unwrap();
        let signal = CancellationSignal::new();
        signal.cancel();
        let attempt = fired_tracker(TimeoutKind::ApiCallAttempt, &scheduler, &signal);

        let surfaced = disambiguate(
            AbortedError::Interrupted.into(),
            &TimeoutTracker::disabled(TimeoutKind::ApiCall),
            &attempt,
            &signal,
        );

        assert!(matches!(
            surfaced,
            PipelineError::Timeout(TimeoutError::ApiCallAttemptTimeout { .. })
        ));
        assert!(!signal.is_cancelled());
    }

    #[test]
    fn test_other_failures_pass_through() {
        let scheduler = Scheduler::new().unwrap();
        let signal = CancellationSignal::new();
        let attempt = fired_tracker(TimeoutKind::ApiCallAttempt, &scheduler, &signal);

        let surfaced = disambiguate(
            ServiceError::new(500).into(),
            &TimeoutTracker::disabled(TimeoutKind::ApiCall),
            &attempt,
            &signal,
        );

        assert!(matches!(surfaced, PipelineError::Service(_)));
        assert!(signal.is_cancelled());
    }
}
