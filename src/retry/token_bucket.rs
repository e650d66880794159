//! Client-side adaptive rate limiting.
//!
//! A token bucket whose fill rate follows a CUBIC-style control loop: a
//! throttled response cuts the rate multiplicatively and records the rate at
//! which throttling began; unthrottled responses grow the rate back along a
//! cubic curve anchored at that point. Every send is both a consumer of tokens
//! and a feedback signal.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const MIN_FILL_RATE: f64 = 0.5;
const MIN_CAPACITY: f64 = 1.0;
const SMOOTH: f64 = 0.8;
/// Multiplicative decrease applied on throttling.
const BETA: f64 = 0.7;
/// Growth scale of the cubic recovery curve.
const SCALE_CONSTANT: f64 = 0.4;

/// Monotonic time source, in seconds.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Seconds since an arbitrary fixed origin.
    fn now_seconds(&self) -> f64;
}

static PROCESS_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Wall-independent monotonic clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_seconds(&self) -> f64 {
        PROCESS_EPOCH.elapsed().as_secs_f64()
    }
}

/// Clock advanced by hand, for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    seconds: Mutex<f64>,
}

impl ManualClock {
    /// A clock starting at `seconds`.
    pub fn new(seconds: f64) -> Self {
        Self {
            seconds: Mutex::new(seconds),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.seconds.lock() += by.as_secs_f64();
    }

    /// Jump to an absolute reading.
    pub fn set(&self, seconds: f64) {
        *self.seconds.lock() = seconds;
    }
}

impl Clock for ManualClock {
    fn now_seconds(&self) -> f64 {
        *self.seconds.lock()
    }
}

/// Outcome of asking the bucket for capacity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Acquisition {
    /// Send now.
    Ready,
    /// Send after waiting this long. Capacity has already been reserved.
    Wait(Duration),
    /// Not enough capacity and the caller asked to fail fast.
    Refused,
}

#[derive(Debug)]
struct BucketState {
    fill_rate: f64,
    max_capacity: f64,
    current_capacity: f64,
    last_timestamp: Option<f64>,
    enabled: bool,
    measured_tx_rate: f64,
    last_tx_rate_bucket: f64,
    request_count: u64,
    last_max_rate: f64,
    last_throttle_time: f64,
    time_window: f64,
}

/// Adaptive token bucket shared by every call on a client.
///
/// Rate limiting stays disabled until the first throttled response.
pub struct RateLimitingTokenBucket {
    clock: Arc<dyn Clock>,
    state: Mutex<BucketState>,
    throttled_updates: AtomicU64,
    unthrottled_updates: AtomicU64,
    refused: AtomicU64,
}

impl RateLimitingTokenBucket {
    /// Create a bucket on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a bucket driven by `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_seconds();
        Self {
            state: Mutex::new(BucketState {
                fill_rate: 0.0,
                max_capacity: 0.0,
                current_capacity: 0.0,
                last_timestamp: None,
                enabled: false,
                measured_tx_rate: 0.0,
                last_tx_rate_bucket: now.floor(),
                request_count: 0,
                last_max_rate: 0.0,
                last_throttle_time: now,
                time_window: 0.0,
            }),
            clock,
            throttled_updates: AtomicU64::new(0),
            unthrottled_updates: AtomicU64::new(0),
            refused: AtomicU64::new(0),
        }
    }

    /// Reserve `amount` tokens.
    ///
    /// With `fast_fail`, a shortfall is reported as [`Acquisition::Refused`]
    /// and nothing is reserved. Otherwise the tokens are borrowed against
    /// future refills and the caller is told how long to wait.
    pub fn acquire(&self, amount: f64, fast_fail: bool) -> Acquisition {
        let now = self.clock.now_seconds();
        let mut state = self.state.lock();
        if !state.enabled {
            return Acquisition::Ready;
        }

        state.refill(now);

        let original = state.current_capacity;
        let unfulfilled = if amount <= state.current_capacity {
            0.0
        } else {
            amount - state.current_capacity
        };
        state.current_capacity -= amount;

        if unfulfilled > 0.0 && fast_fail {
            state.current_capacity = original;
            self.refused.fetch_add(1, Ordering::Relaxed);
            return Acquisition::Refused;
        }

        let wait_seconds = unfulfilled / state.fill_rate;
        if wait_seconds > 0.0 {
            trace!(wait_seconds, "Token bucket short of capacity");
            Acquisition::Wait(Duration::from_secs_f64(wait_seconds))
        } else {
            Acquisition::Ready
        }
    }

    /// Feed back the outcome of a send.
    pub fn update_sending_rate(&self, throttled: bool) {
        if throttled {
            self.throttled_updates.fetch_add(1, Ordering::Relaxed);
        } else {
            self.unthrottled_updates.fetch_add(1, Ordering::Relaxed);
        }

        let now = self.clock.now_seconds();
        let mut state = self.state.lock();
        state.update_measured_rate(now);

        let calculated_rate = if throttled {
            let rate_to_use = if state.enabled {
                state.measured_tx_rate.min(state.fill_rate)
            } else {
                state.measured_tx_rate
            };
            state.last_max_rate = rate_to_use;
            state.calculate_time_window();
            state.last_throttle_time = now;
            state.enabled = true;
            rate_to_use * BETA
        } else {
            state.calculate_time_window();
            state.cubic_success(now)
        };

        let new_rate = calculated_rate.min(2.0 * state.measured_tx_rate);
        state.update_rate(new_rate, now);
        debug!(
            throttled,
            fill_rate = state.fill_rate,
            measured_tx_rate = state.measured_tx_rate,
            "Updated client sending rate"
        );
    }

    /// Current token refill rate, in tokens per second.
    pub fn fill_rate(&self) -> f64 {
        self.state.lock().fill_rate
    }

    /// Current bucket ceiling.
    pub fn max_capacity(&self) -> f64 {
        self.state.lock().max_capacity
    }

    /// Tokens currently available; negative while borrowed.
    pub fn current_capacity(&self) -> f64 {
        self.state.lock().current_capacity
    }

    /// Smoothed observed send rate.
    pub fn measured_tx_rate(&self) -> f64 {
        self.state.lock().measured_tx_rate
    }

    /// Returns true once a throttled response has switched limiting on.
    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Number of throttled outcomes fed back.
    pub fn throttled_updates(&self) -> u64 {
        self.throttled_updates.load(Ordering::Relaxed)
    }

    /// Number of unthrottled outcomes fed back.
    pub fn unthrottled_updates(&self) -> u64 {
        self.unthrottled_updates.load(Ordering::Relaxed)
    }

    /// Number of fail-fast acquisitions that were refused.
    pub fn refused_acquisitions(&self) -> u64 {
        self.refused.load(Ordering::Relaxed)
    }
}

impl Default for RateLimitingTokenBucket {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RateLimitingTokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RateLimitingTokenBucket")
            .field("enabled", &state.enabled)
            .field("fill_rate", &state.fill_rate)
            .field("current_capacity", &state.current_capacity)
            .finish_non_exhaustive()
    }
}

impl BucketState {
    fn refill(&mut self, now: f64) {
        let Some(last) = self.last_timestamp else {
            self.last_timestamp = Some(now);
            return;
        };
        let fill_amount = (now - last) * self.fill_rate;
        self.current_capacity = self.max_capacity.min(self.current_capacity + fill_amount);
        self.last_timestamp = Some(now);
    }

    fn update_rate(&mut self, new_rate: f64, now: f64) {
        self.refill(now);
        self.fill_rate = new_rate.max(MIN_FILL_RATE);
        self.max_capacity = new_rate.max(MIN_CAPACITY);
        self.current_capacity = self.current_capacity.min(self.max_capacity);
    }

    fn update_measured_rate(&mut self, now: f64) {
        let time_bucket = (now * 2.0).floor() / 2.0;
        self.request_count += 1;
        if time_bucket > self.last_tx_rate_bucket {
            let current_rate = self.request_count as f64 / (time_bucket - self.last_tx_rate_bucket);
            self.measured_tx_rate = current_rate * SMOOTH + self.measured_tx_rate * (1.0 - SMOOTH);
            self.request_count = 0;
            self.last_tx_rate_bucket = time_bucket;
        }
    }

    fn calculate_time_window(&mut self) {
        self.time_window = ((self.last_max_rate * (1.0 - BETA)) / SCALE_CONSTANT).cbrt();
    }

    fn cubic_success(&self, now: f64) -> f64 {
        let dt = now - self.last_throttle_time;
        SCALE_CONSTANT * (dt - self.time_window).powi(3) + self.last_max_rate
    }
}
