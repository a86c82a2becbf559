mod registry;
pub mod sliding_window;

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

pub use registry::CircuitBreakerRegistry;
use sliding_window::{CallOutcome, SlidingWindow, WindowStats};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit (default: 5)
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again (default: 3)
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Time after the last failure before a trial call is allowed
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_ms: u64,
    /// Upper bound of every wrapped call
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,
    /// Failure percentage over the window that opens the circuit
    #[serde(default = "default_failure_rate_threshold")]
    pub failure_rate_threshold: f64,
    /// Slow call percentage over the window that opens the circuit
    #[serde(default = "default_slow_call_rate_threshold")]
    pub slow_call_rate_threshold: f64,
    /// Calls at least this long count as slow
    #[serde(default = "default_slow_call_duration")]
    pub slow_call_duration_ms: u64,
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Samples required before rates are considered
    #[serde(default = "default_minimum_requests")]
    pub minimum_requests: usize,
    /// Trial calls allowed in flight while half-open
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            recovery_timeout_ms: default_recovery_timeout(),
            call_timeout_ms: default_call_timeout(),
            failure_rate_threshold: default_failure_rate_threshold(),
            slow_call_rate_threshold: default_slow_call_rate_threshold(),
            slow_call_duration_ms: default_slow_call_duration(),
            window_size: default_window_size(),
            minimum_requests: default_minimum_requests(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

impl CircuitBreakerConfig {
    #[must_use]
    pub const fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    #[must_use]
    pub const fn slow_call_duration(&self) -> Duration {
        Duration::from_millis(self.slow_call_duration_ms)
    }
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_success_threshold() -> u32 {
    3
}

const fn default_recovery_timeout() -> u64 {
    60_000 // 1 minute
}

const fn default_call_timeout() -> u64 {
    30_000 // 30 seconds
}

const fn default_failure_rate_threshold() -> f64 {
    50.0
}

const fn default_slow_call_rate_threshold() -> f64 {
    100.0
}

const fn default_slow_call_duration() -> u64 {
    5_000
}

const fn default_window_size() -> usize {
    100
}

const fn default_minimum_requests() -> usize {
    10
}

const fn default_half_open_max_calls() -> u32 {
    3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// Rejected without invoking the call
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Operational snapshot of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub window: WindowStats,
    /// Milliseconds since the last recorded failure
    pub last_failure_ms_ago: Option<u64>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    half_open_in_flight: u32,
    last_failure: Option<Instant>,
    window: SlidingWindow,
    total_calls: u64,
    rejected_calls: u64,
}

/// Failure and latency tripwire around calls to one dependency.
///
/// All state lives behind one mutex so every transition is a single
/// mutation; the lock is never held across the wrapped call.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let window = SlidingWindow::new(config.window_size);
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                half_open_in_flight: 0,
                last_failure: None,
                window,
                total_calls: 0,
                rejected_calls: 0,
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Whether a call would currently be admitted, without admitting one.
    #[must_use]
    pub fn is_call_permitted(&self) -> bool {
        let state = self.state.lock();
        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.recovery_elapsed(&state),
            CircuitState::HalfOpen => state.half_open_in_flight < self.config.half_open_max_calls,
        }
    }

    /// Run `f` through the breaker, bounded by the call timeout.
    ///
    /// A timeout counts as a failure. While open, `f` is never invoked.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.acquire().map_err(|()| CircuitBreakerError::Open {
            name: self.name.clone(),
        })?;

        let started = Instant::now();
        let outcome = timeout(self.config.call_timeout(), f()).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(value)) => {
                self.record(true, elapsed);
                Ok(value)
            }
            Ok(Err(error)) => {
                self.record(false, elapsed);
                Err(CircuitBreakerError::Inner(error))
            }
            Err(_) => {
                self.record(false, elapsed);
                Err(CircuitBreakerError::Timeout(self.config.call_timeout()))
            }
        }
    }

    fn recovery_elapsed(&self, state: &BreakerState) -> bool {
        state
            .last_failure
            .is_none_or(|at| at.elapsed() >= self.config.recovery_timeout())
    }

    fn acquire(&self) -> Result<(), ()> {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed => {}
            CircuitState::Open => {
                if !self.recovery_elapsed(&state) {
                    state.rejected_calls += 1;
                    return Err(());
                }
                self.transition(&mut state, CircuitState::HalfOpen);
                state.half_open_in_flight = 1;
            }
            CircuitState::HalfOpen => {
                if state.half_open_in_flight >= self.config.half_open_max_calls {
                    state.rejected_calls += 1;
                    return Err(());
                }
                state.half_open_in_flight += 1;
            }
        }
        state.total_calls += 1;
        Ok(())
    }

    fn record(&self, success: bool, elapsed: Duration) {
        let mut state = self.state.lock();
        state.window.push(CallOutcome {
            success,
            slow: elapsed >= self.config.slow_call_duration(),
        });

        if success {
            state.consecutive_failures = 0;
            state.consecutive_successes += 1;
        } else {
            state.consecutive_successes = 0;
            state.consecutive_failures += 1;
            state.last_failure = Some(Instant::now());
        }

        match state.state {
            CircuitState::HalfOpen => {
                state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
                if !success {
                    self.transition(&mut state, CircuitState::Open);
                } else if state.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut state, CircuitState::Closed);
                }
            }
            CircuitState::Closed => {
                if let Some(reason) = self.trip_reason(&state) {
                    warn!("🔌 Circuit breaker '{}' tripped: {}", self.name, reason);
                    self.transition(&mut state, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn trip_reason(&self, state: &BreakerState) -> Option<String> {
        if state.consecutive_failures >= self.config.failure_threshold {
            return Some(format!("{} consecutive failures", state.consecutive_failures));
        }

        if state.window.len() < self.config.minimum_requests {
            return None;
        }

        let stats = state.window.stats();
        if stats.failure_rate >= self.config.failure_rate_threshold {
            return Some(format!("failure rate {:.1}%", stats.failure_rate));
        }
        if stats.slow_call_rate >= self.config.slow_call_rate_threshold {
            return Some(format!("slow call rate {:.1}%", stats.slow_call_rate));
        }
        None
    }

    fn transition(&self, state: &mut BreakerState, to: CircuitState) {
        if state.state == to {
            return;
        }
        let from = state.state;
        state.state = to;

        match to {
            CircuitState::Closed => {
                state.consecutive_failures = 0;
                state.consecutive_successes = 0;
                state.half_open_in_flight = 0;
                state.window.clear();
            }
            CircuitState::Open => {
                state.consecutive_successes = 0;
                state.half_open_in_flight = 0;
                state.last_failure = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                state.consecutive_successes = 0;
                state.half_open_in_flight = 0;
            }
        }

        info!("Circuit breaker '{}': {} -> {}", self.name, from, to);
    }

    pub fn force_open(&self) {
        let mut state = self.state.lock();
        self.transition(&mut state, CircuitState::Open);
    }

    pub fn force_close(&self) {
        let mut state = self.state.lock();
        self.transition(&mut state, CircuitState::Closed);
    }

    pub fn force_half_open(&self) {
        let mut state = self.state.lock();
        self.transition(&mut state, CircuitState::HalfOpen);
    }

    #[must_use]
    pub fn status(&self) -> CircuitBreakerStatus {
        let state = self.state.lock();
        CircuitBreakerStatus {
            name: self.name.clone(),
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
            total_calls: state.total_calls,
            rejected_calls: state.rejected_calls,
            window: state.window.stats(),
            last_failure_ms_ago: state
                .last_failure
                .map(|at| u64::try_from(at.elapsed().as_millis()).unwrap_or(u64::MAX)),
        }
    }
}
