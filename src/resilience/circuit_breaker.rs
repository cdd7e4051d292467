//! # Circuit Breaker Implementation
//!
//! Fault isolation for the report data dependency. Follows the classic
//! three-state pattern: Closed (normal operation), Open (failing fast), and
//! HalfOpen (probing recovery). Every guarded call also runs under a
//! per-call timeout; timeouts count separately in the stats but advance the
//! same failure transitions.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::CircuitBreakerSettings;
use crate::monitoring::health::{HealthReport, HealthStatus};

/// Minimum call volume before a closed circuit's success rate is judged.
const MIN_CALLS_FOR_HEALTH: u64 = 10;

/// Success rate below which a closed circuit is classified as warning.
const HEALTHY_SUCCESS_RATE: f64 = 0.9;

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - calls allowed through to probe system health
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open, // Default to safest state
        }
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, rejecting all calls
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// Operation did not settle before the per-call timeout
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Operation failed and was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

/// Mutable counters behind the lock. `consecutive_failures` and
/// `half_open_successes` drive transitions; the rest are cumulative stats.
#[derive(Debug, Default)]
struct BreakerInner {
    consecutive_failures: u32,
    half_open_successes: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    total_calls: u64,
    success_count: u64,
    failure_count: u64,
    timeout_count: u64,
    rejected_count: u64,
    times_opened: u64,
}

/// Stats snapshot for observability surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub timeout_count: u64,
    pub rejected_count: u64,
    pub times_opened: u64,
    pub consecutive_failures: u32,
    pub success_rate: f64,
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Core circuit breaker with atomic state management. One instance guards
/// one dependency for the lifetime of the process.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,

    /// Current circuit state (atomic for thread safety)
    state: AtomicU8,

    settings: CircuitBreakerSettings,

    /// Counters protected by mutex; never held across an await point
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and settings.
    pub fn new(name: impl Into<String>, settings: CircuitBreakerSettings) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = settings.failure_threshold,
            monitor_timeout_seconds = settings.monitor_timeout_seconds,
            success_threshold = settings.success_threshold,
            call_timeout_seconds = settings.call_timeout_seconds,
            "🛡️ Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            settings,
            inner: Mutex::new(BreakerInner::default()),
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Get component name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute an operation with circuit breaker protection and a per-call
    /// timeout. Open-circuit rejections never invoke the operation; a
    /// timeout drops the wrapped future and follows failure transitions.
    ///
    /// ```
    /// use register_core::config::CircuitBreakerSettings;
    /// use register_core::resilience::CircuitBreaker;
    ///
    /// # tokio_test::block_on(async {
    /// let breaker = CircuitBreaker::new(
    ///     "report_database",
    ///     CircuitBreakerSettings {
    ///         failure_threshold: 5,
    ///         monitor_timeout_seconds: 30,
    ///         success_threshold: 3,
    ///         call_timeout_seconds: 60,
    ///     },
    /// );
    ///
    /// let rows = breaker
    ///     .call(|| async { Ok::<_, std::io::Error>(vec![1, 2, 3]) })
    ///     .await
    ///     .unwrap();
    /// assert_eq!(rows.len(), 3);
    /// # });
    /// ```
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.admit_call() {
            return Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
            });
        }

        let started = Instant::now();
        match tokio::time::timeout(self.settings.call_timeout(), operation()).await {
            Ok(Ok(value)) => {
                self.record_success(started.elapsed().as_millis() as u64);
                Ok(value)
            }
            Ok(Err(err)) => {
                self.record_failure(false);
                Err(CircuitBreakerError::OperationFailed(err))
            }
            Err(_) => {
                self.record_failure(true);
                Err(CircuitBreakerError::Timeout {
                    timeout_ms: self.settings.call_timeout().as_millis() as u64,
                })
            }
        }
    }

    /// Count the incoming call and decide whether it may proceed, applying
    /// the Open → HalfOpen transition when the probe delay has elapsed.
    fn admit_call(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.total_calls += 1;

        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let eligible = inner
                    .last_failure
                    .is_some_and(|at| at.elapsed() >= self.settings.monitor_timeout());
                if eligible {
                    inner.half_open_successes = 0;
                    self.state
                        .store(CircuitState::HalfOpen as u8, Ordering::Release);
                    info!(
                        component = %self.name,
                        success_threshold = self.settings.success_threshold,
                        "🟡 Circuit breaker half-open (testing recovery)"
                    );
                    true
                } else {
                    inner.rejected_count += 1;
                    inner.failure_count += 1;
                    warn!(component = %self.name, "⛔ Call rejected, circuit open");
                    false
                }
            }
        }
    }

    /// Record a successful operation
    fn record_success(&self, duration_ms: u64) {
        let mut inner = self.inner.lock();
        inner.success_count += 1;

        debug!(
            component = %self.name,
            duration_ms,
            "🟢 Operation succeeded"
        );

        match self.state() {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.settings.success_threshold {
                    self.transition_to_closed(&mut inner);
                }
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened; just record it.
                warn!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    /// Record a failed operation
    fn record_failure(&self, timed_out: bool) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        if timed_out {
            inner.timeout_count += 1;
        }
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());
        inner.half_open_successes = 0;

        error!(
            component = %self.name,
            timed_out,
            "🔴 Operation failed"
        );

        match self.state() {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.settings.failure_threshold {
                    self.transition_to_open(&mut inner);
                }
            }
            CircuitState::HalfOpen => {
                // Any failure while probing immediately reopens the circuit.
                self.transition_to_open(&mut inner);
            }
            CircuitState::Open => {}
        }
    }

    /// Transition to closed state (normal operation)
    fn transition_to_closed(&self, inner: &mut BreakerInner) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        inner.consecutive_failures = 0;
        inner.half_open_successes = 0;

        info!(
            component = %self.name,
            total_calls = inner.total_calls,
            "🟢 Circuit breaker closed (recovered)"
        );
    }

    /// Transition to open state (failing fast)
    fn transition_to_open(&self, inner: &mut BreakerInner) {
        self.state.store(CircuitState::Open as u8, Ordering::Release);
        inner.times_opened += 1;
        inner.half_open_successes = 0;

        error!(
            component = %self.name,
            consecutive_failures = inner.consecutive_failures,
            failure_threshold = self.settings.failure_threshold,
            monitor_timeout_seconds = self.settings.monitor_timeout_seconds,
            "🔴 Circuit breaker opened (failing fast)"
        );
    }

    /// Force circuit to open state, as if a failure just occurred.
    /// Administrative/maintenance hook.
    pub fn force_open(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced open");
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());
        self.transition_to_open(&mut inner);
    }

    /// Force closed and zero all counters. Administrative escape hatch.
    pub fn reset(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker reset");
        let mut inner = self.inner.lock();
        *inner = BreakerInner::default();
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
    }

    /// Get current stats snapshot
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        let success_rate = if inner.total_calls > 0 {
            inner.success_count as f64 / inner.total_calls as f64
        } else {
            1.0
        };

        CircuitBreakerStats {
            name: self.name.clone(),
            state: self.state(),
            total_calls: inner.total_calls,
            success_count: inner.success_count,
            failure_count: inner.failure_count,
            timeout_count: inner.timeout_count,
            rejected_count: inner.rejected_count,
            times_opened: inner.times_opened,
            consecutive_failures: inner.consecutive_failures,
            success_rate,
            last_failure_at: inner.last_failure_at,
        }
    }

    /// Classify breaker health: Open is critical, HalfOpen is warning, and a
    /// closed circuit is healthy when its success rate is above 90% (or when
    /// call volume is too low to judge).
    pub fn health(&self) -> HealthReport {
        let stats = self.stats();
        match stats.state {
            CircuitState::Open => HealthReport::new(
                HealthStatus::Critical,
                vec![format!("circuit '{}' is open, calls are rejected", stats.name)],
                vec![
                    "check database connectivity and load".to_string(),
                    format!(
                        "circuit probes recovery {}s after the last failure",
                        self.settings.monitor_timeout_seconds
                    ),
                ],
            ),
            CircuitState::HalfOpen => HealthReport::new(
                HealthStatus::Warning,
                vec![format!("circuit '{}' is probing recovery", stats.name)],
                vec![format!(
                    "{} consecutive successes close the circuit",
                    self.settings.success_threshold
                )],
            ),
            CircuitState::Closed => {
                if stats.total_calls < MIN_CALLS_FOR_HEALTH
                    || stats.success_rate > HEALTHY_SUCCESS_RATE
                {
                    HealthReport::healthy()
                } else {
                    HealthReport::new(
                        HealthStatus::Warning,
                        vec![format!(
                            "success rate {:.1}% below {:.0}%",
                            stats.success_rate * 100.0,
                            HEALTHY_SUCCESS_RATE * 100.0
                        )],
                        vec!["investigate recent query failures".to_string()],
                    )
                }
            }
        }
    }
}
