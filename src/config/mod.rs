//! # Performance Layer Configuration
//!
//! Environment-aware configuration for the cache, circuit breaker, and query
//! monitor. Defaults target production; `for_test` and `for_development`
//! shorten TTLs and windows for rapid feedback, and individual values can be
//! overridden through environment variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{ReportError, Result};

/// Top-level configuration for the in-process performance layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub cache: CacheSettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub monitor: MonitorSettings,
}

/// TTL cache sizing and expiry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Default entry lifetime; also the background sweep interval.
    pub default_ttl_seconds: u64,
    /// Entry count at which cleanup and oldest-first eviction kick in.
    pub max_entries: usize,
}

/// Circuit breaker thresholds and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures while closed before the circuit opens.
    pub failure_threshold: u32,
    /// Cool-down after the last failure before a recovery probe is allowed.
    pub monitor_timeout_seconds: u64,
    /// Consecutive half-open successes required to close the circuit.
    pub success_threshold: u32,
    /// Per-call deadline for the guarded operation.
    pub call_timeout_seconds: u64,
}

/// Query performance monitor window and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Rolling window capacity; oldest records are dropped beyond this.
    pub max_records: usize,
    /// Execution time above which a query counts as slow.
    pub slow_query_threshold_ms: u64,
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }
}

impl CircuitBreakerSettings {
    pub fn monitor_timeout(&self) -> Duration {
        Duration::from_secs(self.monitor_timeout_seconds)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }
}

impl MonitorSettings {
    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_threshold_ms)
    }
}

impl Default for PerformanceConfig {
    /// Production defaults: 5 minute report TTL, 5-failure breaker with a
    /// 30 second probe delay, 1 second slow-query threshold.
    fn default() -> Self {
        Self {
            cache: CacheSettings {
                default_ttl_seconds: 300,
                max_entries: 100,
            },
            circuit_breaker: CircuitBreakerSettings {
                failure_threshold: 5,
                monitor_timeout_seconds: 30,
                success_threshold: 3,
                call_timeout_seconds: 60,
            },
            monitor: MonitorSettings {
                max_records: 100,
                slow_query_threshold_ms: 1000,
            },
        }
    }
}

impl PerformanceConfig {
    /// Test-optimized configuration with rapid expiry and tight windows.
    pub fn for_test() -> Self {
        Self {
            cache: CacheSettings {
                default_ttl_seconds: 1,
                max_entries: 10,
            },
            circuit_breaker: CircuitBreakerSettings {
                failure_threshold: 5,
                monitor_timeout_seconds: 1,
                success_threshold: 3,
                call_timeout_seconds: 2,
            },
            monitor: MonitorSettings {
                max_records: 20,
                slow_query_threshold_ms: 100,
            },
        }
    }

    /// Development-optimized configuration with moderate TTLs.
    pub fn for_development() -> Self {
        Self {
            cache: CacheSettings {
                default_ttl_seconds: 60,
                max_entries: 50,
            },
            ..Self::default()
        }
    }

    /// Load configuration based on `REGISTER_ENV`/`RUST_ENV`, then apply
    /// environment variable overrides.
    pub fn from_environment() -> Self {
        let environment = env::var("REGISTER_ENV")
            .or_else(|_| env::var("RUST_ENV"))
            .unwrap_or_else(|_| "production".to_string());

        let config = match environment.as_str() {
            "test" => {
                info!("Loading test performance configuration (rapid expiry)");
                Self::for_test()
            }
            "development" => {
                info!("Loading development performance configuration");
                Self::for_development()
            }
            _ => {
                info!("Loading production performance configuration");
                Self::default()
            }
        };

        config.with_env_overrides()
    }

    /// Apply environment variable overrides to configuration.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(ttl) = env::var("REGISTER_CACHE_TTL_SECONDS") {
            if let Ok(seconds) = ttl.parse::<u64>() {
                self.cache.default_ttl_seconds = seconds;
                info!("Cache TTL override: {}s", seconds);
            }
        }

        if let Ok(max) = env::var("REGISTER_CACHE_MAX_ENTRIES") {
            if let Ok(entries) = max.parse::<usize>() {
                self.cache.max_entries = entries;
                info!("Cache max entries override: {}", entries);
            }
        }

        if let Ok(threshold) = env::var("REGISTER_BREAKER_FAILURE_THRESHOLD") {
            if let Ok(count) = threshold.parse::<u32>() {
                self.circuit_breaker.failure_threshold = count;
                info!("Breaker failure threshold override: {}", count);
            }
        }

        if let Ok(timeout) = env::var("REGISTER_BREAKER_TIMEOUT_SECONDS") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                self.circuit_breaker.monitor_timeout_seconds = seconds;
                info!("Breaker monitor timeout override: {}s", seconds);
            }
        }

        if let Ok(slow) = env::var("REGISTER_MONITOR_SLOW_MS") {
            if let Ok(millis) = slow.parse::<u64>() {
                self.monitor.slow_query_threshold_ms = millis;
                info!("Slow query threshold override: {}ms", millis);
            }
        }

        self
    }

    /// Validate configuration values once at construction.
    pub fn validate(&self) -> Result<()> {
        if self.cache.max_entries == 0 {
            return Err(ReportError::Configuration(
                "cache max_entries must be greater than 0".to_string(),
            ));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ReportError::Configuration(
                "breaker failure_threshold must be greater than 0".to_string(),
            ));
        }

        if self.circuit_breaker.success_threshold == 0 {
            return Err(ReportError::Configuration(
                "breaker success_threshold must be greater than 0".to_string(),
            ));
        }

        if self.circuit_breaker.call_timeout_seconds == 0 {
            return Err(ReportError::Configuration(
                "breaker call_timeout must be greater than 0".to_string(),
            ));
        }

        if self.monitor.max_records == 0 {
            return Err(ReportError::Configuration(
                "monitor max_records must be greater than 0".to_string(),
            ));
        }

        if self.cache.default_ttl_seconds == 0 {
            warn!("Cache default TTL is 0 - caching effectively disabled");
        }

        Ok(())
    }

    /// Log current configuration for debugging.
    pub fn log_configuration(&self) {
        info!("Performance Layer Configuration:");
        info!(
            "  Cache: {}s TTL, {} max entries",
            self.cache.default_ttl_seconds, self.cache.max_entries
        );
        info!(
            "  Circuit Breaker: {} failures to open, {}s probe delay, {} successes to close, {}s call timeout",
            self.circuit_breaker.failure_threshold,
            self.circuit_breaker.monitor_timeout_seconds,
            self.circuit_breaker.success_threshold,
            self.circuit_breaker.call_timeout_seconds
        );
        info!(
            "  Monitor: {} record window, {}ms slow threshold",
            self.monitor.max_records, self.monitor.slow_query_threshold_ms
        );
    }
}
