//! # Cached Report Orchestration
//!
//! The protocol every report handler follows: normalize parameters, check
//! the cache, and on a miss run the caller-supplied fetch through the
//! circuit breaker while the monitor records timing, then populate the
//! cache. The service itself is stateless per call; all state lives in the
//! three components it composes.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::{CacheStats, SweeperHandle, TtlCache};
use crate::config::PerformanceConfig;
use crate::error::{ReportError, Result};
use crate::monitoring::health::{HealthReport, HealthStatus};
use crate::monitoring::{QueryMonitor, QueryStats};
use crate::orchestration::params::{cache_key, ParamSchema};
use crate::resilience::{CircuitBreaker, CircuitBreakerError, CircuitBreakerStats};

/// Rows returned by the external data layer.
pub type ReportRows = Vec<Value>;

/// Registration entry for one report endpoint.
#[derive(Debug, Clone)]
pub struct ReportDefinition {
    pub name: String,
    /// Cache lifetime for this report's results.
    pub ttl: Duration,
    pub schema: ParamSchema,
}

/// Result of one orchestrated report request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportOutcome {
    pub rows: ReportRows,
    pub cache_hit: bool,
    pub cache_key: String,
    pub row_count: usize,
}

/// Combined health across the three components, worst-of classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceHealth {
    pub overall: HealthStatus,
    pub cache: HealthReport,
    pub circuit_breaker: HealthReport,
    pub monitor: HealthReport,
}

/// Full observability snapshot for operational tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub cache: CacheStats,
    pub circuit_breaker: CircuitBreakerStats,
    pub monitor: QueryStats,
}

/// Process-wide report service composing cache, breaker, and monitor.
/// Constructed once and shared across handlers via `Arc`; tests build
/// independent instances from their own configuration.
#[derive(Debug)]
pub struct ReportService {
    cache: Arc<TtlCache<ReportRows>>,
    breaker: Arc<CircuitBreaker>,
    monitor: Arc<QueryMonitor>,
    reports: RwLock<HashMap<String, ReportDefinition>>,
}

impl ReportService {
    /// Build the service from validated configuration.
    pub fn from_config(config: &PerformanceConfig) -> Result<Self> {
        config.validate()?;
        info!("🚀 Report service initializing");
        Ok(Self {
            cache: Arc::new(TtlCache::new(
                "reports",
                config.cache.max_entries,
                config.cache.default_ttl(),
            )),
            breaker: Arc::new(CircuitBreaker::new(
                "report_database",
                config.circuit_breaker.clone(),
            )),
            monitor: Arc::new(QueryMonitor::new(config.monitor.clone())),
            reports: RwLock::new(HashMap::new()),
        })
    }

    /// Register a report definition; replaces any previous definition with
    /// the same name.
    pub fn register(&self, definition: ReportDefinition) {
        debug!(report = %definition.name, ttl_ms = definition.ttl.as_millis() as u64, "Report registered");
        self.reports
            .write()
            .insert(definition.name.clone(), definition);
    }

    /// Execute one report request following the cached-route protocol.
    ///
    /// On a cache hit the fetcher, breaker, and monitor are not involved.
    /// On a miss the fetch runs through the circuit breaker while the
    /// monitor records timing; a successful result is cached with the
    /// report's TTL, a failure propagates classified and caches nothing.
    ///
    /// Concurrent misses for the same key are not de-duplicated: two
    /// simultaneous requests may both invoke the fetcher.
    pub async fn execute<F, Fut, E>(
        &self,
        report: &str,
        raw_params: &HashMap<String, String>,
        fetch: F,
    ) -> Result<ReportOutcome>
    where
        F: FnOnce(BTreeMap<String, String>) -> Fut,
        Fut: Future<Output = std::result::Result<ReportRows, E>>,
        E: StdError + Send + Sync + 'static,
    {
        let definition = self
            .reports
            .read()
            .get(report)
            .cloned()
            .ok_or_else(|| ReportError::Configuration(format!("unknown report '{report}'")))?;

        let params = definition.schema.normalize(raw_params);
        let key = cache_key(report, &params);

        if let Some(rows) = self.cache.get(&key) {
            debug!(report, key = %key, "📦 Cache hit");
            return Ok(ReportOutcome {
                row_count: rows.len(),
                rows,
                cache_hit: true,
                cache_key: key,
            });
        }

        debug!(report, key = %key, "Cache miss, fetching");
        let token = self.monitor.start_query(
            key.clone(),
            &format!("report:{report}"),
            serde_json::to_value(&params).unwrap_or(Value::Null),
        );

        match self.breaker.call(|| fetch(params)).await {
            Ok(rows) => {
                self.monitor.end_query(token, true, rows.len() as u64, None);
                self.cache
                    .set_with_ttl(key.clone(), rows.clone(), definition.ttl);
                Ok(ReportOutcome {
                    row_count: rows.len(),
                    rows,
                    cache_hit: false,
                    cache_key: key,
                })
            }
            Err(err) => {
                let classified = classify(err);
                self.monitor
                    .end_query(token, false, 0, Some(&classified.to_string()));
                Err(classified)
            }
        }
    }

    // Administrative passthroughs.

    /// Delete one cache entry by key.
    pub fn invalidate(&self, key: &str) -> bool {
        self.cache.delete(key)
    }

    /// Delete all cached entries for one report (name-prefix scoped).
    pub fn invalidate_report(&self, report: &str) -> usize {
        self.cache.delete_prefix(&format!("{report}_"))
    }

    /// Clear the whole cache.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Force the circuit breaker closed and zero its counters.
    pub fn reset_breaker(&self) {
        self.breaker.reset();
    }

    /// Force the circuit breaker open (maintenance hook).
    pub fn force_breaker_open(&self) {
        self.breaker.force_open();
    }

    /// Clear the monitor window and aggregates.
    pub fn reset_monitor(&self) {
        self.monitor.reset();
    }

    /// Start the cache's background sweep; the handle cancels it on drop.
    pub fn start_cache_sweeper(&self) -> SweeperHandle {
        self.cache.start_sweeper()
    }

    // Observability surface.

    /// Worst-of-three health classification with per-component reports.
    pub fn health(&self) -> PerformanceHealth {
        let cache = self.cache_health();
        let circuit_breaker = self.breaker.health();
        let monitor = self.monitor.health();
        let overall = cache
            .status
            .worst(circuit_breaker.status)
            .worst(monitor.status);
        PerformanceHealth {
            overall,
            cache,
            circuit_breaker,
            monitor,
        }
    }

    /// Structured stats for all three components.
    pub fn snapshot(&self) -> PerformanceSnapshot {
        PerformanceSnapshot {
            cache: self.cache.stats(),
            circuit_breaker: self.breaker.stats(),
            monitor: self.monitor.stats(),
        }
    }

    /// Flat key→number metrics suitable for periodic scraping.
    pub fn metrics_dump(&self) -> BTreeMap<String, f64> {
        let cache = self.cache.stats();
        let breaker = self.breaker.stats();
        let monitor = self.monitor.stats();

        BTreeMap::from([
            ("cache_size".to_string(), cache.size as f64),
            ("cache_max_entries".to_string(), cache.max_entries as f64),
            ("breaker_state".to_string(), breaker.state as u8 as f64),
            ("breaker_total_calls".to_string(), breaker.total_calls as f64),
            (
                "breaker_success_count".to_string(),
                breaker.success_count as f64,
            ),
            (
                "breaker_failure_count".to_string(),
                breaker.failure_count as f64,
            ),
            (
                "breaker_timeout_count".to_string(),
                breaker.timeout_count as f64,
            ),
            (
                "breaker_rejected_count".to_string(),
                breaker.rejected_count as f64,
            ),
            (
                "breaker_times_opened".to_string(),
                breaker.times_opened as f64,
            ),
            ("breaker_success_rate".to_string(), breaker.success_rate),
            (
                "monitor_total_queries".to_string(),
                monitor.total_queries as f64,
            ),
            (
                "monitor_slow_queries".to_string(),
                monitor.slow_queries as f64,
            ),
            (
                "monitor_error_count".to_string(),
                monitor.error_count as f64,
            ),
            (
                "monitor_average_ms".to_string(),
                monitor.average_execution_ms,
            ),
            (
                "monitor_peak_ms".to_string(),
                monitor.peak_execution_ms as f64,
            ),
        ])
    }

    /// Cache health: healthy in normal operation, warning once the store is
    /// at capacity and evicting.
    fn cache_health(&self) -> HealthReport {
        let stats = self.cache.stats();
        if stats.size >= stats.max_entries {
            HealthReport::new(
                HealthStatus::Warning,
                vec![format!(
                    "cache at capacity ({}/{}), oldest entries being evicted",
                    stats.size, stats.max_entries
                )],
                vec!["raise max_entries or shorten report TTLs".to_string()],
            )
        } else {
            HealthReport::healthy()
        }
    }

    /// Shared cache component, for direct handler access.
    pub fn cache(&self) -> &Arc<TtlCache<ReportRows>> {
        &self.cache
    }

    /// Shared circuit breaker component.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Shared query monitor component.
    pub fn monitor(&self) -> &Arc<QueryMonitor> {
        &self.monitor
    }
}

/// Map breaker errors onto the report error taxonomy.
fn classify<E>(err: CircuitBreakerError<E>) -> ReportError
where
    E: StdError + Send + Sync + 'static,
{
    match err {
        CircuitBreakerError::CircuitOpen { component } => {
            ReportError::CircuitOpen { name: component }
        }
        CircuitBreakerError::Timeout { timeout_ms } => ReportError::Timeout { timeout_ms },
        CircuitBreakerError::OperationFailed(source) => ReportError::Fetch {
            source: Box::new(source),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::params::ParamSchema;
    use serde_json::json;

    fn service() -> ReportService {
        let service = ReportService::from_config(&PerformanceConfig::default()).unwrap();
        service.register(ReportDefinition {
            name: "report2".to_string(),
            ttl: Duration::from_secs(60),
            schema: ParamSchema::enumerated("language", &["ge", "en"], "ge"),
        });
        service
    }

    #[tokio::test]
    async fn unknown_report_is_configuration_error() {
        let service = service();
        let result = service
            .execute("nope", &HashMap::new(), |_| async {
                Ok::<_, std::io::Error>(vec![])
            })
            .await;
        assert!(matches!(result, Err(ReportError::Configuration(_))));
    }

    #[tokio::test]
    async fn miss_then_hit_uses_cache() {
        let service = service();
        let params = HashMap::new();

        let first = service
            .execute("report2", &params, |_| async {
                Ok::<_, std::io::Error>(vec![json!({"count": 42})])
            })
            .await
            .unwrap();
        assert!(!first.cache_hit);
        assert_eq!(first.cache_key, "report2_ge");
        assert_eq!(first.row_count, 1);

        // A fetcher that fails loudly: a hit must never reach it.
        let second = service
            .execute("report2", &params, |_| async {
                Err::<ReportRows, std::io::Error>(std::io::Error::other(
                    "fetcher must not run on a hit",
                ))
            })
            .await
            .unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.rows, first.rows);

        // Only the miss was recorded by the monitor.
        assert_eq!(service.monitor().stats().total_queries, 1);
    }

    #[tokio::test]
    async fn failure_caches_nothing_and_classifies() {
        let service = service();
        let result = service
            .execute("report2", &HashMap::new(), |_| async {
                Err::<ReportRows, _>(std::io::Error::other("connection reset"))
            })
            .await;

        match result {
            Err(ReportError::Fetch { source }) => {
                assert!(source.to_string().contains("connection reset"));
            }
            other => panic!("expected fetch error, got {other:?}"),
        }
        assert_eq!(service.cache().stats().size, 0);
        assert_eq!(service.monitor().stats().error_count, 1);
    }

    #[tokio::test]
    async fn admin_passthroughs() {
        let service = service();
        service.cache().set("report2_ge", vec![json!(1)]);
        assert!(service.invalidate("report2_ge"));
        assert!(!service.invalidate("report2_ge"));

        service.cache().set("report2_ge", vec![json!(1)]);
        service.cache().set("report2_en", vec![json!(2)]);
        assert_eq!(service.invalidate_report("report2"), 2);

        service.force_breaker_open();
        assert_eq!(
            service.health().circuit_breaker.status,
            HealthStatus::Critical
        );
        service.reset_breaker();
        assert_eq!(service.health().overall, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn metrics_dump_is_flat_and_numeric() {
        let service = service();
        let _ = service
            .execute("report2", &HashMap::new(), |_| async {
                Ok::<_, std::io::Error>(vec![json!(1), json!(2)])
            })
            .await;

        let metrics = service.metrics_dump();
        assert_eq!(metrics.get("cache_size"), Some(&1.0));
        assert_eq!(metrics.get("breaker_total_calls"), Some(&1.0));
        assert_eq!(metrics.get("monitor_total_queries"), Some(&1.0));
    }
}
