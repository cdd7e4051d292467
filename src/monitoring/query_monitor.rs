//! # Query Performance Monitor
//!
//! Rolling-window recorder of report query timings. The window bounds memory
//! for per-query detail (slow lists, pattern grouping) while aggregate
//! counters stay cumulative since the last reset, so long-run statistics are
//! exact regardless of window eviction.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::MonitorSettings;
use crate::monitoring::health::{HealthReport, HealthStatus};

/// Maximum stored length of sanitized operation text.
const MAX_QUERY_TEXT_LEN: usize = 500;

/// Maximum length of a normalized query pattern.
const MAX_PATTERN_LEN: usize = 100;

/// Maximum stored length of an error summary.
const MAX_ERROR_LEN: usize = 200;

/// Error rate above which the monitor reports critical.
const CRITICAL_ERROR_RATE: f64 = 5.0;

/// Slow-query percentage above which the monitor reports warning.
const WARNING_SLOW_RATE: f64 = 10.0;

/// Average execution time above which the monitor reports warning.
const WARNING_AVG_MS: f64 = 500.0;

/// In-flight timing token returned by [`QueryMonitor::start_query`].
#[derive(Debug)]
pub struct QueryToken {
    id: String,
    query_text: String,
    params: Value,
    started: Instant,
    started_at: DateTime<Utc>,
}

/// Completed record of one monitored query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: String,
    pub record_id: Uuid,
    pub query_text: String,
    pub params: Value,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub execution_ms: u64,
    pub success: bool,
    pub row_count: u64,
    pub error: Option<String>,
}

/// Aggregate counters, cumulative since the last reset.
#[derive(Debug, Default, Clone)]
struct Aggregates {
    total_queries: u64,
    slow_queries: u64,
    error_count: u64,
    total_execution_ms: u64,
    peak_execution_ms: u64,
}

/// Derived stats snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryStats {
    pub total_queries: u64,
    pub slow_queries: u64,
    pub error_count: u64,
    pub slow_percentage: f64,
    pub error_percentage: f64,
    pub total_execution_ms: u64,
    pub average_execution_ms: f64,
    pub peak_execution_ms: u64,
    pub window_size: usize,
}

/// Per-pattern aggregation over the current window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPattern {
    pub pattern: String,
    pub count: u64,
    pub average_execution_ms: f64,
    pub slow_rate: f64,
}

#[derive(Debug, Default)]
struct MonitorInner {
    window: VecDeque<QueryRecord>,
    aggregates: Aggregates,
}

/// Query performance monitor. One instance per process, shared by all
/// report handlers.
#[derive(Debug)]
pub struct QueryMonitor {
    settings: MonitorSettings,
    inner: Mutex<MonitorInner>,
    credential_pattern: Regex,
    number_literal: Regex,
    string_literal: Regex,
    whitespace: Regex,
}

impl QueryMonitor {
    // Static patterns; construction cannot fail.
    #[allow(clippy::unwrap_used)]
    pub fn new(settings: MonitorSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(MonitorInner::default()),
            credential_pattern: Regex::new(
                r"(?i)(password|pwd|secret|token|api[_-]?key)\s*=\s*\S+",
            )
            .unwrap(),
            number_literal: Regex::new(r"\b\d+(\.\d+)?\b").unwrap(),
            string_literal: Regex::new(r"'[^']*'").unwrap(),
            whitespace: Regex::new(r"\s+").unwrap(),
        }
    }

    /// Capture a start mark and a sanitized copy of the operation text.
    pub fn start_query(&self, id: impl Into<String>, text: &str, params: Value) -> QueryToken {
        QueryToken {
            id: id.into(),
            query_text: self.sanitize(text),
            params,
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Complete a record: compute elapsed time, append to the window
    /// (dropping the oldest at capacity), and update aggregates.
    pub fn end_query(
        &self,
        token: QueryToken,
        success: bool,
        row_count: u64,
        error: Option<&str>,
    ) -> QueryRecord {
        let execution_ms = token.started.elapsed().as_millis() as u64;
        let record = QueryRecord {
            id: token.id,
            record_id: Uuid::new_v4(),
            query_text: token.query_text,
            params: token.params,
            started_at: token.started_at,
            ended_at: Utc::now(),
            execution_ms,
            success,
            row_count,
            error: error.map(|e| truncate(&self.credential_pattern.replace_all(e, "$1=[REDACTED]"), MAX_ERROR_LEN)),
        };

        let slow = execution_ms > self.settings.slow_query_threshold_ms;
        if slow {
            warn!(
                query = %record.id,
                execution_ms,
                threshold_ms = self.settings.slow_query_threshold_ms,
                "🐢 Slow query detected"
            );
        } else {
            debug!(query = %record.id, execution_ms, success, "Query completed");
        }

        let mut inner = self.inner.lock();
        inner.aggregates.total_queries += 1;
        inner.aggregates.total_execution_ms += execution_ms;
        inner.aggregates.peak_execution_ms = inner.aggregates.peak_execution_ms.max(execution_ms);
        if slow {
            inner.aggregates.slow_queries += 1;
        }
        if !success {
            inner.aggregates.error_count += 1;
        }

        if inner.window.len() >= self.settings.max_records {
            inner.window.pop_front();
        }
        inner.window.push_back(record.clone());

        record
    }

    /// Derived stats; no recomputation over the window.
    pub fn stats(&self) -> QueryStats {
        let inner = self.inner.lock();
        let agg = &inner.aggregates;
        let total = agg.total_queries;
        let pct = |count: u64| {
            if total > 0 {
                count as f64 / total as f64 * 100.0
            } else {
                0.0
            }
        };

        QueryStats {
            total_queries: total,
            slow_queries: agg.slow_queries,
            error_count: agg.error_count,
            slow_percentage: pct(agg.slow_queries),
            error_percentage: pct(agg.error_count),
            total_execution_ms: agg.total_execution_ms,
            average_execution_ms: if total > 0 {
                agg.total_execution_ms as f64 / total as f64
            } else {
                0.0
            },
            peak_execution_ms: agg.peak_execution_ms,
            window_size: inner.window.len(),
        }
    }

    /// The slowest recorded operations in the current window.
    pub fn slow_queries(&self, limit: usize) -> Vec<QueryRecord> {
        let inner = self.inner.lock();
        let mut records: Vec<QueryRecord> = inner.window.iter().cloned().collect();
        records.sort_by(|a, b| b.execution_ms.cmp(&a.execution_ms));
        records.truncate(limit);
        records
    }

    /// Group window records by normalized pattern (literals replaced with a
    /// placeholder), sorted by average execution time descending.
    pub fn query_patterns(&self) -> Vec<QueryPattern> {
        let inner = self.inner.lock();
        let mut groups: HashMap<String, (u64, u64, u64)> = HashMap::new();
        for record in &inner.window {
            let pattern = self.normalize(&record.query_text);
            let entry = groups.entry(pattern).or_default();
            entry.0 += 1;
            entry.1 += record.execution_ms;
            if record.execution_ms > self.settings.slow_query_threshold_ms {
                entry.2 += 1;
            }
        }
        drop(inner);

        let mut patterns: Vec<QueryPattern> = groups
            .into_iter()
            .map(|(pattern, (count, total_ms, slow))| QueryPattern {
                pattern,
                count,
                average_execution_ms: total_ms as f64 / count as f64,
                slow_rate: slow as f64 / count as f64,
            })
            .collect();
        patterns.sort_by(|a, b| {
            b.average_execution_ms
                .partial_cmp(&a.average_execution_ms)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        patterns
    }

    /// Classify monitor health against the error/slow/average thresholds.
    pub fn health(&self) -> HealthReport {
        let stats = self.stats();
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();
        let mut status = HealthStatus::Healthy;

        if stats.error_percentage > CRITICAL_ERROR_RATE {
            status = HealthStatus::Critical;
            issues.push(format!(
                "error rate {:.1}% exceeds {CRITICAL_ERROR_RATE}%",
                stats.error_percentage
            ));
            recommendations.push("inspect recent query errors and database health".to_string());
        }

        if stats.slow_percentage > WARNING_SLOW_RATE {
            status = status.worst(HealthStatus::Warning);
            issues.push(format!(
                "{:.1}% of queries exceed {}ms",
                stats.slow_percentage, self.settings.slow_query_threshold_ms
            ));
            recommendations.push("review slow queries and missing indexes".to_string());
        }

        if stats.average_execution_ms > WARNING_AVG_MS {
            status = status.worst(HealthStatus::Warning);
            issues.push(format!(
                "average execution time {:.0}ms exceeds {WARNING_AVG_MS:.0}ms",
                stats.average_execution_ms
            ));
            recommendations.push("consider longer cache TTLs for heavy reports".to_string());
        }

        HealthReport::new(status, issues, recommendations)
    }

    /// Clear the window and zero all aggregates.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.window.clear();
        inner.aggregates = Aggregates::default();
    }

    /// Redact credential-looking fragments and bound the stored length.
    fn sanitize(&self, text: &str) -> String {
        let redacted = self.credential_pattern.replace_all(text, "$1=[REDACTED]");
        truncate(&redacted, MAX_QUERY_TEXT_LEN)
    }

    /// Collapse a query to its structural shape: literals become `?`,
    /// whitespace collapses, output is bounded.
    fn normalize(&self, text: &str) -> String {
        let no_strings = self.string_literal.replace_all(text, "?");
        let no_numbers = self.number_literal.replace_all(&no_strings, "?");
        let collapsed = self.whitespace.replace_all(&no_numbers, " ");
        truncate(collapsed.trim(), MAX_PATTERN_LEN)
    }
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        text.to_string()
    } else {
        let mut end = max_len;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::time::sleep;
    use std::time::Duration;

    fn monitor() -> QueryMonitor {
        QueryMonitor::new(MonitorSettings {
            max_records: 5,
            slow_query_threshold_ms: 50,
        })
    }

    #[test]
    fn records_and_aggregates() {
        let monitor = monitor();
        for i in 0..3 {
            let token = monitor.start_query(
                format!("q{i}"),
                "SELECT * FROM enterprises WHERE region = 'Tbilisi'",
                json!({"region": "Tbilisi"}),
            );
            monitor.end_query(token, true, 10, None);
        }

        let stats = monitor.stats();
        assert_eq!(stats.total_queries, 3);
        assert_eq!(stats.error_count, 0);
        assert_eq!(stats.window_size, 3);
        assert!(stats.average_execution_ms >= 0.0);
    }

    #[test]
    fn window_bounded_but_aggregates_cumulative() {
        let monitor = monitor();
        for i in 0..8 {
            let token = monitor.start_query(format!("q{i}"), "SELECT 1", Value::Null);
            monitor.end_query(token, true, 1, None);
        }

        let stats = monitor.stats();
        assert_eq!(stats.total_queries, 8);
        assert_eq!(stats.window_size, 5);
    }

    #[tokio::test]
    async fn slow_queries_counted_and_listed() {
        let monitor = monitor();

        let token = monitor.start_query("slow", "SELECT pg_sleep(1)", Value::Null);
        sleep(Duration::from_millis(80)).await;
        monitor.end_query(token, true, 0, None);

        let token = monitor.start_query("fast", "SELECT 1", Value::Null);
        monitor.end_query(token, true, 1, None);

        let stats = monitor.stats();
        assert_eq!(stats.slow_queries, 1);
        assert!(stats.peak_execution_ms >= 80);

        let slow = monitor.slow_queries(1);
        assert_eq!(slow.len(), 1);
        assert_eq!(slow[0].id, "slow");
    }

    #[test]
    fn errors_recorded_with_redaction() {
        let monitor = monitor();
        let token = monitor.start_query("q", "SELECT 1", Value::Null);
        let record = monitor.end_query(
            token,
            false,
            0,
            Some("login failed: password=hunter2 rejected"),
        );

        assert!(!record.success);
        let error = record.error.unwrap();
        assert!(error.contains("[REDACTED]"));
        assert!(!error.contains("hunter2"));
        assert_eq!(monitor.stats().error_count, 1);
    }

    #[test]
    fn query_text_sanitized_and_truncated() {
        let monitor = monitor();
        let long_tail = "x".repeat(600);
        let token = monitor.start_query(
            "q",
            &format!("SELECT 1 -- password=secret123 {long_tail}"),
            Value::Null,
        );
        let record = monitor.end_query(token, true, 0, None);

        assert!(record.query_text.contains("[REDACTED]"));
        assert!(!record.query_text.contains("secret123"));
        assert!(record.query_text.len() <= MAX_QUERY_TEXT_LEN + 3);
    }

    #[test]
    fn patterns_group_by_shape() {
        let monitor = monitor();
        for region in ["'Tbilisi'", "'Batumi'", "'Kutaisi'"] {
            let token = monitor.start_query(
                "q",
                &format!("SELECT * FROM ent WHERE region = {region} AND year = 2024"),
                Value::Null,
            );
            monitor.end_query(token, true, 1, None);
        }
        let token = monitor.start_query("q", "SELECT count(*) FROM ent", Value::Null);
        monitor.end_query(token, true, 1, None);

        let patterns = monitor.query_patterns();
        assert_eq!(patterns.len(), 2);
        let grouped = patterns
            .iter()
            .find(|p| p.pattern.contains("WHERE region = ?"))
            .unwrap();
        assert_eq!(grouped.count, 3);
        assert!(grouped.pattern.contains("year = ?"));
    }

    #[test]
    fn reset_clears_everything() {
        let monitor = monitor();
        let token = monitor.start_query("q", "SELECT 1", Value::Null);
        monitor.end_query(token, true, 1, None);

        monitor.reset();
        let stats = monitor.stats();
        assert_eq!(stats.total_queries, 0);
        assert_eq!(stats.window_size, 0);
        assert_eq!(stats.peak_execution_ms, 0);
    }

    #[test]
    fn health_critical_on_error_rate() {
        let monitor = monitor();
        for i in 0..10 {
            let token = monitor.start_query(format!("q{i}"), "SELECT 1", Value::Null);
            monitor.end_query(token, i != 0, 1, if i == 0 { Some("boom") } else { None });
        }

        // 1 error in 10 = 10% > 5% threshold.
        let health = monitor.health();
        assert_eq!(health.status, HealthStatus::Critical);
        assert!(!health.issues.is_empty());
        assert!(!health.recommendations.is_empty());
    }

    #[test]
    fn health_all_clear_message_when_healthy() {
        let monitor = monitor();
        let health = monitor.health();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.issues[0].contains("normal ranges"));
    }
}
