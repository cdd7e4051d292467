//! End-to-end tests for the cached-route protocol: cache hit/miss flow,
//! breaker short-circuiting, pattern-scoped invalidation, and the combined
//! observability surface.

use register_core::config::PerformanceConfig;
use register_core::orchestration::{ParamSchema, ReportDefinition, ReportService};
use register_core::{HealthStatus, ReportError};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .try_init();
}

fn build_service() -> ReportService {
    let service = ReportService::from_config(&PerformanceConfig::default())
        .expect("default config is valid");
    for name in ["report1", "report2"] {
        service.register(ReportDefinition {
            name: name.to_string(),
            ttl: Duration::from_secs(300),
            schema: ParamSchema::enumerated("language", &["ge", "en"], "ge"),
        });
    }
    service
}

#[tokio::test]
async fn scenario_a_second_call_is_cache_hit() {
    init_tracing();
    let service = build_service();
    let fetches = Arc::new(AtomicUsize::new(0));
    let params = HashMap::from([("language".to_string(), "ge".to_string())]);

    let first = {
        let fetches = Arc::clone(&fetches);
        service
            .execute("report2", &params, move |_| async move {
                fetches.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::io::Error>(vec![json!({"region": "Imereti", "count": 120})])
            })
            .await
            .expect("first call succeeds")
    };
    assert!(!first.cache_hit);
    assert_eq!(first.cache_key, "report2_ge");

    let second = {
        let fetches = Arc::clone(&fetches);
        service
            .execute("report2", &params, move |_| async move {
                fetches.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::io::Error>(vec![json!("fresh value, should not appear")])
            })
            .await
            .expect("second call succeeds")
    };

    assert!(second.cache_hit);
    assert_eq!(second.rows, first.rows);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scenario_b_breaker_short_circuits_repeated_failures() {
    init_tracing();
    let service = build_service();
    let fetches = Arc::new(AtomicUsize::new(0));
    let params = HashMap::new();

    for call in 0..6 {
        let fetches = Arc::clone(&fetches);
        let result = service
            .execute("report1", &params, move |_| async move {
                fetches.fetch_add(1, Ordering::SeqCst);
                Err::<Vec<serde_json::Value>, _>(std::io::Error::other("db down"))
            })
            .await;

        match result {
            Err(ReportError::Fetch { .. }) if call < 5 => {}
            Err(ReportError::CircuitOpen { .. }) if call == 5 => {}
            other => panic!("call {call}: unexpected result {other:?}"),
        }
    }

    // Breaker opened after the 5th failure; the 6th never reached the fetcher.
    assert_eq!(fetches.load(Ordering::SeqCst), 5);

    let stats = service.breaker().stats();
    assert_eq!(stats.times_opened, 1);
    assert_eq!(stats.rejected_count, 1);
}

#[tokio::test]
async fn scenario_c_pattern_scoped_cache_clear() {
    init_tracing();
    let service = build_service();

    service.cache().set("report1_ge", vec![json!(1)]);
    service.cache().set("report1_en", vec![json!(2)]);
    service.cache().set("report2_ge", vec![json!(3)]);

    assert_eq!(service.invalidate_report("report1"), 2);

    let stats = service.cache().stats();
    assert_eq!(stats.size, 1);
    assert_eq!(stats.keys, vec!["report2_ge".to_string()]);
}

#[tokio::test]
async fn timeout_is_classified_and_counted() {
    init_tracing();
    let mut config = PerformanceConfig::default();
    config.circuit_breaker.call_timeout_seconds = 0;
    let service = ReportService::from_config(&config).expect("config is valid");
    service.register(ReportDefinition {
        name: "report1".to_string(),
        ttl: Duration::from_secs(300),
        schema: ParamSchema::default(),
    });

    let result = service
        .execute("report1", &HashMap::new(), |_| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, std::io::Error>(vec![])
        })
        .await;

    match result {
        Err(err @ ReportError::Timeout { .. }) => assert!(err.is_retryable()),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(service.breaker().stats().timeout_count, 1);
    assert_eq!(service.monitor().stats().error_count, 1);
}

#[tokio::test]
async fn breaker_recovery_closes_after_three_successes() {
    init_tracing();
    let mut config = PerformanceConfig::default();
    config.circuit_breaker.failure_threshold = 1;
    config.circuit_breaker.monitor_timeout_seconds = 0; // probe immediately
    let service = ReportService::from_config(&config).expect("config is valid");
    service.register(ReportDefinition {
        name: "report1".to_string(),
        ttl: Duration::from_millis(1), // expire instantly so every call misses
        schema: ParamSchema::default(),
    });

    let failing = service
        .execute("report1", &HashMap::new(), |_| async {
            Err::<Vec<serde_json::Value>, _>(std::io::Error::other("down"))
        })
        .await;
    assert!(failing.is_err());
    assert_eq!(
        service.health().circuit_breaker.status,
        HealthStatus::Critical
    );

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(5)).await; // let the entry expire
        service
            .execute("report1", &HashMap::new(), |_| async {
                Ok::<_, std::io::Error>(vec![json!(1)])
            })
            .await
            .expect("probe succeeds");
    }

    assert_eq!(
        service.health().circuit_breaker.status,
        HealthStatus::Healthy
    );
    assert_eq!(service.breaker().stats().consecutive_failures, 0);

    // The recorded failure still dominates the monitor's error rate; after
    // an administrative reset the whole surface reads healthy again.
    service.reset_monitor();
    assert_eq!(service.health().overall, HealthStatus::Healthy);
}

#[tokio::test]
async fn health_and_metrics_surface() {
    init_tracing();
    let service = build_service();

    let _ = service
        .execute("report2", &HashMap::new(), |_| async {
            Ok::<_, std::io::Error>(vec![json!(1), json!(2), json!(3)])
        })
        .await
        .expect("fetch succeeds");

    let health = service.health();
    assert_eq!(health.overall, HealthStatus::Healthy);

    let snapshot = service.snapshot();
    assert_eq!(snapshot.cache.size, 1);
    assert_eq!(snapshot.circuit_breaker.total_calls, 1);
    assert_eq!(snapshot.monitor.total_queries, 1);

    let metrics = service.metrics_dump();
    assert!(metrics.keys().all(|k| !k.contains(' ')));
    assert_eq!(metrics.get("breaker_success_count"), Some(&1.0));

    // Forcing the breaker open drags the overall classification down.
    service.force_breaker_open();
    assert_eq!(service.health().overall, HealthStatus::Critical);
}

#[tokio::test]
async fn sweeper_runs_and_stops_with_handle() {
    init_tracing();
    let mut config = PerformanceConfig::default();
    config.cache.default_ttl_seconds = 0; // sweep interval floors at 1ms
    let service = ReportService::from_config(&config).expect("config is valid");

    let sweeper = service.start_cache_sweeper();
    service
        .cache()
        .set_with_ttl("stale", vec![json!(1)], Duration::from_millis(5));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(service.cache().stats().size, 0);

    drop(sweeper); // cancels the background task
}
