#![allow(clippy::doc_markdown)] // Allow technical terms like TTL, HalfOpen in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear
#![allow(clippy::cast_precision_loss)] // Counter-to-f64 conversions in stats are intentional

//! # Register Core
//!
//! In-process performance layer for statistical business-register report
//! services. The HTTP layer, SQL construction, and relational schema live
//! elsewhere; this crate provides the resilience and speed layer that report
//! handlers compose per request:
//!
//! - [`cache`] - Bounded TTL cache with oldest-first eviction and a
//!   background sweep that never outlives shutdown
//! - [`resilience`] - Circuit breaker guarding the database dependency, with
//!   per-call timeouts and automatic recovery probing
//! - [`monitoring`] - Rolling-window query performance recorder with
//!   aggregate statistics and health classification
//! - [`orchestration`] - The cached-route protocol tying the three together
//!   (check-cache → guarded-fetch → record-metrics → populate-cache)
//! - [`config`] - Environment-aware configuration with documented defaults
//! - [`error`] - Structured error taxonomy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use register_core::config::PerformanceConfig;
//! use register_core::orchestration::{ParamSchema, ReportDefinition, ReportService};
//! use std::collections::HashMap;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = ReportService::from_config(&PerformanceConfig::from_environment())?;
//! service.register(ReportDefinition {
//!     name: "report2".to_string(),
//!     ttl: Duration::from_secs(300),
//!     schema: ParamSchema::enumerated("language", &["ge", "en"], "ge"),
//! });
//!
//! let outcome = service
//!     .execute("report2", &HashMap::new(), |params| async move {
//!         // Real handlers query the database here.
//!         Ok::<_, std::io::Error>(vec![serde_json::json!({"lang": params["language"]})])
//!     })
//!     .await?;
//! println!("rows: {}, cache hit: {}", outcome.row_count, outcome.cache_hit);
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! All components are `Send + Sync` and shared via `Arc`; internal locks are
//! held only for short critical sections and never across an await point.
//! The only suspension point is the breaker-guarded fetch. Concurrent misses
//! for the same cache key are not de-duplicated.

pub mod cache;
pub mod config;
pub mod error;
pub mod monitoring;
pub mod orchestration;
pub mod resilience;

pub use cache::{CacheStats, SweeperHandle, TtlCache};
pub use config::{CacheSettings, CircuitBreakerSettings, MonitorSettings, PerformanceConfig};
pub use error::{ReportError, Result};
pub use monitoring::{HealthReport, HealthStatus, QueryMonitor, QueryStats};
pub use orchestration::{ReportDefinition, ReportOutcome, ReportService};
pub use resilience::{CircuitBreaker, CircuitBreakerError, CircuitBreakerStats, CircuitState};
