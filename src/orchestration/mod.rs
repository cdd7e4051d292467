//! # Orchestration
//!
//! The cached-route protocol for report handlers: parameter normalization,
//! deterministic cache keys, and the service that composes the cache,
//! circuit breaker, and query monitor per request.

pub mod params;
pub mod report_service;

pub use params::{cache_key, ParamField, ParamSchema};
pub use report_service::{
    PerformanceHealth, PerformanceSnapshot, ReportDefinition, ReportOutcome, ReportRows,
    ReportService,
};
