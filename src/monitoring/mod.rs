//! # Monitoring
//!
//! Query performance recording and the shared health classification used by
//! every component of the performance layer.

pub mod health;
pub mod query_monitor;

pub use health::{HealthReport, HealthStatus};
pub use query_monitor::{QueryMonitor, QueryPattern, QueryRecord, QueryStats, QueryToken};
