//! # Health Classification
//!
//! Shared health vocabulary for the performance layer. Each component
//! (cache, breaker, monitor) produces a [`HealthReport`]; the orchestration
//! combines them worst-of into one overall classification.

use serde::{Deserialize, Serialize};

/// Health classification, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    /// Combine two classifications, keeping the worse one.
    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        self.max(other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
        }
    }
}

/// Health evaluation for a single component: classification plus the
/// observations and threshold-driven recommendations behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Observed problems, or a single "within normal ranges" note when healthy.
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

impl HealthReport {
    /// A healthy report with the standard all-clear message.
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            issues: vec!["operating within normal ranges".to_string()],
            recommendations: Vec::new(),
        }
    }

    pub fn new(status: HealthStatus, issues: Vec<String>, recommendations: Vec<String>) -> Self {
        let issues = if issues.is_empty() {
            vec!["operating within normal ranges".to_string()]
        } else {
            issues
        };
        Self {
            status,
            issues,
            recommendations,
        }
    }
}
