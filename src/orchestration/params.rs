//! # Report Parameter Schemas
//!
//! Declarative validation for report request parameters. Normalization is
//! lossy, never failing: unknown keys are ignored, values outside the
//! allowed set fall back to the field default.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// One recognized request parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamField {
    pub name: String,
    /// Allowed enumerated values; `None` accepts any value.
    pub allowed: Option<Vec<String>>,
    /// Value used when the parameter is missing or invalid.
    pub default: Option<String>,
}

/// Declared parameter schema for one report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamSchema {
    fields: Vec<ParamField>,
}

impl ParamSchema {
    pub fn new(fields: Vec<ParamField>) -> Self {
        Self { fields }
    }

    /// Schema with a single enumerated field, the common report shape
    /// (e.g. a language selector).
    pub fn enumerated(
        name: impl Into<String>,
        allowed: &[&str],
        default: impl Into<String>,
    ) -> Self {
        Self::new(vec![ParamField {
            name: name.into(),
            allowed: Some(allowed.iter().map(|v| (*v).to_string()).collect()),
            default: Some(default.into()),
        }])
    }

    /// Add a free-form field with an optional default.
    pub fn with_field(mut self, name: impl Into<String>, default: Option<&str>) -> Self {
        self.fields.push(ParamField {
            name: name.into(),
            allowed: None,
            default: default.map(ToString::to_string),
        });
        self
    }

    /// Normalize raw parameters against the schema. Sorted output keys make
    /// the downstream cache key deterministic.
    pub fn normalize(&self, raw: &HashMap<String, String>) -> BTreeMap<String, String> {
        let mut normalized = BTreeMap::new();
        for field in &self.fields {
            let candidate = raw.get(&field.name);
            let value = match (candidate, &field.allowed) {
                (Some(value), Some(allowed)) if allowed.contains(value) => Some(value.clone()),
                (Some(value), None) => Some(value.clone()),
                (Some(value), Some(_)) => {
                    debug!(
                        param = %field.name,
                        value = %value,
                        "Parameter outside allowed values, using default"
                    );
                    field.default.clone()
                }
                (None, _) => field.default.clone(),
            };
            if let Some(value) = value {
                normalized.insert(field.name.clone(), value);
            }
        }
        normalized
    }
}

/// Deterministic cache key: report name followed by normalized parameter
/// values in sorted-key order (`report2` + `{language: ge}` → `report2_ge`).
pub fn cache_key(report: &str, params: &BTreeMap<String, String>) -> String {
    let mut key = String::from(report);
    for value in params.values() {
        key.push('_');
        key.push_str(value);
    }
    key
}
