//! Externally produced execution-plan document.
//!
//! Every field is optional: a missing section yields empty metadata for that
//! side when the plan is resolved, never an error.

use medctx_common::{MedError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionPlan {
    pub cohort_source: Option<CohortSource>,
    pub signal_source: Option<SignalSource>,
    pub join_specification: Option<JoinSpecification>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CohortSource {
    pub file_id: Option<String>,
    pub entity_identifier: Option<String>,
    /// Free-text label for what one cohort row stands for (e.g. "surgery").
    pub row_represents: Option<String>,
    pub filters: Vec<FilterSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub column: String,
    #[serde(alias = "op")]
    pub operator: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalSource {
    pub group_id: Option<String>,
    pub entity_identifier_key: Option<String>,
    pub parameters: Vec<ParameterSpec>,
    pub temporal_alignment: Option<TemporalAlignment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterSpec {
    /// Natural-language term the keys were resolved from.
    pub term: Option<String>,
    pub param_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalAlignment {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub margin_seconds: Option<f64>,
    pub start_column: Option<String>,
    pub end_column: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinSpecification {
    pub cohort_key: Option<String>,
    pub signal_key: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl ExecutionPlan {
    /// Accepts `{"execution_plan": {...}}` or the bare plan object.
    pub fn from_json(value: &Value) -> Result<Self> {
        let inner = value.get("execution_plan").unwrap_or(value);
        if inner.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(inner.clone())
            .map_err(|e| MedError::Planning(format!("malformed execution plan: {e}")))
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(s)
            .map_err(|e| MedError::Planning(format!("execution plan is not JSON: {e}")))?;
        Self::from_json(&value)
    }
}
