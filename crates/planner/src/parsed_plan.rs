//! Normalized, immutable result of resolving an [`ExecutionPlan`](crate::ExecutionPlan).

use std::path::PathBuf;

use medctx_common::{MedError, Result};
use medctx_storage::SignalFile;
use serde::Serialize;
use serde_json::Value;

use crate::execution_plan::{FilterSpec, TemporalAlignment};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedPlan {
    pub cohort: CohortMetadata,
    pub signal: SignalMetadata,
    pub join: JoinConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CohortMetadata {
    pub file_id: Option<String>,
    /// `None` when paths were not resolved or the catalog had no entry.
    pub path: Option<PathBuf>,
    pub entity_identifier: Option<String>,
    pub row_represents: Option<String>,
    pub filters: Vec<CohortFilter>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SignalMetadata {
    pub group_id: Option<String>,
    pub entity_identifier_key: Option<String>,
    pub files: Vec<SignalFile>,
    /// Union of every parameter descriptor's keys, first-seen order.
    pub param_keys: Vec<String>,
    pub temporal: TemporalWindow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinConfig {
    pub cohort_key: String,
    pub signal_key: String,
    pub kind: JoinKind,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            cohort_key: medctx_common::DEFAULT_ENTITY_KEY.to_string(),
            signal_key: medctx_common::DEFAULT_ENTITY_KEY.to_string(),
            kind: JoinKind::Inner,
        }
    }
}

impl ParsedPlan {
    pub fn has_signals(&self) -> bool {
        !self.signal.files.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
    Right,
    Full,
}

impl JoinKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inner" => Some(Self::Inner),
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            "outer" | "full" | "full_outer" => Some(Self::Full),
            _ => None,
        }
    }
}

// ------------------ temporal window ------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WindowKind {
    Procedure,
    Treatment,
    Custom,
}

impl WindowKind {
    fn default_columns(self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Procedure => Some(("opstart", "opend")),
            Self::Treatment => Some(("anestart", "aneend")),
            Self::Custom => None,
        }
    }
}

/// Which slice of each entity's series to keep.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub enum TemporalWindow {
    #[default]
    NoRestriction,
    Bounded {
        kind: WindowKind,
        start_column: String,
        end_column: String,
        /// Added outside both boundaries.
        margin_seconds: f64,
    },
}

impl TemporalWindow {
    /// Unknown types and incomplete custom windows degrade to `NoRestriction`.
    pub fn from_alignment(alignment: Option<&TemporalAlignment>) -> Self {
        let Some(a) = alignment else {
            return Self::NoRestriction;
        };
        let kind = match a
            .kind
            .as_deref()
            .map(|k| k.trim().to_ascii_lowercase())
            .as_deref()
        {
            None | Some("") | Some("full_record") | Some("none") => return Self::NoRestriction,
            Some("surgery_window") | Some("procedure_window") => WindowKind::Procedure,
            Some("anesthesia_window") | Some("treatment_window") => WindowKind::Treatment,
            Some("custom_window") | Some("custom") => WindowKind::Custom,
            Some(other) => {
                tracing::warn!(temporal_type = %other, "unknown temporal alignment type; using full record");
                return Self::NoRestriction;
            }
        };
        let defaults = kind.default_columns();
        let start = a
            .start_column
            .clone()
            .or_else(|| defaults.map(|d| d.0.to_string()));
        let end = a
            .end_column
            .clone()
            .or_else(|| defaults.map(|d| d.1.to_string()));
        match (start, end) {
            (Some(start_column), Some(end_column)) => Self::Bounded {
                kind,
                start_column,
                end_column,
                margin_seconds: a.margin_seconds.unwrap_or(0.0).max(0.0),
            },
            _ => {
                tracing::warn!("custom temporal window without start/end columns; using full record");
                Self::NoRestriction
            }
        }
    }

    pub fn is_restricted(&self) -> bool {
        !matches!(self, Self::NoRestriction)
    }
}

// ------------------ cohort filters ------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FilterOp {
    Eq,
    NotEq,
    Gt,
    GtEq,
    Lt,
    LtEq,
    /// SQL LIKE pattern (`%`, `_`), case-sensitive.
    Like,
    /// Case-insensitive substring match.
    Contains,
    In,
    NotIn,
    /// Inclusive `[low, high]`.
    Between,
}

impl FilterOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "=" | "==" | "eq" => Some(Self::Eq),
            "!=" | "<>" | "ne" => Some(Self::NotEq),
            ">" | "gt" => Some(Self::Gt),
            ">=" | "gte" | "ge" => Some(Self::GtEq),
            "<" | "lt" => Some(Self::Lt),
            "<=" | "lte" | "le" => Some(Self::LtEq),
            "like" => Some(Self::Like),
            "contains" | "ilike" => Some(Self::Contains),
            "in" => Some(Self::In),
            "not_in" | "not in" | "nin" => Some(Self::NotIn),
            "between" | "range" => Some(Self::Between),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FilterValue {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    List(Vec<FilterValue>),
    Null,
}

impl FilterValue {
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::Text(s.clone()),
            Value::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            Value::Object(_) => Self::Text(v.to_string()),
        }
    }

    /// Numeric view; numeric-looking text counts.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            Self::Int(i) => i.to_string(),
            Self::Float(f) if f.fract() == 0.0 && f.is_finite() && f.abs() < 9.0e15 => {
                format!("{}", *f as i64)
            }
            Self::Float(f) => f.to_string(),
            Self::Text(s) => s.clone(),
            Self::Bool(b) => b.to_string(),
            Self::List(items) => items
                .iter()
                .map(Self::as_text)
                .collect::<Vec<_>>()
                .join(","),
            Self::Null => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortFilter {
    pub column: String,
    pub op: FilterOp,
    pub value: FilterValue,
}

impl CohortFilter {
    pub fn from_spec(spec: &FilterSpec) -> Result<Self> {
        let op = FilterOp::parse(&spec.operator).ok_or_else(|| {
            MedError::Planning(format!("unsupported filter operator '{}'", spec.operator))
        })?;
        let value = FilterValue::from_json(&spec.value);
        let value = match (op, value) {
            (FilterOp::In | FilterOp::NotIn, FilterValue::List(items)) => FilterValue::List(items),
            (FilterOp::In | FilterOp::NotIn, scalar) => FilterValue::List(vec![scalar]),
            (FilterOp::Between, FilterValue::List(items)) if items.len() == 2 => {
                FilterValue::List(items)
            }
            (FilterOp::Between, _) => {
                return Err(MedError::Planning(format!(
                    "'between' filter on '{}' needs a [low, high] pair",
                    spec.column
                )));
            }
            (FilterOp::Like | FilterOp::Contains, FilterValue::List(_)) => {
                return Err(MedError::Planning(format!(
                    "pattern filter on '{}' needs a scalar value",
                    spec.column
                )));
            }
            (_, FilterValue::List(_)) => {
                return Err(MedError::Planning(format!(
                    "comparison filter on '{}' needs a scalar value",
                    spec.column
                )));
            }
            (_, v) => v,
        };
        Ok(Self {
            column: spec.column.clone(),
            op,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(column: &str, op: &str, value: Value) -> FilterSpec {
        FilterSpec {
            column: column.to_string(),
            operator: op.to_string(),
            value,
        }
    }

    #[test]
    fn filter_operator_aliases() {
        assert_eq!(FilterOp::parse("=="), Some(FilterOp::Eq));
        assert_eq!(FilterOp::parse(" GTE "), Some(FilterOp::GtEq));
        assert_eq!(FilterOp::parse("not_in"), Some(FilterOp::NotIn));
        assert_eq!(FilterOp::parse("~"), None);
    }

    #[test]
    fn in_wraps_scalar_and_between_requires_pair() {
        let f = CohortFilter::from_spec(&spec("dept", "in", json!("GS"))).expect("in");
        assert_eq!(f.value, FilterValue::List(vec![FilterValue::Text("GS".into())]));

        assert!(CohortFilter::from_spec(&spec("age", "between", json!([1]))).is_err());
        assert!(CohortFilter::from_spec(&spec("age", ">", json!([1, 2]))).is_err());
        let f = CohortFilter::from_spec(&spec("age", "between", json!([18, 65]))).expect("between");
        assert_eq!(f.op, FilterOp::Between);
    }

    #[test]
    fn temporal_defaults_and_overrides() {
        let w = TemporalWindow::from_alignment(Some(&TemporalAlignment {
            kind: Some("surgery_window".into()),
            margin_seconds: Some(60.0),
            ..TemporalAlignment::default()
        }));
        assert_eq!(
            w,
            TemporalWindow::Bounded {
                kind: WindowKind::Procedure,
                start_column: "opstart".into(),
                end_column: "opend".into(),
                margin_seconds: 60.0,
            }
        );

        let w = TemporalWindow::from_alignment(Some(&TemporalAlignment {
            kind: Some("treatment_window".into()),
            start_column: Some("drug_start".into()),
            ..TemporalAlignment::default()
        }));
        assert!(matches!(
            w,
            TemporalWindow::Bounded { ref start_column, ref end_column, .. }
                if start_column == "drug_start" && end_column == "aneend"
        ));
    }

    #[test]
    fn incomplete_or_unknown_windows_are_unrestricted() {
        let custom = TemporalAlignment {
            kind: Some("custom_window".into()),
            start_column: Some("a".into()),
            ..TemporalAlignment::default()
        };
        assert_eq!(
            TemporalWindow::from_alignment(Some(&custom)),
            TemporalWindow::NoRestriction
        );
        let full = TemporalAlignment {
            kind: Some("full_record".into()),
            ..TemporalAlignment::default()
        };
        assert!(!TemporalWindow::from_alignment(Some(&full)).is_restricted());
        assert!(!TemporalWindow::from_alignment(None).is_restricted());
    }

    #[test]
    fn integral_float_text_has_no_fraction() {
        assert_eq!(FilterValue::Float(12.0).as_text(), "12");
        assert_eq!(FilterValue::Float(1.5).as_text(), "1.5");
        assert_eq!(FilterValue::Float(1e20).as_text(), 1e20_f64.to_string());
        assert_eq!(FilterValue::Float(-4.0e15).as_text(), "-4000000000000000");
        assert_eq!(FilterValue::Text(" 3.5 ".into()).as_f64(), Some(3.5));
    }
}
