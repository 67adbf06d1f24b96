//! Cohort filter evaluation.
//!
//! Filters run in plan order; each one drops non-matching rows before the
//! next is evaluated (implicit AND). Rows whose predicate evaluates to null
//! are dropped.

use arrow::array::{Array, ArrayRef, BooleanArray, Datum, Float64Array, StringArray};
use arrow::compute::kernels::cmp::{eq, gt, gt_eq, lt, lt_eq, neq};
use arrow::compute::kernels::comparison::like;
use arrow::compute::{and_kleene, cast, filter_record_batch, not};
use arrow::record_batch::RecordBatch;
use arrow_schema::DataType;
use medctx_common::{MedError, Result};
use medctx_planner::{CohortFilter, FilterOp, FilterValue};
use tracing::warn;

/// Apply filters in order. A filter that cannot be evaluated (unknown
/// column, incompatible value) is skipped with a warning.
pub fn apply_filters(batch: &RecordBatch, filters: &[CohortFilter]) -> RecordBatch {
    let mut current = batch.clone();
    for f in filters {
        let mask = match evaluate_filter(&current, f) {
            Ok(mask) => mask,
            Err(e) => {
                warn!(column = %f.column, op = ?f.op, error = %e, "skipping cohort filter");
                continue;
            }
        };
        match filter_record_batch(&current, &mask) {
            Ok(next) => current = next,
            Err(e) => warn!(column = %f.column, error = %e, "cohort filter kernel failed"),
        }
    }
    current
}

/// Row mask for a single filter.
pub fn evaluate_filter(batch: &RecordBatch, f: &CohortFilter) -> Result<BooleanArray> {
    let idx = batch
        .schema()
        .index_of(&f.column)
        .map_err(|_| MedError::Execution(format!("unknown cohort column: {}", f.column)))?;
    let col = batch.column(idx);

    match f.op {
        FilterOp::Eq
        | FilterOp::NotEq
        | FilterOp::Gt
        | FilterOp::GtEq
        | FilterOp::Lt
        | FilterOp::LtEq => compare(col, f.op, &f.value),
        FilterOp::Like => {
            let text = as_utf8(col)?;
            let pattern = StringArray::new_scalar(f.value.as_text());
            like(&text, &pattern).map_err(|e| MedError::Execution(format!("like kernel failed: {e}")))
        }
        FilterOp::Contains => contains_ignore_case(col, &f.value.as_text()),
        FilterOp::In => membership(col, list_items(&f.value)),
        FilterOp::NotIn => {
            let m = membership(col, list_items(&f.value))?;
            not(&m).map_err(|e| MedError::Execution(format!("not kernel failed: {e}")))
        }
        FilterOp::Between => {
            let items = list_items(&f.value);
            let [lo, hi] = items else {
                return Err(MedError::Execution(format!(
                    "between on '{}' needs exactly two bounds",
                    f.column
                )));
            };
            let lower = compare(col, FilterOp::GtEq, lo)?;
            let upper = compare(col, FilterOp::LtEq, hi)?;
            and_kleene(&lower, &upper)
                .map_err(|e| MedError::Execution(format!("and kernel failed: {e}")))
        }
    }
}

fn list_items(v: &FilterValue) -> &[FilterValue] {
    match v {
        FilterValue::List(items) => items,
        other => std::slice::from_ref(other),
    }
}

/// Numeric comparison when both sides are numeric, text comparison otherwise.
fn compare(col: &ArrayRef, op: FilterOp, value: &FilterValue) -> Result<BooleanArray> {
    if let FilterValue::Null = value {
        return Ok(BooleanArray::from(vec![None; col.len()]));
    }
    if col.data_type().is_numeric() {
        if let Some(v) = value.as_f64() {
            let lhs = cast(col, &DataType::Float64)
                .map_err(|e| MedError::Execution(format!("cast to Float64 failed: {e}")))?;
            return cmp_op(op, &lhs, &Float64Array::new_scalar(v));
        }
    }
    if let (DataType::Boolean, FilterValue::Bool(b)) = (col.data_type(), value) {
        return cmp_op(op, col, &BooleanArray::new_scalar(*b));
    }
    let lhs = as_utf8(col)?;
    cmp_op(op, &lhs, &StringArray::new_scalar(value.as_text()))
}

fn cmp_op(op: FilterOp, l: &dyn Datum, r: &dyn Datum) -> Result<BooleanArray> {
    match op {
        FilterOp::Eq => eq(l, r),
        FilterOp::NotEq => neq(l, r),
        FilterOp::Gt => gt(l, r),
        FilterOp::GtEq => gt_eq(l, r),
        FilterOp::Lt => lt(l, r),
        FilterOp::LtEq => lt_eq(l, r),
        other => {
            return Err(MedError::Execution(format!(
                "{other:?} is not a comparison operator"
            )));
        }
    }
    .map_err(|e| MedError::Execution(format!("cmp kernel failed: {e}")))
}

fn as_utf8(col: &ArrayRef) -> Result<ArrayRef> {
    cast(col, &DataType::Utf8)
        .map_err(|e| MedError::Execution(format!("cast to Utf8 failed: {e}")))
}

fn contains_ignore_case(col: &ArrayRef, needle: &str) -> Result<BooleanArray> {
    let text = as_utf8(col)?;
    let text = text
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| MedError::Execution("expected Utf8 array".to_string()))?;
    let needle = needle.to_lowercase();
    Ok(text
        .iter()
        .map(|v| v.map(|s| s.to_lowercase().contains(&needle)))
        .collect())
}

/// Set membership; numeric when the column and every item are numeric.
fn membership(col: &ArrayRef, items: &[FilterValue]) -> Result<BooleanArray> {
    let numeric_items = items.iter().map(FilterValue::as_f64).collect::<Option<Vec<_>>>();
    if let (true, Some(wanted)) = (col.data_type().is_numeric(), numeric_items) {
        let f = cast(col, &DataType::Float64)
            .map_err(|e| MedError::Execution(format!("cast to Float64 failed: {e}")))?;
        let f = f
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| MedError::Execution("expected Float64 array".to_string()))?;
        return Ok(f.iter().map(|v| v.map(|x| wanted.contains(&x))).collect());
    }

    let wanted = items.iter().map(FilterValue::as_text).collect::<Vec<_>>();
    let text = as_utf8(col)?;
    let text = text
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| MedError::Execution("expected Utf8 array".to_string()))?;
    Ok(text
        .iter()
        .map(|v| v.map(|s| wanted.iter().any(|w| w == s)))
        .collect())
}
