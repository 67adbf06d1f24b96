//! Key-based join of the cohort table with concatenated signal rows.
//!
//! The build side is the right input; keys on both sides are compared in
//! their canonical text form (see [`crate::keys`]). Null keys never match.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, StringArray, UInt32Array};
use arrow::compute::take;
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema};
use medctx_common::{MedError, Result};
use medctx_planner::JoinKind;
use tracing::debug;

use crate::keys::canonical_keys;

/// Join `left` and `right` on `left_key = right_key`.
///
/// The output starts with a single Utf8 key column named `left_key`,
/// followed by the remaining left columns and then the remaining right
/// columns. Right column names already present on the left get `suffix`.
pub fn hash_join(
    left: &RecordBatch,
    right: &RecordBatch,
    left_key: &str,
    right_key: &str,
    kind: JoinKind,
    suffix: &str,
) -> Result<RecordBatch> {
    let left_idx = key_index(left, left_key, "left")?;
    let right_idx = key_index(right, right_key, "right")?;
    let left_keys = canonical_keys(left.column(left_idx))?;
    let right_keys = canonical_keys(right.column(right_idx))?;

    let mut build: HashMap<&str, Vec<u32>> = HashMap::new();
    for (row, key) in right_keys.iter().enumerate() {
        if let Some(k) = key {
            build.entry(k.as_str()).or_default().push(row as u32);
        }
    }

    let mut left_take: Vec<Option<u32>> = Vec::new();
    let mut right_take: Vec<Option<u32>> = Vec::new();
    let mut matched_right = vec![false; right.num_rows()];
    for (row, key) in left_keys.iter().enumerate() {
        let hits = key.as_deref().and_then(|k| build.get(k));
        match hits {
            Some(rows) => {
                for &r in rows {
                    left_take.push(Some(row as u32));
                    right_take.push(Some(r));
                    matched_right[r as usize] = true;
                }
            }
            None if matches!(kind, JoinKind::Left | JoinKind::Full) => {
                left_take.push(Some(row as u32));
                right_take.push(None);
            }
            None => {}
        }
    }
    if matches!(kind, JoinKind::Right | JoinKind::Full) {
        for (r, matched) in matched_right.iter().enumerate() {
            if !matched {
                left_take.push(None);
                right_take.push(Some(r as u32));
            }
        }
    }
    debug!(
        left_rows = left.num_rows(),
        right_rows = right.num_rows(),
        output_rows = left_take.len(),
        kind = ?kind,
        "hash join"
    );

    let left_take = UInt32Array::from(left_take);
    let right_take = UInt32Array::from(right_take);

    let key_values: StringArray = (0..left_take.len())
        .map(|i| {
            let from_left = (!left_take.is_null(i))
                .then(|| left_keys[left_take.value(i) as usize].clone())
                .flatten();
            from_left.or_else(|| {
                (!right_take.is_null(i))
                    .then(|| right_keys[right_take.value(i) as usize].clone())
                    .flatten()
            })
        })
        .collect();

    let left_nullable = matches!(kind, JoinKind::Right | JoinKind::Full);
    let right_nullable = matches!(kind, JoinKind::Left | JoinKind::Full);

    let mut fields = vec![Field::new(left_key, DataType::Utf8, true)];
    let mut columns: Vec<ArrayRef> = vec![Arc::new(key_values)];
    let mut taken: HashSet<String> = HashSet::from([left_key.to_string()]);

    for (i, field) in left.schema().fields().iter().enumerate() {
        if i == left_idx {
            continue;
        }
        columns.push(take_column(left.column(i), &left_take)?);
        fields.push(field.as_ref().clone().with_nullable(field.is_nullable() || left_nullable));
        taken.insert(field.name().clone());
    }
    for (i, field) in right.schema().fields().iter().enumerate() {
        if i == right_idx {
            continue;
        }
        let mut name = field.name().clone();
        if taken.contains(&name) {
            name = format!("{name}{suffix}");
        }
        columns.push(take_column(right.column(i), &right_take)?);
        fields.push(
            Field::new(&name, field.data_type().clone(), field.is_nullable() || right_nullable),
        );
        taken.insert(name);
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
        .map_err(|e| MedError::Execution(format!("failed to assemble join output: {e}")))
}

fn key_index(batch: &RecordBatch, key: &str, side: &str) -> Result<usize> {
    batch.schema().index_of(key).map_err(|_| {
        MedError::Execution(format!("{side} join key '{key}' not found in input"))
    })
}

fn take_column(col: &ArrayRef, indices: &UInt32Array) -> Result<ArrayRef> {
    take(col.as_ref(), indices, None)
        .map_err(|e| MedError::Execution(format!("join take failed: {e}")))
}
