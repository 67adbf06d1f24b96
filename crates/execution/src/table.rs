//! Small table helpers shared by the data context.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arrow::array::{new_null_array, Array, ArrayRef, BooleanArray, StringArray};
use arrow::compute::{cast, concat_batches, filter_record_batch};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use medctx_common::{MedError, Result};
use tracing::warn;

use crate::keys::{canonical_key_text, canonical_keys};

/// The "no data" value: zero rows and zero columns.
pub fn empty_table() -> RecordBatch {
    RecordBatch::new_empty(Arc::new(Schema::empty()))
}

/// Stack per-entity tables into one, prefixed with an `entity_col` Utf8 column.
///
/// The output schema is the union of all input columns in first-seen order;
/// entities lacking a column get nulls. A column whose type differs across
/// entities is cast to the first type seen, and an entity whose column
/// cannot be cast gets nulls for it.
pub fn concat_with_entity_column(
    entity_col: &str,
    parts: &[(String, RecordBatch)],
) -> Result<RecordBatch> {
    let parts: Vec<_> = parts.iter().filter(|(_, b)| b.num_rows() > 0).collect();
    if parts.is_empty() {
        return Ok(empty_table());
    }

    let mut fields = vec![Field::new(entity_col, DataType::Utf8, false)];
    let mut seen: HashMap<String, usize> = HashMap::new();
    for (_, batch) in &parts {
        for f in batch.schema().fields() {
            if f.name() == entity_col || seen.contains_key(f.name()) {
                continue;
            }
            seen.insert(f.name().clone(), fields.len());
            fields.push(Field::new(f.name(), f.data_type().clone(), true));
        }
    }
    let schema: SchemaRef = Arc::new(Schema::new(fields));

    let mut aligned = Vec::with_capacity(parts.len());
    for (entity, batch) in &parts {
        let rows = batch.num_rows();
        let mut columns: Vec<ArrayRef> =
            vec![Arc::new(StringArray::from(vec![entity.as_str(); rows]))];
        for field in schema.fields().iter().skip(1) {
            let col = match batch.column_by_name(field.name()) {
                None => new_null_array(field.data_type(), rows),
                Some(c) if c.data_type() == field.data_type() => c.clone(),
                Some(c) => match cast(c, field.data_type()) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(
                            entity = %entity,
                            column = %field.name(),
                            error = %e,
                            "column type mismatch across entities; filling nulls"
                        );
                        new_null_array(field.data_type(), rows)
                    }
                },
            };
            columns.push(col);
        }
        aligned.push(
            RecordBatch::try_new(schema.clone(), columns)
                .map_err(|e| MedError::Execution(format!("failed to align entity {entity}: {e}")))?,
        );
    }
    concat_batches(&schema, &aligned)
        .map_err(|e| MedError::Execution(format!("failed to concatenate entity tables: {e}")))
}

/// Rows whose `key_col` value (canonical text) is in `keys`.
pub fn rows_matching_keys(
    batch: &RecordBatch,
    key_col: &str,
    keys: &HashSet<String>,
) -> Result<RecordBatch> {
    let col = column(batch, key_col)?;
    let mask: BooleanArray = canonical_keys(col)?
        .into_iter()
        .map(|k| Some(k.is_some_and(|k| keys.contains(&k))))
        .collect();
    filter_record_batch(batch, &mask)
        .map_err(|e| MedError::Execution(format!("key filter failed: {e}")))
}

/// The first row whose key equals `entity`, as a one-row batch.
pub fn find_entity_row(
    batch: &RecordBatch,
    key_col: &str,
    entity: &str,
) -> Result<Option<RecordBatch>> {
    let col = column(batch, key_col)?;
    let wanted = canonical_key_text(entity);
    Ok(canonical_keys(col)?
        .iter()
        .position(|k| k.as_deref() == Some(wanted.as_str()))
        .map(|i| batch.slice(i, 1)))
}

/// Distinct canonical keys in column order.
pub fn distinct_keys(batch: &RecordBatch, key_col: &str) -> Result<Vec<String>> {
    let col = column(batch, key_col)?;
    let mut seen = HashSet::new();
    Ok(canonical_keys(col)?
        .into_iter()
        .flatten()
        .filter(|k| seen.insert(k.clone()))
        .collect())
}

/// Select `columns` that exist in `batch`. With `keep_key`, that column is
/// placed first even when not requested. Unknown names are ignored.
pub fn project_columns(
    batch: &RecordBatch,
    columns: &[String],
    keep_key: Option<&str>,
) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut indices = Vec::new();
    if let Some(key) = keep_key {
        if let Ok(i) = schema.index_of(key) {
            indices.push(i);
        }
    }
    for name in columns {
        match schema.index_of(name) {
            Ok(i) if !indices.contains(&i) => indices.push(i),
            Ok(_) => {}
            Err(_) => warn!(column = %name, "requested column not in table"),
        }
    }
    batch
        .project(&indices)
        .map_err(|e| MedError::Execution(format!("projection failed: {e}")))
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| MedError::Execution(format!("column '{name}' not found")))
}
