//! Canonical text form for entity identifiers.
//!
//! Cohort tables often carry integer ids while signal ids come from file
//! names, so both sides are compared as text. Integral floats render without
//! a fraction (`12.0` -> `"12"`) and text is trimmed. This is a best-effort
//! normalization: zero-padded ids (`"0012"`) still do not match `12`.

use arrow::array::{Array, ArrayRef, Float64Array, StringArray};
use arrow::compute::cast;
use arrow_schema::DataType;
use medctx_common::{MedError, Result};

/// One canonical key per row, `None` for nulls and blank text.
pub fn canonical_keys(array: &ArrayRef) -> Result<Vec<Option<String>>> {
    match array.data_type() {
        DataType::Float16 | DataType::Float32 | DataType::Float64 => {
            let f = cast(array, &DataType::Float64)
                .map_err(|e| MedError::Execution(format!("key cast to Float64 failed: {e}")))?;
            let f = f
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| MedError::Execution("expected Float64 array".to_string()))?;
            Ok((0..f.len())
                .map(|i| (!f.is_null(i)).then(|| canonical_float(f.value(i))))
                .collect())
        }
        _ => {
            let s = cast(array, &DataType::Utf8)
                .map_err(|e| MedError::Execution(format!("key cast to Utf8 failed: {e}")))?;
            let s = s
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| MedError::Execution("expected Utf8 array".to_string()))?;
            Ok((0..s.len())
                .map(|i| {
                    if s.is_null(i) {
                        return None;
                    }
                    let v = s.value(i).trim();
                    (!v.is_empty()).then(|| v.to_string())
                })
                .collect())
        }
    }
}

pub fn canonical_key_text(raw: &str) -> String {
    raw.trim().to_string()
}

fn canonical_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 9.0e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::Int64Array;

    use super::*;

    #[test]
    fn integer_float_and_text_keys_agree() {
        let ints: ArrayRef = Arc::new(Int64Array::from(vec![Some(12), None]));
        let floats: ArrayRef = Arc::new(Float64Array::from(vec![12.0, 12.5]));
        let text: ArrayRef = Arc::new(StringArray::from(vec![" 12 ", ""]));

        assert_eq!(canonical_keys(&ints).expect("ints"), vec![Some("12".into()), None]);
        assert_eq!(
            canonical_keys(&floats).expect("floats"),
            vec![Some("12".into()), Some("12.5".into())]
        );
        assert_eq!(canonical_keys(&text).expect("text"), vec![Some("12".into()), None]);
    }

    #[test]
    fn zero_padding_is_not_normalized() {
        let text: ArrayRef = Arc::new(StringArray::from(vec!["0012"]));
        assert_eq!(canonical_keys(&text).expect("text"), vec![Some("0012".into())]);
    }
}
