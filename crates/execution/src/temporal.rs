//! Temporal window clipping of per-entity series.
//!
//! Source files do not share a schema, so the time axis is found by an
//! ordered list of [`TimeAxisRule`]s: exact conventional names first, then
//! any temporal-typed column, then a name containing a temporal keyword.
//! Every failure to establish a window (missing boundary row, null
//! boundary, no time axis) returns the series unchanged.

use arrow::array::{Array, ArrayRef, BooleanArray, Float64Array};
use arrow::compute::{cast, filter_record_batch};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Schema, TimeUnit};
use medctx_common::{MedError, Result};
use medctx_planner::TemporalWindow;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeAxisRule {
    ExactName(String),
    /// Timestamp or date typed column.
    TemporalType,
    /// Case-insensitive substring of the column name.
    NameContains(String),
}

impl TimeAxisRule {
    fn matches(&self, name: &str, dt: &DataType) -> bool {
        match self {
            Self::ExactName(n) => name == n,
            Self::TemporalType => matches!(
                dt,
                DataType::Timestamp(_, _) | DataType::Date32 | DataType::Date64
            ),
            Self::NameContains(k) => name
                .to_ascii_lowercase()
                .contains(&k.to_ascii_lowercase()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimeAxisDetector {
    rules: Vec<TimeAxisRule>,
}

impl Default for TimeAxisDetector {
    fn default() -> Self {
        Self {
            rules: vec![
                TimeAxisRule::ExactName("Time".to_string()),
                TimeAxisRule::ExactName("time".to_string()),
                TimeAxisRule::ExactName("timestamp".to_string()),
                TimeAxisRule::ExactName("datetime".to_string()),
                TimeAxisRule::TemporalType,
                TimeAxisRule::NameContains("time".to_string()),
                TimeAxisRule::NameContains("date".to_string()),
            ],
        }
    }
}

impl TimeAxisDetector {
    pub fn new(rules: Vec<TimeAxisRule>) -> Self {
        Self { rules }
    }

    /// Append a rule at the lowest priority.
    pub fn with_rule(mut self, rule: TimeAxisRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[TimeAxisRule] {
        &self.rules
    }

    /// Index of the time-axis column, first rule with a hit wins.
    pub fn detect(&self, schema: &Schema) -> Option<usize> {
        self.rules.iter().find_map(|rule| {
            schema
                .fields()
                .iter()
                .position(|f| rule.matches(f.name(), f.data_type()))
        })
    }

    pub fn detect_name(&self, schema: &Schema) -> Option<String> {
        self.detect(schema).map(|i| schema.field(i).name().clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TemporalFilter {
    detector: TimeAxisDetector,
}

impl TemporalFilter {
    pub fn new(detector: TimeAxisDetector) -> Self {
        Self { detector }
    }

    pub fn detector(&self) -> &TimeAxisDetector {
        &self.detector
    }

    /// Clip `series` to the window anchored on `boundary_row`.
    ///
    /// The range is inclusive: `[start - margin, end + margin]`.
    pub fn apply(
        &self,
        series: &RecordBatch,
        window: &TemporalWindow,
        boundary_row: Option<&RecordBatch>,
    ) -> RecordBatch {
        let TemporalWindow::Bounded {
            start_column,
            end_column,
            margin_seconds,
            ..
        } = window
        else {
            return series.clone();
        };

        let Some(row) = boundary_row else {
            debug!("no boundary row for entity; window not applied");
            return series.clone();
        };
        let (Some(start), Some(end)) = (
            boundary_seconds(row, start_column),
            boundary_seconds(row, end_column),
        ) else {
            debug!(start = %start_column, end = %end_column, "missing window boundary; window not applied");
            return series.clone();
        };
        let Some(time_idx) = self.detector.detect(&series.schema()) else {
            debug!("series has no time axis; window not applied");
            return series.clone();
        };

        let lo = start - margin_seconds;
        let hi = end + margin_seconds;
        let secs = match time_as_seconds(series.column(time_idx)) {
            Ok(secs) => secs,
            Err(e) => {
                warn!(error = %e, "time axis not convertible to seconds; window not applied");
                return series.clone();
            }
        };
        let mask: BooleanArray = secs
            .iter()
            .map(|t| t.map(|t| t >= lo && t <= hi))
            .collect();
        match filter_record_batch(series, &mask) {
            Ok(out) => out,
            Err(e) => {
                warn!(error = %e, "window filter kernel failed; window not applied");
                series.clone()
            }
        }
    }
}

/// Boundary value of the first row, in seconds; `None` when absent or null.
pub fn boundary_seconds(row: &RecordBatch, column: &str) -> Option<f64> {
    let idx = row.schema().index_of(column).ok()?;
    if row.num_rows() == 0 {
        return None;
    }
    let col = row.column(idx).slice(0, 1);
    if col.is_null(0) {
        return None;
    }
    let secs = time_as_seconds(&col).ok()?;
    (!secs.is_null(0))
        .then(|| secs.value(0))
        .filter(|v| v.is_finite())
}

/// Convert a time-like column to seconds on a common numeric base.
///
/// Numbers are taken as seconds, timestamps and dates become seconds since
/// the epoch, text is parsed as a number first and as a timestamp otherwise.
pub fn time_as_seconds(col: &ArrayRef) -> Result<Float64Array> {
    let scaled = match col.data_type() {
        DataType::Timestamp(unit, _) => {
            let divisor = match unit {
                TimeUnit::Second => 1.0,
                TimeUnit::Millisecond => 1e3,
                TimeUnit::Microsecond => 1e6,
                TimeUnit::Nanosecond => 1e9,
            };
            scale(&to_f64(&cast_to(col, &DataType::Int64)?)?, 1.0 / divisor)
        }
        DataType::Date32 => scale(&to_f64(&cast_to(col, &DataType::Int32)?)?, 86_400.0),
        DataType::Date64 => scale(&to_f64(&cast_to(col, &DataType::Int64)?)?, 1e-3),
        DataType::Utf8 | DataType::LargeUtf8 => {
            let numeric = to_f64(col)?;
            if numeric.null_count() == col.null_count() {
                return Ok(numeric);
            }
            let ts = cast_to(col, &DataType::Timestamp(TimeUnit::Nanosecond, None))?;
            if ts.null_count() == col.len() {
                return Ok(numeric);
            }
            return time_as_seconds(&ts);
        }
        dt if dt.is_numeric() => to_f64(col)?,
        other => {
            return Err(MedError::Unsupported(format!(
                "time axis of type {other:?} is not convertible to seconds"
            )));
        }
    };
    Ok(scaled)
}

fn cast_to(col: &ArrayRef, dt: &DataType) -> Result<ArrayRef> {
    cast(col, dt).map_err(|e| MedError::Execution(format!("cast to {dt:?} failed: {e}")))
}

fn to_f64(col: &ArrayRef) -> Result<Float64Array> {
    let f = cast_to(col, &DataType::Float64)?;
    f.as_any()
        .downcast_ref::<Float64Array>()
        .cloned()
        .ok_or_else(|| MedError::Execution("expected Float64 array".to_string()))
}

fn scale(a: &Float64Array, factor: f64) -> Float64Array {
    a.iter().map(|v| v.map(|x| x * factor)).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Int64Array, StringArray, TimestampSecondArray};
    use arrow_schema::Field;
    use medctx_planner::WindowKind;

    use super::*;

    fn series(times: Vec<f64>) -> RecordBatch {
        let n = times.len();
        let schema = Arc::new(Schema::new(vec![
            Field::new("Time", DataType::Float64, false),
            Field::new("HR", DataType::Float64, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Float64Array::from(times)),
                Arc::new(Float64Array::from(vec![70.0; n])),
            ],
        )
        .expect("series")
    }

    fn boundary(start: Option<i64>, end: Option<i64>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("opstart", DataType::Int64, true),
            Field::new("opend", DataType::Int64, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![start])),
                Arc::new(Int64Array::from(vec![end])),
            ],
        )
        .expect("boundary")
    }

    fn procedure(margin: f64) -> TemporalWindow {
        TemporalWindow::Bounded {
            kind: WindowKind::Procedure,
            start_column: "opstart".into(),
            end_column: "opend".into(),
            margin_seconds: margin,
        }
    }

    fn times(batch: &RecordBatch) -> Vec<f64> {
        batch
            .column(0)
            .as_any()
            .downcast_ref::<Float64Array>()
            .expect("time")
            .values()
            .to_vec()
    }

    #[test]
    fn window_edges_are_inclusive_with_margin() {
        let s = series(vec![89.0, 90.0, 150.0, 210.0, 211.0]);
        let out = TemporalFilter::default().apply(
            &s,
            &procedure(10.0),
            Some(&boundary(Some(100), Some(200))),
        );
        assert_eq!(times(&out), vec![90.0, 150.0, 210.0]);
    }

    #[test]
    fn null_boundary_fails_open() {
        let s = series(vec![0.0, 500.0, 1000.0]);
        let f = TemporalFilter::default();
        assert_eq!(f.apply(&s, &procedure(0.0), Some(&boundary(None, Some(200)))), s);
        assert_eq!(f.apply(&s, &procedure(0.0), Some(&boundary(Some(1), None))), s);
        assert_eq!(f.apply(&s, &procedure(0.0), None), s);
    }

    #[test]
    fn unrestricted_window_is_identity() {
        let s = series(vec![1.0, 2.0]);
        let out = TemporalFilter::default().apply(
            &s,
            &TemporalWindow::NoRestriction,
            Some(&boundary(Some(5), Some(6))),
        );
        assert_eq!(out, s);
    }

    #[test]
    fn detector_priority_exact_then_type_then_keyword() {
        let d = TimeAxisDetector::default();
        let typed = Schema::new(vec![
            Field::new("elapsed_time", DataType::Float64, false),
            Field::new("ts", DataType::Timestamp(TimeUnit::Second, None), false),
        ]);
        assert_eq!(d.detect_name(&typed).as_deref(), Some("ts"));

        let exact = Schema::new(vec![
            Field::new("ts", DataType::Timestamp(TimeUnit::Second, None), false),
            Field::new("Time", DataType::Float64, false),
        ]);
        assert_eq!(d.detect_name(&exact).as_deref(), Some("Time"));

        let keyword = Schema::new(vec![
            Field::new("HR", DataType::Float64, false),
            Field::new("RecordDate", DataType::Utf8, false),
        ]);
        assert_eq!(d.detect_name(&keyword).as_deref(), Some("RecordDate"));

        let none = Schema::new(vec![Field::new("HR", DataType::Float64, false)]);
        assert_eq!(d.detect(&none), None);

        let extended = TimeAxisDetector::new(vec![]).with_rule(TimeAxisRule::NameContains("Offset".into()));
        let custom = Schema::new(vec![Field::new("sample_offset", DataType::Int64, false)]);
        assert_eq!(extended.detect(&custom), Some(0));
    }

    #[test]
    fn series_without_time_axis_is_unchanged() {
        let schema = Arc::new(Schema::new(vec![Field::new("HR", DataType::Float64, true)]));
        let s = RecordBatch::try_new(schema, vec![Arc::new(Float64Array::from(vec![1.0, 2.0]))])
            .expect("batch");
        let out = TemporalFilter::default().apply(
            &s,
            &procedure(0.0),
            Some(&boundary(Some(0), Some(1))),
        );
        assert_eq!(out, s);
    }

    #[test]
    fn timestamp_boundaries_and_axis_share_epoch_seconds() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("ts", DataType::Timestamp(TimeUnit::Second, None), false),
        ]));
        let s = RecordBatch::try_new(
            schema,
            vec![Arc::new(TimestampSecondArray::from(vec![
                1_700_000_000_i64,
                1_700_000_100,
                1_700_000_200,
            ]))],
        )
        .expect("batch");
        let bschema = Arc::new(Schema::new(vec![
            Field::new("opstart", DataType::Utf8, true),
            Field::new("opend", DataType::Utf8, true),
        ]));
        let b = RecordBatch::try_new(
            bschema,
            vec![
                Arc::new(StringArray::from(vec!["2023-11-14T22:13:20"])),
                Arc::new(StringArray::from(vec!["2023-11-14T22:15:00"])),
            ],
        )
        .expect("boundary");
        let out = TemporalFilter::default().apply(&s, &procedure(0.0), Some(&b));
        assert_eq!(out.num_rows(), 2);
    }
}
