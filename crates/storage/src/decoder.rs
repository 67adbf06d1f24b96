use std::path::Path;

use arrow::record_batch::RecordBatch;
use medctx_common::{MedError, Result};

use crate::csv_provider::read_csv;
use crate::parquet_provider::read_parquet;

/// Conventional time-axis column emitted by signal extractors.
pub const TIME_AXIS_COLUMN: &str = "Time";

/// Loads a cohort file into a full table, no column filtering.
pub trait TabularDecoder: Send + Sync {
    fn load(&self, path: &Path) -> Result<RecordBatch>;
}

/// Loads a subset of channels from one per-entity signal file.
///
/// Implementations include the conventional time-axis column when the source
/// has one. An empty `requested_columns` means every column.
pub trait SeriesDecoder: Send + Sync {
    fn load(&self, path: &Path, requested_columns: &[String]) -> Result<RecordBatch>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Parquet,
    Csv,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "parquet" | "pq" => Ok(Self::Parquet),
            "csv" => Ok(Self::Csv),
            other => Err(MedError::Unsupported(format!(
                "no decoder for file extension '{other}' ({})",
                path.display()
            ))),
        }
    }
}

/// Extension-dispatching cohort decoder (parquet, csv).
#[derive(Debug, Default, Clone, Copy)]
pub struct FileTableDecoder;

impl TabularDecoder for FileTableDecoder {
    fn load(&self, path: &Path) -> Result<RecordBatch> {
        match FileFormat::from_path(path)? {
            FileFormat::Parquet => read_parquet(path, None),
            FileFormat::Csv => read_csv(path),
        }
    }
}

/// Extension-dispatching per-entity series decoder (parquet, csv).
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSeriesDecoder;

impl SeriesDecoder for FileSeriesDecoder {
    fn load(&self, path: &Path, requested_columns: &[String]) -> Result<RecordBatch> {
        let wanted = with_time_axis(requested_columns);
        match FileFormat::from_path(path)? {
            FileFormat::Parquet => read_parquet(path, wanted.as_deref()),
            FileFormat::Csv => {
                let full = read_csv(path)?;
                match wanted {
                    Some(cols) => project_existing(&full, &cols),
                    None => Ok(full),
                }
            }
        }
    }
}

fn with_time_axis(requested: &[String]) -> Option<Vec<String>> {
    if requested.is_empty() {
        return None;
    }
    let mut cols = requested.to_vec();
    if !cols.iter().any(|c| c == TIME_AXIS_COLUMN) {
        cols.push(TIME_AXIS_COLUMN.to_string());
    }
    Some(cols)
}

/// Keep the named columns that exist, in schema order.
pub fn project_existing(batch: &RecordBatch, names: &[String]) -> Result<RecordBatch> {
    let indices = batch
        .schema()
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, f)| names.iter().any(|n| n == f.name()))
        .map(|(i, _)| i)
        .collect::<Vec<_>>();
    batch
        .project(&indices)
        .map_err(|e| MedError::Execution(format!("projection failed: {e}")))
}
