use std::fs::File;
use std::io::Seek;
use std::path::Path;
use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use arrow::record_batch::RecordBatch;
use medctx_common::{MedError, Result};

/// Rows sampled for CSV schema inference.
const INFER_MAX_RECORDS: usize = 1000;

/// Read a headered CSV file into one batch with an inferred schema.
pub fn read_csv(path: &Path) -> Result<RecordBatch> {
    let mut file = File::open(path)?;
    let format = Format::default().with_header(true);
    let (schema, _) = format
        .infer_schema(&mut file, Some(INFER_MAX_RECORDS))
        .map_err(|e| MedError::Execution(format!("csv schema inference failed: {e}")))?;
    file.rewind()?;

    let schema = Arc::new(schema);
    let reader = ReaderBuilder::new(schema.clone())
        .with_header(true)
        .build(file)
        .map_err(|e| MedError::Execution(format!("csv reader open failed: {e}")))?;
    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| MedError::Execution(format!("csv decode failed: {e}")))?;
    concat_batches(&schema, &batches)
        .map_err(|e| MedError::Execution(format!("csv concat failed: {e}")))
}
