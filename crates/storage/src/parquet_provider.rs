use std::fs::File;
use std::path::Path;

use arrow::compute::concat_batches;
use arrow::record_batch::{RecordBatch, RecordBatchReader};
use medctx_common::{MedError, Result};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ProjectionMask;

/// Read a local parquet file into one batch.
///
/// `columns` restricts decoding to the named root columns that exist in the
/// file; names missing from the file are ignored.
pub fn read_parquet(path: &Path, columns: Option<&[String]>) -> Result<RecordBatch> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| MedError::Execution(format!("parquet reader build failed: {e}")))?;

    let builder = match columns {
        Some(cols) => {
            let indices = builder
                .schema()
                .fields()
                .iter()
                .enumerate()
                .filter(|(_, f)| cols.iter().any(|c| c == f.name()))
                .map(|(i, _)| i)
                .collect::<Vec<_>>();
            let mask = ProjectionMask::roots(builder.parquet_schema(), indices);
            builder.with_projection(mask)
        }
        None => builder,
    };

    let reader = builder
        .build()
        .map_err(|e| MedError::Execution(format!("parquet reader open failed: {e}")))?;
    let schema = reader.schema();
    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| MedError::Execution(format!("parquet decode failed: {e}")))?;
    concat_batches(&schema, &batches)
        .map_err(|e| MedError::Execution(format!("parquet concat failed: {e}")))
}
