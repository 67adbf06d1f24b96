#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema};
use medctx_client::{CacheStore, ContextConfig, DataContext};
use medctx_common::{MedError, Result};
use medctx_storage::{
    Catalog, FileSeriesDecoder, FileTableDecoder, SeriesDecoder, SignalFileDef, SignalGroupDef,
    TableDef, TabularDecoder,
};
use parquet::arrow::ArrowWriter;
use serde_json::{json, Value};

pub const COHORT_ID: &str = "clinical";
pub const GROUP_ID: &str = "vitals";

pub fn unique_path(prefix: &str, ext: &str) -> PathBuf {
    static SEQ: AtomicUsize = AtomicUsize::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_nanos();
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("{prefix}_{nanos}_{seq}.{ext}"))
}

pub fn unique_dir(prefix: &str) -> PathBuf {
    let dir = unique_path(prefix, "d");
    std::fs::create_dir_all(&dir).expect("create fixture dir");
    dir
}

pub fn write_parquet(path: &Path, schema: Arc<Schema>, cols: Vec<ArrayRef>) {
    let batch = RecordBatch::try_new(schema.clone(), cols).expect("build batch");
    let file = File::create(path).expect("create parquet");
    let mut writer = ArrowWriter::try_new(file, schema, None).expect("writer");
    writer.write(&batch).expect("write");
    writer.close().expect("close");
}

/// Five cases; departments GS, OS, GS, TS, NS. Case 2 has no `opstart`.
pub fn write_standard_cohort(path: &Path) {
    let schema = Arc::new(Schema::new(vec![
        Field::new("caseid", DataType::Int64, false),
        Field::new("age", DataType::Int64, false),
        Field::new("department", DataType::Utf8, false),
        Field::new("opstart", DataType::Int64, true),
        Field::new("opend", DataType::Int64, true),
    ]));
    write_parquet(
        path,
        schema,
        vec![
            Arc::new(Int64Array::from(vec![1_i64, 2, 3, 4, 5])),
            Arc::new(Int64Array::from(vec![55_i64, 65, 70, 45, 80])),
            Arc::new(StringArray::from(vec!["GS", "OS", "GS", "TS", "NS"])),
            Arc::new(Int64Array::from(vec![
                Some(100_i64),
                None,
                Some(100),
                Some(100),
                Some(100),
            ])),
            Arc::new(Int64Array::from(vec![Some(200_i64); 5])),
        ],
    );
}

/// `Time`, `HR`, `SBP` columns, one row per time point.
pub fn write_series(path: &Path, times: &[f64]) {
    let schema = Arc::new(Schema::new(vec![
        Field::new("Time", DataType::Float64, false),
        Field::new("HR", DataType::Float64, true),
        Field::new("SBP", DataType::Float64, true),
    ]));
    let hr: Vec<f64> = (0..times.len()).map(|i| 60.0 + i as f64).collect();
    write_parquet(
        path,
        schema,
        vec![
            Arc::new(Float64Array::from(times.to_vec())),
            Arc::new(Float64Array::from(hr)),
            Arc::new(Float64Array::from(vec![120.0; times.len()])),
        ],
    );
}

pub struct Fixture {
    pub dir: PathBuf,
    pub catalog: Arc<Catalog>,
}

/// Standard cohort plus one series file per id in `series_ids`.
pub fn fixture(prefix: &str, series_ids: &[&str], times: &[f64]) -> Fixture {
    let dir = unique_dir(prefix);
    let cohort = dir.join("clinical.parquet");
    write_standard_cohort(&cohort);
    fixture_with_cohort(dir, &cohort, series_ids, times)
}

pub fn fixture_with_cohort(
    dir: PathBuf,
    cohort: &Path,
    series_ids: &[&str],
    times: &[f64],
) -> Fixture {
    let paths = series_ids
        .iter()
        .map(|id| {
            let path = dir.join(format!("{id}.parquet"));
            write_series(&path, times);
            path
        })
        .collect::<Vec<_>>();
    let catalog = catalog_for(cohort, &paths);
    Fixture { dir, catalog }
}

/// Standard cohort plus one series file for `entity_id` with a caller-chosen
/// schema.
pub fn fixture_with_custom_series(
    prefix: &str,
    entity_id: &str,
    schema: Arc<Schema>,
    cols: Vec<ArrayRef>,
) -> Fixture {
    let dir = unique_dir(prefix);
    let cohort = dir.join("clinical.parquet");
    write_standard_cohort(&cohort);
    let series = dir.join(format!("{entity_id}.parquet"));
    write_parquet(&series, schema, cols);
    let catalog = catalog_for(&cohort, &[series]);
    Fixture { dir, catalog }
}

fn catalog_for(cohort: &Path, series: &[PathBuf]) -> Arc<Catalog> {
    let mut group = SignalGroupDef {
        name: GROUP_ID.to_string(),
        format: "parquet".to_string(),
        ..Default::default()
    };
    for path in series {
        group.files.push(SignalFileDef {
            uri: path.display().to_string(),
            ..Default::default()
        });
    }
    let mut catalog = Catalog::new();
    catalog.register_table(TableDef {
        name: COHORT_ID.to_string(),
        uri: cohort.display().to_string(),
        format: "parquet".to_string(),
        options: HashMap::new(),
    });
    catalog.register_group(group);
    Arc::new(catalog)
}

pub fn plan(filters: Value, params: &[&str], temporal: Value) -> Value {
    json!({
        "execution_plan": {
            "cohort_source": {
                "file_id": COHORT_ID,
                "entity_identifier": "caseid",
                "filters": filters
            },
            "signal_source": {
                "group_id": GROUP_ID,
                "entity_identifier_key": "caseid",
                "parameters": [{"term": "vitals", "param_keys": params}],
                "temporal_alignment": temporal
            },
            "join_specification": {"cohort_key": "caseid", "signal_key": "caseid", "type": "inner"}
        }
    })
}

pub fn full_record() -> Value {
    json!({"type": "full_record"})
}

/// Context with a private cache and the given series decoder.
pub fn context(fx: &Fixture, series: Arc<dyn SeriesDecoder>) -> DataContext {
    context_with(fx, series, ContextConfig::default(), Arc::new(CacheStore::new()))
}

pub fn context_with(
    fx: &Fixture,
    series: Arc<dyn SeriesDecoder>,
    config: ContextConfig,
    cache: Arc<CacheStore>,
) -> DataContext {
    DataContext::new(config, fx.catalog.clone())
        .with_cache(cache)
        .with_decoders(Arc::new(FileTableDecoder), series)
}

/// File-backed series decoder that counts calls per file and can fail the
/// first `n` of them.
#[derive(Default)]
pub struct CountingSeriesDecoder {
    calls: AtomicUsize,
    per_file: Mutex<HashMap<PathBuf, usize>>,
    fail_remaining: AtomicUsize,
}

impl CountingSeriesDecoder {
    pub fn failing_first(n: usize) -> Self {
        Self {
            fail_remaining: AtomicUsize::new(n),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, entity_id: &str) -> usize {
        self.per_file
            .lock()
            .expect("counter lock poisoned")
            .iter()
            .filter(|(p, _)| p.file_stem().and_then(|s| s.to_str()) == Some(entity_id))
            .map(|(_, n)| *n)
            .sum()
    }
}

impl SeriesDecoder for CountingSeriesDecoder {
    fn load(&self, path: &Path, requested_columns: &[String]) -> Result<RecordBatch> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .per_file
            .lock()
            .expect("counter lock poisoned")
            .entry(path.to_path_buf())
            .or_default() += 1;
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(MedError::Execution("injected decode failure".to_string()));
        }
        FileSeriesDecoder.load(path, requested_columns)
    }
}

#[derive(Default)]
pub struct CountingTableDecoder {
    calls: AtomicUsize,
}

impl CountingTableDecoder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TabularDecoder for CountingTableDecoder {
    fn load(&self, path: &Path) -> Result<RecordBatch> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        FileTableDecoder.load(path)
    }
}

pub fn column_names(batch: &RecordBatch) -> Vec<String> {
    batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect()
}

pub fn f64_column(batch: &RecordBatch, name: &str) -> Vec<f64> {
    batch
        .column_by_name(name)
        .expect("column")
        .as_any()
        .downcast_ref::<Float64Array>()
        .expect("float64 column")
        .values()
        .to_vec()
}
