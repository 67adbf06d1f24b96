//! The data context: plan-driven access to cohort rows and per-entity series.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use arrow::record_batch::RecordBatch;
use medctx_common::{global_metrics, ContextConfig, MedError, Result};
use medctx_execution::{
    apply_filters, canonical_key_text, concat_with_entity_column, distinct_keys, empty_table,
    find_entity_row, hash_join, project_columns, TemporalFilter, TimeAxisDetector,
};
use medctx_planner::{
    ExecutionPlan, JoinConfig, JoinKind, ParsedPlan, PlanResolver, TemporalWindow,
};
use medctx_storage::{
    CatalogResolver, FileSeriesDecoder, FileTableDecoder, SeriesDecoder, SignalFile,
    TabularDecoder, TIME_AXIS_COLUMN,
};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::batch::CaseBatches;
use crate::cache::{CacheStats, CacheStore, CacheTier};
use crate::params::{ParameterInfo, ParameterRegistry};

struct LoadedPlan {
    plan: ParsedPlan,
    loaded_at: SystemTime,
}

/// Status snapshot for tooling; not used by the context itself.
#[derive(Debug, Clone, Serialize)]
pub struct ContextSummary {
    pub loaded: bool,
    pub loaded_at_unix_secs: Option<u64>,
    pub cohort_id: Option<String>,
    pub cohort_path: Option<String>,
    pub filter_count: usize,
    pub group_id: Option<String>,
    pub signal_files: usize,
    pub param_keys: Vec<String>,
    pub temporal: TemporalWindow,
    pub join: Option<JoinConfig>,
    pub cache: CacheStats,
}

/// Query façade over one parsed plan and a shared [`CacheStore`].
///
/// Every query returns `Err` only when no plan has been loaded (or for an
/// invalid argument). Missing files, decode failures and unmatched keys
/// degrade to empty tables and are reported through logs and cache stats.
pub struct DataContext {
    config: ContextConfig,
    catalog: Arc<dyn CatalogResolver>,
    tables: Arc<dyn TabularDecoder>,
    series: Arc<dyn SeriesDecoder>,
    cache: Arc<CacheStore>,
    params: ParameterRegistry,
    temporal: TemporalFilter,
    state: Option<LoadedPlan>,
    pool: OnceLock<Option<ThreadPool>>,
}

impl DataContext {
    /// File-backed decoders and the process-wide cache.
    pub fn new(config: ContextConfig, catalog: Arc<dyn CatalogResolver>) -> Self {
        Self {
            config,
            catalog,
            tables: Arc::new(FileTableDecoder),
            series: Arc::new(FileSeriesDecoder),
            cache: CacheStore::global(),
            params: ParameterRegistry::builtin(),
            temporal: TemporalFilter::default(),
            state: None,
            pool: OnceLock::new(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<CacheStore>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_decoders(
        mut self,
        tables: Arc<dyn TabularDecoder>,
        series: Arc<dyn SeriesDecoder>,
    ) -> Self {
        self.tables = tables;
        self.series = series;
        self
    }

    pub fn with_parameter_registry(mut self, params: ParameterRegistry) -> Self {
        self.params = params;
        self
    }

    pub fn with_time_axis_detector(mut self, detector: TimeAxisDetector) -> Self {
        self.temporal = TemporalFilter::new(detector);
        self
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn parameters(&self) -> &ParameterRegistry {
        &self.params
    }

    pub fn parsed_plan(&self) -> Option<&ParsedPlan> {
        self.state.as_ref().map(|s| &s.plan)
    }

    pub fn is_loaded(&self) -> bool {
        self.state.is_some()
    }

    /// Resolve `plan` against the catalog and keep the result.
    ///
    /// Replaces any previously loaded plan. Cache contents are untouched.
    pub fn load_from_plan(&mut self, plan: &ExecutionPlan) -> &ParsedPlan {
        let parsed = PlanResolver::new(self.catalog.as_ref())
            .with_default_entity_key(self.config.default_entity_key.clone())
            .parse(plan, true);
        info!(
            cohort = ?parsed.cohort.file_id,
            cohort_resolved = parsed.cohort.path.is_some(),
            filters = parsed.cohort.filters.len(),
            group = ?parsed.signal.group_id,
            signal_files = parsed.signal.files.len(),
            params = parsed.signal.param_keys.len(),
            "execution plan loaded"
        );
        &self
            .state
            .insert(LoadedPlan {
                plan: parsed,
                loaded_at: SystemTime::now(),
            })
            .plan
    }

    pub fn load_from_json(&mut self, value: &Value) -> Result<&ParsedPlan> {
        let plan = ExecutionPlan::from_json(value)?;
        Ok(self.load_from_plan(&plan))
    }

    /// Filtered cohort, optionally projected. The entity column is always kept.
    pub fn get_cohort(&self, columns: Option<&[String]>) -> Result<RecordBatch> {
        let plan = self.loaded("get_cohort")?;
        let cohort = self.filtered_cohort(plan);
        let Some(columns) = columns else {
            return Ok(cohort);
        };
        if cohort.num_columns() == 0 {
            return Ok(cohort);
        }
        let key = plan
            .cohort
            .entity_identifier
            .as_deref()
            .unwrap_or(&plan.join.cohort_key);
        Ok(project_columns(&cohort, columns, Some(key)).unwrap_or_else(|e| {
            warn!(error = %e, "cohort projection failed; returning all columns");
            cohort
        }))
    }

    /// Sorted ids present in both the filtered cohort and the signal file list.
    ///
    /// A plan without a cohort source exposes every signal file.
    pub fn available_entities(&self) -> Result<Vec<String>> {
        let plan = self.loaded("available_entities")?;
        Ok(self.available_for(plan))
    }

    /// One entity's series, or every available entity stacked under an
    /// added id column (named after the signal-side join key).
    pub fn get_signals(
        &self,
        entity_id: Option<&str>,
        param_keys: Option<&[String]>,
        apply_temporal: bool,
    ) -> Result<RecordBatch> {
        let plan = self.loaded("get_signals")?;
        match entity_id {
            Some(id) => {
                let cohort = self.boundary_source(plan, apply_temporal);
                Ok(self.entity_series(plan, id, param_keys, apply_temporal, cohort.as_ref()))
            }
            None => Ok(self.stacked_signals(plan, param_keys, apply_temporal)),
        }
    }

    /// Per-entity series keyed by id. Defaults to the available entities.
    pub fn get_signals_dict(
        &self,
        entity_ids: Option<&[String]>,
        param_keys: Option<&[String]>,
        apply_temporal: bool,
    ) -> Result<BTreeMap<String, RecordBatch>> {
        let plan = self.loaded("get_signals_dict")?;
        let ids = match entity_ids {
            Some(ids) => {
                let mut seen = HashSet::new();
                ids.iter()
                    .map(|id| canonical_key_text(id))
                    .filter(|id| seen.insert(id.clone()))
                    .collect()
            }
            None => self.available_for(plan),
        };
        Ok(self.load_entities(plan, &ids, param_keys, apply_temporal))
    }

    /// Chunks of `batch_size` available entities, loaded one chunk at a time.
    pub fn iter_cases_batch(
        &self,
        batch_size: usize,
        param_keys: Option<&[String]>,
        apply_temporal: bool,
    ) -> Result<CaseBatches<'_>> {
        let plan = self.loaded("iter_cases_batch")?;
        if batch_size == 0 {
            return Err(MedError::InvalidConfig(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        let entities = self.available_for(plan);
        let cohort = self.filtered_cohort(plan);
        debug!(entities = entities.len(), batch_size, "starting case batch iteration");
        Ok(CaseBatches::new(
            self,
            plan,
            entities,
            cohort,
            batch_size,
            param_keys.map(<[String]>::to_vec),
            apply_temporal,
        ))
    }

    /// Join of the filtered cohort and the stacked signals on the plan's
    /// join keys. `None` uses the plan's join kind.
    pub fn get_merged_data(&self, kind: Option<JoinKind>) -> Result<RecordBatch> {
        let plan = self.loaded("get_merged_data")?;
        let kind = kind.unwrap_or(plan.join.kind);
        let cohort = self.filtered_cohort(plan);
        let signals = self.stacked_signals(plan, None, true);

        if signals.num_columns() == 0 {
            return Ok(match kind {
                JoinKind::Left | JoinKind::Full => cohort,
                _ => empty_table(),
            });
        }
        if cohort.num_columns() == 0 {
            return Ok(match kind {
                JoinKind::Right | JoinKind::Full => signals,
                _ => empty_table(),
            });
        }
        match hash_join(
            &cohort,
            &signals,
            &plan.join.cohort_key,
            &plan.join.signal_key,
            kind,
            &self.config.merge_suffix,
        ) {
            Ok(merged) => Ok(merged),
            Err(e) => {
                warn!(
                    cohort_key = %plan.join.cohort_key,
                    signal_key = %plan.join.signal_key,
                    error = %e,
                    "merge failed"
                );
                Ok(empty_table())
            }
        }
    }

    pub fn describe_parameters(&self) -> Result<Vec<ParameterInfo>> {
        let plan = self.loaded("describe_parameters")?;
        Ok(self.params.describe(&plan.signal.param_keys))
    }

    pub fn clear_cache(&self, tier: CacheTier) {
        self.cache.clear(tier);
    }

    pub fn summary(&self) -> ContextSummary {
        let cache = self.cache.stats();
        let Some(state) = self.state.as_ref() else {
            return ContextSummary {
                loaded: false,
                loaded_at_unix_secs: None,
                cohort_id: None,
                cohort_path: None,
                filter_count: 0,
                group_id: None,
                signal_files: 0,
                param_keys: Vec::new(),
                temporal: TemporalWindow::NoRestriction,
                join: None,
                cache,
            };
        };
        let plan = &state.plan;
        ContextSummary {
            loaded: true,
            loaded_at_unix_secs: state
                .loaded_at
                .duration_since(UNIX_EPOCH)
                .ok()
                .map(|d| d.as_secs()),
            cohort_id: plan.cohort.file_id.clone(),
            cohort_path: plan.cohort.path.as_ref().map(|p| p.display().to_string()),
            filter_count: plan.cohort.filters.len(),
            group_id: plan.signal.group_id.clone(),
            signal_files: plan.signal.files.len(),
            param_keys: plan.signal.param_keys.clone(),
            temporal: plan.signal.temporal.clone(),
            join: Some(plan.join.clone()),
            cache,
        }
    }

    fn loaded(&self, op: &str) -> Result<&ParsedPlan> {
        self.parsed_plan()
            .ok_or_else(|| MedError::NotLoaded(op.to_string()))
    }

    fn full_cohort(&self, plan: &ParsedPlan) -> RecordBatch {
        let Some(path) = plan.cohort.path.as_ref() else {
            debug!(cohort = ?plan.cohort.file_id, "no cohort path resolved");
            return empty_table();
        };
        let key = plan
            .cohort
            .file_id
            .clone()
            .unwrap_or_else(|| path.display().to_string());
        self.cache
            .get_or_load_cohort(&key, || self.tables.load(path))
            .into_table()
    }

    fn filtered_cohort(&self, plan: &ParsedPlan) -> RecordBatch {
        let full = self.full_cohort(plan);
        if full.num_rows() == 0 || plan.cohort.filters.is_empty() {
            return full;
        }
        let filtered = apply_filters(&full, &plan.cohort.filters);
        debug!(
            rows_before = full.num_rows(),
            rows_after = filtered.num_rows(),
            "cohort filters applied"
        );
        filtered
    }

    fn available_for(&self, plan: &ParsedPlan) -> Vec<String> {
        let signal_ids: BTreeSet<String> = plan
            .signal
            .files
            .iter()
            .map(|f| canonical_key_text(&f.entity_id))
            .collect();
        if plan.cohort.file_id.is_none() && plan.cohort.path.is_none() {
            return signal_ids.into_iter().collect();
        }
        let cohort = self.filtered_cohort(plan);
        if cohort.num_rows() == 0 || signal_ids.is_empty() {
            return Vec::new();
        }
        let cohort_ids: HashSet<String> = match distinct_keys(&cohort, &plan.join.cohort_key) {
            Ok(keys) => keys.into_iter().collect(),
            Err(e) => {
                warn!(cohort_key = %plan.join.cohort_key, error = %e, "cannot read cohort ids");
                return Vec::new();
            }
        };
        signal_ids
            .into_iter()
            .filter(|id| cohort_ids.contains(id))
            .collect()
    }

    /// Full cohort for window boundaries; `None` when no window applies.
    fn boundary_source(&self, plan: &ParsedPlan, apply_temporal: bool) -> Option<RecordBatch> {
        (apply_temporal && plan.signal.temporal.is_restricted()).then(|| self.full_cohort(plan))
    }

    fn entity_series(
        &self,
        plan: &ParsedPlan,
        entity_id: &str,
        param_keys: Option<&[String]>,
        apply_temporal: bool,
        cohort: Option<&RecordBatch>,
    ) -> RecordBatch {
        let Some(file) = signal_file(plan, entity_id) else {
            warn!(entity_id, "no signal file for entity");
            return empty_table();
        };
        // The series tier is shared across plans, so it holds every column.
        let series = self
            .cache
            .get_or_load_series(&file.entity_id, || self.series.load(&file.path, &[]))
            .into_table();
        if series.num_columns() == 0 {
            return series;
        }
        let series = self.narrow_to_params(plan, series, param_keys);
        if !apply_temporal || !plan.signal.temporal.is_restricted() {
            return series;
        }
        let boundary = cohort.and_then(|c| {
            find_entity_row(c, &plan.join.cohort_key, entity_id).unwrap_or_else(|e| {
                debug!(entity_id, error = %e, "boundary lookup failed");
                None
            })
        });
        let windowed = self
            .temporal
            .apply(&series, &plan.signal.temporal, boundary.as_ref());
        debug!(
            entity_id,
            rows_before = series.num_rows(),
            rows_after = windowed.num_rows(),
            "temporal window applied"
        );
        windowed
    }

    /// Keep columns matching the requested keys (plan keys by default) and
    /// the time axis.
    fn narrow_to_params(
        &self,
        plan: &ParsedPlan,
        series: RecordBatch,
        param_keys: Option<&[String]>,
    ) -> RecordBatch {
        let keys = param_keys.unwrap_or(&plan.signal.param_keys);
        if keys.is_empty() {
            return series;
        }
        let schema = series.schema();
        let time_axis = self.temporal.detector().detect(&schema);
        let indices: Vec<usize> = schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(i, f)| {
                Some(*i) == time_axis
                    || f.name() == TIME_AXIS_COLUMN
                    || keys.iter().any(|k| self.params.matches(k, f.name()))
            })
            .map(|(i, _)| i)
            .collect();
        series.project(&indices).unwrap_or_else(|e| {
            warn!(error = %e, "parameter projection failed; keeping all columns");
            series.clone()
        })
    }

    pub(crate) fn load_entities(
        &self,
        plan: &ParsedPlan,
        ids: &[String],
        param_keys: Option<&[String]>,
        apply_temporal: bool,
    ) -> BTreeMap<String, RecordBatch> {
        if ids.is_empty() {
            return BTreeMap::new();
        }
        let cohort = self.boundary_source(plan, apply_temporal);
        let load_one = |id: &String| {
            let table = self.entity_series(plan, id, param_keys, apply_temporal, cohort.as_ref());
            (id.clone(), table)
        };

        let use_pool = self.config.parallel && ids.len() >= self.config.parallel_threshold.max(2);
        let pool = if use_pool { self.worker_pool() } else { None };
        let (mode, loaded): (&str, Vec<(String, RecordBatch)>) = match pool {
            Some(pool) => (
                "parallel",
                pool.install(|| ids.par_iter().map(&load_one).collect::<Vec<_>>()),
            ),
            None => ("sequential", ids.iter().map(&load_one).collect::<Vec<_>>()),
        };

        global_metrics().record_entities_loaded(mode, loaded.len() as u64);
        debug!(mode, entities = loaded.len(), "entity series loaded");
        loaded.into_iter().collect()
    }

    /// Built on first parallel load and reused; `None` if the pool cannot start.
    fn worker_pool(&self) -> Option<&ThreadPool> {
        self.pool
            .get_or_init(|| {
                let workers = self.config.workers();
                match ThreadPoolBuilder::new().num_threads(workers).build() {
                    Ok(pool) => {
                        debug!(workers, "entity worker pool started");
                        Some(pool)
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to create worker pool; loading sequentially");
                        None
                    }
                }
            })
            .as_ref()
    }

    fn stacked_signals(
        &self,
        plan: &ParsedPlan,
        param_keys: Option<&[String]>,
        apply_temporal: bool,
    ) -> RecordBatch {
        let ids = self.available_for(plan);
        let parts: Vec<(String, RecordBatch)> = self
            .load_entities(plan, &ids, param_keys, apply_temporal)
            .into_iter()
            .collect();
        concat_with_entity_column(&plan.join.signal_key, &parts).unwrap_or_else(|e| {
            warn!(error = %e, "failed to stack entity series");
            empty_table()
        })
    }
}

fn signal_file<'p>(plan: &'p ParsedPlan, entity_id: &str) -> Option<&'p SignalFile> {
    let wanted = canonical_key_text(entity_id);
    plan.signal
        .files
        .iter()
        .find(|f| canonical_key_text(&f.entity_id) == wanted)
}
