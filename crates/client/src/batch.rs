use std::collections::{BTreeMap, HashSet};

use arrow::record_batch::RecordBatch;
use medctx_execution::{empty_table, rows_matching_keys};
use medctx_planner::ParsedPlan;
use tracing::{debug, warn};

use crate::context::DataContext;

/// One chunk of the available entities with their series and cohort rows.
#[derive(Debug, Clone)]
pub struct CaseBatch {
    /// Zero-based position in the sequence.
    pub index: usize,
    pub entities: Vec<String>,
    pub series: BTreeMap<String, RecordBatch>,
    pub cohort_rows: RecordBatch,
}

/// Lazy, finite sequence of [`CaseBatch`]es.
///
/// Only the batch being produced is materialized here; callers are expected
/// to drop each batch before pulling the next. Not resumable: start a new
/// iterator to go again from batch 0.
pub struct CaseBatches<'a> {
    ctx: &'a DataContext,
    plan: &'a ParsedPlan,
    entities: Vec<String>,
    cohort: RecordBatch,
    batch_size: usize,
    param_keys: Option<Vec<String>>,
    apply_temporal: bool,
    next: usize,
}

impl<'a> CaseBatches<'a> {
    pub(crate) fn new(
        ctx: &'a DataContext,
        plan: &'a ParsedPlan,
        entities: Vec<String>,
        cohort: RecordBatch,
        batch_size: usize,
        param_keys: Option<Vec<String>>,
        apply_temporal: bool,
    ) -> Self {
        Self {
            ctx,
            plan,
            entities,
            cohort,
            batch_size,
            param_keys,
            apply_temporal,
            next: 0,
        }
    }

    pub fn total_entities(&self) -> usize {
        self.entities.len()
    }

    pub fn batch_count(&self) -> usize {
        self.entities.len().div_ceil(self.batch_size)
    }

    fn cohort_rows_for(&self, ids: &[String]) -> RecordBatch {
        if self.cohort.num_rows() == 0 {
            return empty_table();
        }
        let keys: HashSet<String> = ids.iter().cloned().collect();
        match rows_matching_keys(&self.cohort, &self.plan.join.cohort_key, &keys) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "could not select cohort rows for batch");
                empty_table()
            }
        }
    }
}

impl Iterator for CaseBatches<'_> {
    type Item = CaseBatch;

    fn next(&mut self) -> Option<CaseBatch> {
        let start = self.next * self.batch_size;
        if start >= self.entities.len() {
            return None;
        }
        let end = (start + self.batch_size).min(self.entities.len());
        let entities = self.entities[start..end].to_vec();
        let series = self.ctx.load_entities(
            self.plan,
            &entities,
            self.param_keys.as_deref(),
            self.apply_temporal,
        );
        let cohort_rows = self.cohort_rows_for(&entities);
        let index = self.next;
        self.next += 1;
        debug!(batch = index, entities = entities.len(), "case batch loaded");
        Some(CaseBatch {
            index,
            entities,
            series,
            cohort_rows,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.batch_count().saturating_sub(self.next);
        (left, Some(left))
    }
}

impl ExactSizeIterator for CaseBatches<'_> {}
