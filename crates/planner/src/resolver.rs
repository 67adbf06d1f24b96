use medctx_common::DEFAULT_ENTITY_KEY;
use medctx_storage::CatalogResolver;
use tracing::{debug, warn};

use crate::execution_plan::{ExecutionPlan, JoinSpecification};
use crate::parsed_plan::{
    CohortFilter, CohortMetadata, JoinConfig, JoinKind, ParsedPlan, SignalMetadata,
    TemporalWindow,
};

/// Turns an [`ExecutionPlan`] into a [`ParsedPlan`], resolving logical ids
/// through the catalog.
///
/// Contracts:
/// - missing plan sections yield empty metadata for that side;
/// - a cohort lookup miss leaves `cohort.path = None` and is logged;
/// - group files without a resolvable entity id are excluded (catalog contract);
/// - malformed filters are dropped with a warning, remaining filters keep their order.
///
/// Stateless; safe to call repeatedly.
pub struct PlanResolver<'a> {
    catalog: &'a dyn CatalogResolver,
    default_entity_key: String,
}

impl<'a> PlanResolver<'a> {
    pub fn new(catalog: &'a dyn CatalogResolver) -> Self {
        Self {
            catalog,
            default_entity_key: DEFAULT_ENTITY_KEY.to_string(),
        }
    }

    pub fn with_default_entity_key(mut self, key: impl Into<String>) -> Self {
        self.default_entity_key = key.into();
        self
    }

    pub fn parse(&self, plan: &ExecutionPlan, resolve_paths: bool) -> ParsedPlan {
        let cohort = self.parse_cohort(plan, resolve_paths);
        let signal = self.parse_signal(plan, resolve_paths);
        let join = self.resolve_join(
            plan.join_specification.as_ref(),
            cohort.entity_identifier.as_deref(),
            signal.entity_identifier_key.as_deref(),
        );
        debug!(
            cohort_file = ?cohort.file_id,
            cohort_resolved = cohort.path.is_some(),
            signal_group = ?signal.group_id,
            signal_files = signal.files.len(),
            filters = cohort.filters.len(),
            cohort_key = %join.cohort_key,
            signal_key = %join.signal_key,
            "execution plan resolved"
        );
        ParsedPlan {
            cohort,
            signal,
            join,
        }
    }

    fn parse_cohort(&self, plan: &ExecutionPlan, resolve_paths: bool) -> CohortMetadata {
        let Some(src) = plan.cohort_source.as_ref() else {
            return CohortMetadata::default();
        };

        let filters = src
            .filters
            .iter()
            .filter_map(|spec| match CohortFilter::from_spec(spec) {
                Ok(f) => Some(f),
                Err(e) => {
                    warn!(column = %spec.column, operator = %spec.operator, error = %e, "dropping cohort filter");
                    None
                }
            })
            .collect();

        let path = match (&src.file_id, resolve_paths) {
            (Some(id), true) => {
                let p = self.catalog.resolve_cohort_path(id);
                if p.is_none() {
                    warn!(table_id = %id, "cohort table not found in catalog");
                }
                p
            }
            _ => None,
        };

        CohortMetadata {
            file_id: src.file_id.clone(),
            path,
            entity_identifier: non_empty(src.entity_identifier.as_deref()),
            row_represents: src.row_represents.clone(),
            filters,
        }
    }

    fn parse_signal(&self, plan: &ExecutionPlan, resolve_paths: bool) -> SignalMetadata {
        let Some(src) = plan.signal_source.as_ref() else {
            return SignalMetadata::default();
        };

        let mut param_keys: Vec<String> = Vec::new();
        for key in src.parameters.iter().flat_map(|p| p.param_keys.iter()) {
            let key = key.trim();
            if !key.is_empty() && !param_keys.iter().any(|k| k == key) {
                param_keys.push(key.to_string());
            }
        }

        let entity_key = non_empty(src.entity_identifier_key.as_deref());
        let files = match (&src.group_id, resolve_paths) {
            (Some(group), true) => {
                let lookup_key = entity_key
                    .clone()
                    .unwrap_or_else(|| self.default_entity_key.clone());
                let files = self.catalog.resolve_group_files(group, &lookup_key);
                if files.is_empty() {
                    warn!(group_id = %group, "signal group resolved to no files");
                }
                files
            }
            _ => Vec::new(),
        };

        SignalMetadata {
            group_id: src.group_id.clone(),
            entity_identifier_key: entity_key,
            files,
            param_keys,
            temporal: TemporalWindow::from_alignment(src.temporal_alignment.as_ref()),
        }
    }

    /// Explicit keys win; otherwise each side uses its own identifier, then the
    /// other side's, then the shared default.
    fn resolve_join(
        &self,
        spec: Option<&JoinSpecification>,
        cohort_id: Option<&str>,
        signal_id: Option<&str>,
    ) -> JoinConfig {
        let explicit_cohort = spec.and_then(|s| non_empty(s.cohort_key.as_deref()));
        let explicit_signal = spec.and_then(|s| non_empty(s.signal_key.as_deref()));
        let kind = spec
            .and_then(|s| s.kind.as_deref())
            .map(|k| {
                JoinKind::parse(k).unwrap_or_else(|| {
                    warn!(join_type = %k, "unknown join type; using inner");
                    JoinKind::Inner
                })
            })
            .unwrap_or_default();

        let cohort_key = explicit_cohort
            .or_else(|| cohort_id.map(str::to_string))
            .or_else(|| signal_id.map(str::to_string))
            .unwrap_or_else(|| self.default_entity_key.clone());
        let signal_key = explicit_signal
            .or_else(|| signal_id.map(str::to_string))
            .or_else(|| cohort_id.map(str::to_string))
            .unwrap_or_else(|| self.default_entity_key.clone());

        JoinConfig {
            cohort_key,
            signal_key,
            kind,
        }
    }
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
