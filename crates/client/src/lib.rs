//! Plan-driven data context for cohort tables and per-entity time series.
//!
//! Key modules:
//! - [`context`]: [`DataContext`], the query façade
//! - [`cache`]: process-wide get-or-load [`CacheStore`]
//! - [`batch`]: lazy [`CaseBatches`] iteration
//! - [`params`]: [`ParameterRegistry`] for channel name matching

pub mod batch;
pub mod cache;
pub mod context;
pub mod params;

pub use batch::{CaseBatch, CaseBatches};
pub use cache::{CacheStats, CacheStore, CacheTier, LoadOutcome, TierStats};
pub use context::{ContextSummary, DataContext};
pub use params::{ParameterInfo, ParameterRegistry};

pub use medctx_common::{ContextConfig, MedError, Result};
pub use medctx_planner::{ExecutionPlan, JoinKind, ParsedPlan};
pub use medctx_storage::{Catalog, CatalogResolver, SeriesDecoder, TabularDecoder};
