//! Table-level primitives behind the data context.
//!
//! Architecture role:
//! - cohort filter evaluation over Arrow batches
//! - temporal window clipping of per-entity series
//! - key canonicalization and hash join of cohort and signal tables
//!
//! Key modules:
//! - [`filter`]
//! - [`join`]
//! - [`keys`]
//! - [`table`]
//! - [`temporal`]

pub mod filter;
pub mod join;
pub mod keys;
pub mod table;
pub mod temporal;

pub use filter::{apply_filters, evaluate_filter};
pub use join::hash_join;
pub use keys::{canonical_key_text, canonical_keys};
pub use table::{
    concat_with_entity_column, distinct_keys, empty_table, find_entity_row, project_columns,
    rows_matching_keys,
};
pub use temporal::{
    boundary_seconds, time_as_seconds, TemporalFilter, TimeAxisDetector, TimeAxisRule,
};
