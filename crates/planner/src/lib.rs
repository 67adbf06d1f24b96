//! Execution-plan document types and their resolution into a [`ParsedPlan`].
//!
//! Key modules:
//! - [`execution_plan`]: the externally produced, all-optional plan document
//! - [`parsed_plan`]: normalized cohort/signal/join metadata
//! - [`resolver`]: [`PlanResolver`], catalog-backed path resolution
//! - [`explain`]: text rendering for debugging

pub mod execution_plan;
pub mod explain;
pub mod parsed_plan;
pub mod resolver;

pub use execution_plan::*;
pub use explain::explain_parsed;
pub use parsed_plan::*;
pub use resolver::PlanResolver;
