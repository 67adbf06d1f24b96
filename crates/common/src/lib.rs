//! Shared configuration, error types, and observability primitives for medctx crates.
//!
//! Architecture role:
//! - defines the data-context configuration passed across layers
//! - provides common [`MedError`] / [`Result`] contracts
//! - hosts the Prometheus metrics registry
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`metrics`]

pub mod config;
pub mod error;
pub mod metrics;

pub use config::{ContextConfig, DEFAULT_ENTITY_KEY};
pub use error::{MedError, Result};
pub use metrics::{global_metrics, MetricsRegistry};
