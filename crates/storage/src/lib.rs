//! Catalog resolution and table decoding for cohort tables and per-entity signal files.
//!
//! Key modules:
//! - [`catalog`]: logical id -> physical path mapping ([`CatalogResolver`])
//! - [`decoder`]: [`TabularDecoder`] / [`SeriesDecoder`] contracts and file-backed decoders
//! - [`parquet_provider`], [`csv_provider`]: format readers

pub mod catalog;
pub mod csv_provider;
pub mod decoder;
pub mod parquet_provider;

pub use catalog::*;
pub use decoder::*;
