use thiserror::Error;

/// Canonical error taxonomy shared by every medctx crate.
///
/// Classification guidance:
/// - [`MedError::InvalidConfig`]: catalog/config/argument contract violations
/// - [`MedError::Planning`]: execution-plan shape problems found while resolving
/// - [`MedError::Execution`]: decode, kernel, or data-shape failures at load time
/// - [`MedError::NotLoaded`]: a query issued before a plan was loaded
/// - [`MedError::Unsupported`]: valid request for an unimplemented format/shape
/// - [`MedError::Io`]: raw filesystem failures from std APIs
///
/// Data-availability problems (missing files, failed decodes) are not
/// surfaced through this type by the data context; they degrade to empty
/// tables. Only programmer errors propagate to callers.
#[derive(Debug, Error)]
pub enum MedError {
    /// Invalid or inconsistent configuration/catalog state.
    ///
    /// Examples:
    /// - catalog document that does not parse
    /// - zero batch size passed to the batch iterator
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Plan resolution failures.
    #[error("planning error: {0}")]
    Planning(String),

    /// Runtime failures while decoding or transforming tables.
    ///
    /// Examples:
    /// - parquet/csv decode failures
    /// - arrow kernel errors (cast, filter, take)
    #[error("execution error: {0}")]
    Execution(String),

    /// A per-plan query was issued before `load_from_plan`.
    #[error("no execution plan loaded: call load_from_plan before {0}")]
    NotLoaded(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Valid request for a feature/shape not implemented.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Standard medctx result alias.
pub type Result<T> = std::result::Result<T, MedError>;
