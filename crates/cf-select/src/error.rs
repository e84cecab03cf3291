//! Error types for selection, aggregation and the pipeline driver.

use cf_store::StoreError;
use thiserror::Error;

/// Errors raised while scheduling, evaluating or recording a pass.
#[derive(Error, Debug)]
pub enum SelectError {
    /// A predicate name that is not in the catalog.
    #[error("cut not found: '{0}'")]
    UnknownPredicate(String),

    /// A predicate declared twice, or an ad-hoc predicate shadowing a catalog one.
    #[error("cut already exists: '{0}'")]
    DuplicatePredicate(String),

    /// An aggregator name that is not in the catalog.
    #[error("histogram not found: '{0}'")]
    UnknownAggregator(String),

    /// An aggregator blueprint declared twice.
    #[error("histogram already exists: '{0}'")]
    DuplicateAggregator(String),

    /// A field referenced by a blueprint or derived field that is neither bound nor derived.
    #[error("unknown field: '{0}'")]
    UnknownField(String),

    /// A field declared twice: a repeated derived field, a derived field
    /// shadowing a stored one, or a name bound in two input stores.
    #[error("field '{0}' is declared more than once")]
    DuplicateField(String),

    /// Derived fields that depend on each other.
    #[error("dependency cycle among derived fields: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    /// A derived field read an input it did not declare.
    #[error("derived field '{field}' read undeclared input '{dependency}'")]
    UndeclaredDependency {
        /// Derived field being computed.
        field: String,
        /// Input it tried to read.
        dependency: String,
    },

    /// Invalid histogram axis.
    #[error("invalid axis '{axis}': {reason}")]
    InvalidAxis {
        /// Axis title or field.
        axis: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Failure raised by user code (predicate, derived field or output computation).
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// Any error raised while processing one row.
    #[error("row {row}: {source}")]
    Row {
        /// Row index in the input store.
        row: usize,
        /// Underlying error.
        source: Box<SelectError>,
    },

    /// Record store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// Invalid pipeline configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl SelectError {
    /// Attach a row index, unless one is already attached.
    pub(crate) fn at_row(self, row: usize) -> Self {
        match self {
            SelectError::Row { .. } => self,
            other => SelectError::Row { row, source: Box::new(other) },
        }
    }
}

/// Result type for selection operations.
pub type Result<T> = std::result::Result<T, SelectError>;
