//! Error types for the record store and field codec.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::ScalarType;

/// Errors raised while describing, encoding, reading or writing fields.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Invalid field declaration or binding (duplicate name, bad dimension, ...).
    #[error("schema error for '{field}': {reason}")]
    Schema {
        /// Field or column name.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A field name that is not bound to the record.
    #[error("unknown field: '{0}'")]
    UnknownField(String),

    /// A logical value whose nesting does not match the current extents.
    #[error("shape mismatch for field '{field}' at nesting level {level}: {detail}")]
    ShapeMismatch {
        /// Field name.
        field: String,
        /// Nesting level (0 = outermost) where the mismatch was found.
        level: usize,
        /// Expected vs. actual description.
        detail: String,
    },

    /// A size field set (or read) above its declared maximum.
    #[error("size field '{field}' value {value} exceeds declared maximum {max}")]
    SizeOutOfRange {
        /// Size field name.
        field: String,
        /// Offending value.
        value: u64,
        /// Declared maximum.
        max: u32,
    },

    /// Typed access with the wrong element type.
    #[error("field '{field}' holds {actual} values, requested {expected}")]
    TypeMismatch {
        /// Field name.
        field: String,
        /// Requested element type.
        expected: ScalarType,
        /// Declared element type.
        actual: ScalarType,
    },

    /// Backing file does not exist.
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Column missing from the persisted schema.
    #[error("column '{column}' not found in table '{table}'")]
    ColumnNotFound {
        /// Column name.
        column: String,
        /// Table name or path.
        table: String,
    },

    /// Write attempted on a store opened for reading.
    #[error("table '{0}' is opened read-only")]
    ReadOnlyViolation(String),

    /// Row index past the end of the table.
    #[error("row {row} out of range (table has {rows} rows)")]
    RowOutOfRange {
        /// Requested row.
        row: usize,
        /// Number of rows in the table.
        rows: usize,
    },

    /// Backing data is inconsistent with its own schema.
    #[error("corrupt table: {0}")]
    Corrupt(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet read/write error.
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

impl StoreError {
    pub(crate) fn schema(field: impl Into<String>, reason: impl Into<String>) -> Self {
        StoreError::Schema { field: field.into(), reason: reason.into() }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, StoreError>;
