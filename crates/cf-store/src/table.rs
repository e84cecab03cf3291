//! Backing table collaborator: named typed columns, appended row by row.

use std::collections::HashMap;

use crate::error::{Result, StoreError};
use crate::field::ColumnSignature;
use crate::types::ColumnBuffer;

/// Row-oriented table with named, typed, fixed-stride columns.
///
/// Each cell of a column holds exactly `stride` elements (the full capacity
/// of the field it was defined for).
pub trait TableBackend: Send {
    /// Table name used in error messages (usually the file path).
    fn name(&self) -> &str;

    /// `true` if the column exists.
    fn has_column(&self, name: &str) -> bool {
        self.column_signature(name).is_some()
    }

    /// Signature of an existing column.
    fn column_signature(&self, name: &str) -> Option<&ColumnSignature>;

    /// Create a column of `stride` elements per row. Existing rows are zero-filled.
    fn define_column(&mut self, signature: ColumnSignature, stride: usize) -> Result<()>;

    /// Number of rows.
    fn row_count(&self) -> usize;

    /// Copy one cell into `out`, which must already have the column's type and stride.
    fn read_cell(&self, row: usize, column: &str, out: &mut ColumnBuffer) -> Result<()>;

    /// Append one row. Columns absent from `cells` are zero-filled.
    fn append_row(&mut self, cells: &[(&str, &ColumnBuffer)]) -> Result<()>;

    /// Persist pending changes.
    fn save(&mut self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub(crate) struct Column {
    pub(crate) signature: ColumnSignature,
    pub(crate) stride: usize,
    pub(crate) data: ColumnBuffer,
}

/// A [`TableBackend`] kept entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    name: String,
    pub(crate) columns: Vec<Column>,
    index: HashMap<String, usize>,
    rows: usize,
}

impl MemoryTable {
    /// An empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), columns: Vec::new(), index: HashMap::new(), rows: 0 }
    }

    /// Column names in definition order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.signature.name.as_str()).collect()
    }

    /// Elements per row of a column.
    pub fn stride(&self, column: &str) -> Option<usize> {
        self.index.get(column).map(|&i| self.columns[i].stride)
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Insert a fully populated column (used when loading a persisted table).
    pub(crate) fn push_loaded(
        &mut self,
        signature: ColumnSignature,
        stride: usize,
        data: ColumnBuffer,
    ) -> Result<()> {
        let rows = if stride == 0 { 0 } else { data.len() / stride };
        if stride == 0 || data.len() % stride != 0 {
            return Err(StoreError::Corrupt(format!(
                "column '{}' holds {} values, not a multiple of stride {stride}",
                signature.name,
                data.len()
            )));
        }
        if !self.columns.is_empty() && rows != self.rows {
            return Err(StoreError::Corrupt(format!(
                "column '{}' has {rows} rows, table has {}",
                signature.name, self.rows
            )));
        }
        self.rows = rows;
        self.index.insert(signature.name.clone(), self.columns.len());
        self.columns.push(Column { signature, stride, data });
        Ok(())
    }

    fn column(&self, name: &str) -> Result<&Column> {
        self.index.get(name).map(|&i| &self.columns[i]).ok_or_else(|| {
            StoreError::ColumnNotFound { column: name.to_string(), table: self.name.clone() }
        })
    }
}

impl TableBackend for MemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn column_signature(&self, name: &str) -> Option<&ColumnSignature> {
        self.index.get(name).map(|&i| &self.columns[i].signature)
    }

    fn define_column(&mut self, signature: ColumnSignature, stride: usize) -> Result<()> {
        if self.index.contains_key(&signature.name) {
            return Err(StoreError::schema(&signature.name, "column already defined"));
        }
        if stride == 0 {
            return Err(StoreError::schema(&signature.name, "column stride must be positive"));
        }
        let data = ColumnBuffer::zeroed(signature.ty, stride * self.rows);
        self.index.insert(signature.name.clone(), self.columns.len());
        self.columns.push(Column { signature, stride, data });
        Ok(())
    }

    fn row_count(&self) -> usize {
        self.rows
    }

    fn read_cell(&self, row: usize, column: &str, out: &mut ColumnBuffer) -> Result<()> {
        if row >= self.rows {
            return Err(StoreError::RowOutOfRange { row, rows: self.rows });
        }
        let col = self.column(column)?;
        if out.scalar_type() != col.signature.ty || out.len() != col.stride {
            return Err(StoreError::schema(
                column,
                format!(
                    "cell is {}x{}, buffer is {}x{}",
                    col.signature.ty,
                    col.stride,
                    out.scalar_type(),
                    out.len()
                ),
            ));
        }
        if !col.data.copy_range_into(row * col.stride, out) {
            return Err(StoreError::Corrupt(format!("column '{column}' is truncated at row {row}")));
        }
        Ok(())
    }

    fn append_row(&mut self, cells: &[(&str, &ColumnBuffer)]) -> Result<()> {
        let mut given: Vec<Option<&ColumnBuffer>> = vec![None; self.columns.len()];
        for &(name, cell) in cells {
            let i = *self.index.get(name).ok_or_else(|| StoreError::ColumnNotFound {
                column: name.to_string(),
                table: self.name.clone(),
            })?;
            let col = &self.columns[i];
            if cell.scalar_type() != col.signature.ty || cell.len() != col.stride {
                return Err(StoreError::schema(
                    name,
                    format!(
                        "cell is {}x{}, column is {}x{}",
                        cell.scalar_type(),
                        cell.len(),
                        col.signature.ty,
                        col.stride
                    ),
                ));
            }
            given[i] = Some(cell);
        }

        for (col, cell) in self.columns.iter_mut().zip(given) {
            match cell {
                Some(cell) => {
                    col.data.extend_from(cell);
                }
                None => col.data.extend_zeroed(col.stride),
            }
        }
        self.rows += 1;
        Ok(())
    }

    fn save(&mut self) -> Result<()> {
        Ok(())
    }
}
