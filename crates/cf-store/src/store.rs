//! Record store: bound fields moved to and from rows of a backing table.

use std::path::Path;

use crate::error::{Result, StoreError};
use crate::field::{ColumnSignature, FieldDescriptor};
use crate::parquet::ParquetTable;
use crate::record::Record;
use crate::table::TableBackend;
use crate::types::ColumnBuffer;

/// How a store is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Existing table, read only.
    Read,
    /// New table; an existing file is replaced on flush.
    Create,
    /// Existing table extended with new rows, or a new table if absent.
    Append,
}

impl OpenMode {
    /// `true` for [`OpenMode::Create`] and [`OpenMode::Append`].
    pub fn is_write(self) -> bool {
        !matches!(self, OpenMode::Read)
    }
}

/// Rows of bound fields persisted through a [`TableBackend`].
///
/// # Example
///
/// ```no_run
/// use cf_store::{Dim, FieldDescriptor, OpenMode, RecordStore, ScalarType};
///
/// let mut out = RecordStore::open("tracks.parquet", OpenMode::Create).unwrap();
/// let nt = FieldDescriptor::size("nt", 10).unwrap();
/// out.bind(nt.clone()).unwrap();
/// let tptot = FieldDescriptor::array("tptot", ScalarType::F32, vec![Dim::sized_by(&nt).unwrap()]);
/// out.bind(tptot.unwrap()).unwrap();
///
/// out.record_mut().set_size("nt", 2).unwrap();
/// out.record_mut().set::<f32>("tptot", vec![120.0, 95.5]).unwrap();
/// out.append_row().unwrap();
/// out.close().unwrap();
/// ```
pub struct RecordStore {
    mode: OpenMode,
    backend: Box<dyn TableBackend>,
    record: Record,
    cursor: Option<usize>,
    pending: usize,
}

impl RecordStore {
    /// Open a Parquet-backed store at `path`.
    ///
    /// [`OpenMode::Read`] fails with [`StoreError::NotFound`] if the file is absent.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        let path = path.as_ref();
        let backend = match mode {
            OpenMode::Read => ParquetTable::open(path)?,
            OpenMode::Create => ParquetTable::create(path),
            OpenMode::Append if path.exists() => ParquetTable::open(path)?,
            OpenMode::Append => ParquetTable::create(path),
        };
        log::debug!("opened {} ({mode:?}, {} rows)", path.display(), backend.row_count());
        Ok(Self::with_backend(Box::new(backend), mode))
    }

    /// Wrap an arbitrary backend.
    pub fn with_backend(backend: Box<dyn TableBackend>, mode: OpenMode) -> Self {
        Self { mode, backend, record: Record::new(), cursor: None, pending: 0 }
    }

    /// Open mode.
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Backing table name.
    pub fn name(&self) -> &str {
        self.backend.name()
    }

    /// Bind a field to the column of the same name.
    ///
    /// In read mode the column must already exist with a matching signature.
    /// In write mode a missing column is defined from the field's signature.
    pub fn bind(&mut self, desc: FieldDescriptor) -> Result<()> {
        self.record.check_bindable(&desc)?;
        match self.backend.column_signature(desc.name()) {
            Some(existing) => check_signature(existing, &desc)?,
            None if self.mode.is_write() => {
                self.backend.define_column(desc.signature(), desc.capacity_len())?;
            }
            None => {
                return Err(StoreError::ColumnNotFound {
                    column: desc.name().to_string(),
                    table: self.backend.name().to_string(),
                });
            }
        }
        self.record.bind(desc)
    }

    /// Bind several fields in order.
    pub fn bind_all(&mut self, fields: impl IntoIterator<Item = FieldDescriptor>) -> Result<()> {
        fields.into_iter().try_for_each(|f| self.bind(f))
    }

    /// Bound fields and their current-row values.
    pub fn record(&self) -> &Record {
        &self.record
    }

    /// Mutable access to the current-row values.
    pub fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    /// Number of rows in the backing table.
    pub fn row_count(&self) -> usize {
        self.backend.row_count()
    }

    /// Row most recently read or appended.
    pub fn current_row(&self) -> Option<usize> {
        self.cursor
    }

    /// Load row `index` into the bound fields.
    ///
    /// Size fields are hydrated first and checked against their declared
    /// maximum, so dependent fields always decode within capacity.
    pub fn get_row(&mut self, index: usize) -> Result<()> {
        let rows = self.backend.row_count();
        if index >= rows {
            return Err(StoreError::RowOutOfRange { row: index, rows });
        }

        for sizes_first in [true, false] {
            for i in 0..self.record.len() {
                let (desc, buffer) = self.record.slot_mut(i);
                if desc.is_size_field() != sizes_first {
                    continue;
                }
                self.backend.read_cell(index, desc.name(), buffer)?;
                if let (Some(max), ColumnBuffer::U32(v)) = (desc.max_size(), &*buffer)
                    && v[0] > max
                {
                    return Err(StoreError::Corrupt(format!(
                        "row {index}: size field '{}' = {} exceeds declared maximum {max}",
                        desc.name(),
                        v[0]
                    )));
                }
            }
        }
        self.cursor = Some(index);
        Ok(())
    }

    /// Append the current logical values of every bound field as a new row.
    pub fn append_row(&mut self) -> Result<()> {
        if !self.mode.is_write() {
            return Err(StoreError::ReadOnlyViolation(self.backend.name().to_string()));
        }
        let names: Vec<String> = self.record.fields().map(|f| f.name().to_string()).collect();
        let cells = names
            .iter()
            .map(|name| self.record.encoded(name))
            .collect::<Result<Vec<ColumnBuffer>>>()?;
        let refs: Vec<(&str, &ColumnBuffer)> =
            names.iter().map(String::as_str).zip(cells.iter()).collect();
        self.backend.append_row(&refs)?;
        self.cursor = Some(self.backend.row_count() - 1);
        self.pending += 1;
        Ok(())
    }

    /// Persist appended rows.
    pub fn flush(&mut self) -> Result<()> {
        if !self.mode.is_write() {
            return Err(StoreError::ReadOnlyViolation(self.backend.name().to_string()));
        }
        self.backend.save()?;
        log::debug!("flushed {} rows to {}", self.pending, self.backend.name());
        self.pending = 0;
        Ok(())
    }

    /// Close the store, flushing first in write modes.
    pub fn close(mut self) -> Result<()> {
        if self.mode.is_write() {
            self.flush()?;
        }
        Ok(())
    }

    /// Give up the store and return its backend (e.g. to reopen it in another mode).
    pub fn into_backend(self) -> Box<dyn TableBackend> {
        self.backend
    }
}

fn check_signature(existing: &ColumnSignature, desc: &FieldDescriptor) -> Result<()> {
    if existing.matches(desc) {
        return Ok(());
    }
    Err(StoreError::schema(
        desc.name(),
        format!("persisted column is '{existing}', field declares '{}'", desc.signature()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Nested;
    use crate::field::Dim;
    use crate::table::MemoryTable;
    use crate::types::ScalarType;

    fn fields() -> Vec<FieldDescriptor> {
        let n = FieldDescriptor::size("n", 10).unwrap();
        let vals =
            FieldDescriptor::array("vals", ScalarType::I32, vec![Dim::sized_by(&n).unwrap()])
                .unwrap();
        vec![n, vals]
    }

    #[test]
    fn ragged_row_stored_zero_padded() {
        let mut store =
            RecordStore::with_backend(Box::new(MemoryTable::new("mem")), OpenMode::Create);
        store.bind_all(fields()).unwrap();
        store.record_mut().set_size("n", 4).unwrap();
        store.record_mut().set::<i32>("vals", vec![5, 9, 2, 7]).unwrap();
        store.append_row().unwrap();
        assert_eq!(store.current_row(), Some(0));

        let backend = store.into_backend();
        let mut cell = ColumnBuffer::zeroed(ScalarType::I32, 10);
        backend.read_cell(0, "vals", &mut cell).unwrap();
        assert_eq!(cell, ColumnBuffer::I32(vec![5, 9, 2, 7, 0, 0, 0, 0, 0, 0]));

        let mut reader = RecordStore::with_backend(backend, OpenMode::Read);
        reader.bind_all(fields()).unwrap();
        reader.get_row(0).unwrap();
        assert_eq!(reader.record().get::<i32>("vals").unwrap(), Nested::flat([5, 9, 2, 7]));
    }

    #[test]
    fn read_mode_rejects_writes() {
        let mut store =
            RecordStore::with_backend(Box::new(MemoryTable::new("mem")), OpenMode::Read);
        assert!(matches!(store.append_row(), Err(StoreError::ReadOnlyViolation(_))));
        assert!(matches!(store.flush(), Err(StoreError::ReadOnlyViolation(_))));
    }

    #[test]
    fn read_mode_requires_existing_column() {
        let mut store =
            RecordStore::with_backend(Box::new(MemoryTable::new("mem")), OpenMode::Read);
        let err = store.bind(FieldDescriptor::scalar("e", ScalarType::F32)).unwrap_err();
        assert!(matches!(err, StoreError::ColumnNotFound { .. }));
    }

    #[test]
    fn signature_mismatch_on_bind() {
        let mut writer =
            RecordStore::with_backend(Box::new(MemoryTable::new("mem")), OpenMode::Create);
        writer.bind(FieldDescriptor::scalar("e", ScalarType::F32)).unwrap();
        let mut reader = RecordStore::with_backend(writer.into_backend(), OpenMode::Read);
        let err = reader.bind(FieldDescriptor::scalar("e", ScalarType::I32)).unwrap_err();
        assert!(matches!(err, StoreError::Schema { .. }), "{err}");
    }

    #[test]
    fn corrupt_size_value_detected() {
        let mut table = MemoryTable::new("mem");
        table.define_column(ColumnSignature::parse("n/i").unwrap(), 1).unwrap();
        table.define_column(ColumnSignature::parse("vals[n]/I").unwrap(), 10).unwrap();
        table.append_row(&[("n", &ColumnBuffer::U32(vec![42]))]).unwrap();

        let mut reader = RecordStore::with_backend(Box::new(table), OpenMode::Read);
        reader.bind_all(fields()).unwrap();
        assert!(matches!(reader.get_row(0), Err(StoreError::Corrupt(_))));
        assert!(matches!(reader.get_row(1), Err(StoreError::RowOutOfRange { row: 1, rows: 1 })));
    }
}
