//! Parquet persistence for [`MemoryTable`].
//!
//! Scalar columns are stored as primitive Arrow columns, array columns as
//! `FixedSizeList` of their full stride. The column signature is kept in the
//! Arrow field metadata under [`SIGNATURE_KEY`].

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, FixedSizeListArray, PrimitiveArray};
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Field, Float32Type, Int8Type, Int16Type, Int32Type, Schema,
    UInt8Type, UInt16Type, UInt32Type,
};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::error::{Result, StoreError};
use crate::field::ColumnSignature;
use crate::table::{MemoryTable, TableBackend};
use crate::types::{ColumnBuffer, ScalarType};

/// Arrow field metadata key holding the column signature.
pub const SIGNATURE_KEY: &str = "cutflow.signature";

/// A [`MemoryTable`] loaded from and saved to a single Parquet file.
pub struct ParquetTable {
    path: PathBuf,
    table: MemoryTable,
}

impl ParquetTable {
    /// Load an existing file. Fails with [`StoreError::NotFound`] if absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(StoreError::NotFound(path));
        }
        let file = File::open(&path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let schema = builder.schema().clone();
        let reader = builder.build()?;
        let batches: std::result::Result<Vec<RecordBatch>, _> = reader.collect();
        let table = table_from_batches(&path.display().to_string(), &schema, &batches?)?;
        log::debug!(
            "loaded {} ({} columns, {} rows)",
            path.display(),
            table.column_names().len(),
            table.row_count()
        );
        Ok(Self { path, table })
    }

    /// A new empty table that will be written to `path` on save.
    pub fn create(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let table = MemoryTable::new(path.display().to_string());
        Self { path, table }
    }

    /// Destination file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TableBackend for ParquetTable {
    fn name(&self) -> &str {
        self.table.name()
    }

    fn column_signature(&self, name: &str) -> Option<&ColumnSignature> {
        self.table.column_signature(name)
    }

    fn define_column(&mut self, signature: ColumnSignature, stride: usize) -> Result<()> {
        self.table.define_column(signature, stride)
    }

    fn row_count(&self) -> usize {
        self.table.row_count()
    }

    fn read_cell(&self, row: usize, column: &str, out: &mut ColumnBuffer) -> Result<()> {
        self.table.read_cell(row, column, out)
    }

    fn append_row(&mut self, cells: &[(&str, &ColumnBuffer)]) -> Result<()> {
        self.table.append_row(cells)
    }

    fn save(&mut self) -> Result<()> {
        let batch = table_to_batch(&self.table)?;
        let props = WriterProperties::builder().set_compression(Compression::SNAPPY).build();
        let file = File::create(&self.path)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
        writer.write(&batch)?;
        writer.close()?;
        log::debug!("saved {} ({} rows)", self.path.display(), self.table.row_count());
        Ok(())
    }
}

/// Arrow type of a scalar element.
pub fn arrow_type(ty: ScalarType) -> DataType {
    match ty {
        ScalarType::F32 => DataType::Float32,
        ScalarType::I32 => DataType::Int32,
        ScalarType::U32 => DataType::UInt32,
        ScalarType::I8 => DataType::Int8,
        ScalarType::U8 => DataType::UInt8,
        ScalarType::I16 => DataType::Int16,
        ScalarType::U16 => DataType::UInt16,
    }
}

fn scalar_type_of(dt: &DataType) -> Option<ScalarType> {
    ScalarType::ALL.into_iter().find(|&ty| arrow_type(ty) == *dt)
}

fn table_to_batch(table: &MemoryTable) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(table.columns.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(table.columns.len());

    for col in &table.columns {
        let values = primitive_array(&col.data);
        let metadata = HashMap::from([(SIGNATURE_KEY.to_string(), col.signature.to_string())]);
        let (data_type, array) = if col.signature.dims.is_empty() {
            (values.data_type().clone(), values)
        } else {
            let item = Arc::new(Field::new_list_field(values.data_type().clone(), false));
            let list = FixedSizeListArray::try_new(item, col.stride as i32, values, None)?;
            (list.data_type().clone(), Arc::new(list) as ArrayRef)
        };
        fields.push(Field::new(&col.signature.name, data_type, false).with_metadata(metadata));
        arrays.push(array);
    }

    let options = RecordBatchOptions::new().with_row_count(Some(table.row_count()));
    Ok(RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), arrays, &options)?)
}

fn primitive_array(data: &ColumnBuffer) -> ArrayRef {
    fn wrap<T: ArrowPrimitiveType>(v: &[T::Native]) -> ArrayRef {
        Arc::new(PrimitiveArray::<T>::from_iter_values(v.iter().copied()))
    }
    match data {
        ColumnBuffer::F32(v) => wrap::<Float32Type>(v),
        ColumnBuffer::I32(v) => wrap::<Int32Type>(v),
        ColumnBuffer::U32(v) => wrap::<UInt32Type>(v),
        ColumnBuffer::I8(v) => wrap::<Int8Type>(v),
        ColumnBuffer::U8(v) => wrap::<UInt8Type>(v),
        ColumnBuffer::I16(v) => wrap::<Int16Type>(v),
        ColumnBuffer::U16(v) => wrap::<UInt16Type>(v),
    }
}

fn table_from_batches(
    name: &str,
    schema: &Schema,
    batches: &[RecordBatch],
) -> Result<MemoryTable> {
    let mut table = MemoryTable::new(name);
    for (i, field) in schema.fields().iter().enumerate() {
        let signature = match field.metadata().get(SIGNATURE_KEY) {
            Some(text) => ColumnSignature::parse(text)?,
            None => {
                let ty = scalar_type_of(field.data_type()).ok_or_else(|| {
                    StoreError::Corrupt(format!(
                        "column '{}' has unsupported type {:?}",
                        field.name(),
                        field.data_type()
                    ))
                })?;
                ColumnSignature { name: field.name().clone(), dims: Vec::new(), ty }
            }
        };
        let (stride, item_type) = match field.data_type() {
            DataType::FixedSizeList(item, size) => (*size as usize, item.data_type().clone()),
            other => (1, other.clone()),
        };
        if scalar_type_of(&item_type) != Some(signature.ty) {
            return Err(StoreError::Corrupt(format!(
                "column '{}' stores {item_type:?} but its signature says {}",
                field.name(),
                signature.ty
            )));
        }

        let mut data = ColumnBuffer::zeroed(signature.ty, 0);
        for batch in batches {
            append_column(&mut data, batch.column(i), field.name())?;
        }
        table.push_loaded(signature, stride, data)?;
    }
    table.set_name(name);
    Ok(table)
}

fn append_column(data: &mut ColumnBuffer, array: &ArrayRef, name: &str) -> Result<()> {
    if let Some(list) = array.as_fixed_size_list_opt() {
        for row in 0..list.len() {
            append_primitive(data, &list.value(row), name)?;
        }
        return Ok(());
    }
    append_primitive(data, array, name)
}

fn append_primitive(data: &mut ColumnBuffer, array: &ArrayRef, name: &str) -> Result<()> {
    fn extend<T: ArrowPrimitiveType>(out: &mut Vec<T::Native>, array: &ArrayRef) -> bool {
        match array.as_primitive_opt::<T>() {
            Some(values) => {
                out.extend_from_slice(values.values());
                true
            }
            None => false,
        }
    }
    let ok = match data {
        ColumnBuffer::F32(v) => extend::<Float32Type>(v, array),
        ColumnBuffer::I32(v) => extend::<Int32Type>(v, array),
        ColumnBuffer::U32(v) => extend::<UInt32Type>(v, array),
        ColumnBuffer::I8(v) => extend::<Int8Type>(v, array),
        ColumnBuffer::U8(v) => extend::<UInt8Type>(v, array),
        ColumnBuffer::I16(v) => extend::<Int16Type>(v, array),
        ColumnBuffer::U16(v) => extend::<UInt16Type>(v, array),
    };
    if !ok {
        return Err(StoreError::Corrupt(format!(
            "column '{name}' holds {:?}, expected {}",
            array.data_type(),
            data.scalar_type()
        )));
    }
    Ok(())
}
