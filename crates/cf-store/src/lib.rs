//! # cf-store
//!
//! Ragged field codec and record store for staged event selection.
//!
//! Fields are declared with a [`FieldDescriptor`]: an element type and a list
//! of dimensions, of which only the first may be ragged (its current extent
//! is held by a companion *size field*). Every field is backed by a flat
//! buffer sized for its full capacity; the [`codec`] maps between that buffer
//! and the logical [`Nested`] value. A [`RecordStore`] binds fields to the
//! columns of a [`TableBackend`] and moves whole rows in and out.
//!
//! ## Example
//!
//! ```no_run
//! use cf_store::{Dim, FieldDescriptor, OpenMode, RecordStore, ScalarType};
//!
//! let mut input = RecordStore::open("events.parquet", OpenMode::Read).unwrap();
//! let nt = FieldDescriptor::size("nt", 10).unwrap();
//! input.bind(nt.clone()).unwrap();
//! let tptot = FieldDescriptor::array("tptot", ScalarType::F32, vec![Dim::sized_by(&nt).unwrap()]);
//! input.bind(tptot.unwrap()).unwrap();
//!
//! for row in 0..input.row_count() {
//!     input.get_row(row).unwrap();
//!     let momenta = input.record().values_f64("tptot").unwrap();
//!     println!("row {row}: {momenta:?}");
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod field;
pub mod parquet;
pub mod record;
pub mod store;
pub mod table;
pub mod types;

pub use codec::{Nested, decode, encode};
pub use error::{Result, StoreError};
pub use field::{ColumnSignature, Dim, FieldDescriptor, SigDim};
pub use parquet::ParquetTable;
pub use record::Record;
pub use store::{OpenMode, RecordStore};
pub use table::{MemoryTable, TableBackend};
pub use types::{ColumnBuffer, Element, ScalarType};
