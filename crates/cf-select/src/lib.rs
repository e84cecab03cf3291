//! # cf-select
//!
//! Staged event selection over a [`cf_store::RecordStore`].
//!
//! A [`Pipeline`] keeps one survival bit per input row. Predicates from a
//! [`CutCatalog`] are scheduled, then applied together by a pass; rows a
//! predicate rejects are cleared from the mask and never come back. During
//! the same pass the active histograms of a [`HistogramCatalog`] are filled
//! from the surviving rows and written to an [`AggregateSink`] under a
//! namespace named after the pass. Every pass appends a stage to the
//! provenance log, from which the cutflow report is computed.
//!
//! Friend stores holding other columns of the same rows (kinematic fits,
//! for instance) are read in lockstep with the input.
//!
//! ## Example
//!
//! ```no_run
//! use cf_select::{AxisSpec, Blueprint, CutCatalog, DerivedFields, HistogramCatalog, Pipeline};
//! use cf_store::{Dim, FieldDescriptor, OpenMode, RecordStore, ScalarType};
//!
//! let mut input = RecordStore::open("e950.parquet", OpenMode::Read)?;
//! let nt = FieldDescriptor::size("nt", 10)?;
//! input.bind(nt.clone())?;
//! input.bind(FieldDescriptor::array("tptot", ScalarType::F32, vec![Dim::sized_by(&nt)?])?)?;
//!
//! let derived = DerivedFields::builder()
//!     .field("ptot_sum", &["tptot"], |inp| Ok(vec![inp.values("tptot")?.iter().sum()]))
//!     .build()?;
//!
//! let mut cuts = CutCatalog::new();
//! cuts.declare("two_tracks", |row| Ok(row.size("nt")? != 2))?;
//!
//! let mut hists = HistogramCatalog::new();
//! hists.declare("psum", Blueprint::hist1d("", AxisSpec::uniform("ptot_sum", 40, 0.0, 1000.0)?))?;
//!
//! let mut pipeline =
//!     Pipeline::builder(input).derived(derived).cuts(cuts).histograms(hists).build()?;
//! pipeline.add_predicate("two_tracks", false)?;
//! pipeline.add_aggregator("psum")?;
//! let pass = pipeline.run_pass()?;
//! println!("{}: {} of {}", pass.namespace, pass.survivors, pass.previous);
//! # Ok::<(), cf_select::SelectError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregate;
pub mod batch;
pub mod config;
pub mod cutflow;
pub mod cuts;
pub mod derived;
pub mod error;
pub mod histogram;
pub mod mask;
pub mod pipeline;
pub mod sink;

pub use aggregate::{AggregationEngine, AxisSpec, Blueprint, HistogramCatalog};
pub use batch::run_independent;
pub use config::{AxisConfig, HistogramConfig, PassConfig, PipelineConfig, parse_cut};
pub use cutflow::{CutflowPoint, CutflowReport, NO_CUT, ProvenanceLog, StageRecord};
pub use cuts::{CutCatalog, CutFn, SelectionEngine};
pub use derived::{DeriveFn, DerivedFields, DerivedFieldsBuilder, DerivedInputs, RowView};
pub use error::{Result, SelectError};
pub use histogram::{Axis, Histogram, Histogram1D, Histogram2D};
pub use mask::SelectionMask;
pub use pipeline::{Finished, PassSummary, Pipeline, PipelineBuilder};
pub use sink::{AggregateSink, JsonDirSink, MemorySink};
