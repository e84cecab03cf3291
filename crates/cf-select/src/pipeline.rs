//! Pipeline driver: staged passes over an input store.
//!
//! Each pass visits the rows still alive, evaluates the scheduled predicates,
//! fills the active histograms from the rows that pass, and only then
//! commits: the sink receives the histograms, the mask loses the rejected
//! rows and the stage is appended to the provenance log. A pass that fails
//! on any row leaves mask, provenance and schedule exactly as they were.
//!
//! Friend stores are read in lockstep with the input: row `i` of every
//! friend is loaded together with row `i` of the input, and their fields are
//! visible to predicates, derived fields and histograms by name.

use log::{debug, info, warn};
use serde::Serialize;

use cf_store::{Record, RecordStore};

use crate::aggregate::{AggregationEngine, HistogramCatalog};
use crate::cutflow::{CutflowReport, ProvenanceLog};
use crate::cuts::{CutCatalog, SelectionEngine};
use crate::derived::{DerivedFields, RowView};
use crate::error::{Result, SelectError};
use crate::mask::SelectionMask;
use crate::sink::{AggregateSink, MemorySink};

/// Outcome of one committed pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    /// Namespace the histograms were written under.
    pub namespace: String,
    /// Stage name recorded in the provenance log.
    pub stage: String,
    /// Rows alive before the pass.
    pub previous: usize,
    /// Rows alive after the pass.
    pub survivors: usize,
    /// Histograms written.
    pub histograms: Vec<String>,
}

/// Everything a finished pipeline hands back.
pub struct Finished<S> {
    /// Sink holding every namespace and the cutflow report.
    pub sink: S,
    /// Flushed output store, if one was attached.
    pub output: Option<RecordStore>,
    /// Final cutflow.
    pub cutflow: CutflowReport,
}

/// Configures a [`Pipeline`].
pub struct PipelineBuilder<S = MemorySink> {
    input: RecordStore,
    friends: Vec<RecordStore>,
    dataset: String,
    cuts: CutCatalog,
    histograms: HistogramCatalog,
    derived: DerivedFields,
    output: Option<RecordStore>,
    sink: S,
}

impl PipelineBuilder<MemorySink> {
    fn new(input: RecordStore) -> Self {
        let dataset = input.name().to_string();
        Self {
            input,
            friends: Vec::new(),
            dataset,
            cuts: CutCatalog::new(),
            histograms: HistogramCatalog::new(),
            derived: DerivedFields::empty(),
            output: None,
            sink: MemorySink::new(),
        }
    }
}

impl<S: AggregateSink> PipelineBuilder<S> {
    /// Dataset name used in log messages; defaults to the input table name.
    pub fn dataset(mut self, name: impl Into<String>) -> Self {
        self.dataset = name.into();
        self
    }

    /// Another input store read at the same row index as the main one.
    ///
    /// Its fields must already be bound and must not share names with the
    /// fields of any other input.
    pub fn friend(mut self, store: RecordStore) -> Self {
        self.friends.push(store);
        self
    }

    /// Predicate catalog.
    pub fn cuts(mut self, cuts: CutCatalog) -> Self {
        self.cuts = cuts;
        self
    }

    /// Histogram catalog.
    pub fn histograms(mut self, histograms: HistogramCatalog) -> Self {
        self.histograms = histograms;
        self
    }

    /// Derived fields.
    pub fn derived(mut self, derived: DerivedFields) -> Self {
        self.derived = derived;
        self
    }

    /// Output store for materialized rows. Its fields must already be bound.
    pub fn output(mut self, output: RecordStore) -> Self {
        self.output = Some(output);
        self
    }

    /// Replace the sink.
    pub fn sink<T: AggregateSink>(self, sink: T) -> PipelineBuilder<T> {
        PipelineBuilder {
            input: self.input,
            friends: self.friends,
            dataset: self.dataset,
            cuts: self.cuts,
            histograms: self.histograms,
            derived: self.derived,
            output: self.output,
            sink,
        }
    }

    /// Validate field references and build the pipeline.
    pub fn build(self) -> Result<Pipeline<S>> {
        let rows = self.input.row_count();
        for friend in &self.friends {
            if friend.row_count() != rows {
                return Err(SelectError::Config(format!(
                    "friend store '{}' has {} rows, input '{}' has {rows}",
                    friend.name(),
                    friend.row_count(),
                    self.input.name()
                )));
            }
        }
        let records: Vec<&Record> =
            std::iter::once(&self.input).chain(&self.friends).map(RecordStore::record).collect();
        for (i, record) in records.iter().enumerate() {
            if let Some(field) =
                record.fields().find(|f| records[i + 1..].iter().any(|r| r.contains(f.name())))
            {
                return Err(SelectError::DuplicateField(field.name().to_string()));
            }
        }
        self.derived.validate(&records)?;

        let known = |f: &str| records.iter().any(|r| r.contains(f)) || self.derived.contains(f);
        for (name, blueprint) in self.histograms.iter() {
            if let Some(field) = blueprint.fields().into_iter().find(|f| !known(*f)) {
                return Err(SelectError::Config(format!(
                    "histogram '{name}' reads unknown field '{field}'"
                )));
            }
        }
        if let Some(output) = &self.output
            && !output.mode().is_write()
        {
            return Err(SelectError::Config(format!(
                "output store '{}' is not writable",
                output.name()
            )));
        }

        info!(
            "[{}] pipeline over {rows} rows ({} friend stores)",
            self.dataset,
            self.friends.len()
        );
        Ok(Pipeline {
            dataset: self.dataset,
            selection: SelectionEngine::new(self.cuts, rows),
            aggregation: AggregationEngine::new(self.histograms),
            input: self.input,
            friends: self.friends,
            derived: self.derived,
            output: self.output,
            sink: self.sink,
            materialized: Materialized::Pending,
        })
    }
}

/// State of the once-only materialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Materialized {
    Pending,
    Done,
    /// Appending staged rows failed; the output store was dropped unflushed.
    Abandoned,
}

/// Staged selection over one input store and its friends.
///
/// # Example
///
/// ```no_run
/// use cf_select::{AxisSpec, Blueprint, CutCatalog, HistogramCatalog, Pipeline};
/// use cf_store::{FieldDescriptor, OpenMode, RecordStore, ScalarType};
///
/// let mut input = RecordStore::open("events.parquet", OpenMode::Read)?;
/// input.bind(FieldDescriptor::scalar("emeas", ScalarType::F32))?;
///
/// let mut cuts = CutCatalog::new();
/// cuts.declare("low_energy", |row| Ok(row.scalar("emeas")? < 500.0))?;
/// let mut hists = HistogramCatalog::new();
/// hists.declare("emeas", Blueprint::hist1d("E", AxisSpec::uniform("emeas", 50, 0.0, 1e3)?))?;
///
/// let mut pipeline = Pipeline::builder(input).cuts(cuts).histograms(hists).build()?;
/// pipeline.add_aggregator("emeas")?;
/// pipeline.run_pass()?;
/// pipeline.add_predicate("low_energy", false)?;
/// pipeline.add_aggregator("emeas")?;
/// pipeline.run_pass()?;
/// let done = pipeline.finish()?;
/// println!("{:?}", done.cutflow.survivors());
/// # Ok::<(), cf_select::SelectError>(())
/// ```
pub struct Pipeline<S = MemorySink> {
    dataset: String,
    input: RecordStore,
    friends: Vec<RecordStore>,
    derived: DerivedFields,
    selection: SelectionEngine,
    aggregation: AggregationEngine,
    output: Option<RecordStore>,
    sink: S,
    materialized: Materialized,
}

impl Pipeline<MemorySink> {
    /// Start configuring a pipeline over `input`, whose fields must already be bound.
    pub fn builder(input: RecordStore) -> PipelineBuilder<MemorySink> {
        PipelineBuilder::new(input)
    }
}

impl<S: AggregateSink> Pipeline<S> {
    /// Dataset name.
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Schedule a catalog predicate for the next pass.
    pub fn add_predicate(&mut self, name: &str, negated: bool) -> Result<bool> {
        self.selection.schedule(name, negated)
    }

    /// Schedule a predicate that is not in the catalog.
    pub fn add_adhoc_predicate<F>(&mut self, name: &str, cut: F, negated: bool) -> Result<bool>
    where
        F: Fn(&RowView<'_>) -> Result<bool> + Send + Sync + 'static,
    {
        self.selection.schedule_adhoc(name, cut, negated)
    }

    /// Activate a histogram blueprint for the next pass.
    pub fn add_aggregator(&mut self, name: &str) -> Result<bool> {
        self.aggregation.activate(name)
    }

    /// Run a pass, writing histograms under the default namespace.
    pub fn run_pass(&mut self) -> Result<PassSummary> {
        let namespace = self.selection.namespace();
        self.run_pass_into(&namespace)
    }

    /// Run a pass, writing histograms under `namespace`.
    pub fn run_pass_into(&mut self, namespace: &str) -> Result<PassSummary> {
        let stage = self.selection.stage_name();
        let previous = self.selection.survivors();
        info!("[{}] starting '{stage}' pass over {previous} rows", self.dataset);

        self.aggregation.reset_active();
        let alive: Vec<usize> = self.selection.mask().alive().collect();
        let mut rejected = Vec::new();
        for row in alive {
            let view = Self::load_row(&mut self.input, &mut self.friends, &self.derived, row)?;
            let keep = self.selection.evaluate(&view).map_err(|e| e.at_row(row))?;
            if keep {
                self.aggregation.fill(&view).map_err(|e| e.at_row(row))?;
            } else {
                rejected.push(row);
            }
        }

        let histograms: Vec<String> = self.aggregation.active().to_vec();
        self.sink.write(namespace, &self.aggregation.active_histograms())?;
        let record = self.selection.commit(&rejected);
        self.aggregation.clear_active();

        info!(
            "[{}] '{}' pass finished: {} of {previous} rows selected",
            self.dataset, record.name, record.survivors
        );
        Ok(PassSummary {
            namespace: namespace.to_string(),
            stage: record.name,
            previous,
            survivors: record.survivors,
            histograms,
        })
    }

    /// Write one output row per alive input row.
    ///
    /// `compute` receives the input row and the output record to fill. Rows
    /// are staged in memory and appended only once `compute` has succeeded
    /// for every alive row, so a failed run leaves the output store untouched
    /// and may be retried. After a successful run later calls return `Ok(0)`.
    pub fn materialize_output<F>(&mut self, mut compute: F) -> Result<usize>
    where
        F: FnMut(&RowView<'_>, &mut Record) -> Result<()>,
    {
        match self.materialized {
            Materialized::Done => {
                debug!("[{}] output already materialized", self.dataset);
                return Ok(0);
            }
            Materialized::Abandoned => {
                return Err(SelectError::Config(
                    "output store was discarded after a failed write".into(),
                ));
            }
            Materialized::Pending => {}
        }
        let Some(mut scratch) = self.output.as_ref().map(|o| o.record().clone()) else {
            return Err(SelectError::Config("no output store attached".into()));
        };

        let alive: Vec<usize> = self.selection.mask().alive().collect();
        let mut staged = Vec::with_capacity(alive.len());
        for &row in &alive {
            let view = Self::load_row(&mut self.input, &mut self.friends, &self.derived, row)?;
            scratch.clear();
            compute(&view, &mut scratch).map_err(|e| e.at_row(row))?;
            staged.push(scratch.clone());
        }

        let Some(output) = self.output.as_mut() else {
            return Err(SelectError::Config("no output store attached".into()));
        };
        let written = staged.len();
        let appended = staged.into_iter().try_for_each(|record| {
            *output.record_mut() = record;
            output.append_row()
        });
        if let Err(e) = appended.and_then(|()| output.flush()) {
            let name = output.name().to_string();
            warn!("[{}] dropping output store {name} after a failed write", self.dataset);
            self.output = None;
            self.materialized = Materialized::Abandoned;
            return Err(e.into());
        }
        self.materialized = Materialized::Done;
        info!("[{}] materialized {written} rows into {}", self.dataset, output.name());
        Ok(written)
    }

    /// Materialize by copying every output field that is also bound in the
    /// input or a friend store.
    pub fn skim(&mut self) -> Result<usize> {
        let Some(output) = &self.output else {
            return Err(SelectError::Config("no output store attached".into()));
        };
        let shared: Vec<String> = output
            .record()
            .fields()
            .map(|f| f.name().to_string())
            .filter(|n| self.inputs().any(|store| store.record().contains(n)))
            .collect();
        self.materialize_output(|row, out| {
            for name in &shared {
                if let Some(from) = row.stored(name) {
                    out.copy_field(from, name)?;
                }
            }
            Ok(())
        })
    }

    /// Rows currently alive.
    pub fn survivor_count(&self) -> usize {
        self.selection.survivors()
    }

    /// Survival mask.
    pub fn mask(&self) -> &SelectionMask {
        self.selection.mask()
    }

    /// Committed stages.
    pub fn provenance(&self) -> &ProvenanceLog {
        self.selection.provenance()
    }

    /// Cutflow curves over the committed stages.
    pub fn cutflow(&self) -> CutflowReport {
        self.selection.provenance().report()
    }

    /// Selection state: schedule, applied set and mask.
    pub fn selection(&self) -> &SelectionEngine {
        &self.selection
    }

    /// Histogram state.
    pub fn aggregation(&self) -> &AggregationEngine {
        &self.aggregation
    }

    /// The sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Input store.
    pub fn input(&self) -> &RecordStore {
        &self.input
    }

    /// Friend stores in the order they were added.
    pub fn friends(&self) -> &[RecordStore] {
        &self.friends
    }

    /// Output store, if one is attached.
    pub fn output(&self) -> Option<&RecordStore> {
        self.output.as_ref()
    }

    fn inputs(&self) -> impl Iterator<Item = &RecordStore> {
        std::iter::once(&self.input).chain(&self.friends)
    }

    /// Load `row` from the input and every friend and view it.
    fn load_row<'a>(
        input: &'a mut RecordStore,
        friends: &'a mut [RecordStore],
        derived: &'a DerivedFields,
        row: usize,
    ) -> Result<RowView<'a>> {
        input.get_row(row).map_err(|e| SelectError::from(e).at_row(row))?;
        for friend in friends.iter_mut() {
            friend.get_row(row).map_err(|e| SelectError::from(e).at_row(row))?;
        }
        Ok(RowView::new(row, input.record(), derived)
            .with_friends(friends.iter().map(RecordStore::record)))
    }

    /// Write the cutflow report, flush the output store and hand back the results.
    pub fn finish(mut self) -> Result<Finished<S>> {
        let cutflow = self.cutflow();
        self.sink.write_report(&cutflow)?;
        if let Some(output) = self.output.as_mut() {
            output.flush()?;
        }
        info!(
            "[{}] finished after {} passes, {} of {} rows selected",
            self.dataset,
            self.selection.passes(),
            self.selection.survivors(),
            self.selection.provenance().initial()
        );
        Ok(Finished { sink: self.sink, output: self.output, cutflow })
    }
}
