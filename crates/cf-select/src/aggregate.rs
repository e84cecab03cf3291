//! Histogram blueprints and the aggregation engine.
//!
//! A blueprint is instantiated the first time it is activated and reused
//! (reset) on later activations. Active histograms are filled for every row
//! that survives a pass and handed to the sink when the pass commits.

use std::collections::HashMap;

use indexmap::IndexMap;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::derived::RowView;
use crate::error::{Result, SelectError};
use crate::histogram::{Axis, Histogram, Histogram1D, Histogram2D};

/// An axis bound to the field that feeds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisSpec {
    /// Stored or derived field name.
    pub field: String,
    /// Binning.
    pub axis: Axis,
}

impl AxisSpec {
    /// `n_bins` equal-width bins over `[lo, hi)`, titled after the field.
    pub fn uniform(field: impl Into<String>, n_bins: usize, lo: f64, hi: f64) -> Result<Self> {
        let field = field.into();
        let axis = Axis::uniform(field.clone(), n_bins, lo, hi)?;
        Ok(Self { field, axis })
    }

    /// Explicit bin edges, titled after the field.
    pub fn variable(field: impl Into<String>, edges: Vec<f64>) -> Result<Self> {
        let field = field.into();
        let axis = Axis::variable(field.clone(), edges)?;
        Ok(Self { field, axis })
    }

    /// Replace the axis title.
    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.axis.title = title.into();
        self
    }
}

/// How to build a histogram and which fields fill it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Blueprint {
    /// One field.
    Hist1D {
        /// Histogram title.
        title: String,
        /// X axis.
        x: AxisSpec,
    },
    /// Two fields, filled pairwise.
    Hist2D {
        /// Histogram title.
        title: String,
        /// X axis.
        x: AxisSpec,
        /// Y axis.
        y: AxisSpec,
    },
}

impl Blueprint {
    /// 1D blueprint.
    pub fn hist1d(title: impl Into<String>, x: AxisSpec) -> Self {
        Blueprint::Hist1D { title: title.into(), x }
    }

    /// 2D blueprint.
    pub fn hist2d(title: impl Into<String>, x: AxisSpec, y: AxisSpec) -> Self {
        Blueprint::Hist2D { title: title.into(), x, y }
    }

    /// Fields read per fill, in axis order.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Blueprint::Hist1D { x, .. } => vec![x.field.as_str()],
            Blueprint::Hist2D { x, y, .. } => vec![x.field.as_str(), y.field.as_str()],
        }
    }

    fn instantiate(&self, name: &str) -> Histogram {
        match self {
            Blueprint::Hist1D { title, x } => {
                Histogram::H1(Histogram1D::new(name, title.clone(), x.axis.clone()))
            }
            Blueprint::Hist2D { title, x, y } => Histogram::H2(Histogram2D::new(
                name,
                title.clone(),
                x.axis.clone(),
                y.axis.clone(),
            )),
        }
    }
}

/// Named blueprints declared before the pipeline runs.
#[derive(Debug, Clone, Default)]
pub struct HistogramCatalog {
    blueprints: IndexMap<String, Blueprint>,
}

impl HistogramCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a blueprint under a unique name.
    pub fn declare(&mut self, name: impl Into<String>, blueprint: Blueprint) -> Result<&mut Self> {
        let name = name.into();
        if self.blueprints.contains_key(&name) {
            return Err(SelectError::DuplicateAggregator(name));
        }
        self.blueprints.insert(name, blueprint);
        Ok(self)
    }

    /// Blueprint by name.
    pub fn get(&self, name: &str) -> Option<&Blueprint> {
        self.blueprints.get(name)
    }

    /// `(name, blueprint)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Blueprint)> {
        self.blueprints.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of blueprints.
    pub fn len(&self) -> usize {
        self.blueprints.len()
    }

    /// `true` if nothing is declared.
    pub fn is_empty(&self) -> bool {
        self.blueprints.is_empty()
    }
}

struct Aggregator {
    histogram: Histogram,
    fields: Vec<String>,
    /// Rows truncated since the last reset.
    truncated_rows: usize,
}

impl Aggregator {
    fn reset(&mut self) {
        self.histogram.reset();
        self.truncated_rows = 0;
    }

    fn fill(&mut self, row: &RowView<'_>) -> Result<()> {
        let columns = self.fields.iter().map(|f| row.values(f)).collect::<Result<Vec<_>>>()?;
        let lengths: Vec<usize> = columns.iter().map(Vec::len).collect();
        let n = lengths.iter().copied().min().unwrap_or(0);
        // A stored scalar against a ragged field fills once per row.
        let truncated = lengths.iter().any(|&len| len != n)
            && self.fields.iter().zip(&lengths).any(|(f, &len)| len == n && !row.is_scalar(f));
        if truncated {
            self.truncated_rows += 1;
            if self.truncated_rows == 1 {
                warn!(
                    "'{}': fields {:?} have lengths {lengths:?} in row {}, filling the first {n} \
                     (further truncated rows this pass are not reported)",
                    self.histogram.name(),
                    self.fields,
                    row.row()
                );
            }
        }
        match &mut self.histogram {
            Histogram::H1(h) => columns[0][..n].iter().for_each(|&v| h.fill(v)),
            Histogram::H2(h) => {
                columns[0][..n].iter().zip(&columns[1][..n]).for_each(|(&x, &y)| h.fill(x, y))
            }
        }
        Ok(())
    }
}

/// Built and active histograms.
pub struct AggregationEngine {
    catalog: HistogramCatalog,
    built: HashMap<String, Aggregator>,
    active: Vec<String>,
}

impl AggregationEngine {
    /// Engine over a catalog; nothing is built until activated.
    pub fn new(catalog: HistogramCatalog) -> Self {
        Self { catalog, built: HashMap::new(), active: Vec::new() }
    }

    /// The declared blueprints.
    pub fn catalog(&self) -> &HistogramCatalog {
        &self.catalog
    }

    /// Activate a blueprint for the next pass, building it on first use and
    /// resetting it otherwise. Returns `false` if it is already active.
    pub fn activate(&mut self, name: &str) -> Result<bool> {
        let Some(blueprint) = self.catalog.get(name) else {
            return Err(SelectError::UnknownAggregator(name.to_string()));
        };
        if self.active.iter().any(|a| a == name) {
            debug!("histogram '{name}' is already active");
            return Ok(false);
        }
        match self.built.get_mut(name) {
            Some(agg) => {
                debug!("resetting histogram '{name}'");
                agg.reset();
            }
            None => {
                debug!("building histogram '{name}'");
                let agg = Aggregator {
                    histogram: blueprint.instantiate(name),
                    fields: blueprint.fields().into_iter().map(str::to_string).collect(),
                    truncated_rows: 0,
                };
                self.built.insert(name.to_string(), agg);
            }
        }
        self.active.push(name.to_string());
        Ok(true)
    }

    /// Names of active histograms in activation order.
    pub fn active(&self) -> &[String] {
        &self.active
    }

    /// Built histogram by name, active or not.
    pub fn histogram(&self, name: &str) -> Option<&Histogram> {
        self.built.get(name).map(|a| &a.histogram)
    }

    /// Active histograms in activation order.
    pub fn active_histograms(&self) -> Vec<&Histogram> {
        self.active.iter().filter_map(|n| self.histogram(n)).collect()
    }

    /// Zero every active histogram.
    pub(crate) fn reset_active(&mut self) {
        for name in &self.active {
            if let Some(agg) = self.built.get_mut(name) {
                agg.reset();
            }
        }
    }

    /// Fill every active histogram from one surviving row.
    pub(crate) fn fill(&mut self, row: &RowView<'_>) -> Result<()> {
        for name in &self.active {
            if let Some(agg) = self.built.get_mut(name) {
                agg.fill(row)?;
            }
        }
        Ok(())
    }

    /// Deactivate everything; built histograms are kept for reuse.
    pub(crate) fn clear_active(&mut self) {
        self.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use cf_store::{Dim, FieldDescriptor, Record, ScalarType};

    use super::*;
    use crate::derived::DerivedFields;

    fn catalog() -> HistogramCatalog {
        let mut c = HistogramCatalog::new();
        let ptot = AxisSpec::uniform("tptot", 10, 0.0, 100.0).unwrap();
        c.declare("ptot", Blueprint::hist1d("momentum", ptot))
            .unwrap()
            .declare(
                "e_vs_p",
                Blueprint::hist2d(
                    "",
                    AxisSpec::uniform("emeas", 4, 0.0, 4.0).unwrap(),
                    AxisSpec::uniform("tptot", 4, 0.0, 40.0).unwrap(),
                ),
            )
            .unwrap();
        c
    }

    fn record(e: f32, p: &[f32]) -> Record {
        let nt = FieldDescriptor::size("nt", 4).unwrap();
        let mut r = Record::new();
        r.bind(FieldDescriptor::scalar("emeas", ScalarType::F32)).unwrap();
        r.bind(nt.clone()).unwrap();
        r.bind(
            FieldDescriptor::array("tptot", ScalarType::F32, vec![Dim::sized_by(&nt).unwrap()])
                .unwrap(),
        )
        .unwrap();
        r.set_scalar("emeas", e).unwrap();
        r.set_size("nt", p.len() as u32).unwrap();
        r.set::<f32>("tptot", p.to_vec()).unwrap();
        r
    }

    #[test]
    fn build_once_then_reset() {
        let mut eng = AggregationEngine::new(catalog());
        assert!(eng.activate("ptot").unwrap());
        assert!(!eng.activate("ptot").unwrap());
        assert!(matches!(eng.activate("nope"), Err(SelectError::UnknownAggregator(_))));

        let derived = DerivedFields::empty();
        let rec = record(1.0, &[15.0, 25.0, 25.5]);
        eng.fill(&RowView::new(0, &rec, &derived)).unwrap();
        assert_eq!(eng.histogram("ptot").unwrap().entries(), 3);

        eng.clear_active();
        assert!(eng.active_histograms().is_empty());
        assert_eq!(eng.histogram("ptot").unwrap().entries(), 3);

        eng.activate("ptot").unwrap();
        assert_eq!(eng.histogram("ptot").unwrap().entries(), 0);
    }

    #[test]
    fn pairwise_fill_truncates_to_shortest() {
        let mut eng = AggregationEngine::new(catalog());
        eng.activate("e_vs_p").unwrap();
        let derived = DerivedFields::empty();
        let rec = record(1.0, &[10.0, 20.0, 30.0]);
        eng.fill(&RowView::new(0, &rec, &derived)).unwrap();

        let h = eng.histogram("e_vs_p").unwrap().as_h2().unwrap();
        assert_eq!(h.entries, 1);
        assert_eq!(h.content(1, 1), Some(1.0));
        assert_eq!(eng.built["e_vs_p"].truncated_rows, 0);
    }

    #[test]
    fn ragged_truncation_counted_per_pass() {
        let mut c = HistogramCatalog::new();
        let p = AxisSpec::uniform("tptot", 4, 0.0, 40.0).unwrap();
        let lead = AxisSpec::uniform("lead", 4, 0.0, 40.0).unwrap();
        c.declare("p_vs_lead", Blueprint::hist2d("", p, lead)).unwrap();
        let derived = DerivedFields::builder()
            .field("lead", &["tptot"], |inp| Ok(inp.values("tptot")?.into_iter().take(1).collect()))
            .build()
            .unwrap();
        let mut eng = AggregationEngine::new(c);
        eng.activate("p_vs_lead").unwrap();

        for (row, p) in [[10.0f32, 20.0], [30.0, 35.0]].iter().enumerate() {
            let rec = record(1.0, p);
            eng.fill(&RowView::new(row, &rec, &derived)).unwrap();
        }
        assert_eq!(eng.histogram("p_vs_lead").unwrap().entries(), 2);
        assert_eq!(eng.built["p_vs_lead"].truncated_rows, 2);

        eng.reset_active();
        assert_eq!(eng.built["p_vs_lead"].truncated_rows, 0);
    }

    #[test]
    fn duplicate_blueprint_rejected() {
        let mut c = catalog();
        let bp = Blueprint::hist1d("", AxisSpec::uniform("emeas", 1, 0.0, 1.0).unwrap());
        assert!(matches!(c.declare("ptot", bp), Err(SelectError::DuplicateAggregator(_))));
        assert_eq!(c.iter().map(|(n, _)| n).collect::<Vec<_>>(), vec!["ptot", "e_vs_p"]);
    }
}
