//! Declarative pass schedules read from YAML or JSON.
//!
//! ```yaml
//! dataset: e950
//! histograms:
//!   - name: ptot
//!     x: { field: tptot, bins: 50, range: [0, 1000] }
//!   - name: e_vs_ptot
//!     x: { field: emeas, edges: [0, 250, 500, 1000] }
//!     y: { field: ptot_sum, bins: 20, range: [0, 1000] }
//! passes:
//!   - histograms: [ptot]
//!   - cuts: [two_tracks, "!beam_gas"]
//!     histograms: [ptot, e_vs_ptot]
//! materialize: true
//! ```
//!
//! Cuts prefixed with `!` are scheduled negated. Cut names refer to the
//! predicate catalog given to the pipeline in code.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::aggregate::{AxisSpec, Blueprint, HistogramCatalog};
use crate::error::{Result, SelectError};
use crate::pipeline::{PassSummary, Pipeline};
use crate::sink::AggregateSink;

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Dataset name used in log messages.
    #[serde(default)]
    pub dataset: Option<String>,
    /// Histogram blueprints added to the catalog.
    #[serde(default)]
    pub histograms: Vec<HistogramConfig>,
    /// Passes in execution order.
    #[serde(default)]
    pub passes: Vec<PassConfig>,
    /// Skim the survivors into the output store after the last pass.
    #[serde(default)]
    pub materialize: bool,
}

/// One pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PassConfig {
    /// Cuts to schedule; `!name` schedules `name` negated.
    #[serde(default)]
    pub cuts: Vec<String>,
    /// Histograms to activate.
    #[serde(default)]
    pub histograms: Vec<String>,
    /// Namespace override for this pass.
    #[serde(default)]
    pub namespace: Option<String>,
}

/// A histogram blueprint; `y` makes it 2D.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistogramConfig {
    /// Unique name.
    pub name: String,
    /// Histogram title.
    #[serde(default)]
    pub title: String,
    /// X axis.
    pub x: AxisConfig,
    /// Optional Y axis.
    #[serde(default)]
    pub y: Option<AxisConfig>,
}

/// Axis given either as `bins` + `range` or as explicit `edges`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AxisConfig {
    /// Field feeding the axis.
    pub field: String,
    /// Axis title; defaults to the field name.
    #[serde(default)]
    pub title: Option<String>,
    /// Number of equal-width bins.
    #[serde(default)]
    pub bins: Option<usize>,
    /// `[lo, hi)` for equal-width bins.
    #[serde(default)]
    pub range: Option<[f64; 2]>,
    /// Explicit bin edges.
    #[serde(default)]
    pub edges: Option<Vec<f64>>,
}

impl AxisConfig {
    /// Resolve into an [`AxisSpec`].
    pub fn to_spec(&self) -> Result<AxisSpec> {
        let spec = match (&self.edges, self.bins, self.range) {
            (Some(edges), None, None) => AxisSpec::variable(&self.field, edges.clone())?,
            (None, Some(bins), Some([lo, hi])) => AxisSpec::uniform(&self.field, bins, lo, hi)?,
            _ => {
                return Err(SelectError::Config(format!(
                    "axis '{}' needs either `edges` or both `bins` and `range`",
                    self.field
                )));
            }
        };
        Ok(match &self.title {
            Some(t) => spec.titled(t.clone()),
            None => spec,
        })
    }
}

impl HistogramConfig {
    /// Resolve into a [`Blueprint`].
    pub fn blueprint(&self) -> Result<Blueprint> {
        let x = self.x.to_spec()?;
        Ok(match &self.y {
            Some(y) => Blueprint::hist2d(self.title.clone(), x, y.to_spec()?),
            None => Blueprint::hist1d(self.title.clone(), x),
        })
    }
}

/// Split `"!name"` into `("name", true)`.
pub fn parse_cut(spec: &str) -> (&str, bool) {
    match spec.strip_prefix('!') {
        Some(name) => (name, true),
        None => (spec, false),
    }
}

impl PipelineConfig {
    /// Read from `path`: JSON for a `.json` extension, YAML otherwise.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
        let cfg = if ext == "json" {
            serde_json::from_slice(&bytes)?
        } else {
            serde_yaml_ng::from_slice(&bytes)?
        };
        log::debug!("loaded pipeline config from {}", path.display());
        Ok(cfg)
    }

    /// Parse YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(text)?)
    }

    /// Parse JSON text.
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Add every configured blueprint to `catalog`.
    pub fn extend_catalog(&self, catalog: &mut HistogramCatalog) -> Result<()> {
        for h in &self.histograms {
            catalog.declare(h.name.clone(), h.blueprint()?)?;
        }
        Ok(())
    }

    /// Blueprints of this config alone.
    pub fn histogram_catalog(&self) -> Result<HistogramCatalog> {
        let mut catalog = HistogramCatalog::new();
        self.extend_catalog(&mut catalog)?;
        Ok(catalog)
    }
}

impl<S: AggregateSink> Pipeline<S> {
    /// Run every configured pass in order, then skim if `materialize` is set.
    ///
    /// Stops at the first failing pass; passes before it stay committed.
    pub fn run_config(&mut self, config: &PipelineConfig) -> Result<Vec<PassSummary>> {
        let mut summaries = Vec::with_capacity(config.passes.len());
        for pass in &config.passes {
            for spec in &pass.cuts {
                let (name, negated) = parse_cut(spec);
                self.add_predicate(name, negated)?;
            }
            for name in &pass.histograms {
                self.add_aggregator(name)?;
            }
            let summary = match &pass.namespace {
                Some(ns) => self.run_pass_into(ns)?,
                None => self.run_pass()?,
            };
            summaries.push(summary);
        }
        if config.materialize {
            self.skim()?;
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
dataset: e950
histograms:
  - name: ptot
    title: total momentum
    x: { field: tptot, bins: 50, range: [0, 1000] }
  - name: e_vs_p
    x: { field: emeas, edges: [0, 250, 500, 1000], title: "E [MeV]" }
    y: { field: tptot, bins: 4, range: [0, 40] }
passes:
  - histograms: [ptot]
  - cuts: [two_tracks, "!beam_gas"]
    histograms: [ptot, e_vs_p]
    namespace: final
"#;

    #[test]
    fn parse_yaml() {
        let cfg = PipelineConfig::from_yaml_str(YAML).unwrap();
        assert_eq!(cfg.dataset.as_deref(), Some("e950"));
        assert_eq!(cfg.passes.len(), 2);
        assert_eq!(cfg.passes[1].cuts, vec!["two_tracks", "!beam_gas"]);
        assert_eq!(cfg.passes[1].namespace.as_deref(), Some("final"));
        assert!(!cfg.materialize);

        let catalog = cfg.histogram_catalog().unwrap();
        assert_eq!(catalog.len(), 2);
        match catalog.get("e_vs_p").unwrap() {
            Blueprint::Hist2D { x, y, .. } => {
                assert_eq!(x.axis.title, "E [MeV]");
                assert_eq!(x.axis.n_bins(), 3);
                assert_eq!(y.field, "tptot");
            }
            other => panic!("expected 2D, got {other:?}"),
        }
    }

    #[test]
    fn json_and_yaml_agree() {
        let yaml = PipelineConfig::from_yaml_str(YAML).unwrap();
        let json = serde_json::to_string(&yaml).unwrap();
        assert_eq!(PipelineConfig::from_json_str(&json).unwrap(), yaml);
    }

    #[test]
    fn from_path_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml_path = dir.path().join("passes.yaml");
        std::fs::write(&yaml_path, YAML).unwrap();
        let cfg = PipelineConfig::from_path(&yaml_path).unwrap();

        let json_path = dir.path().join("passes.json");
        std::fs::write(&json_path, serde_json::to_vec(&cfg).unwrap()).unwrap();
        assert_eq!(PipelineConfig::from_path(&json_path).unwrap(), cfg);
    }

    #[test]
    fn axis_needs_binning() {
        let axis =
            AxisConfig { field: "x".into(), title: None, bins: Some(3), range: None, edges: None };
        assert!(matches!(axis.to_spec(), Err(SelectError::Config(_))));
        assert!(PipelineConfig::from_yaml_str("passes: [{ cutz: [a] }]").is_err());
    }

    #[test]
    fn negation_prefix() {
        assert_eq!(parse_cut("!veto"), ("veto", true));
        assert_eq!(parse_cut("veto"), ("veto", false));
    }
}
