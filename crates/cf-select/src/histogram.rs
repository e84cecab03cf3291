//! Binned 1D and 2D histograms with unit-weight fills.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SelectError};

/// Bin edges of one axis plus a display title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    /// Axis title.
    pub title: String,
    /// Bin edges (strictly increasing, length = n_bins + 1).
    pub edges: Vec<f64>,
}

impl Axis {
    /// `n_bins` equal-width bins over `[lo, hi)`.
    pub fn uniform(title: impl Into<String>, n_bins: usize, lo: f64, hi: f64) -> Result<Self> {
        let title = title.into();
        if n_bins == 0 {
            return Err(invalid(&title, "at least one bin is required"));
        }
        if !(lo.is_finite() && hi.is_finite() && lo < hi) {
            return Err(invalid(&title, format!("invalid range [{lo}, {hi})")));
        }
        let width = (hi - lo) / n_bins as f64;
        let mut edges: Vec<f64> = (0..n_bins).map(|i| lo + i as f64 * width).collect();
        edges.push(hi);
        Self::variable(title, edges)
    }

    /// Explicit bin edges.
    pub fn variable(title: impl Into<String>, edges: Vec<f64>) -> Result<Self> {
        let title = title.into();
        if edges.len() < 2 {
            return Err(invalid(&title, "at least two edges are required"));
        }
        if edges.iter().any(|e| !e.is_finite()) {
            return Err(invalid(&title, "edges must be finite"));
        }
        if edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err(invalid(&title, "edges must be strictly increasing"));
        }
        Ok(Self { title, edges })
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    /// Lower edge of the first bin.
    pub fn min(&self) -> f64 {
        self.edges[0]
    }

    /// Upper edge of the last bin.
    pub fn max(&self) -> f64 {
        self.edges[self.edges.len() - 1]
    }

    /// Bin containing `val`; `None` below, above or NaN.
    pub fn find_bin(&self, val: f64) -> Option<usize> {
        if val.is_nan() || val < self.min() || val >= self.max() {
            return None;
        }
        Some(self.edges.partition_point(|e| *e <= val) - 1)
    }

    fn locate(&self, val: f64) -> Position {
        if val < self.min() {
            Position::Under
        } else {
            match self.find_bin(val) {
                Some(b) => Position::Bin(b),
                None => Position::Over,
            }
        }
    }
}

enum Position {
    Under,
    Bin(usize),
    Over,
}

fn invalid(axis: &str, reason: impl Into<String>) -> SelectError {
    SelectError::InvalidAxis { axis: axis.to_string(), reason: reason.into() }
}

/// 1D histogram with under/overflow tallies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram1D {
    /// Histogram name.
    pub name: String,
    /// Histogram title.
    pub title: String,
    /// Binning.
    pub x: Axis,
    /// Bin contents (excluding under/overflow).
    pub bin_content: Vec<f64>,
    /// Fills below the first edge. NaN fills count here too.
    pub underflow: f64,
    /// Fills at or above the last edge.
    pub overflow: f64,
    /// Number of in-range fills.
    pub entries: u64,
}

impl Histogram1D {
    /// Empty histogram.
    pub fn new(name: impl Into<String>, title: impl Into<String>, x: Axis) -> Self {
        let n = x.n_bins();
        Self {
            name: name.into(),
            title: title.into(),
            x,
            bin_content: vec![0.0; n],
            underflow: 0.0,
            overflow: 0.0,
            entries: 0,
        }
    }

    /// Add one unit-weight entry.
    pub fn fill(&mut self, val: f64) {
        if val.is_nan() {
            self.underflow += 1.0;
            return;
        }
        match self.x.locate(val) {
            Position::Under => self.underflow += 1.0,
            Position::Over => self.overflow += 1.0,
            Position::Bin(b) => {
                self.bin_content[b] += 1.0;
                self.entries += 1;
            }
        }
    }

    /// Content of the bin containing `val`, `0.0` outside the range.
    pub fn content_at(&self, val: f64) -> f64 {
        self.x.find_bin(val).map_or(0.0, |b| self.bin_content[b])
    }

    /// Sum of in-range bin contents.
    pub fn integral(&self) -> f64 {
        self.bin_content.iter().sum()
    }

    /// Zero all contents and counters.
    pub fn reset(&mut self) {
        self.bin_content.fill(0.0);
        self.underflow = 0.0;
        self.overflow = 0.0;
        self.entries = 0;
    }
}

/// 2D histogram; contents are row-major over `(x bin, y bin)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram2D {
    /// Histogram name.
    pub name: String,
    /// Histogram title.
    pub title: String,
    /// X binning.
    pub x: Axis,
    /// Y binning.
    pub y: Axis,
    /// `n_x * n_y` contents, index `ix * n_y + iy`.
    pub bin_content: Vec<f64>,
    /// Fills outside the range on either axis.
    pub out_of_range: f64,
    /// Number of in-range fills.
    pub entries: u64,
}

impl Histogram2D {
    /// Empty histogram.
    pub fn new(name: impl Into<String>, title: impl Into<String>, x: Axis, y: Axis) -> Self {
        let n = x.n_bins() * y.n_bins();
        Self {
            name: name.into(),
            title: title.into(),
            x,
            y,
            bin_content: vec![0.0; n],
            out_of_range: 0.0,
            entries: 0,
        }
    }

    /// Add one unit-weight entry.
    pub fn fill(&mut self, x: f64, y: f64) {
        match (self.x.find_bin(x), self.y.find_bin(y)) {
            (Some(ix), Some(iy)) => {
                self.bin_content[ix * self.y.n_bins() + iy] += 1.0;
                self.entries += 1;
            }
            _ => self.out_of_range += 1.0,
        }
    }

    /// Content of bin `(ix, iy)`.
    pub fn content(&self, ix: usize, iy: usize) -> Option<f64> {
        if ix >= self.x.n_bins() || iy >= self.y.n_bins() {
            return None;
        }
        Some(self.bin_content[ix * self.y.n_bins() + iy])
    }

    /// Content of the bin containing `(x, y)`, `0.0` outside the range.
    pub fn content_at(&self, x: f64, y: f64) -> f64 {
        match (self.x.find_bin(x), self.y.find_bin(y)) {
            (Some(ix), Some(iy)) => self.bin_content[ix * self.y.n_bins() + iy],
            _ => 0.0,
        }
    }

    /// Zero all contents and counters.
    pub fn reset(&mut self) {
        self.bin_content.fill(0.0);
        self.out_of_range = 0.0;
        self.entries = 0;
    }
}

/// A histogram of either dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Histogram {
    /// One axis.
    #[serde(rename = "h1")]
    H1(Histogram1D),
    /// Two axes.
    #[serde(rename = "h2")]
    H2(Histogram2D),
}

impl Histogram {
    /// Histogram name.
    pub fn name(&self) -> &str {
        match self {
            Histogram::H1(h) => &h.name,
            Histogram::H2(h) => &h.name,
        }
    }

    /// Number of axes.
    pub fn dimension(&self) -> usize {
        match self {
            Histogram::H1(_) => 1,
            Histogram::H2(_) => 2,
        }
    }

    /// In-range fills.
    pub fn entries(&self) -> u64 {
        match self {
            Histogram::H1(h) => h.entries,
            Histogram::H2(h) => h.entries,
        }
    }

    /// Zero all contents and counters.
    pub fn reset(&mut self) {
        match self {
            Histogram::H1(h) => h.reset(),
            Histogram::H2(h) => h.reset(),
        }
    }

    /// The 1D histogram, if this is one.
    pub fn as_h1(&self) -> Option<&Histogram1D> {
        match self {
            Histogram::H1(h) => Some(h),
            Histogram::H2(_) => None,
        }
    }

    /// The 2D histogram, if this is one.
    pub fn as_h2(&self) -> Option<&Histogram2D> {
        match self {
            Histogram::H2(h) => Some(h),
            Histogram::H1(_) => None,
        }
    }
}
