//! Destinations for committed histograms and the final cutflow report.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::cutflow::CutflowReport;
use crate::error::Result;
use crate::histogram::Histogram;

/// Receives the active histograms of each committed pass under a namespace.
pub trait AggregateSink {
    /// Store `histograms` under `namespace`, replacing anything already there
    /// with the same name.
    fn write(&mut self, namespace: &str, histograms: &[&Histogram]) -> Result<()>;

    /// Store the cutflow report once the pipeline finishes.
    fn write_report(&mut self, report: &CutflowReport) -> Result<()>;
}

/// Keeps everything in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    namespaces: IndexMap<String, IndexMap<String, Histogram>>,
    report: Option<CutflowReport>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Namespaces in the order they were first written.
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }

    /// Histograms of one namespace.
    pub fn histograms(&self, namespace: &str) -> impl Iterator<Item = &Histogram> {
        self.namespaces.get(namespace).into_iter().flat_map(|m| m.values())
    }

    /// One histogram by namespace and name.
    pub fn get(&self, namespace: &str, name: &str) -> Option<&Histogram> {
        self.namespaces.get(namespace)?.get(name)
    }

    /// The cutflow report, once written.
    pub fn report(&self) -> Option<&CutflowReport> {
        self.report.as_ref()
    }
}

impl AggregateSink for MemorySink {
    fn write(&mut self, namespace: &str, histograms: &[&Histogram]) -> Result<()> {
        let ns = self.namespaces.entry(namespace.to_string()).or_default();
        for h in histograms {
            ns.insert(h.name().to_string(), (*h).clone());
        }
        Ok(())
    }

    fn write_report(&mut self, report: &CutflowReport) -> Result<()> {
        self.report = Some(report.clone());
        Ok(())
    }
}

/// Writes `<root>/<namespace>/<name>.json` per histogram and
/// `<root>/cutflow.json` for the report.
#[derive(Debug, Clone)]
pub struct JsonDirSink {
    root: PathBuf,
}

impl JsonDirSink {
    /// Sink rooted at `root`; directories are created on write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}

impl AggregateSink for JsonDirSink {
    fn write(&mut self, namespace: &str, histograms: &[&Histogram]) -> Result<()> {
        let dir = self.root.join(namespace);
        fs::create_dir_all(&dir)?;
        for h in histograms {
            write_json(&dir.join(format!("{}.json", h.name())), h)?;
        }
        log::debug!("wrote {} histograms to {}", histograms.len(), dir.display());
        Ok(())
    }

    fn write_report(&mut self, report: &CutflowReport) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        write_json(&self.root.join("cutflow.json"), report)
    }
}
