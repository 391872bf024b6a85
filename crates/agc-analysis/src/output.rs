//! Histogram JSON files.
//!
//! Output and reference files share one layout: a JSON object mapping each
//! histogram name to its edges and its contents, flow cells included.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use agc_core::{Error, Histogram, Result};

/// Serialized form of one histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramRecord {
    /// Bin edges.
    pub edges: Vec<f64>,
    /// Contents, underflow first and overflow last.
    pub contents: Vec<f64>,
}

impl From<&Histogram> for HistogramRecord {
    fn from(h: &Histogram) -> Self {
        Self { edges: h.edges.clone(), contents: h.contents.clone() }
    }
}

/// Name-sorted map of records.
pub type HistogramFile = BTreeMap<String, HistogramRecord>;

/// Records keyed by histogram name. Duplicate names are an error.
pub fn to_records(histograms: &[Histogram]) -> Result<HistogramFile> {
    let mut out = HistogramFile::new();
    for h in histograms {
        if out.insert(h.name.clone(), HistogramRecord::from(h)).is_some() {
            return Err(Error::Execution(format!("histogram '{}' produced twice", h.name)));
        }
    }
    Ok(out)
}

/// Write `histograms` to `path`, replacing any previous content.
///
/// The file is written next to `path` under a temporary name and renamed
/// into place, so `path` never holds a partial file.
pub fn save_histograms(histograms: &[Histogram], path: &Path) -> Result<()> {
    let records = to_records(histograms)?;
    let text = serde_json::to_string_pretty(&records)? + "\n";
    let tmp = temp_path(path);
    if let Err(e) = write_synced(&tmp, text.as_bytes()).and_then(|()| std::fs::rename(&tmp, path)) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    log::info!("wrote {} histograms to {}", records.len(), path.display());
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("histograms.json");
    path.with_file_name(format!(".{name}.tmp.{}", std::process::id()))
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Read a histogram file.
pub fn load_histograms(path: &Path) -> Result<HistogramFile> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Input(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&text).map_err(|e| Error::Input(format!("malformed histogram file {}: {e}", path.display())))
}
