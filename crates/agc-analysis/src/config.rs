//! Analysis constants.
//!
//! Every number the selection, the normalization and the post-processing
//! depend on lives in [`AnalysisConfig`]. The defaults reproduce the CMS
//! open data ttbar analysis; a JSON file can override any subset of fields.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use agc_core::{Error, Result};

/// Prefix every catalog path starts with.
pub const DEFAULT_REMOTE_PREFIX: &str = "https://xrootd-local.unl.edu:1094//store/user/AGC";

/// One histogrammed signal region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Region name used in histogram names (`4j1b`).
    pub name: String,
    /// Column filled into the histogram.
    pub observable: String,
    /// Number of bins.
    pub n_bins: usize,
    /// Lower edge.
    pub low: f64,
    /// Upper edge.
    pub high: f64,
}

impl Region {
    /// Region with the given binning.
    pub fn new(name: &str, observable: &str, n_bins: usize, low: f64, high: f64) -> Self {
        Self { name: name.to_string(), observable: observable.to_string(), n_bins, low, high }
    }
}

/// A weight variation applied to every nominal sample of one process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightVariationRule {
    /// Label base; the labels are `{base}_up` and `{base}_down`.
    pub base: String,
    /// Replacement for the event weight, yielding the up and down values.
    pub expr: String,
}

/// Tunable constants of the analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Integrated luminosity in /pb.
    pub luminosity: f64,
    /// Cross section per process in pb.
    pub cross_sections: BTreeMap<String, f64>,
    /// Histogrammed regions.
    pub regions: Vec<Region>,
    /// Minimum pT for selected electrons, muons and jets.
    pub pt_threshold: f64,
    /// B-tag score above which a selected jet counts as b-tagged.
    pub btag_threshold: f64,
    /// Extra weight variations per process, applied to nominal samples only.
    pub weight_variations: BTreeMap<String, WeightVariationRule>,
    /// Window kept by the post-processor.
    pub slice: (f64, f64),
    /// Rebin factor applied after slicing.
    pub rebin: usize,
    /// Prefix all catalog paths must carry.
    pub remote_prefix: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let cross_sections = BTreeMap::from([
            ("ttbar".to_string(), 396.87 + 332.97),
            ("single_top_s_chan".to_string(), 2.0268 + 1.2676),
            ("single_top_t_chan".to_string(), (36.993 + 22.175) / 0.252),
            ("single_top_tW".to_string(), 37.936 + 37.906),
            ("wjets".to_string(), 61457.0 * 0.252),
        ]);
        let weight_variations = BTreeMap::from([(
            "wjets".to_string(),
            WeightVariationRule { base: "scale_var".to_string(), expr: "Weights * flat_variation()".to_string() },
        )]);
        Self {
            luminosity: 3378.0,
            cross_sections,
            regions: vec![
                Region::new("4j1b", "HT", 25, 50.0, 550.0),
                Region::new("4j2b", "Trijet_mass", 25, 50.0, 550.0),
            ],
            pt_threshold: 25.0,
            btag_threshold: 0.5,
            weight_variations,
            slice: (120.0, 550.0),
            rebin: 2,
            remote_prefix: DEFAULT_REMOTE_PREFIX.to_string(),
        }
    }
}

impl AnalysisConfig {
    /// Read a JSON override file. Missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read config {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("invalid config {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Per-event normalization weight `xsec * lumi / total_events`.
    pub fn normalization(&self, process: &str, total_events: u64) -> Result<f64> {
        let xsec = self
            .cross_sections
            .get(process)
            .ok_or_else(|| Error::Config(format!("no cross section for process '{process}'")))?;
        if total_events == 0 {
            return Err(Error::Input(format!("process '{process}' has zero events")));
        }
        Ok(xsec * self.luminosity / total_events as f64)
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.regions.is_empty() {
            return Err(Error::Config("at least one region is required".into()));
        }
        for r in &self.regions {
            if r.n_bins == 0 || !(r.low < r.high) {
                return Err(Error::Config(format!(
                    "region '{}': invalid binning ({} bins over [{}, {}))",
                    r.name, r.n_bins, r.low, r.high
                )));
            }
        }
        if self.rebin == 0 {
            return Err(Error::Config("rebin factor must be positive".into()));
        }
        if !(self.slice.0 < self.slice.1) {
            return Err(Error::Config(format!("empty slice window [{}, {})", self.slice.0, self.slice.1)));
        }
        Ok(())
    }
}
