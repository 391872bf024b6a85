//! Slicing and rebinning of output histograms.

use agc_core::{Histogram, Result};

use crate::config::AnalysisConfig;

/// Slice to the configured window, then rebin.
pub fn slice_and_rebin(h: &Histogram, config: &AnalysisConfig) -> Result<Histogram> {
    let (low, high) = config.slice;
    h.slice(low, high)?.rebin(config.rebin)
}
