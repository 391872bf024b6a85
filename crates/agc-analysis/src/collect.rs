//! Flattening of booked results into named histograms.

use agc_core::{Histogram, Result};
use agc_frame::NOMINAL;

use crate::selection::BookedResult;

/// A materialized histogram with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedHistogram {
    /// Histogram, named `{region}_{process}_{label}`.
    pub histogram: Histogram,
    /// Region name.
    pub region: String,
    /// Process name.
    pub process: String,
    /// Catalog variation or systematic label.
    pub variation: String,
}

/// Label of a variation map key: the text after the last `:`.
pub fn variation_label(key: &str) -> &str {
    key.rsplit(':').next().unwrap_or(key)
}

/// One entry per histogram. Variation maps expand into one entry per key,
/// with `nominal` in the name replaced by the key's label.
pub fn collect(results: &[BookedResult]) -> Result<Vec<CollectedHistogram>> {
    let mut out = Vec::new();
    for r in results {
        let map = r.handle.results()?;
        if !r.handle.wants_variations() {
            for h in map.values() {
                out.push(CollectedHistogram {
                    histogram: h.clone(),
                    region: r.region.clone(),
                    process: r.process.clone(),
                    variation: r.variation.clone(),
                });
            }
            continue;
        }
        for (key, h) in map {
            let label = variation_label(key);
            let mut histogram = h.clone();
            histogram.name = histogram.name.replace(NOMINAL, label);
            out.push(CollectedHistogram {
                histogram,
                region: r.region.clone(),
                process: r.process.clone(),
                variation: label.to_string(),
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        assert_eq!(variation_label("Weights:btag_var_0_up"), "btag_var_0_up");
        assert_eq!(variation_label("nominal"), "nominal");
        assert_eq!(variation_label("a:b:c"), "c");
    }
}
