//! Event selection and observables.
//!
//! [`book_histograms`] builds the lazy chain of one sample: normalization
//! weights, systematic variations, the single-lepton plus four-jet
//! selection and one histogram per region. Nothing is evaluated here.

use agc_core::{Error, Result};
use agc_frame::{BookedHandle, Frame, HistoModel};

use crate::catalog::Sample;
use crate::config::{AnalysisConfig, Region};
use crate::variations::{WEIGHT_COLUMN, btag_variation, jet_pt_variation, process_weight_variation};

/// Observable of the one-b-tag region.
pub const HT: &str = "HT";
/// Observable of the two-b-tag region.
pub const TRIJET_MASS: &str = "Trijet_mass";

/// A booked histogram with the sample it belongs to.
#[derive(Debug, Clone)]
pub struct BookedResult {
    /// Single histogram (non-nominal samples) or variation map.
    pub handle: BookedHandle,
    /// Region name.
    pub region: String,
    /// Process of the sample.
    pub process: String,
    /// Catalog variation of the sample.
    pub variation: String,
}

/// `{region}_{process}_{variation}`.
pub fn histogram_name(region: &str, process: &str, variation: &str) -> String {
    format!("{region}_{process}_{variation}")
}

/// Book every region of `sample` on `frame`.
///
/// Nominal samples get the jet energy variations before the object masks,
/// the per-process weight variation and the b-tag weight variations after
/// the selection, and are booked as variation maps.
pub fn book_histograms(frame: &Frame, sample: &Sample, config: &AnalysisConfig) -> Result<Vec<BookedResult>> {
    let nominal = sample.is_nominal();
    let norm = config.normalization(&sample.process, sample.total_events)?;
    let pt = config.pt_threshold;
    let btag = config.btag_threshold;

    let mut df = frame.clone();
    if nominal {
        df = df.vary_spec(&jet_pt_variation())?;
    }
    df = df.define(WEIGHT_COLUMN, &format!("{norm}"))?;
    if nominal {
        if let Some(spec) = process_weight_variation(config, &sample.process) {
            df = df.vary_spec(&spec)?;
        }
    }

    let n_btag = format!("sum(Jet_btagCSVV2[Jet_pt_mask] >= {btag})");
    df = df
        .define("Electron_pt_mask", &format!("Electron_pt > {pt}"))?
        .define("Muon_pt_mask", &format!("Muon_pt > {pt}"))?
        .define("Jet_pt_mask", &format!("Jet_pt > {pt}"))?
        .filter_named("sum(Electron_pt_mask) + sum(Muon_pt_mask) == 1", "one lepton")?
        .filter_named("sum(Jet_pt_mask) >= 4", "four jets")?
        .filter_named(&format!("{n_btag} >= 1"), "one b-tag")?;

    if nominal {
        df = df.vary_spec(&btag_variation())?;
    }

    let mut results = Vec::with_capacity(config.regions.len());
    for region in &config.regions {
        let rdf = region_frame(&df, region, &n_btag)?;
        let name = histogram_name(&region.name, &sample.process, &sample.variation);
        let model = HistoModel::new(name.as_str(), region.n_bins, region.low, region.high);
        let histo = rdf.histo1d(model, &region.observable, Some(WEIGHT_COLUMN))?;
        let handle: BookedHandle = if nominal { histo.with_variations().into() } else { histo.into() };
        log::debug!("booked histogram {name}");
        results.push(BookedResult {
            handle,
            region: region.name.clone(),
            process: sample.process.clone(),
            variation: sample.variation.clone(),
        });
    }
    Ok(results)
}

/// Region-specific b-tag requirement and observable.
fn region_frame(df: &Frame, region: &Region, n_btag: &str) -> Result<Frame> {
    match region.observable.as_str() {
        HT => df.filter_named(&format!("{n_btag} == 1"), "exactly one b-tag")?.define(HT, "sum(Jet_pt[Jet_pt_mask])"),
        TRIJET_MASS => df.filter_named(&format!("{n_btag} > 1"), "two b-tags")?.define(
            TRIJET_MASS,
            "trijet_mass(Jet_pt[Jet_pt_mask], Jet_eta[Jet_pt_mask], Jet_phi[Jet_pt_mask], \
             Jet_mass[Jet_pt_mask], Jet_btagCSVV2[Jet_pt_mask])",
        ),
        other => Err(Error::Config(format!("region '{}': unknown observable '{other}'", region.name))),
    }
}
