//! End-to-end analysis run.
//!
//! Book every sample on its own graph, resolve all handles in a single
//! backend pass, then flatten, slice and rebin the results.

use std::time::Instant;

use agc_core::{Histogram, Result};
use agc_frame::{BookedHandle, Dataset, ExecutionBackend};

use crate::catalog::Sample;
use crate::collect::{CollectedHistogram, collect};
use crate::config::AnalysisConfig;
use crate::postprocess::slice_and_rebin;
use crate::selection::{BookedResult, book_histograms};

/// Book the histograms of every sample without running anything.
pub fn book_all(
    backend: &dyn ExecutionBackend,
    samples: &[Sample],
    config: &AnalysisConfig,
    seed: u64,
) -> Result<Vec<BookedResult>> {
    let mut booked = Vec::new();
    for sample in samples {
        let dataset = Dataset::new(sample.name(), sample.paths.clone()).with_seed(seed);
        let frame = backend.build_graph(dataset)?;
        booked.extend(book_histograms(&frame, sample, config)?);
    }
    Ok(booked)
}

/// Run the full analysis and return post-processed histograms.
pub fn run_analysis(
    backend: &dyn ExecutionBackend,
    samples: &[Sample],
    config: &AnalysisConfig,
    seed: u64,
) -> Result<Vec<CollectedHistogram>> {
    config.validate()?;
    let start = Instant::now();
    let booked = book_all(backend, samples, config, seed)?;
    log::info!(
        "building the computation graphs for {} samples took {:.2}s",
        samples.len(),
        start.elapsed().as_secs_f64()
    );

    let run_start = Instant::now();
    let handles: Vec<BookedHandle> = booked.iter().map(|b| b.handle.clone()).collect();
    backend.run_all(&handles)?;
    log::info!("executing the computation graphs took {:.2}s", run_start.elapsed().as_secs_f64());

    let mut collected = collect(&booked)?;
    for c in &mut collected {
        c.histogram = slice_and_rebin(&c.histogram, config)?;
    }
    Ok(collected)
}

/// The bare histograms of a collected list.
pub fn histograms(collected: &[CollectedHistogram]) -> Vec<Histogram> {
    collected.iter().map(|c| c.histogram.clone()).collect()
}
