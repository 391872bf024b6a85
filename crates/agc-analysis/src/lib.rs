//! # agc-analysis
//!
//! The CMS open data ttbar analysis on top of `agc-frame`: catalog
//! resolution, event selection with systematic variations, result
//! flattening, post-processing and validation against a reference.
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use agc_analysis::{AnalysisConfig, CatalogOptions, physics_registry, retrieve_inputs, run_analysis};
//! use agc_frame::LocalBackend;
//!
//! let config = AnalysisConfig::default();
//! let samples = retrieve_inputs(Path::new("ntuples.json"), &config.remote_prefix, &CatalogOptions::default()).unwrap();
//! let backend = LocalBackend::new(8, Arc::new(physics_registry()));
//! let histograms = run_analysis(&backend, &samples, &config, 0).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod collect;
pub mod config;
pub mod output;
pub mod physics;
pub mod pipeline;
pub mod postprocess;
pub mod selection;
pub mod validate;
pub mod variations;

pub use catalog::{CatalogOptions, Sample, retrieve_inputs};
pub use collect::{CollectedHistogram, collect};
pub use config::{AnalysisConfig, DEFAULT_REMOTE_PREFIX, Region, WeightVariationRule};
pub use output::{HistogramFile, HistogramRecord, load_histograms, save_histograms};
pub use physics::{FourMomentum, physics_registry, trijet_mass};
pub use pipeline::{book_all, histograms, run_analysis};
pub use postprocess::slice_and_rebin;
pub use selection::{BookedResult, book_histograms, histogram_name};
pub use validate::{ValidationReport, dump_json, validate};
