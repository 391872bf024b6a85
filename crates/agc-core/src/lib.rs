//! # agc-core
//!
//! Shared types for the AGC ttbar analysis engine: the error taxonomy and
//! the fixed-binning [`Histogram`] with explicit under/overflow buckets.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod histogram;

pub use error::{Error, Result};
pub use histogram::Histogram;

/// Crate version, shared by every workspace member.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
