//! Booked results.
//!
//! A handle is created pending when a histogram is booked and becomes ready
//! once a backend has run it. Reading a pending handle is an error; running
//! a handle twice is an error too.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use agc_core::{Error, Histogram, Result};

use crate::graph::Graph;
use crate::plan::ActionSpec;

/// Key of the nominal entry in a variation map.
pub const NOMINAL: &str = "nominal";

/// Name and uniform binning of a booked histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoModel {
    /// Histogram name.
    pub name: String,
    /// Number of bins.
    pub n_bins: usize,
    /// Lower edge.
    pub low: f64,
    /// Upper edge.
    pub high: f64,
}

impl HistoModel {
    /// Build a model.
    pub fn new(name: impl Into<String>, n_bins: usize, low: f64, high: f64) -> Self {
        Self { name: name.into(), n_bins, low, high }
    }

    /// Empty histogram with this binning.
    pub fn empty(&self) -> Result<Histogram> {
        Histogram::uniform(self.name.clone(), self.n_bins, self.low, self.high)
    }
}

/// Readiness of a handle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResultState<T> {
    /// Not run yet.
    Pending,
    /// Materialized.
    Ready(T),
}

/// Shared state of one booked histogram action.
#[derive(Debug)]
pub struct Booking {
    pub(crate) graph: Arc<Graph>,
    pub(crate) action: ActionSpec,
    slot: OnceLock<BTreeMap<String, Histogram>>,
}

impl Booking {
    pub(crate) fn new(graph: Arc<Graph>, action: ActionSpec) -> Arc<Self> {
        Arc::new(Self { graph, action, slot: OnceLock::new() })
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.slot.get().is_some()
    }

    pub(crate) fn fulfil(&self, results: BTreeMap<String, Histogram>) -> Result<()> {
        self.slot.set(results).map_err(|_| {
            Error::Execution(format!("histogram '{}' was already materialized", self.action.model.name))
        })
    }

    fn get(&self) -> Option<&BTreeMap<String, Histogram>> {
        self.slot.get()
    }

    fn pending_error(&self) -> Error {
        Error::Execution(format!("histogram '{}' has not been computed yet", self.action.model.name))
    }
}

/// Handle to a single nominal histogram.
#[derive(Debug, Clone)]
pub struct HistoHandle {
    booking: Arc<Booking>,
}

impl HistoHandle {
    pub(crate) fn new(booking: Arc<Booking>) -> Self {
        Self { booking }
    }

    /// Name of the booked histogram.
    pub fn name(&self) -> &str {
        &self.booking.action.model.name
    }

    /// Current state.
    pub fn state(&self) -> ResultState<&Histogram> {
        match self.booking.get().and_then(|m| m.get(NOMINAL)) {
            Some(h) => ResultState::Ready(h),
            None => ResultState::Pending,
        }
    }

    /// The histogram, or an error while pending.
    pub fn value(&self) -> Result<&Histogram> {
        match self.state() {
            ResultState::Ready(h) => Ok(h),
            ResultState::Pending => Err(self.booking.pending_error()),
        }
    }

    /// Also compute one histogram per variation affecting this booking.
    pub fn with_variations(self) -> VariationsHandle {
        VariationsHandle { booking: self.booking }
    }
}

/// Handle to a map `nominal` / `column:label` -> histogram.
#[derive(Debug, Clone)]
pub struct VariationsHandle {
    booking: Arc<Booking>,
}

impl VariationsHandle {
    /// Name of the booked histogram.
    pub fn name(&self) -> &str {
        &self.booking.action.model.name
    }

    /// Current state.
    pub fn state(&self) -> ResultState<&BTreeMap<String, Histogram>> {
        match self.booking.get() {
            Some(m) => ResultState::Ready(m),
            None => ResultState::Pending,
        }
    }

    /// The variation map, or an error while pending.
    pub fn value(&self) -> Result<&BTreeMap<String, Histogram>> {
        self.booking.get().ok_or_else(|| self.booking.pending_error())
    }

    /// Map keys, or an error while pending.
    pub fn keys(&self) -> Result<Vec<String>> {
        Ok(self.value()?.keys().cloned().collect())
    }

    /// One entry of the map.
    pub fn get(&self, key: &str) -> Result<&Histogram> {
        self.value()?
            .get(key)
            .ok_or_else(|| Error::Execution(format!("no variation '{key}' for histogram '{}'", self.name())))
    }
}

/// Any booked handle, as handed to a backend.
///
/// Clones share the same result slot.
#[derive(Debug, Clone)]
pub enum BookedHandle {
    /// Nominal histogram only.
    Histo(HistoHandle),
    /// Nominal plus every affecting variation.
    Variations(VariationsHandle),
}

impl BookedHandle {
    pub(crate) fn booking(&self) -> &Arc<Booking> {
        match self {
            BookedHandle::Histo(h) => &h.booking,
            BookedHandle::Variations(v) => &v.booking,
        }
    }

    /// Whether variations are requested.
    pub fn wants_variations(&self) -> bool {
        matches!(self, BookedHandle::Variations(_))
    }

    /// Name of the booked histogram.
    pub fn name(&self) -> &str {
        &self.booking().action.model.name
    }

    /// Whether the backend has run this handle.
    pub fn is_ready(&self) -> bool {
        self.booking().is_ready()
    }

    /// All results as a map. A nominal-only handle yields a single
    /// `nominal` entry.
    pub fn results(&self) -> Result<&BTreeMap<String, Histogram>> {
        let b = self.booking();
        b.get().ok_or_else(|| b.pending_error())
    }
}

impl From<HistoHandle> for BookedHandle {
    fn from(h: HistoHandle) -> Self {
        BookedHandle::Histo(h)
    }
}

impl From<VariationsHandle> for BookedHandle {
    fn from(v: VariationsHandle) -> Self {
        BookedHandle::Variations(v)
    }
}
