//! Execution backends.
//!
//! A backend creates the root [`Frame`] of each dataset and later resolves
//! every booked handle in one batched pass. Each dataset's files are read
//! once for all of that dataset's handles.

use std::collections::BTreeMap;

use agc_core::{Error, Histogram, Result};

use crate::graph::{Dataset, Frame};
use crate::handle::BookedHandle;
use crate::plan::{PartialOutput, PlanSet, merge_results};
use crate::source::ParquetSource;

pub mod distributed;
pub mod local;

pub use distributed::{DistributedBackend, InProcessCluster, LocalProcessCluster, SshCluster, WorkerCluster};
pub use local::LocalBackend;

/// Two-call contract shared by every backend.
pub trait ExecutionBackend {
    /// Root frame over `dataset`.
    fn build_graph(&self, dataset: Dataset) -> Result<Frame>;

    /// Run every handle. Handles are ready when this returns `Ok`.
    fn run_all(&self, handles: &[BookedHandle]) -> Result<()>;
}

/// Fill in the dataset's input columns from its first file.
///
/// With `strict`, an unreadable file is an error; otherwise the schema is
/// left unchecked so that nodes which cannot see the files can still build
/// graphs.
pub(crate) fn resolve_schema(mut dataset: Dataset, strict: bool) -> Result<Dataset> {
    if dataset.columns.is_some() {
        return Ok(dataset);
    }
    let Some(first) = dataset.files.first() else {
        return Ok(dataset);
    };
    match ParquetSource::open(first).and_then(|s| s.column_names()) {
        Ok(cols) => {
            log::debug!("{}: {} input columns", dataset.name, cols.len());
            dataset.columns = Some(cols);
        }
        Err(e) if strict => return Err(e.into()),
        Err(e) => {
            log::debug!("{}: schema not checked ({e})", dataset.name);
        }
    }
    Ok(dataset)
}

/// Fold partial outputs into per-plan results, in (plan, partition) order.
pub(crate) fn fold_outputs(
    set: &PlanSet,
    empty: Vec<Vec<BTreeMap<String, Histogram>>>,
    mut outputs: Vec<PartialOutput>,
) -> Result<Vec<Vec<BTreeMap<String, Histogram>>>> {
    debug_assert_eq!(set.plans.len(), empty.len());
    outputs.sort_by_key(|o| (o.plan, o.partition));
    let mut acc = empty;
    for o in &outputs {
        let slot = acc.get_mut(o.plan).ok_or_else(|| {
            Error::Execution(format!("partial output for unknown plan {}", o.plan))
        })?;
        merge_results(slot, &o.results)?;
    }
    Ok(acc)
}
