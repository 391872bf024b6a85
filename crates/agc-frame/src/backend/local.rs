//! Single-machine backend on a rayon thread pool.

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;

use agc_core::{Error, Result};

use super::{ExecutionBackend, fold_outputs, resolve_schema};
use crate::exec::CompiledPlan;
use crate::functions::FunctionRegistry;
use crate::graph::{Dataset, Frame};
use crate::handle::BookedHandle;
use crate::plan::{PartialOutput, PlanSet};
use crate::source::DEFAULT_BATCH_SIZE;

/// Runs one task per (dataset, file) on a bounded thread pool.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    threads: usize,
    registry: Arc<FunctionRegistry>,
    batch_size: usize,
}

impl LocalBackend {
    /// Backend with `threads` workers (0 = rayon default).
    pub fn new(threads: usize, registry: Arc<FunctionRegistry>) -> Self {
        Self { threads, registry, batch_size: DEFAULT_BATCH_SIZE }
    }

    /// Events per decoded batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

impl ExecutionBackend for LocalBackend {
    fn build_graph(&self, dataset: Dataset) -> Result<Frame> {
        let dataset = resolve_schema(dataset, true)?;
        Ok(Frame::new(dataset, Arc::clone(&self.registry)))
    }

    fn run_all(&self, handles: &[BookedHandle]) -> Result<()> {
        let start = Instant::now();
        let set = PlanSet::from_handles(handles)?;
        let compiled = set
            .plans
            .iter()
            .zip(&set.registries)
            .map(|(p, r)| -> Result<CompiledPlan> {
                Ok(CompiledPlan::compile(p.clone(), r)?.with_batch_size(self.batch_size))
            })
            .collect::<Result<Vec<_>>>()?;

        let tasks: Vec<(usize, usize)> = compiled
            .iter()
            .enumerate()
            .flat_map(|(p, c)| (0..c.plan().files.len()).map(move |f| (p, f)))
            .collect();
        log::info!(
            "running {} histograms of {} samples over {} files",
            handles.len(),
            compiled.len(),
            tasks.len()
        );

        let run_tasks = |tasks: &[(usize, usize)]| -> Result<Vec<PartialOutput>> {
            tasks
                .par_iter()
                .map(|&(p, f)| {
                    let plan = &compiled[p];
                    let results = plan.run_file(&plan.plan().files[f])?;
                    Ok(PartialOutput { plan: p, partition: f, results })
                })
                .collect()
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .map_err(|e| Error::Execution(format!("failed to create thread pool: {e}")))?;
        let outputs = pool.install(|| run_tasks(&tasks))?;

        let empty = compiled.iter().map(CompiledPlan::empty_results).collect::<Result<Vec<_>>>()?;
        let results = fold_outputs(&set, empty, outputs)?;
        set.deliver(results)?;

        log::info!("event loop finished in {:.2}s", start.elapsed().as_secs_f64());
        Ok(())
    }
}
