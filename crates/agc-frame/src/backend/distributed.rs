//! Cluster backend: partitions of files are farmed out to worker processes.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Instant;

use agc_core::{Error, Result};

use super::{ExecutionBackend, fold_outputs, resolve_schema};
use crate::exec::CompiledPlan;
use crate::functions::FunctionRegistry;
use crate::graph::{Dataset, Frame};
use crate::handle::BookedHandle;
use crate::plan::{PartialOutput, PartitionTask, PlanSet};
use crate::worker::{InProcessWorker, ProcessWorker, Worker};

/// Something that can start a set of workers for one run.
pub trait WorkerCluster: Send + Sync {
    /// Human-readable description for logs.
    fn describe(&self) -> String;

    /// Start the workers.
    fn launch(&self) -> Result<Vec<Box<dyn Worker>>>;
}

/// Workers running as threads of this process.
#[derive(Debug, Clone)]
pub struct InProcessCluster {
    workers: usize,
    registry: Arc<FunctionRegistry>,
}

impl InProcessCluster {
    /// `workers` in-process workers.
    pub fn new(workers: usize, registry: Arc<FunctionRegistry>) -> Self {
        Self { workers: workers.max(1), registry }
    }
}

impl WorkerCluster for InProcessCluster {
    fn describe(&self) -> String {
        format!("{} in-process workers", self.workers)
    }

    fn launch(&self) -> Result<Vec<Box<dyn Worker>>> {
        Ok((0..self.workers)
            .map(|i| Box::new(InProcessWorker::new(format!("inproc-{i}"), Arc::clone(&self.registry))) as Box<dyn Worker>)
            .collect())
    }
}

/// Worker processes on this machine.
#[derive(Debug, Clone)]
pub struct LocalProcessCluster {
    program: PathBuf,
    args: Vec<String>,
    workers: usize,
}

impl LocalProcessCluster {
    /// `workers` copies of `program args...`.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, workers: usize) -> Self {
        Self { program: program.into(), args, workers: workers.max(1) }
    }

    /// `workers` copies of the running executable with the `worker` subcommand.
    pub fn current_exe(workers: usize) -> Result<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::new(program, vec!["worker".to_string()], workers))
    }
}

impl WorkerCluster for LocalProcessCluster {
    fn describe(&self) -> String {
        format!("{} local worker processes", self.workers)
    }

    fn launch(&self) -> Result<Vec<Box<dyn Worker>>> {
        (0..self.workers)
            .map(|i| {
                let mut cmd = Command::new(&self.program);
                cmd.args(&self.args);
                Ok(Box::new(ProcessWorker::spawn(format!("local-{i}"), cmd)?) as Box<dyn Worker>)
            })
            .collect()
    }
}

/// Worker processes started over ssh, `per_host` on each host.
///
/// Hosts must see the input files at the same paths as this machine.
#[derive(Debug, Clone)]
pub struct SshCluster {
    hosts: Vec<String>,
    per_host: usize,
    program: String,
    args: Vec<String>,
}

impl SshCluster {
    /// Program started on each host.
    pub const DEFAULT_PROGRAM: &'static str = "agc";

    /// Cluster over `hosts` running `agc worker`. An empty host list is a
    /// configuration error.
    pub fn new(hosts: Vec<String>, per_host: usize) -> Result<Self> {
        if hosts.is_empty() {
            return Err(Error::Config("the ssh scheduler needs at least one host".into()));
        }
        Ok(Self {
            hosts,
            per_host: per_host.max(1),
            program: Self::DEFAULT_PROGRAM.to_string(),
            args: vec!["worker".to_string()],
        })
    }

    /// Override the program started on each host.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Arguments passed to the remote program, as for [`LocalProcessCluster`].
    pub fn with_worker_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Command line handed to ssh for each worker.
    pub fn remote_command(&self) -> String {
        let mut parts = vec![self.program.as_str()];
        parts.extend(self.args.iter().map(String::as_str));
        parts.join(" ")
    }
}

impl WorkerCluster for SshCluster {
    fn describe(&self) -> String {
        format!("{} workers on each of {}", self.per_host, self.hosts.join(", "))
    }

    fn launch(&self) -> Result<Vec<Box<dyn Worker>>> {
        let mut workers: Vec<Box<dyn Worker>> = Vec::with_capacity(self.hosts.len() * self.per_host);
        for host in &self.hosts {
            for i in 0..self.per_host {
                let mut cmd = Command::new("ssh");
                cmd.args(["-o", "BatchMode=yes", host.as_str(), self.remote_command().as_str()]);
                workers.push(Box::new(ProcessWorker::spawn(format!("{host}-{i}"), cmd)?));
            }
        }
        Ok(workers)
    }
}

/// Split `files` into disjoint, contiguous partitions.
///
/// Without an explicit count each file is its own partition; otherwise the
/// count is capped at the number of files and sizes differ by at most one.
pub fn partition_files(files: &[String], npartitions: Option<usize>) -> Vec<Vec<String>> {
    if files.is_empty() {
        return Vec::new();
    }
    let n = npartitions.unwrap_or(files.len()).clamp(1, files.len());
    let base = files.len() / n;
    let extra = files.len() % n;
    let mut out = Vec::with_capacity(n);
    let mut start = 0;
    for i in 0..n {
        let len = base + usize::from(i < extra);
        out.push(files[start..start + len].to_vec());
        start += len;
    }
    out
}

/// Backend dispatching file partitions to a [`WorkerCluster`].
pub struct DistributedBackend {
    cluster: Box<dyn WorkerCluster>,
    registry: Arc<FunctionRegistry>,
    npartitions: Option<usize>,
}

impl DistributedBackend {
    /// Backend over `cluster`. `registry` is used for graph building on the
    /// head; workers bring their own.
    pub fn new(cluster: Box<dyn WorkerCluster>, registry: Arc<FunctionRegistry>) -> Self {
        Self { cluster, registry, npartitions: None }
    }

    /// Split each dataset into this many partitions instead of one per file.
    pub fn with_partitions(mut self, npartitions: Option<usize>) -> Self {
        self.npartitions = npartitions;
        self
    }
}

impl ExecutionBackend for DistributedBackend {
    fn build_graph(&self, dataset: Dataset) -> Result<Frame> {
        let dataset = resolve_schema(dataset, false)?;
        Ok(Frame::new(dataset, Arc::clone(&self.registry)))
    }

    fn run_all(&self, handles: &[BookedHandle]) -> Result<()> {
        let start = Instant::now();
        let set = PlanSet::from_handles(handles)?;

        // Compiling on the head surfaces plan errors before any worker starts.
        let empty = set
            .plans
            .iter()
            .zip(&set.registries)
            .map(|(p, r)| -> Result<_> { CompiledPlan::compile(p.clone(), r)?.empty_results() })
            .collect::<Result<Vec<_>>>()?;

        let mut tasks = VecDeque::new();
        for (pi, plan) in set.plans.iter().enumerate() {
            for (partition, files) in partition_files(&plan.files, self.npartitions).into_iter().enumerate() {
                tasks.push_back(PartitionTask { plan: pi, partition, files });
            }
        }
        let n_tasks = tasks.len();

        let outputs = if tasks.is_empty() {
            Vec::new()
        } else {
            let workers = self.cluster.launch()?;
            if workers.is_empty() {
                return Err(Error::Config("the cluster provided no workers".into()));
            }
            log::info!("dispatching {n_tasks} partitions to {}", self.cluster.describe());
            dispatch(workers, &set, tasks)?
        };

        let results = fold_outputs(&set, empty, outputs)?;
        set.deliver(results)?;
        log::info!("{n_tasks} partitions finished in {:.2}s", start.elapsed().as_secs_f64());
        Ok(())
    }
}

/// Run `tasks` on `workers`, one thread per worker pulling from a shared
/// queue. The first failure stops every worker from taking new tasks.
fn dispatch(
    workers: Vec<Box<dyn Worker>>,
    set: &PlanSet,
    tasks: VecDeque<PartitionTask>,
) -> Result<Vec<PartialOutput>> {
    let queue = Mutex::new(tasks);
    let abort = AtomicBool::new(false);
    let (tx, rx) = mpsc::channel::<Result<PartialOutput>>();

    std::thread::scope(|s| {
        for mut worker in workers {
            let tx = tx.clone();
            let (queue, abort, plans) = (&queue, &abort, &set.plans);
            s.spawn(move || {
                if let Err(e) = worker.load(plans) {
                    abort.store(true, Ordering::SeqCst);
                    let _ = tx.send(Err(e));
                    return;
                }
                while !abort.load(Ordering::SeqCst) {
                    let Some(task) = queue.lock().expect("task queue mutex poisoned").pop_front() else {
                        break;
                    };
                    match worker.run(&task) {
                        Ok(out) => {
                            log::debug!(
                                "{}: partition {} of '{}' done",
                                worker.name(),
                                task.partition,
                                plans[task.plan].name
                            );
                            let _ = tx.send(Ok(out));
                        }
                        Err(e) => {
                            abort.store(true, Ordering::SeqCst);
                            let _ = tx.send(Err(Error::Execution(format!(
                                "{} failed on partition {} of '{}': {e}",
                                worker.name(),
                                task.partition,
                                plans[task.plan].name
                            ))));
                            break;
                        }
                    }
                }
            });
        }
    });
    drop(tx);

    let mut outputs = Vec::new();
    let mut first_error = None;
    for r in rx {
        match r {
            Ok(o) => outputs.push(o),
            Err(e) => {
                log::error!("{e}");
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(outputs),
    }
}
