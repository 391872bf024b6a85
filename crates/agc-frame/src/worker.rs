//! Worker side of the distributed backend.
//!
//! The protocol is one JSON object per line. The head first sends `load`
//! with every plan of the run, then one `run` per partition; the worker
//! answers each request with exactly one reply line.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use agc_core::{Error, Result};

use crate::exec::CompiledPlan;
use crate::functions::FunctionRegistry;
use crate::plan::{PartialOutput, PartitionTask, SamplePlan};

/// Head -> worker message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Compile and keep these plans for the following tasks.
    Load { plans: Vec<SamplePlan> },
    /// Run one partition.
    Run { task: PartitionTask },
}

/// Worker -> head message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerReply {
    /// Plans compiled.
    Loaded,
    /// Partition finished.
    Done { output: PartialOutput },
    /// Request failed.
    Failed { message: String },
}

/// A worker able to run partition tasks.
pub trait Worker: Send {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Receive the plans of this run.
    fn load(&mut self, plans: &[SamplePlan]) -> Result<()>;

    /// Run one partition of a loaded plan.
    fn run(&mut self, task: &PartitionTask) -> Result<PartialOutput>;
}

/// Run `task` against compiled plans.
pub fn run_task(plans: &[CompiledPlan], task: &PartitionTask) -> Result<PartialOutput> {
    let plan = plans
        .get(task.plan)
        .ok_or_else(|| Error::Execution(format!("task refers to unknown plan {}", task.plan)))?;
    let results = plan.run_files(&task.files)?;
    Ok(PartialOutput { plan: task.plan, partition: task.partition, results })
}

fn compile_all(plans: Vec<SamplePlan>, registry: &FunctionRegistry) -> Result<Vec<CompiledPlan>> {
    plans.into_iter().map(|p| CompiledPlan::compile(p, registry)).collect()
}

/// Serve requests from `reader` until end of input.
///
/// Failures of a single request are reported back as `failed` replies; only
/// broken I/O ends the loop with an error.
pub fn serve<R: BufRead, W: Write>(registry: &FunctionRegistry, reader: R, mut writer: W) -> Result<()> {
    let mut plans: Vec<CompiledPlan> = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<WorkerRequest>(&line) {
            Err(e) => WorkerReply::Failed { message: format!("malformed request: {e}") },
            Ok(WorkerRequest::Load { plans: specs }) => {
                let n = specs.len();
                match compile_all(specs, registry) {
                    Ok(compiled) => {
                        log::debug!("worker loaded {n} plans");
                        plans = compiled;
                        WorkerReply::Loaded
                    }
                    Err(e) => WorkerReply::Failed { message: e.to_string() },
                }
            }
            Ok(WorkerRequest::Run { task }) => match run_task(&plans, &task) {
                Ok(output) => WorkerReply::Done { output },
                Err(e) => {
                    log::warn!("partition {} of plan {} failed: {e}", task.partition, task.plan);
                    WorkerReply::Failed { message: e.to_string() }
                }
            },
        };
        serde_json::to_writer(&mut writer, &reply)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    Ok(())
}

/// Worker running in the calling process.
pub struct InProcessWorker {
    name: String,
    registry: Arc<FunctionRegistry>,
    plans: Vec<CompiledPlan>,
}

impl InProcessWorker {
    /// New worker resolving functions in `registry`.
    pub fn new(name: impl Into<String>, registry: Arc<FunctionRegistry>) -> Self {
        Self { name: name.into(), registry, plans: Vec::new() }
    }
}

impl Worker for InProcessWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&mut self, plans: &[SamplePlan]) -> Result<()> {
        self.plans = compile_all(plans.to_vec(), &self.registry)?;
        Ok(())
    }

    fn run(&mut self, task: &PartitionTask) -> Result<PartialOutput> {
        run_task(&self.plans, task)
    }
}

/// Worker in a child process speaking the line protocol on stdin/stdout.
pub struct ProcessWorker {
    name: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    failed: bool,
    shutdown_timeout: Duration,
}

impl ProcessWorker {
    /// Start `command` with piped stdin/stdout. Its stderr is inherited so
    /// worker logs reach the terminal.
    pub fn spawn(name: impl Into<String>, mut command: Command) -> Result<Self> {
        let name = name.into();
        command.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::inherit());
        let mut child = command
            .spawn()
            .map_err(|e| Error::Execution(format!("failed to start worker {name}: {e}")))?;
        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Execution(format!("worker {name} has no stdout")))?;
        Ok(Self {
            name,
            child,
            stdin,
            stdout: BufReader::new(stdout),
            failed: false,
            shutdown_timeout: Self::DEFAULT_SHUTDOWN_TIMEOUT,
        })
    }

    /// Grace period for the child to exit once stdin is closed.
    pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

    /// Override the shutdown grace period; the child is killed after it.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Close stdin and wait for the child, killing it once the grace period
    /// runs out.
    fn shutdown(&mut self) {
        drop(self.stdin.take());
        if !self.failed {
            let deadline = Instant::now() + self.shutdown_timeout;
            loop {
                match self.child.try_wait() {
                    Ok(Some(_)) => return,
                    Ok(None) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(20)),
                    Ok(None) => {
                        log::warn!("worker {} did not exit within {:?}, killing it", self.name, self.shutdown_timeout);
                        break;
                    }
                    Err(_) => break,
                }
            }
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    fn call(&mut self, request: &WorkerRequest) -> Result<WorkerReply> {
        let result = self.exchange(request);
        if result.is_err() {
            self.failed = true;
        }
        result.map_err(|e| Error::Execution(format!("worker {}: {e}", self.name)))
    }

    fn exchange(&mut self, request: &WorkerRequest) -> Result<WorkerReply> {
        let stdin = self.stdin.as_mut().ok_or_else(|| Error::Execution("stdin is closed".into()))?;
        serde_json::to_writer(&mut *stdin, request)?;
        stdin.write_all(b"\n")?;
        stdin.flush()?;

        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            return Err(Error::Execution("exited unexpectedly".into()));
        }
        Ok(serde_json::from_str(&line)?)
    }
}

impl Worker for ProcessWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&mut self, plans: &[SamplePlan]) -> Result<()> {
        match self.call(&WorkerRequest::Load { plans: plans.to_vec() })? {
            WorkerReply::Loaded => Ok(()),
            WorkerReply::Failed { message } => {
                Err(Error::Execution(format!("worker {} could not load plans: {message}", self.name)))
            }
            other => Err(Error::Execution(format!("worker {}: unexpected reply {other:?}", self.name))),
        }
    }

    fn run(&mut self, task: &PartitionTask) -> Result<PartialOutput> {
        match self.call(&WorkerRequest::Run { task: task.clone() })? {
            WorkerReply::Done { output } => Ok(output),
            WorkerReply::Failed { message } => Err(Error::Execution(message)),
            other => Err(Error::Execution(format!("worker {}: unexpected reply {other:?}", self.name))),
        }
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::graph::{NodeOp, NodeSpec};
    use crate::handle::HistoModel;
    use crate::plan::ActionSpec;

    fn plan() -> SamplePlan {
        SamplePlan {
            name: "s".into(),
            files: vec![],
            input_columns: vec!["x".into()],
            nodes: vec![NodeSpec { parent: None, op: NodeOp::Source }],
            actions: vec![ActionSpec {
                node: 0,
                model: HistoModel::new("h", 2, 0.0, 2.0),
                column: "x".into(),
                weight: None,
                variations: false,
            }],
            seed: 0,
        }
    }

    fn serve_lines(requests: &[WorkerRequest]) -> Vec<WorkerReply> {
        let mut input = String::new();
        for r in requests {
            input.push_str(&serde_json::to_string(r).unwrap());
            input.push('\n');
        }
        let mut out = Vec::new();
        serve(&FunctionRegistry::with_builtins(), Cursor::new(input), &mut out).unwrap();
        String::from_utf8(out).unwrap().lines().map(|l| serde_json::from_str(l).unwrap()).collect()
    }

    #[test]
    fn serve_answers_every_request() {
        let replies = serve_lines(&[
            WorkerRequest::Load { plans: vec![plan()] },
            WorkerRequest::Run { task: PartitionTask { plan: 0, partition: 3, files: vec![] } },
        ]);
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0], WorkerReply::Loaded);
        match &replies[1] {
            WorkerReply::Done { output } => {
                assert_eq!(output.partition, 3);
                assert_eq!(output.results[0]["nominal"].integral(), 0.0);
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn serve_reports_failures() {
        let replies = serve_lines(&[
            WorkerRequest::Run { task: PartitionTask { plan: 0, partition: 0, files: vec![] } },
            WorkerRequest::Load { plans: vec![plan()] },
            WorkerRequest::Run {
                task: PartitionTask { plan: 0, partition: 0, files: vec!["/nonexistent/f.parquet".into()] },
            },
        ]);
        assert!(matches!(&replies[0], WorkerReply::Failed { message } if message.contains("unknown plan")));
        assert_eq!(replies[1], WorkerReply::Loaded);
        assert!(matches!(&replies[2], WorkerReply::Failed { .. }));
    }

    #[test]
    fn serve_rejects_malformed_lines() {
        let mut out = Vec::new();
        serve(&FunctionRegistry::with_builtins(), Cursor::new("not json\n\n"), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("malformed request"));
    }

    #[cfg(unix)]
    #[test]
    fn stuck_child_is_killed_on_drop() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let w = ProcessWorker::spawn("sleeper", cmd).unwrap().with_shutdown_timeout(Duration::from_millis(100));
        let start = Instant::now();
        drop(w);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn exiting_child_is_reaped_without_kill() {
        let w = ProcessWorker::spawn("cat", Command::new("cat")).unwrap();
        let start = Instant::now();
        drop(w);
        assert!(start.elapsed() < ProcessWorker::DEFAULT_SHUTDOWN_TIMEOUT);
    }

    #[test]
    fn in_process_worker_runs_tasks() {
        let mut w = InProcessWorker::new("w0", Arc::new(FunctionRegistry::with_builtins()));
        w.load(&[plan()]).unwrap();
        let out = w.run(&PartitionTask { plan: 0, partition: 1, files: vec![] }).unwrap();
        assert_eq!(out.plan, 0);
        assert_eq!(out.results.len(), 1);
        assert!(w.run(&PartitionTask { plan: 5, partition: 0, files: vec![] }).is_err());
    }
}
