//! # agc-frame
//!
//! A small lazy columnar engine for event processing.
//!
//! Analyses are described as chains of column definitions, filters and
//! systematic variations on a [`Frame`], with histograms booked along the
//! way. Nothing runs until an [`ExecutionBackend`] resolves every booked
//! handle in a single pass over the input files, either on a local thread
//! pool or across worker processes.
//!
//! ```no_run
//! use std::sync::Arc;
//! use agc_frame::{Dataset, ExecutionBackend, FunctionRegistry, HistoModel, LocalBackend};
//!
//! let backend = LocalBackend::new(4, Arc::new(FunctionRegistry::with_builtins()));
//! let frame = backend.build_graph(Dataset::new("ttbar", vec!["events.parquet".into()])).unwrap();
//! let sel = frame.filter("sum(Jet_pt > 25) >= 4").unwrap();
//! let ht = sel.define("HT", "sum(Jet_pt[Jet_pt > 25])").unwrap();
//! let h = ht.histo1d(HistoModel::new("HT", 25, 50.0, 550.0), "HT", None).unwrap();
//!
//! let handles = vec![h.into()];
//! backend.run_all(&handles).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod column;
pub mod exec;
pub mod expr;
pub mod functions;
pub mod graph;
pub mod handle;
pub mod plan;
pub mod source;
pub mod value;
pub mod worker;

pub use backend::{
    DistributedBackend, ExecutionBackend, InProcessCluster, LocalBackend, LocalProcessCluster, SshCluster,
    WorkerCluster,
};
pub use column::{Column, ColumnKind, EventBatch, JaggedCol};
pub use exec::CompiledPlan;
pub use expr::CompiledExpr;
pub use functions::{Arity, EvalContext, Function, FunctionImpl, FunctionRegistry};
pub use graph::{Dataset, Frame, Graph, NodeOp, NodeSpec, VariationSpec};
pub use handle::{BookedHandle, HistoHandle, HistoModel, NOMINAL, ResultState, VariationsHandle};
pub use plan::{ActionSpec, PartialOutput, PartitionTask, SamplePlan};
pub use source::{ParquetSource, SourceError};
pub use value::{Value, ValueRef};
pub use worker::{InProcessWorker, ProcessWorker, Worker, WorkerReply, WorkerRequest};
