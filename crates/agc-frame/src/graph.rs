//! Lazy computation graph.
//!
//! A [`Graph`] belongs to one dataset and records an append-only list of
//! nodes. A [`Frame`] is a cheap handle to one node of that list: every
//! transformation returns a new frame whose node points at its parent, so
//! chains derived from the same frame share their common upstream nodes.
//! Nothing is evaluated until a backend runs the booked handles.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use agc_core::{Error, Histogram, Result};

use crate::expr::CompiledExpr;
use crate::functions::FunctionRegistry;
use crate::handle::{Booking, HistoHandle, HistoModel};
use crate::plan::ActionSpec;

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(0);

/// Input of one graph: a named list of event files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Sample name, used in logs.
    pub name: String,
    /// Event files, read in order.
    pub files: Vec<String>,
    /// Input column names, when known. With `None`, any identifier that is
    /// not a defined column is assumed to be an input column.
    pub columns: Option<Vec<String>>,
    /// Seed for random helpers, combined with each file path.
    pub seed: u64,
}

impl Dataset {
    /// Dataset with an unchecked schema and seed 0.
    pub fn new(name: impl Into<String>, files: Vec<String>) -> Self {
        Self { name: name.into(), files, columns: None, seed: 0 }
    }

    /// Set the known input columns.
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// One operation in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum NodeOp {
    /// Root node: the dataset's events.
    Source,
    /// New column computed from an expression.
    Define { name: String, expr: String },
    /// Keep events where the expression is true.
    Filter { expr: String, name: Option<String> },
    /// Alternative values of `column`, one per label, for all descendants.
    Vary { column: String, expr: String, labels: Vec<String> },
}

/// A node and its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Parent node index (`None` only for the source).
    pub parent: Option<usize>,
    /// Operation.
    pub op: NodeOp,
}

/// A systematic variation of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationSpec {
    /// Column whose value is replaced.
    pub column: String,
    /// Replacement expression: a brace list with one item per label, or a
    /// vector with one element per label for scalar columns.
    pub expr: String,
    /// Variation labels.
    pub labels: Vec<String>,
}

impl VariationSpec {
    /// Build a spec.
    pub fn new(column: impl Into<String>, expr: impl Into<String>, labels: Vec<String>) -> Self {
        Self { column: column.into(), expr: expr.into(), labels }
    }
}

/// Node list shared by every frame of one dataset.
pub struct Graph {
    id: u64,
    dataset: Dataset,
    registry: Arc<FunctionRegistry>,
    nodes: Mutex<Vec<NodeSpec>>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph").field("id", &self.id).field("dataset", &self.dataset.name).finish()
    }
}

impl Graph {
    /// Unique id within this process.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The dataset this graph reads.
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Functions available to expressions.
    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    /// Copy of the node list.
    pub fn nodes(&self) -> Vec<NodeSpec> {
        self.nodes.lock().expect("graph mutex poisoned").clone()
    }
}

/// Node indices from `node` up to the source, `node` first.
pub(crate) fn ancestry(nodes: &[NodeSpec], node: usize) -> Vec<usize> {
    let mut out = vec![node];
    let mut cur = nodes[node].parent;
    while let Some(p) = cur {
        out.push(p);
        cur = nodes[p].parent;
    }
    out
}

/// Define node producing `name` as seen from `node` (inclusive).
pub(crate) fn resolve_define(nodes: &[NodeSpec], node: usize, name: &str) -> Option<usize> {
    ancestry(nodes, node).into_iter().find(|&i| matches!(&nodes[i].op, NodeOp::Define { name: n, .. } if n == name))
}

/// Lazy handle to one node of a graph.
#[derive(Debug, Clone)]
pub struct Frame {
    graph: Arc<Graph>,
    node: usize,
}

impl Frame {
    /// Root frame over `dataset`.
    pub fn new(dataset: Dataset, registry: Arc<FunctionRegistry>) -> Self {
        let id = NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed);
        let graph = Graph {
            id,
            dataset,
            registry,
            nodes: Mutex::new(vec![NodeSpec { parent: None, op: NodeOp::Source }]),
        };
        Frame { graph: Arc::new(graph), node: 0 }
    }

    /// The graph behind this frame.
    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// Node index of this frame.
    pub fn node(&self) -> usize {
        self.node
    }

    /// Whether `name` is an input or defined column at this point.
    pub fn has_column(&self, name: &str) -> bool {
        let nodes = self.graph.nodes.lock().expect("graph mutex poisoned");
        self.is_visible(&nodes, name)
    }

    /// Columns visible at this point: inputs (when known) then defines from
    /// the root down.
    pub fn columns(&self) -> Vec<String> {
        let nodes = self.graph.nodes.lock().expect("graph mutex poisoned");
        let mut out = self.graph.dataset.columns.clone().unwrap_or_default();
        for i in ancestry(&nodes, self.node).into_iter().rev() {
            if let NodeOp::Define { name, .. } = &nodes[i].op {
                out.push(name.clone());
            }
        }
        out
    }

    fn is_visible(&self, nodes: &[NodeSpec], name: &str) -> bool {
        if resolve_define(nodes, self.node, name).is_some() {
            return true;
        }
        match &self.graph.dataset.columns {
            Some(cols) => cols.iter().any(|c| c == name),
            None => true,
        }
    }

    fn is_input(&self, name: &str) -> bool {
        self.graph.dataset.columns.as_ref().is_some_and(|cols| cols.iter().any(|c| c == name))
    }

    /// Compile `expr` and check that every column it reads exists here.
    fn check_expr(&self, nodes: &[NodeSpec], expr: &str) -> Result<CompiledExpr> {
        let compiled = CompiledExpr::compile(expr, &self.graph.registry)?;
        for col in &compiled.required_columns {
            if !self.is_visible(nodes, col) {
                return Err(Error::Config(format!(
                    "expression '{expr}' reads unknown column '{col}' in sample '{}'",
                    self.graph.dataset.name
                )));
            }
        }
        Ok(compiled)
    }

    fn push(&self, nodes: &mut Vec<NodeSpec>, op: NodeOp) -> Frame {
        nodes.push(NodeSpec { parent: Some(self.node), op });
        Frame { graph: Arc::clone(&self.graph), node: nodes.len() - 1 }
    }

    /// Add a column computed from `expr`.
    pub fn define(&self, name: &str, expr: &str) -> Result<Frame> {
        let mut nodes = self.graph.nodes.lock().expect("graph mutex poisoned");
        if resolve_define(&nodes, self.node, name).is_some() || self.is_input(name) {
            return Err(Error::Config(format!("column '{name}' is already defined")));
        }
        self.check_expr(&nodes, expr)?;
        Ok(self.push(&mut nodes, NodeOp::Define { name: name.to_string(), expr: expr.to_string() }))
    }

    /// Keep only events where `expr` is true.
    pub fn filter(&self, expr: &str) -> Result<Frame> {
        self.filter_impl(expr, None)
    }

    /// Like [`Frame::filter`], with a name shown in logs.
    pub fn filter_named(&self, expr: &str, name: &str) -> Result<Frame> {
        self.filter_impl(expr, Some(name.to_string()))
    }

    fn filter_impl(&self, expr: &str, name: Option<String>) -> Result<Frame> {
        let mut nodes = self.graph.nodes.lock().expect("graph mutex poisoned");
        self.check_expr(&nodes, expr)?;
        Ok(self.push(&mut nodes, NodeOp::Filter { expr: expr.to_string(), name }))
    }

    /// Register alternative values of `column` for every descendant frame.
    ///
    /// `expr` is evaluated with nominal inputs. It must yield a brace list
    /// with one item per label, a single value when there is one label, or
    /// (for scalar columns) a vector with one element per label.
    pub fn vary<S: AsRef<str>>(&self, column: &str, expr: &str, labels: &[S]) -> Result<Frame> {
        let labels: Vec<String> = labels.iter().map(|l| l.as_ref().to_string()).collect();
        let mut nodes = self.graph.nodes.lock().expect("graph mutex poisoned");

        if labels.is_empty() {
            return Err(Error::Config(format!("variation of '{column}' has no labels")));
        }
        for (i, l) in labels.iter().enumerate() {
            if l.is_empty() || l.contains(':') {
                return Err(Error::Config(format!("invalid variation label '{l}' for '{column}'")));
            }
            if labels[..i].contains(l) {
                return Err(Error::Config(format!("duplicate variation label '{l}' for '{column}'")));
            }
        }
        if !self.is_visible(&nodes, column) {
            return Err(Error::Config(format!("cannot vary undefined column '{column}'")));
        }
        for i in ancestry(&nodes, self.node) {
            if let NodeOp::Vary { column: c, labels: prev, .. } = &nodes[i].op {
                if c == column {
                    if let Some(dup) = labels.iter().find(|l| prev.contains(l)) {
                        return Err(Error::Config(format!(
                            "variation '{column}:{dup}' is already registered"
                        )));
                    }
                }
            }
        }
        self.check_expr(&nodes, expr)?;

        Ok(self.push(
            &mut nodes,
            NodeOp::Vary { column: column.to_string(), expr: expr.to_string(), labels },
        ))
    }

    /// [`Frame::vary`] from a [`VariationSpec`].
    pub fn vary_spec(&self, spec: &VariationSpec) -> Result<Frame> {
        self.vary(&spec.column, &spec.expr, &spec.labels)
    }

    /// Book a 1D histogram of `column`, optionally weighted by `weight`.
    ///
    /// Jagged columns fill one entry per element.
    pub fn histo1d(&self, model: HistoModel, column: &str, weight: Option<&str>) -> Result<HistoHandle> {
        Histogram::uniform(model.name.clone(), model.n_bins, model.low, model.high)
            .map_err(|e| Error::Config(e.to_string()))?;
        {
            let nodes = self.graph.nodes.lock().expect("graph mutex poisoned");
            for c in std::iter::once(column).chain(weight) {
                if !self.is_visible(&nodes, c) {
                    return Err(Error::Config(format!(
                        "histogram '{}' reads unknown column '{c}'",
                        model.name
                    )));
                }
            }
        }
        let action = ActionSpec {
            node: self.node,
            model,
            column: column.to_string(),
            weight: weight.map(str::to_string),
            variations: false,
        };
        Ok(HistoHandle::new(Booking::new(Arc::clone(&self.graph), action)))
    }
}
