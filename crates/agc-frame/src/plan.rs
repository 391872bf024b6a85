//! Serializable execution plans.
//!
//! A [`SamplePlan`] is everything needed to run one dataset's booked
//! histograms without the in-memory graph: the node list, the actions and
//! the input files. Plans are what the distributed backend ships to workers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use agc_core::{Error, Histogram, Result};

use crate::expr::CompiledExpr;
use crate::functions::FunctionRegistry;
use crate::graph::{Graph, NodeOp, NodeSpec, ancestry, resolve_define};
use crate::handle::{BookedHandle, Booking, HistoModel};

/// One booked histogram in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Node whose events are filled.
    pub node: usize,
    /// Name and binning.
    pub model: HistoModel,
    /// Column to histogram.
    pub column: String,
    /// Optional weight column.
    pub weight: Option<String>,
    /// Whether to compute one histogram per affecting variation.
    pub variations: bool,
}

/// Execution plan for one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePlan {
    /// Sample name.
    pub name: String,
    /// Event files.
    pub files: Vec<String>,
    /// Input columns read from every file.
    pub input_columns: Vec<String>,
    /// Graph nodes; index 0 is the source.
    pub nodes: Vec<NodeSpec>,
    /// Booked histograms.
    pub actions: Vec<ActionSpec>,
    /// Random seed.
    pub seed: u64,
}

impl SamplePlan {
    /// Input columns needed by `actions`, in first-use order.
    ///
    /// Identifiers that resolve to a define on the action's path are not
    /// inputs; everything else is.
    pub fn required_inputs(
        nodes: &[NodeSpec],
        actions: &[ActionSpec],
        registry: &FunctionRegistry,
    ) -> Result<Vec<String>> {
        let mut needed_nodes = BTreeSet::new();
        for a in actions {
            needed_nodes.extend(ancestry(nodes, a.node));
        }

        let mut inputs: Vec<String> = Vec::new();
        let mut note = |name: &str, viewpoint: Option<usize>| {
            let defined = viewpoint.is_some_and(|v| resolve_define(nodes, v, name).is_some());
            if !defined && !inputs.iter().any(|c| c == name) {
                inputs.push(name.to_string());
            }
        };

        for &i in &needed_nodes {
            let spec = &nodes[i];
            let (expr, extra) = match &spec.op {
                NodeOp::Source => continue,
                NodeOp::Define { expr, .. } | NodeOp::Filter { expr, .. } => (expr, None),
                NodeOp::Vary { expr, column, .. } => (expr, Some(column)),
            };
            let compiled = CompiledExpr::compile(expr, registry)?;
            for col in compiled.required_columns.iter().chain(extra) {
                note(col, spec.parent);
            }
        }
        for a in actions {
            note(&a.column, Some(a.node));
            if let Some(w) = &a.weight {
                note(w, Some(a.node));
            }
        }
        Ok(inputs)
    }
}

/// A chunk of one plan's files assigned to one worker call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionTask {
    /// Index into the plan list.
    pub plan: usize,
    /// Partition index within the plan.
    pub partition: usize,
    /// Files of this partition.
    pub files: Vec<String>,
}

/// Partial results of one task: one variation map per action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialOutput {
    /// Index into the plan list.
    pub plan: usize,
    /// Partition index within the plan.
    pub partition: usize,
    /// Results, in action order.
    pub results: Vec<BTreeMap<String, Histogram>>,
}

/// Add `other` into `acc` key by key.
pub fn merge_results(
    acc: &mut [BTreeMap<String, Histogram>],
    other: &[BTreeMap<String, Histogram>],
) -> Result<()> {
    if acc.len() != other.len() {
        return Err(Error::Execution(format!(
            "partial output has {} actions, expected {}",
            other.len(),
            acc.len()
        )));
    }
    for (a, o) in acc.iter_mut().zip(other) {
        for (key, h) in o {
            match a.get_mut(key) {
                Some(existing) => existing.add(h)?,
                None => {
                    a.insert(key.clone(), h.clone());
                }
            }
        }
    }
    Ok(())
}

/// Booked handles grouped per graph, with their plans.
pub(crate) struct PlanSet {
    pub plans: Vec<SamplePlan>,
    pub registries: Vec<Arc<FunctionRegistry>>,
    pub bookings: Vec<Vec<Arc<Booking>>>,
}

impl PlanSet {
    /// Group `handles` by graph (first-seen order) and build one plan each.
    pub fn from_handles(handles: &[BookedHandle]) -> Result<Self> {
        let mut graphs: Vec<Arc<Graph>> = Vec::new();
        let mut grouped: Vec<Vec<(Arc<Booking>, bool)>> = Vec::new();

        for h in handles {
            let booking = h.booking();
            if booking.is_ready() {
                return Err(Error::Execution(format!(
                    "histogram '{}' was already materialized",
                    booking.action.model.name
                )));
            }
            let gid = booking.graph.id();
            let idx = match graphs.iter().position(|g| g.id() == gid) {
                Some(i) => i,
                None => {
                    graphs.push(Arc::clone(&booking.graph));
                    grouped.push(Vec::new());
                    graphs.len() - 1
                }
            };
            if grouped[idx].iter().any(|(b, _)| Arc::ptr_eq(b, booking)) {
                return Err(Error::Config(format!(
                    "histogram '{}' was passed twice",
                    booking.action.model.name
                )));
            }
            grouped[idx].push((Arc::clone(booking), h.wants_variations()));
        }

        let mut plans = Vec::with_capacity(graphs.len());
        let mut registries = Vec::with_capacity(graphs.len());
        let mut bookings = Vec::with_capacity(graphs.len());
        for (graph, group) in graphs.into_iter().zip(grouped) {
            let nodes = graph.nodes();
            let actions: Vec<ActionSpec> = group
                .iter()
                .map(|(b, variations)| ActionSpec { variations: *variations, ..b.action.clone() })
                .collect();
            let input_columns = SamplePlan::required_inputs(&nodes, &actions, graph.registry())?;
            let ds = graph.dataset();
            plans.push(SamplePlan {
                name: ds.name.clone(),
                files: ds.files.clone(),
                input_columns,
                nodes,
                actions,
                seed: ds.seed,
            });
            registries.push(Arc::clone(graph.registry()));
            bookings.push(group.into_iter().map(|(b, _)| b).collect());
        }
        Ok(Self { plans, registries, bookings })
    }

    /// Hand each action's merged results to its booking.
    ///
    /// Either every booking is fulfilled or none is: shapes and readiness
    /// are checked before the first result is stored.
    pub fn deliver(&self, results: Vec<Vec<BTreeMap<String, Histogram>>>) -> Result<()> {
        if results.len() != self.bookings.len() {
            return Err(Error::Execution(format!(
                "{} result sets for {} plans",
                results.len(),
                self.bookings.len()
            )));
        }
        for ((bookings, plan_results), plan) in self.bookings.iter().zip(&results).zip(&self.plans) {
            if bookings.len() != plan_results.len() {
                return Err(Error::Execution(format!(
                    "plan '{}': {} results for {} histograms",
                    plan.name,
                    plan_results.len(),
                    bookings.len()
                )));
            }
            if let Some(b) = bookings.iter().find(|b| b.is_ready()) {
                return Err(Error::Execution(format!(
                    "histogram '{}' was already materialized",
                    b.action.model.name
                )));
            }
        }
        for (bookings, plan_results) in self.bookings.iter().zip(results) {
            for (b, r) in bookings.iter().zip(plan_results) {
                b.fulfil(r)?;
            }
        }
        Ok(())
    }
}
