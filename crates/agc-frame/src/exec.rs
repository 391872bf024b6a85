//! Plan execution: batch-at-a-time evaluation of one plan over its files.
//!
//! Every histogram action is filled for the nominal event stream and, when
//! variations were requested, once per variation key that reaches it. A key
//! `column:label` reaches a node when the varied column is read (directly or
//! through defines) downstream of the `Vary` node that registered it, or
//! when an upstream filter depends on it. Nodes a key does not reach reuse
//! the nominal masks and columns of the same batch.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::Instant;

use agc_core::{Error, Histogram, Result};

use crate::column::{Column, EventBatch};
use crate::expr::CompiledExpr;
use crate::functions::{EvalContext, FunctionRegistry};
use crate::graph::{NodeOp, ancestry, resolve_define};
use crate::handle::{HistoModel, NOMINAL};
use crate::plan::{SamplePlan, merge_results};
use crate::source::{DEFAULT_BATCH_SIZE, ParquetSource};
use crate::value::{Value, ValueRef};

/// Where a column reference is read from.
#[derive(Debug, Clone)]
enum Binding {
    Input(String),
    Defined(usize),
}

#[derive(Debug, Clone)]
struct Dep {
    name: String,
    binding: Binding,
}

#[derive(Debug)]
enum NodeKind {
    Source,
    Define { name: String, expr: CompiledExpr, deps: Vec<Dep> },
    Filter { label: String, expr: CompiledExpr, deps: Vec<Dep> },
    Vary { column: String, target: Dep, expr: CompiledExpr, deps: Vec<Dep>, n_labels: usize },
}

#[derive(Debug)]
struct CompiledNode {
    parent: Option<usize>,
    kind: NodeKind,
}

#[derive(Debug)]
struct CompiledAction {
    node: usize,
    model: HistoModel,
    column: Dep,
    weight: Option<Dep>,
    /// Variation keys filled for this action.
    keys: Vec<usize>,
}

/// One `column:label` alternative registered by a `Vary` node.
#[derive(Debug, Clone)]
struct VariationKey {
    node: usize,
    column: String,
    label_index: usize,
    name: String,
}

/// A [`SamplePlan`] with expressions compiled and variation reach resolved.
#[derive(Debug)]
pub struct CompiledPlan {
    plan: SamplePlan,
    nodes: Vec<CompiledNode>,
    actions: Vec<CompiledAction>,
    keys: Vec<VariationKey>,
    /// `within[x][y]`: node `y` is `x` or one of its ancestors.
    within: Vec<Vec<bool>>,
    /// `mask_dirty[x][k]`: the event selection at `x` changes under key `k`.
    mask_dirty: Vec<Vec<bool>>,
    /// `value_dirty[x][k]`: the define at `x` changes under key `k`.
    value_dirty: Vec<Vec<bool>>,
    batch_size: usize,
}

fn deps_for(expr: &CompiledExpr, nodes: &[crate::graph::NodeSpec], viewpoint: usize) -> Vec<Dep> {
    expr.required_columns.iter().map(|name| dep_for(name, nodes, viewpoint)).collect()
}

fn dep_for(name: &str, nodes: &[crate::graph::NodeSpec], viewpoint: usize) -> Dep {
    let binding = match resolve_define(nodes, viewpoint, name) {
        Some(d) => Binding::Defined(d),
        None => Binding::Input(name.to_string()),
    };
    Dep { name: name.to_string(), binding }
}

impl CompiledPlan {
    /// Compile `plan`, resolving function calls in `registry`.
    pub fn compile(plan: SamplePlan, registry: &FunctionRegistry) -> Result<Self> {
        let specs = &plan.nodes;
        if !matches!(specs.first(), Some(s) if s.parent.is_none() && s.op == NodeOp::Source) {
            return Err(Error::Config(format!("plan '{}' does not start with a source node", plan.name)));
        }

        let mut nodes = Vec::with_capacity(specs.len());
        let mut keys = Vec::new();
        for (i, spec) in specs.iter().enumerate() {
            let parent = match spec.parent {
                Some(p) if p < i => Some(p),
                None if i == 0 => None,
                _ => {
                    return Err(Error::Config(format!("plan '{}': node {i} has an invalid parent", plan.name)));
                }
            };
            let kind = match (&spec.op, parent) {
                (NodeOp::Source, None) => NodeKind::Source,
                (NodeOp::Define { name, expr }, Some(p)) => {
                    let expr = CompiledExpr::compile(expr, registry)?;
                    let deps = deps_for(&expr, specs, p);
                    NodeKind::Define { name: name.clone(), expr, deps }
                }
                (NodeOp::Filter { expr, name }, Some(p)) => {
                    let expr = CompiledExpr::compile(expr, registry)?;
                    let deps = deps_for(&expr, specs, p);
                    let label = name.clone().unwrap_or_else(|| expr.source().to_string());
                    NodeKind::Filter { label, expr, deps }
                }
                (NodeOp::Vary { column, expr, labels }, Some(p)) => {
                    let expr = CompiledExpr::compile(expr, registry)?;
                    let deps = deps_for(&expr, specs, p);
                    for (j, label) in labels.iter().enumerate() {
                        keys.push(VariationKey {
                            node: i,
                            column: column.clone(),
                            label_index: j,
                            name: format!("{column}:{label}"),
                        });
                    }
                    NodeKind::Vary {
                        column: column.clone(),
                        target: dep_for(column, specs, p),
                        expr,
                        deps,
                        n_labels: labels.len(),
                    }
                }
                _ => {
                    return Err(Error::Config(format!("plan '{}': node {i} is misplaced", plan.name)));
                }
            };
            nodes.push(CompiledNode { parent, kind });
        }

        let n = nodes.len();
        let mut within = vec![vec![false; n]; n];
        for (x, row) in within.iter_mut().enumerate() {
            for y in ancestry(specs, x) {
                row[y] = true;
            }
        }

        let mut compiled = CompiledPlan {
            actions: Vec::new(),
            mask_dirty: vec![vec![false; keys.len()]; n],
            value_dirty: vec![vec![false; keys.len()]; n],
            within,
            keys,
            nodes,
            plan: plan.clone(),
            batch_size: DEFAULT_BATCH_SIZE,
        };
        compiled.resolve_reach();

        for a in &plan.actions {
            if a.node >= n {
                return Err(Error::Config(format!(
                    "plan '{}': histogram '{}' is booked on unknown node {}",
                    plan.name, a.model.name, a.node
                )));
            }
            let column = dep_for(&a.column, specs, a.node);
            let weight = a.weight.as_deref().map(|w| dep_for(w, specs, a.node));
            let keys = if a.variations {
                (0..compiled.keys.len())
                    .filter(|&k| {
                        compiled.mask_dirty[a.node][k]
                            || compiled.ref_dirty(&column, a.node, k)
                            || weight.as_ref().is_some_and(|w| compiled.ref_dirty(w, a.node, k))
                    })
                    .collect()
            } else {
                Vec::new()
            };
            compiled.actions.push(CompiledAction { node: a.node, model: a.model.clone(), column, weight, keys });
        }
        Ok(compiled)
    }

    /// Events per decoded batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// The source plan.
    pub fn plan(&self) -> &SamplePlan {
        &self.plan
    }

    /// Result keys of action `i`: `nominal` plus the variation keys that
    /// reach it.
    pub fn action_keys(&self, i: usize) -> Vec<String> {
        let mut out = vec![NOMINAL.to_string()];
        out.extend(self.actions[i].keys.iter().map(|&k| self.keys[k].name.clone()));
        out
    }

    /// Whether `dep`, read at `viewpoint`, changes under key `k`.
    fn ref_dirty(&self, dep: &Dep, viewpoint: usize, k: usize) -> bool {
        let key = &self.keys[k];
        if self.within[viewpoint][key.node] && key.column == dep.name {
            return true;
        }
        match dep.binding {
            Binding::Defined(d) => self.value_dirty[d][k],
            Binding::Input(_) => false,
        }
    }

    fn resolve_reach(&mut self) {
        for x in 0..self.nodes.len() {
            let Some(p) = self.nodes[x].parent else { continue };
            for k in 0..self.keys.len() {
                let (deps, is_filter, is_define) = match &self.nodes[x].kind {
                    NodeKind::Source => continue,
                    NodeKind::Define { deps, .. } => (deps, false, true),
                    NodeKind::Filter { deps, .. } => (deps, true, false),
                    NodeKind::Vary { deps, .. } => (deps, false, false),
                };
                let expr_dirty = deps.iter().any(|d| self.ref_dirty(d, p, k));
                let mask = self.mask_dirty[p][k] || (is_filter && expr_dirty);
                self.mask_dirty[x][k] = mask;
                self.value_dirty[x][k] = is_define && (expr_dirty || mask);
            }
        }
    }

    /// Empty result slots: per action, nominal first then its keys.
    fn empty_slots(&self) -> Result<Vec<Vec<Histogram>>> {
        self.actions
            .iter()
            .map(|a| {
                let h = a.model.empty().map_err(|e| Error::Config(e.to_string()))?;
                Ok(vec![h; 1 + a.keys.len()])
            })
            .collect()
    }

    fn slots_to_maps(&self, slots: Vec<Vec<Histogram>>) -> Vec<BTreeMap<String, Histogram>> {
        slots
            .into_iter()
            .enumerate()
            .map(|(i, hs)| self.action_keys(i).into_iter().zip(hs).collect())
            .collect()
    }

    /// Empty results with every key present, the identity for merging.
    pub fn empty_results(&self) -> Result<Vec<BTreeMap<String, Histogram>>> {
        Ok(self.slots_to_maps(self.empty_slots()?))
    }

    /// Fill every action from one batch.
    pub fn run_batch(&self, batch: &EventBatch, slots: &mut [Vec<Histogram>], ctx: &mut EvalContext) -> Result<()> {
        let mut eval = BatchEval::new(self, batch);
        for (action, hs) in self.actions.iter().zip(slots.iter_mut()) {
            eval.fill(action, None, &mut hs[0], ctx)?;
            for (slot, &k) in hs[1..].iter_mut().zip(&action.keys) {
                eval.fill(action, Some(k), slot, ctx)?;
            }
        }
        Ok(())
    }

    /// Run every action over one file.
    pub fn run_file(&self, path: &str) -> Result<Vec<BTreeMap<String, Histogram>>> {
        let start = Instant::now();
        let mut slots = self.empty_slots()?;
        let mut ctx = EvalContext::seeded(file_seed(self.plan.seed, path));
        let source = ParquetSource::open(path)?.with_batch_size(self.batch_size);

        let mut n_events = 0usize;
        for batch in source.batches(&self.plan.input_columns)? {
            let batch = batch?;
            n_events += batch.n_rows();
            self.run_batch(&batch, &mut slots, &mut ctx)?;
        }
        log::debug!(
            "{}: {} events from {} in {:.2}s",
            self.plan.name,
            n_events,
            path,
            start.elapsed().as_secs_f64()
        );
        Ok(self.slots_to_maps(slots))
    }

    /// Run every action over `files` and add the results up in file order.
    pub fn run_files(&self, files: &[String]) -> Result<Vec<BTreeMap<String, Histogram>>> {
        let mut acc = self.empty_results()?;
        for f in files {
            merge_results(&mut acc, &self.run_file(f)?)?;
        }
        Ok(acc)
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Per-file random seed, independent of how files are partitioned.
///
/// FNV-1a over the little-endian run seed followed by the path bytes, so
/// every build of every worker derives the same value.
pub fn file_seed(seed: u64, path: &str) -> u64 {
    seed.to_le_bytes()
        .iter()
        .chain(path.as_bytes())
        .fold(FNV_OFFSET, |h, &b| (h ^ u64::from(b)).wrapping_mul(FNV_PRIME))
}

type MaskCache = HashMap<(usize, Option<usize>), Rc<Vec<bool>>>;
type ColumnCache = HashMap<(usize, Option<usize>), Rc<Column>>;

/// Memoized evaluation of one batch.
struct BatchEval<'p> {
    plan: &'p CompiledPlan,
    batch: &'p EventBatch,
    masks: MaskCache,
    defines: ColumnCache,
    alternatives: HashMap<usize, Vec<Rc<Column>>>,
}

impl<'p> BatchEval<'p> {
    fn new(plan: &'p CompiledPlan, batch: &'p EventBatch) -> Self {
        Self { plan, batch, masks: HashMap::new(), defines: HashMap::new(), alternatives: HashMap::new() }
    }

    fn mask(&mut self, node: usize, key: Option<usize>, ctx: &mut EvalContext) -> Result<Rc<Vec<bool>>> {
        let plan = self.plan;
        let key = key.filter(|&k| plan.mask_dirty[node][k]);
        if let Some(m) = self.masks.get(&(node, key)) {
            return Ok(Rc::clone(m));
        }

        let cn = &plan.nodes[node];
        let mask = match (&cn.kind, cn.parent) {
            (NodeKind::Filter { label, expr, deps }, Some(p)) => {
                let base = self.mask(p, key, ctx)?;
                let values = self.eval_rows(expr, deps, p, key, &base, ctx)?;
                let mut m = (*base).clone();
                for (row, v) in values.into_iter().enumerate() {
                    if let Some(v) = v {
                        m[row] = v.is_true(label)?;
                    }
                }
                Rc::new(m)
            }
            (_, Some(p)) => self.mask(p, key, ctx)?,
            (_, None) => Rc::new(vec![true; self.batch.n_rows()]),
        };
        self.masks.insert((node, key), Rc::clone(&mask));
        Ok(mask)
    }

    fn define(&mut self, node: usize, key: Option<usize>, ctx: &mut EvalContext) -> Result<Rc<Column>> {
        let plan = self.plan;
        let key = key.filter(|&k| plan.value_dirty[node][k]);
        if let Some(c) = self.defines.get(&(node, key)) {
            return Ok(Rc::clone(c));
        }

        let cn = &plan.nodes[node];
        let (NodeKind::Define { name, expr, deps }, Some(p)) = (&cn.kind, cn.parent) else {
            return Err(Error::Execution(format!("node {node} is not a column definition")));
        };
        let active = self.mask(node, key, ctx)?;
        let rows = self.eval_rows(expr, deps, p, key, &active, ctx)?;
        let col = Rc::new(Column::from_rows(rows, None, name)?);
        self.defines.insert((node, key), Rc::clone(&col));
        Ok(col)
    }

    fn alternative(&mut self, node: usize, label_index: usize, ctx: &mut EvalContext) -> Result<Rc<Column>> {
        if let Some(alts) = self.alternatives.get(&node) {
            return Ok(Rc::clone(&alts[label_index]));
        }

        let plan = self.plan;
        let cn = &plan.nodes[node];
        let (NodeKind::Vary { column, target, expr, deps, n_labels }, Some(p)) = (&cn.kind, cn.parent) else {
            return Err(Error::Execution(format!("node {node} is not a variation")));
        };
        let n = *n_labels;
        let active = self.mask(node, None, ctx)?;
        let nominal = self.lookup(target, p, None, ctx)?;
        let rows = self.eval_rows(expr, deps, p, None, &active, ctx)?;

        let mut per_label: Vec<Vec<Option<Value>>> = vec![Vec::with_capacity(rows.len()); n];
        for (row, v) in rows.into_iter().enumerate() {
            match v {
                None => per_label.iter_mut().for_each(|l| l.push(None)),
                Some(v) => {
                    let items = split_alternatives(v, n, nominal.get(row), column)?;
                    for (l, it) in per_label.iter_mut().zip(items) {
                        l.push(Some(it));
                    }
                }
            }
        }

        let kind = Some(nominal.kind());
        let alts = per_label
            .into_iter()
            .map(|rows| Column::from_rows(rows, kind, &format!("variation of '{column}'")).map(Rc::new))
            .collect::<Result<Vec<_>>>()?;
        let out = Rc::clone(&alts[label_index]);
        self.alternatives.insert(node, alts);
        Ok(out)
    }

    fn lookup(&mut self, dep: &Dep, viewpoint: usize, key: Option<usize>, ctx: &mut EvalContext) -> Result<Rc<Column>> {
        let plan = self.plan;
        if let Some(k) = key {
            let vk = &plan.keys[k];
            if plan.within[viewpoint][vk.node] && vk.column == dep.name {
                return self.alternative(vk.node, vk.label_index, ctx);
            }
        }
        match &dep.binding {
            Binding::Input(name) => self
                .batch
                .column(name)
                .ok_or_else(|| Error::Input(format!("column '{name}' is missing from the batch"))),
            Binding::Defined(d) => self.define(*d, key, ctx),
        }
    }

    /// Evaluate `expr` on the active rows; inactive rows yield `None`.
    fn eval_rows(
        &mut self,
        expr: &CompiledExpr,
        deps: &[Dep],
        viewpoint: usize,
        key: Option<usize>,
        active: &[bool],
        ctx: &mut EvalContext,
    ) -> Result<Vec<Option<Value>>> {
        let cols =
            deps.iter().map(|d| self.lookup(d, viewpoint, key, ctx)).collect::<Result<Vec<Rc<Column>>>>()?;

        let mut out = Vec::with_capacity(active.len());
        let mut refs: Vec<ValueRef<'_>> = Vec::with_capacity(cols.len());
        for (row, &on) in active.iter().enumerate() {
            if !on {
                out.push(None);
                continue;
            }
            refs.clear();
            refs.extend(cols.iter().map(|c| c.get(row)));
            let v = expr.eval(&refs, ctx).map_err(|e| match e {
                Error::Execution(msg) => Error::Execution(format!("'{}': {msg}", expr.source())),
                other => other,
            })?;
            out.push(Some(v));
        }
        Ok(out)
    }

    fn fill(
        &mut self,
        action: &CompiledAction,
        key: Option<usize>,
        hist: &mut Histogram,
        ctx: &mut EvalContext,
    ) -> Result<()> {
        let active = self.mask(action.node, key, ctx)?;
        let values = self.lookup(&action.column, action.node, key, ctx)?;
        let weights = match &action.weight {
            Some(w) => Some(self.lookup(w, action.node, key, ctx)?),
            None => None,
        };

        for (row, &on) in active.iter().enumerate() {
            if !on {
                continue;
            }
            let w = weights.as_ref().map(|c| c.get(row));
            match (values.get(row), w) {
                (ValueRef::Scalar(x), None) => hist.fill(x, 1.0),
                (ValueRef::Scalar(x), Some(ValueRef::Scalar(w))) => hist.fill(x, w),
                (ValueRef::Vector(xs), None) => xs.iter().for_each(|&x| hist.fill(x, 1.0)),
                (ValueRef::Vector(xs), Some(ValueRef::Scalar(w))) => xs.iter().for_each(|&x| hist.fill(x, w)),
                (ValueRef::Vector(xs), Some(ValueRef::Vector(ws))) => {
                    if xs.len() != ws.len() {
                        return Err(Error::Execution(format!(
                            "histogram '{}': {} values but {} weights in one event",
                            action.model.name,
                            xs.len(),
                            ws.len()
                        )));
                    }
                    xs.iter().zip(ws).for_each(|(&x, &w)| hist.fill(x, w));
                }
                (ValueRef::Scalar(_), Some(ValueRef::Vector(_))) => {
                    return Err(Error::Execution(format!(
                        "histogram '{}': scalar column with a vector weight",
                        action.model.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Split one event's replacement value into one value per label.
fn split_alternatives(v: Value, n: usize, nominal: ValueRef<'_>, column: &str) -> Result<Vec<Value>> {
    match v {
        Value::List(items) if items.len() == n => Ok(items),
        Value::List(items) => Err(Error::Execution(format!(
            "variation of '{column}' yields {} alternatives for {n} labels",
            items.len()
        ))),
        v if n == 1 => Ok(vec![v]),
        Value::Vector(xs) if matches!(nominal, ValueRef::Scalar(_)) => {
            if xs.len() != n {
                return Err(Error::Execution(format!(
                    "variation of '{column}' yields {} alternatives for {n} labels",
                    xs.len()
                )));
            }
            Ok(xs.into_iter().map(Value::Scalar).collect())
        }
        other => Err(Error::Execution(format!(
            "variation of '{column}' must yield a list of {n} alternatives, got a {}",
            other.kind()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::column::JaggedCol;
    use crate::graph::{Dataset, Frame};
    use crate::handle::BookedHandle;
    use crate::plan::PlanSet;

    fn batch() -> EventBatch {
        let mut b = EventBatch::new(4);
        b.insert("x", Column::Scalar(vec![1.0, 2.0, 3.0, 4.0])).unwrap();
        b.insert("w", Column::Scalar(vec![1.0, 1.0, 2.0, 2.0])).unwrap();
        b.insert(
            "jets",
            Column::Jagged(JaggedCol::from_rows([vec![10.0, 30.0], vec![], vec![50.0], vec![20.0, 40.0, 60.0]])),
        )
        .unwrap();
        b
    }

    fn root() -> Frame {
        let ds = Dataset::new("s", vec![]).with_columns(vec!["x".into(), "w".into(), "jets".into()]);
        Frame::new(ds, Arc::new(FunctionRegistry::with_builtins()))
    }

    /// Compile the handles' plan and run it on the in-memory batch.
    fn run(handles: Vec<BookedHandle>) -> Vec<BTreeMap<String, Histogram>> {
        let set = PlanSet::from_handles(&handles).unwrap();
        let plan = CompiledPlan::compile(set.plans[0].clone(), &set.registries[0]).unwrap();
        let mut slots = plan.empty_slots().unwrap();
        let mut ctx = EvalContext::seeded(1);
        plan.run_batch(&batch(), &mut slots, &mut ctx).unwrap();
        plan.slots_to_maps(slots)
    }

    #[test]
    fn filter_define_fill() {
        let f = root().filter("x >= 2").unwrap().define("y", "x * 10").unwrap();
        let h = f.histo1d(HistoModel::new("y", 5, 0.0, 50.0), "y", Some("w")).unwrap();
        let out = run(vec![h.into()]);
        let h = &out[0]["nominal"];
        assert_eq!(out[0].len(), 1);
        // y = 20, 30, 40 with weights 1, 2, 2
        assert_eq!(h.contents, vec![0.0, 0.0, 0.0, 1.0, 2.0, 2.0, 0.0]);
    }

    #[test]
    fn jagged_column_fills_each_element() {
        let h = root().histo1d(HistoModel::new("j", 3, 0.0, 60.0), "jets", Some("w")).unwrap();
        let out = run(vec![h.into()]);
        // 10 (w1), 30 (w1), 50 (w2), 20 40 (w2), 60 overflow (w2)
        assert_eq!(out[0]["nominal"].contents, vec![0.0, 1.0, 3.0, 4.0, 2.0]);
    }

    #[test]
    fn upstream_variation_reruns_selection() {
        let v = root().vary("x", "{x + 1, x - 1}", &["up", "down"]).unwrap();
        let sel = v.filter("x >= 3").unwrap();
        let h = sel.histo1d(HistoModel::new("x", 6, 0.0, 6.0), "x", None).unwrap().with_variations();
        let out = run(vec![h.into()]);
        let keys: Vec<&str> = out[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["nominal", "x:down", "x:up"]);
        // nominal: 3, 4
        assert_eq!(out[0]["nominal"].integral(), 2.0);
        // up: 2..5 -> 3, 4, 5 pass
        assert_eq!(out[0]["x:up"].integral(), 3.0);
        assert_eq!(out[0]["x:up"].contents[6], 1.0);
        // down: 0..3 -> only 3 passes
        assert_eq!(out[0]["x:down"].integral(), 1.0);
        assert_eq!(out[0]["x:down"].contents[4], 1.0);
    }

    #[test]
    fn variation_only_reaches_descendants() {
        let r = root();
        let before = r.histo1d(HistoModel::new("before", 4, 0.0, 4.0), "x", None).unwrap().with_variations();
        let v = r.vary("x", "{x * 2}", &["double"]).unwrap();
        let after = v.histo1d(HistoModel::new("after", 4, 0.0, 8.0), "x", None).unwrap().with_variations();
        let out = run(vec![before.into(), after.into()]);
        assert_eq!(out[0].len(), 1);
        assert_eq!(out[1].len(), 2);
        // x * 2 = 2, 4, 6, 8
        assert_eq!(out[1]["x:double"].contents, vec![0.0, 0.0, 1.0, 1.0, 1.0, 1.0]);
        assert_eq!(out[1]["nominal"].contents, vec![0.0, 1.0, 2.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn unrelated_variation_is_not_listed() {
        let v = root().vary("w", "{w * 2}", &["w2"]).unwrap();
        let h = v.histo1d(HistoModel::new("x", 4, 0.0, 4.0), "x", None).unwrap().with_variations();
        let hw = v.histo1d(HistoModel::new("xw", 4, 0.0, 4.0), "x", Some("w")).unwrap().with_variations();
        let out = run(vec![h.into(), hw.into()]);
        assert_eq!(out[0].keys().collect::<Vec<_>>(), vec!["nominal"]);
        assert_eq!(out[1].keys().collect::<Vec<_>>(), vec!["nominal", "w:w2"]);
        assert_eq!(out[1]["w:w2"].integral(), 2.0 * out[1]["nominal"].integral());
    }

    #[test]
    fn variation_reaches_through_defines() {
        let v = root().vary("jets", "{jets * 2}", &["jes"]).unwrap();
        let f = v.define("ht", "sum(jets)").unwrap().filter("ht > 0").unwrap();
        let h = f.histo1d(HistoModel::new("x", 4, 0.0, 4.0), "x", None).unwrap().with_variations();
        let out = run(vec![h.into()]);
        assert!(out[0].contains_key("jets:jes"));
    }

    #[test]
    fn vector_splits_over_scalar_labels() {
        let sel = root().filter("x >= 3").unwrap();
        let v = sel.vary("w", "w * take(jets, 2)", &["a", "b"]);
        // Row 3 has a single jet: the mismatch is reported at run time.
        let h = v.unwrap().histo1d(HistoModel::new("x", 4, 0.0, 4.0), "x", Some("w")).unwrap().with_variations();
        let set = PlanSet::from_handles(&[h.into()]).unwrap();
        let plan = CompiledPlan::compile(set.plans[0].clone(), &set.registries[0]).unwrap();
        let mut slots = plan.empty_slots().unwrap();
        let err = plan.run_batch(&batch(), &mut slots, &mut EvalContext::seeded(0)).unwrap_err();
        assert!(err.to_string().contains("1 alternatives for 2 labels"));

        let sel = root().filter("x == 4").unwrap();
        let v = sel.vary("w", "w * take(jets, 2)", &["a", "b"]).unwrap();
        let h = v.histo1d(HistoModel::new("x", 4, 0.0, 8.0), "x", Some("w")).unwrap().with_variations();
        let out = run(vec![h.into()]);
        assert_eq!(out[0]["w:a"].integral(), 40.0);
        assert_eq!(out[0]["w:b"].integral(), 80.0);
    }

    #[test]
    fn kind_mismatch_is_an_error() {
        let v = root().vary("jets", "{x}", &["bad"]).unwrap();
        let h = v.histo1d(HistoModel::new("j", 4, 0.0, 4.0), "jets", None).unwrap().with_variations();
        let set = PlanSet::from_handles(&[h.into()]).unwrap();
        let plan = CompiledPlan::compile(set.plans[0].clone(), &set.registries[0]).unwrap();
        let mut slots = plan.empty_slots().unwrap();
        assert!(plan.run_batch(&batch(), &mut slots, &mut EvalContext::seeded(0)).is_err());
    }

    #[test]
    fn file_seed_depends_on_path() {
        assert_eq!(file_seed(1, "a.parquet"), file_seed(1, "a.parquet"));
        assert_ne!(file_seed(1, "a.parquet"), file_seed(1, "b.parquet"));
        assert_ne!(file_seed(1, "a.parquet"), file_seed(2, "a.parquet"));
    }

    #[test]
    fn file_seed_is_fixed_across_builds() {
        assert_eq!(file_seed(0, ""), 12161962213042174405);
        assert_eq!(file_seed(1, "a.parquet"), 10424214432395331785);
    }

    #[test]
    fn eval_context_is_deterministic() {
        use rand::RngCore;
        let mut a = EvalContext::seeded(7);
        let mut b = EvalContext::seeded(7);
        let xs: Vec<u64> = (0..4).map(|_| a.rng().next_u64()).collect();
        let ys: Vec<u64> = (0..4).map(|_| b.rng().next_u64()).collect();
        assert_eq!(xs, ys);
        assert_ne!(EvalContext::seeded(8).rng().next_u64(), xs[0]);
    }
}
