//! The reactive dataflow graph (spec.md §3/§4.2).
//!
//! Backed by `petgraph::graph::DiGraph` plus `rustc_hash::FxHashMap` indices,
//! in the shape of the teacher's `graph::types::GraphEngine`, generalized
//! from "one named output per cell" to the spec's multi-name `defs`/`refs`
//! edge model. All mutation and the reachability queries background threads
//! need (the module watcher marking cells stale) go through one
//! `std::sync::RwLock`, matching "all graph reads/writes are serialized by a
//! single lock."

pub mod cell;

use std::collections::{HashSet, VecDeque};
use std::sync::RwLock;

use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::FxHashMap;

pub use crate::ids::CellId;
use crate::ids::Name;

pub use cell::{CellConfig, CellImpl, CellRuntime, ErrorKind, RunResultStatus, RuntimeState, VariableData};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relatives {
    Children,
    Parents,
    Siblings,
}

struct Inner {
    graph: DiGraph<CellId, ()>,
    node_indices: FxHashMap<CellId, NodeIndex>,
    cells: FxHashMap<CellId, CellImpl>,
    definitions: FxHashMap<Name, HashSet<CellId>>,
    errors: FxHashMap<CellId, Vec<ErrorKind>>,
    registration_order: FxHashMap<CellId, usize>,
    order_counter: usize,
}

impl Inner {
    fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_indices: FxHashMap::default(),
            cells: FxHashMap::default(),
            definitions: FxHashMap::default(),
            errors: FxHashMap::default(),
            registration_order: FxHashMap::default(),
            order_counter: 0,
        }
    }

    fn node_of(&mut self, cell_id: CellId) -> NodeIndex {
        if let Some(&idx) = self.node_indices.get(&cell_id) {
            return idx;
        }
        let idx = self.graph.add_node(cell_id);
        self.node_indices.insert(cell_id, idx);
        idx
    }

    fn detect_cycles(&mut self) {
        // Clear prior cycle marks; they are recomputed fresh every call.
        for errs in self.errors.values_mut() {
            errs.retain(|e| !matches!(e, ErrorKind::Cycle(_)));
        }
        for scc in kosaraju_scc(&self.graph) {
            if scc.len() > 1 {
                let members: Vec<CellId> = scc.iter().map(|&idx| self.graph[idx]).collect();
                for &idx in &scc {
                    let cell_id = self.graph[idx];
                    self.errors
                        .entry(cell_id)
                        .or_default()
                        .push(ErrorKind::Cycle(members.clone()));
                }
            }
        }
    }

    fn recompute_multiple_definitions(&mut self, touched: &HashSet<Name>) {
        for name in touched {
            let owners = match self.definitions.get(name) {
                Some(o) => o.clone(),
                None => continue,
            };
            for cell_id in &owners {
                if let Some(errs) = self.errors.get_mut(cell_id) {
                    errs.retain(|e| !matches!(e, ErrorKind::MultipleDefinition { name: n, .. } if n == name));
                }
            }
            if owners.len() > 1 {
                let cells: Vec<CellId> = owners.iter().copied().collect();
                for cell_id in &owners {
                    self.errors
                        .entry(*cell_id)
                        .or_default()
                        .push(ErrorKind::MultipleDefinition {
                            name: name.clone(),
                            cells: cells.clone(),
                        });
                }
            }
        }
    }
}

/// Thread-safe handle to the dataflow graph.
pub struct DirectedGraph {
    inner: RwLock<Inner>,
}

impl DirectedGraph {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::new()),
        }
    }

    /// Insert `cell`, wiring def/ref edges against every other live cell
    /// (spec.md §4.2 `register`).
    pub fn register(&self, cell: CellImpl) {
        let mut inner = self.inner.write().unwrap();
        let cell_id = cell.cell_id;
        let defs: HashSet<Name> = cell.defs().clone();
        let refs: HashSet<Name> = cell.refs().clone();

        inner.node_of(cell_id);
        inner.cells.insert(cell_id, cell);
        inner.order_counter += 1;
        inner.registration_order.insert(cell_id, inner.order_counter);

        let mut touched_names = HashSet::new();

        for n in &defs {
            inner.definitions.entry(n.clone()).or_default().insert(cell_id);
            touched_names.insert(n.clone());
        }

        // refs(cell) resolved by an existing owner: owner -> cell
        let mut edges = Vec::new();
        for n in &refs {
            if let Some(owners) = inner.definitions.get(n) {
                for &owner in owners {
                    if owner != cell_id {
                        edges.push((owner, cell_id));
                    }
                }
            }
        }
        // existing cells whose refs include a name this cell defines: cell -> consumer
        let consumers: Vec<CellId> = inner
            .cells
            .iter()
            .filter(|(id, c)| **id != cell_id && c.refs().iter().any(|n| defs.contains(n)))
            .map(|(id, _)| *id)
            .collect();
        for consumer in consumers {
            edges.push((cell_id, consumer));
        }

        for (from, to) in edges {
            let from_idx = inner.node_of(from);
            let to_idx = inner.node_of(to);
            inner.graph.add_edge(from_idx, to_idx, ());
        }

        inner.recompute_multiple_definitions(&touched_names);
        inner.detect_cycles();
    }

    /// Remove `cell_id` entirely: edges, definitions, and any error
    /// memberships it held (spec.md §4.2 `unregister`).
    pub fn unregister(&self, cell_id: CellId) {
        let mut inner = self.inner.write().unwrap();
        let Some(cell) = inner.cells.remove(&cell_id) else {
            return;
        };
        if let Some(&idx) = inner.node_indices.get(&cell_id) {
            inner.graph.remove_node(idx);
            inner.node_indices.remove(&cell_id);
            // `petgraph` may reassign the removed slot to the last node;
            // refresh every remaining index to stay consistent.
            inner.node_indices.clear();
            for idx in inner.graph.node_indices() {
                let id = inner.graph[idx];
                inner.node_indices.insert(id, idx);
            }
        }
        let mut touched_names = HashSet::new();
        for n in cell.defs() {
            if let Some(owners) = inner.definitions.get_mut(n) {
                owners.remove(&cell_id);
                if owners.is_empty() {
                    inner.definitions.remove(n);
                }
            }
            touched_names.insert(n.clone());
        }
        inner.errors.remove(&cell_id);
        inner.registration_order.remove(&cell_id);
        inner.recompute_multiple_definitions(&touched_names);
        inner.detect_cycles();
    }

    /// Replace `cell_id`'s code/analysis, preserving its id and runtime
    /// slots (spec.md §4.2 `update_code`). Output is intentionally left
    /// untouched here; the runner clears it at run start.
    pub fn update_code(&self, cell_id: CellId, new_code: String, analysis: crate::analyzer::Analysis) {
        let runtime = {
            let inner = self.inner.read().unwrap();
            inner.cells.get(&cell_id).map(|c| c.runtime.clone())
        };
        self.unregister(cell_id);
        let mut cell = CellImpl::new(cell_id, new_code, analysis);
        if let Some(runtime) = runtime {
            cell.runtime = runtime;
        }
        self.register(cell);
    }

    /// Kahn's algorithm over the induced subgraph of `subset`, ties broken
    /// by registration order for determinism (spec.md §4.2
    /// `topological_sort`).
    pub fn topological_sort(&self, subset: &[CellId]) -> Vec<CellId> {
        let inner = self.inner.read().unwrap();
        let subset_set: HashSet<CellId> = subset.iter().copied().collect();

        let mut indegree: FxHashMap<CellId, usize> = FxHashMap::default();
        for &id in &subset_set {
            indegree.insert(id, 0);
        }
        for &id in &subset_set {
            if let Some(&idx) = inner.node_indices.get(&id) {
                for neighbor_idx in inner.graph.neighbors(idx) {
                    let neighbor = inner.graph[neighbor_idx];
                    if subset_set.contains(&neighbor) {
                        *indegree.get_mut(&neighbor).unwrap() += 1;
                    }
                }
            }
        }

        let order_of = |id: &CellId| inner.registration_order.get(id).copied().unwrap_or(usize::MAX);
        let mut ready: Vec<CellId> = indegree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();
        ready.sort_by_key(order_of);

        let mut out = Vec::with_capacity(subset_set.len());
        let mut queue: VecDeque<CellId> = ready.into();
        while let Some(id) = queue.pop_front() {
            out.push(id);
            if let Some(&idx) = inner.node_indices.get(&id) {
                let mut newly_ready = Vec::new();
                for neighbor_idx in inner.graph.neighbors(idx) {
                    let neighbor = inner.graph[neighbor_idx];
                    if !subset_set.contains(&neighbor) {
                        continue;
                    }
                    let d = indegree.get_mut(&neighbor).unwrap();
                    *d -= 1;
                    if *d == 0 {
                        newly_ready.push(neighbor);
                    }
                }
                newly_ready.sort_by_key(order_of);
                for n in newly_ready {
                    queue.push_back(n);
                }
            }
        }
        out
    }

    /// BFS reachability over `relatives` from `roots`. When
    /// `import_block_relatives` is set, an edge between two import-only
    /// cells is elided (spec.md §4.2).
    pub fn transitive_closure(
        &self,
        roots: &[CellId],
        relatives: Relatives,
        inclusive: bool,
        import_block_relatives: bool,
    ) -> Vec<CellId> {
        let inner = self.inner.read().unwrap();
        let mut seen: HashSet<CellId> = HashSet::new();
        let mut queue: VecDeque<CellId> = VecDeque::new();
        for &r in roots {
            if inclusive && seen.insert(r) {
                queue.push_back(r);
            } else if !inclusive {
                queue.push_back(r);
            }
        }
        let mut visited_roots: HashSet<CellId> = roots.iter().copied().collect();

        while let Some(id) = queue.pop_front() {
            let Some(&idx) = inner.node_indices.get(&id) else {
                continue;
            };
            let neighbors: Vec<CellId> = match relatives {
                Relatives::Children => inner.graph.neighbors(idx).map(|n| inner.graph[n]).collect(),
                Relatives::Parents => inner
                    .graph
                    .neighbors_directed(idx, petgraph::Direction::Incoming)
                    .map(|n| inner.graph[n])
                    .collect(),
                Relatives::Siblings => {
                    // Cells sharing a parent with `id`.
                    let mut sibs = HashSet::new();
                    for parent_idx in inner.graph.neighbors_directed(idx, petgraph::Direction::Incoming) {
                        for sib_idx in inner.graph.neighbors(parent_idx) {
                            if sib_idx != idx {
                                sibs.insert(inner.graph[sib_idx]);
                            }
                        }
                    }
                    sibs.into_iter().collect()
                }
            };
            for n in neighbors {
                if import_block_relatives {
                    let both_import_only = inner
                        .cells
                        .get(&id)
                        .map(|c| c.is_import_only())
                        .unwrap_or(false)
                        && inner.cells.get(&n).map(|c| c.is_import_only()).unwrap_or(false);
                    if both_import_only {
                        continue;
                    }
                }
                if seen.insert(n) {
                    queue.push_back(n);
                }
            }
            let _ = visited_roots.remove(&id);
        }

        if !inclusive {
            for r in roots {
                seen.remove(r);
            }
        }
        seen.into_iter().collect()
    }

    /// True if `cell_id`'s own config is disabled or any ancestor is
    /// (spec.md §4.2 `is_disabled`).
    pub fn is_disabled(&self, cell_id: CellId) -> bool {
        let inner = self.inner.read().unwrap();
        if inner.cells.get(&cell_id).map(|c| c.config.disabled).unwrap_or(false) {
            return true;
        }
        drop(inner);
        self.transitive_closure(&[cell_id], Relatives::Parents, false, false)
            .into_iter()
            .any(|ancestor| {
                self.inner
                    .read()
                    .unwrap()
                    .cells
                    .get(&ancestor)
                    .map(|c| c.config.disabled)
                    .unwrap_or(false)
            })
    }

    pub fn get_defining_cells(&self, name: &str) -> HashSet<CellId> {
        self.inner
            .read()
            .unwrap()
            .definitions
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_cell(&self, cell_id: CellId) -> Option<CellImpl> {
        self.inner.read().unwrap().cells.get(&cell_id).cloned()
    }

    pub fn cell_ids(&self) -> Vec<CellId> {
        self.inner.read().unwrap().cells.keys().copied().collect()
    }

    pub fn errors(&self, cell_id: CellId) -> Vec<ErrorKind> {
        self.inner.read().unwrap().errors.get(&cell_id).cloned().unwrap_or_default()
    }

    pub fn has_errors(&self, cell_id: CellId) -> bool {
        !self.errors(cell_id).is_empty()
    }

    /// Mutate a cell's runtime slots in place under the write lock.
    pub fn with_runtime_mut<R>(&self, cell_id: CellId, f: impl FnOnce(&mut CellRuntime) -> R) -> Option<R> {
        let mut inner = self.inner.write().unwrap();
        inner.cells.get_mut(&cell_id).map(|c| f(&mut c.runtime))
    }

    pub fn set_config(&self, cell_id: CellId, config: CellConfig) {
        let mut inner = self.inner.write().unwrap();
        if let Some(cell) = inner.cells.get_mut(&cell_id) {
            cell.config = config;
        }
    }
}

impl Default for DirectedGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::ids::CellIdFactory;

    fn make_cell(factory: &CellIdFactory, code: &str) -> CellImpl {
        let id = factory.next();
        let analysis = analyze(id, code).unwrap();
        CellImpl::new(id, code.to_string(), analysis)
    }

    #[test]
    fn register_wires_def_ref_edges() {
        let factory = CellIdFactory::new();
        let graph = DirectedGraph::new();
        let producer = make_cell(&factory, "x = 1\n");
        let producer_id = producer.cell_id;
        graph.register(producer);
        let consumer = make_cell(&factory, "y = x + 1\n");
        let consumer_id = consumer.cell_id;
        graph.register(consumer);

        let order = graph.topological_sort(&[consumer_id, producer_id]);
        assert_eq!(order, vec![producer_id, consumer_id]);
    }

    #[test]
    fn duplicate_definition_is_flagged_on_both_cells() {
        let factory = CellIdFactory::new();
        let graph = DirectedGraph::new();
        let a = make_cell(&factory, "x = 1\n");
        let a_id = a.cell_id;
        graph.register(a);
        let b = make_cell(&factory, "x = 2\n");
        let b_id = b.cell_id;
        graph.register(b);

        assert!(graph.has_errors(a_id));
        assert!(graph.has_errors(b_id));
    }

    #[test]
    fn cycle_is_detected_and_cleared_on_unregister() {
        let factory = CellIdFactory::new();
        let graph = DirectedGraph::new();
        let a = make_cell(&factory, "a = b + 1\n");
        let a_id = a.cell_id;
        graph.register(a);
        let b = make_cell(&factory, "b = a + 1\n");
        let b_id = b.cell_id;
        graph.register(b);

        assert!(graph.has_errors(a_id));
        assert!(graph.has_errors(b_id));

        graph.unregister(b_id);
        assert!(!graph.has_errors(a_id));
    }

    #[test]
    fn unregister_removes_definitions_and_clears_multi_def() {
        let factory = CellIdFactory::new();
        let graph = DirectedGraph::new();
        let a = make_cell(&factory, "x = 1\n");
        let a_id = a.cell_id;
        graph.register(a);
        let b = make_cell(&factory, "x = 2\n");
        let b_id = b.cell_id;
        graph.register(b);
        graph.unregister(b_id);

        assert!(!graph.has_errors(a_id));
        assert_eq!(graph.get_defining_cells("x"), [a_id].into_iter().collect());
    }

    #[test]
    fn transitive_closure_over_children() {
        let factory = CellIdFactory::new();
        let graph = DirectedGraph::new();
        let a = make_cell(&factory, "x = 1\n");
        let a_id = a.cell_id;
        graph.register(a);
        let b = make_cell(&factory, "y = x + 1\n");
        let b_id = b.cell_id;
        graph.register(b);
        let c = make_cell(&factory, "z = y + 1\n");
        let c_id = c.cell_id;
        graph.register(c);

        let closure = graph.transitive_closure(&[a_id], Relatives::Children, false, false);
        assert_eq!(closure.into_iter().collect::<HashSet<_>>(), [b_id, c_id].into_iter().collect());
    }

    #[test]
    fn is_disabled_propagates_from_ancestor() {
        let factory = CellIdFactory::new();
        let graph = DirectedGraph::new();
        let a = make_cell(&factory, "x = 1\n");
        let a_id = a.cell_id;
        graph.register(a);
        let b = make_cell(&factory, "y = x + 1\n");
        let b_id = b.cell_id;
        graph.register(b);

        graph.set_config(a_id, CellConfig { disabled: true, ..Default::default() });
        assert!(graph.is_disabled(a_id));
        assert!(graph.is_disabled(b_id));
    }
}
