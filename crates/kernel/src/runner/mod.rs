//! The cell runner (spec.md §4.3): drives one invocation over a frontier of
//! root cells to completion, dispatching each cell to a [`CellEvaluator`]
//! and producing the [`CellOp`]s a [`crate::session::SessionView`] merges.
//!
//! Grounded on the teacher's `execute::executor::LinearExecutor`: a
//! sequential executor over a precomputed order, abort checked before and
//! after each cell, progress reported through callbacks (here, hooks).

pub mod hooks;

use std::collections::{HashMap, HashSet};

use crate::abort::AbortHandle;
use crate::config::{ExecutionMode, ExecutionType};
use crate::evaluator::{CellEvaluator, ExecCtx, Globals, RunException, Value};
use crate::graph::{CellId, DirectedGraph, ErrorKind, Relatives};
use crate::protocol::CellErrorInfo;
use crate::reactive::StateRegistry;
use crate::session::{CellOp, CellOpStatus, CellOutput, Channel, maybe_truncate_output};

pub use hooks::{HookPipeline, OnFinishHook, PostExecutionHook, PreExecutionHook, PreparationHook, FINAL_PRIORITY};

/// What a completed invocation ran and skipped, for the kernel's follow-up
/// (state-propagation) loop to build on (spec.md §4.9).
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub ran: Vec<CellId>,
    pub cancelled: Vec<CellId>,
    pub interrupted: bool,
}

pub struct CellRunner<'a> {
    pub graph: &'a DirectedGraph,
    pub evaluator: &'a dyn CellEvaluator,
    pub states: &'a StateRegistry,
    pub hooks: &'a HookPipeline,
    pub execution_mode: ExecutionMode,
    pub execution_type: ExecutionType,
    pub output_max_bytes: usize,
}

impl<'a> CellRunner<'a> {
    pub fn new(
        graph: &'a DirectedGraph,
        evaluator: &'a dyn CellEvaluator,
        states: &'a StateRegistry,
        hooks: &'a HookPipeline,
        execution_mode: ExecutionMode,
        execution_type: ExecutionType,
        output_max_bytes: usize,
    ) -> Self {
        Self {
            graph,
            evaluator,
            states,
            hooks,
            execution_mode,
            execution_type,
            output_max_bytes,
        }
    }

    /// Run every cell reachable from `roots`, in dependency order, emitting
    /// a [`CellOp`] through `emit` for every status/output transition
    /// (spec.md §4.3's main loop). Cancellation short-circuits the
    /// remaining frontier rather than running it.
    pub fn run_all(
        &self,
        roots: &[CellId],
        globals: &mut Globals,
        excluded: &HashSet<CellId>,
        abort: &AbortHandle,
        console: &mut dyn FnMut(CellId, Channel, String),
        emit: &mut dyn FnMut(CellOp),
    ) -> RunSummary {
        let reachable = self.graph.transitive_closure(roots, Relatives::Children, true, true);
        let frontier: Vec<CellId> = reachable
            .into_iter()
            .filter(|id| !excluded.contains(id) && !self.graph.is_disabled(*id))
            .collect();
        let order = self.graph.topological_sort(&frontier);

        for hook in self.hooks.sorted_preparation() {
            hook.run(&order, self.graph);
        }
        for &cell_id in &order {
            emit(CellOp::new(cell_id).with_status(CellOpStatus::Queued).with_stale(false));
        }

        let mut summary = RunSummary::default();
        // Which ancestor each transitively-cancelled cell is blamed on, and
        // whether that ancestor halted cooperatively (`mo.stop`) or raised
        // (spec.md §307/§151: `ancestor-stopped` vs `ancestor-prevented`).
        let mut prevented: HashMap<CellId, Blame> = HashMap::new();

        for &cell_id in &order {
            if abort.is_aborted() {
                summary.interrupted = true;
                break;
            }

            if let Some(errs) = self.graph.errors(cell_id).into_iter().next() {
                emit(
                    CellOp::new(cell_id)
                        .with_status(CellOpStatus::Idle)
                        .with_output(error_output(structural_error_info(&errs))),
                );
                summary.cancelled.push(cell_id);
                continue;
            }

            if let Some(blame) = prevented.get(&cell_id).copied() {
                let info = if blame.stopped {
                    CellErrorInfo::AncestorStopped { ancestor: blame.raising_cell }
                } else {
                    CellErrorInfo::AncestorPrevented { ancestor: blame.raising_cell }
                };
                emit(CellOp::new(cell_id).with_status(CellOpStatus::Idle).with_output(error_output(info)));
                summary.cancelled.push(cell_id);
                continue;
            }

            for hook in self.hooks.sorted_pre_execution() {
                hook.run(cell_id);
            }
            emit(CellOp::new(cell_id).with_status(CellOpStatus::Running));

            let outcome = self.run_one(cell_id, globals, abort, console);
            let errored = matches!(outcome, CellOutcome::Errored(_) | CellOutcome::Interrupted);
            for hook in self.hooks.sorted_post_execution() {
                hook.run(cell_id, errored);
            }

            match outcome {
                CellOutcome::Ok(value) => {
                    // No longer stale once it has actually run — only a
                    // subsequent code change or watcher event re-marks it
                    // (spec.md §4.8).
                    self.graph.with_runtime_mut(cell_id, |runtime| runtime.stale = false);
                    emit(
                        CellOp::new(cell_id)
                            .with_status(CellOpStatus::Idle)
                            .with_output(value_output(value, self.output_max_bytes)),
                    );
                    summary.ran.push(cell_id);
                }
                CellOutcome::Stopped(value) => {
                    self.graph.with_runtime_mut(cell_id, |runtime| runtime.stale = false);
                    emit(
                        CellOp::new(cell_id)
                            .with_status(CellOpStatus::Idle)
                            .with_output(value_output(value, self.output_max_bytes)),
                    );
                    summary.ran.push(cell_id);
                    let blame = Blame { raising_cell: cell_id, stopped: true };
                    for descendant in self.graph.transitive_closure(&[cell_id], Relatives::Children, false, true) {
                        prevented.insert(descendant, blame);
                    }
                }
                CellOutcome::Interrupted => {
                    emit(
                        CellOp::new(cell_id)
                            .with_status(CellOpStatus::Idle)
                            .with_output(error_output(CellErrorInfo::Interruption)),
                    );
                    summary.interrupted = true;
                    break;
                }
                CellOutcome::Errored(info) => {
                    self.graph.with_runtime_mut(cell_id, |runtime| runtime.stale = false);
                    emit(
                        CellOp::new(cell_id)
                            .with_status(CellOpStatus::Idle)
                            .with_output(error_output(info)),
                    );
                    summary.ran.push(cell_id);
                    let blame = Blame { raising_cell: cell_id, stopped: false };
                    for descendant in self.graph.transitive_closure(&[cell_id], Relatives::Children, false, true) {
                        prevented.insert(descendant, blame);
                    }
                }
            }
        }

        if summary.interrupted {
            for &cell_id in &order {
                if !summary.ran.contains(&cell_id) && !summary.cancelled.contains(&cell_id) {
                    emit(
                        CellOp::new(cell_id)
                            .with_status(CellOpStatus::Idle)
                            .with_output(error_output(CellErrorInfo::Interruption)),
                    );
                    summary.cancelled.push(cell_id);
                }
            }
        }

        for hook in self.hooks.sorted_on_finish() {
            hook.run(&summary.ran, &summary.cancelled);
        }

        summary
    }

    /// Compile and execute a single cell, classifying its outcome per
    /// spec.md §4.3's precedence: `Interrupt` > `MarimoStop` >
    /// `StrictExecutionError` > any other exception.
    fn run_one(
        &self,
        cell_id: CellId,
        globals: &mut Globals,
        abort: &AbortHandle,
        console: &mut dyn FnMut(CellId, Channel, String),
    ) -> CellOutcome {
        let Some(cell) = self.graph.get_cell(cell_id) else {
            let id = uuid::Uuid::new_v4();
            tracing::error!(error_id = %id, %cell_id, "cell not found in graph during run");
            return CellOutcome::Errored(CellErrorInfo::Internal { id });
        };

        if self.execution_type == ExecutionType::Strict {
            if let Some(missing) = first_unresolved_ref(&cell, globals, self.graph) {
                return CellOutcome::Errored(CellErrorInfo::StrictException { missing_ref: missing });
            }
        }

        let compiled = match self.evaluator.compile(cell_id, &cell.code) {
            Ok(c) => c,
            Err(e) => return CellOutcome::Errored(CellErrorInfo::Syntax { message: e.to_string() }),
        };

        let mut console_sink = |channel: Channel, data: String| console(cell_id, channel, data);
        let mut ctx = ExecCtx::new(cell_id, abort.clone(), self.states, &mut console_sink);
        let result = self.evaluator.execute(&compiled, globals, &mut ctx);

        match result.exception {
            None => CellOutcome::Ok(result.output),
            Some(RunException::Interrupt) => CellOutcome::Interrupted,
            Some(RunException::MarimoStop(value)) => CellOutcome::Stopped(Some(value)),
            Some(RunException::StrictExecution { missing_ref, .. }) => {
                CellOutcome::Errored(CellErrorInfo::StrictException { missing_ref })
            }
            Some(RunException::Raised { exception_type, message }) => {
                CellOutcome::Errored(CellErrorInfo::Exception { exception_type, message })
            }
        }
    }
}

/// Which ancestor a transitively-cancelled cell is blamed on, and whether
/// that ancestor halted cooperatively or raised (spec.md §307/§151).
#[derive(Debug, Clone, Copy)]
struct Blame {
    raising_cell: CellId,
    stopped: bool,
}

enum CellOutcome {
    Ok(Option<Value>),
    Stopped(Option<Value>),
    Interrupted,
    Errored(CellErrorInfo),
}

fn value_output(value: Option<Value>, max_bytes: usize) -> CellOutput {
    let data = match value {
        Some(v) => v.to_string(),
        None => String::new(),
    };
    let (mimetype, data) = maybe_truncate_output("text/plain".into(), data, max_bytes);
    CellOutput::new(Channel::Output, mimetype, data)
}

/// Serialize a [`CellErrorInfo`] as a cell's error output — the single wire
/// shape for every error channel in the taxonomy (spec.md §293/§6).
fn error_output(info: CellErrorInfo) -> CellOutput {
    let data = serde_json::to_string(&info).unwrap_or_else(|_| "{}".into());
    CellOutput::new(Channel::MarimoError, "application/vnd.marimo+error", data)
}

/// Map a graph-detected structural error to its wire taxonomy entry
/// (spec.md §3/§65/§293: cycle, multiple-defs, and import-star are
/// mandatory preconditions enforced before a cell ever runs).
fn structural_error_info(kind: &ErrorKind) -> CellErrorInfo {
    match kind {
        ErrorKind::Cycle(cells) => CellErrorInfo::Cycle { cells: cells.clone() },
        ErrorKind::MultipleDefinition { name, cells } => CellErrorInfo::MultipleDefs {
            name: name.clone(),
            cells: cells.clone(),
        },
        ErrorKind::ImportStar => CellErrorInfo::ImportStar,
        ErrorKind::SetupRoot => CellErrorInfo::Unknown {
            message: "setup cell may not reference names defined elsewhere in the notebook".into(),
        },
        ErrorKind::Syntax(message) => CellErrorInfo::Syntax { message: message.clone() },
    }
}

/// Under `ExecutionType::Strict`, a cell may not run ahead of a ref it
/// needs (spec.md §4.1/§7). Returns the first ref this cell needs that no
/// other cell in the graph currently defines.
fn first_unresolved_ref(cell: &crate::graph::CellImpl, globals: &Globals, graph: &DirectedGraph) -> Option<crate::ids::Name> {
    cell.refs()
        .iter()
        .find(|r| !globals.contains(r) && graph.get_defining_cells(r).is_empty())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::evaluator::expr::ExprEvaluator;
    use crate::graph::{CellConfig, CellImpl};
    use crate::ids::CellIdFactory;

    fn register(graph: &DirectedGraph, factory: &CellIdFactory, code: &str) -> CellId {
        let id = factory.next();
        let analysis = analyze(id, code).unwrap();
        graph.register(CellImpl::new(id, code.to_string(), analysis));
        id
    }

    #[test]
    fn runs_cells_in_dependency_order_and_reports_output() {
        let graph = DirectedGraph::new();
        let factory = CellIdFactory::new();
        let a = register(&graph, &factory, "x = 1\n");
        let b = register(&graph, &factory, "y = x + 1\ny\n");

        let evaluator = ExprEvaluator;
        let states = StateRegistry::new();
        let hooks = HookPipeline::default();
        let runner = CellRunner::new(&graph, &evaluator, &states, &hooks, ExecutionMode::Autorun, ExecutionType::Relaxed, 5 * 1024 * 1024);

        let mut globals = Globals::new();
        let mut emitted = Vec::new();
        let summary = runner.run_all(&[a], &mut globals, &HashSet::new(), &AbortHandle::new(), &mut |_, _, _| {}, &mut |op| emitted.push(op));

        assert_eq!(summary.ran, vec![a, b]);
        assert!(summary.cancelled.is_empty());
    }

    #[test]
    fn marimo_stop_cancels_descendants_with_ancestor_stopped_tag() {
        let graph = DirectedGraph::new();
        let factory = CellIdFactory::new();
        let a = register(&graph, &factory, "import marimo as mo\nx = 1\nmo.stop(True, 'halt')\n");
        let b = register(&graph, &factory, "y = x + 1\ny\n");

        let evaluator = ExprEvaluator;
        let states = StateRegistry::new();
        let hooks = HookPipeline::default();
        let runner = CellRunner::new(&graph, &evaluator, &states, &hooks, ExecutionMode::Autorun, ExecutionType::Relaxed, 5 * 1024 * 1024);

        let mut globals = Globals::new();
        let mut emitted = Vec::new();
        let summary = runner.run_all(&[a], &mut globals, &HashSet::new(), &AbortHandle::new(), &mut |_, _, _| {}, &mut |op| emitted.push(op));

        assert_eq!(summary.ran, vec![a]);
        assert_eq!(summary.cancelled, vec![b]);

        let b_output = emitted.iter().filter(|op| op.cell_id == Some(b)).find_map(|op| op.output.clone()).unwrap();
        assert!(b_output.data.contains("\"type\":\"ancestor-stopped\""));
        assert!(b_output.data.contains(&format!("\"ancestor\":{}", serde_json::to_string(&a).unwrap())));
    }

    #[test]
    fn exception_cancels_descendants_with_ancestor_prevented_tag_and_raising_cell() {
        let graph = DirectedGraph::new();
        let factory = CellIdFactory::new();
        let a = register(&graph, &factory, "x = 1\nraise ValueError('boom')\n");
        let b = register(&graph, &factory, "y = x + 1\n");
        let c = register(&graph, &factory, "z = y + 1\n");

        let evaluator = ExprEvaluator;
        let states = StateRegistry::new();
        let hooks = HookPipeline::default();
        let runner = CellRunner::new(&graph, &evaluator, &states, &hooks, ExecutionMode::Autorun, ExecutionType::Relaxed, 5 * 1024 * 1024);

        let mut globals = Globals::new();
        let mut emitted = Vec::new();
        runner.run_all(&[a], &mut globals, &HashSet::new(), &AbortHandle::new(), &mut |_, _, _| {}, &mut |op| emitted.push(op));

        let a_output = emitted.iter().filter(|op| op.cell_id == Some(a)).find_map(|op| op.output.clone()).unwrap();
        assert!(a_output.data.contains("\"type\":\"exception\""));
        assert!(a_output.data.contains("\"exception_type\":\"ValueError\""));

        for descendant in [b, c] {
            let output = emitted.iter().filter(|op| op.cell_id == Some(descendant)).find_map(|op| op.output.clone()).unwrap();
            assert!(output.data.contains("\"type\":\"ancestor-prevented\""));
            assert!(output.data.contains(&format!("\"ancestor\":{}", serde_json::to_string(&a).unwrap())));
        }
    }

    #[test]
    fn cycle_prevents_execution_and_emits_cycle_error() {
        let graph = DirectedGraph::new();
        let factory = CellIdFactory::new();
        let a = register(&graph, &factory, "a = b + 1\n");
        let _b = register(&graph, &factory, "b = a + 1\n");

        let evaluator = ExprEvaluator;
        let states = StateRegistry::new();
        let hooks = HookPipeline::default();
        let runner = CellRunner::new(&graph, &evaluator, &states, &hooks, ExecutionMode::Autorun, ExecutionType::Relaxed, 5 * 1024 * 1024);

        let mut globals = Globals::new();
        let mut emitted = Vec::new();
        let summary = runner.run_all(&[a], &mut globals, &HashSet::new(), &AbortHandle::new(), &mut |_, _, _| {}, &mut |op| emitted.push(op));

        assert!(summary.ran.is_empty());
        assert!(summary.cancelled.contains(&a));
        let a_output = emitted.iter().filter(|op| op.cell_id == Some(a)).find_map(|op| op.output.clone()).unwrap();
        assert!(a_output.data.contains("\"type\":\"cycle\""));
    }

    #[test]
    fn oversized_output_is_replaced_with_a_warning() {
        let graph = DirectedGraph::new();
        let factory = CellIdFactory::new();
        let a = register(&graph, &factory, "'this output is definitely longer than ten bytes'\n");

        let evaluator = ExprEvaluator;
        let states = StateRegistry::new();
        let hooks = HookPipeline::default();
        let runner = CellRunner::new(&graph, &evaluator, &states, &hooks, ExecutionMode::Autorun, ExecutionType::Relaxed, 10);

        let mut globals = Globals::new();
        let mut emitted = Vec::new();
        runner.run_all(&[a], &mut globals, &HashSet::new(), &AbortHandle::new(), &mut |_, _, _| {}, &mut |op| emitted.push(op));

        let output = emitted.iter().rev().find_map(|op| op.output.clone()).unwrap();
        assert_eq!(output.mimetype, "text/markdown");
        assert!(output.data.contains("too large"));
    }

    #[test]
    fn abort_before_run_marks_remainder_cancelled() {
        let graph = DirectedGraph::new();
        let factory = CellIdFactory::new();
        let a = register(&graph, &factory, "x = 1\n");

        let evaluator = ExprEvaluator;
        let states = StateRegistry::new();
        let hooks = HookPipeline::default();
        let runner = CellRunner::new(&graph, &evaluator, &states, &hooks, ExecutionMode::Autorun, ExecutionType::Relaxed, 5 * 1024 * 1024);

        let abort = AbortHandle::new();
        abort.abort();
        let mut globals = Globals::new();
        let summary = runner.run_all(&[a], &mut globals, &HashSet::new(), &abort, &mut |_, _, _| {}, &mut |_| {});

        assert!(summary.interrupted);
        assert!(summary.ran.is_empty());
    }
}
