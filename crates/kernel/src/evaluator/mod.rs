//! The embedded-language boundary (spec.md §1 non-goal: "a general-purpose
//! interpreter... the core embeds and drives an existing expression
//! evaluator"; SPEC_FULL.md §3).
//!
//! [`CellEvaluator`] is the seam a real host swaps its own interpreter
//! into; [`ExprEvaluator`] is the small reference implementation shipped so
//! this crate is runnable end to end without one.

pub mod expr;
mod value;

pub use expr::ExprEvaluator;
pub use value::Value;

use std::collections::BTreeMap;

use crate::abort::AbortHandle;
use crate::error::AnalyzerError;
use crate::ids::{CellId, Name};
use crate::reactive::StateRegistry;
use crate::session::Channel;

/// A cell's module-scope bindings, mutated only by the kernel thread
/// during cell execution (spec.md §5 "Globals dict: mutated only by the
/// kernel thread").
#[derive(Debug, Clone, Default)]
pub struct Globals {
    vars: BTreeMap<Name, Value>,
}

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set(&mut self, name: Name, value: Value) {
        self.vars.insert(name, value);
    }

    pub fn remove(&mut self, name: &str) {
        self.vars.remove(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn display(&self, name: &str) -> Option<String> {
        self.vars.get(name).map(|v| v.to_string())
    }
}

/// A cell compiled down to whatever executable form the evaluator needs.
/// For [`ExprEvaluator`] this is just the source text plus its analysis
/// (no separate AST stage, matching the analyzer's own "not a full
/// parser" stance); a production embedder's `CompiledCell` would instead
/// carry real bytecode/closures.
#[derive(Debug, Clone)]
pub struct CompiledCell {
    pub cell_id: CellId,
    pub source: String,
}

/// Raised during a cell's execution, classified per spec.md §4.3 in
/// precedence order (top listed first): `Interrupt` > `MarimoStop` >
/// `StrictExecutionError` > any other exception.
#[derive(Debug, Clone, PartialEq)]
pub enum RunException {
    /// SIGINT or cooperative abort. Does not, by itself, cancel
    /// descendants — the on-finish hook blanket-marks remaining queued
    /// cells as interrupted (spec.md §4.3).
    Interrupt,
    /// `mo.stop(cond, value)`: a cooperative halt. Cancels descendants;
    /// the cell's own output becomes `value`.
    MarimoStop(Value),
    /// A statically-missing ref under `ExecutionType::Strict` (spec.md
    /// §4.1/§7): the cell is refused before it runs.
    StrictExecution {
        missing_ref: Name,
        expected_definer: Option<CellId>,
    },
    /// Any other runtime exception.
    Raised { exception_type: String, message: String },
}

/// The outcome of running one cell (spec.md §3 `RunResult`).
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub output: Option<Value>,
    pub exception: Option<RunException>,
    pub accumulated_output: Option<Value>,
}

impl RunResult {
    pub fn success(&self) -> bool {
        self.exception.is_none()
    }

    pub fn ok(output: Option<Value>) -> Self {
        Self {
            output,
            exception: None,
            accumulated_output: None,
        }
    }

    pub fn failed(exception: RunException) -> Self {
        Self {
            output: None,
            exception: Some(exception),
            accumulated_output: None,
        }
    }
}

/// Everything a running cell can reach out to: cooperative cancellation,
/// console output, and the reactive-state registry. Constructed fresh for
/// each `execute` call by the runner.
pub struct ExecCtx<'a> {
    pub cell_id: CellId,
    pub abort: AbortHandle,
    pub states: &'a StateRegistry,
    console: &'a mut dyn FnMut(Channel, String),
}

impl<'a> ExecCtx<'a> {
    pub fn new(
        cell_id: CellId,
        abort: AbortHandle,
        states: &'a StateRegistry,
        console: &'a mut dyn FnMut(Channel, String),
    ) -> Self {
        Self {
            cell_id,
            abort,
            states,
            console,
        }
    }

    pub fn write_console(&mut self, channel: Channel, data: String) {
        (self.console)(channel, data);
    }
}

/// The seam between the kernel and whatever language runtime actually
/// drives a cell (spec.md §3). Compilation is separate from analysis
/// (`crate::analyzer::analyze`): analysis recovers defs/refs/imports for
/// the dataflow graph, while `compile` here produces whatever executable
/// form `execute` consumes.
pub trait CellEvaluator: Send + Sync {
    fn compile(&self, cell_id: CellId, source: &str) -> Result<CompiledCell, AnalyzerError>;

    fn execute(&self, compiled: &CompiledCell, globals: &mut Globals, ctx: &mut ExecCtx<'_>) -> RunResult;
}
