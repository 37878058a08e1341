//! A reactive execution kernel for a notebook: static dependency analysis,
//! a dataflow graph, a cell runner, a session view, and the reactive
//! kernel that ties them together (spec.md §2 overview).
//!
//! Grounded throughout on the teacher crate's layering (`venus-core`'s
//! graph/execute/state split, `venus-server`'s session/protocol/watcher
//! split) generalized from a compiled, FFI-dispatched cell model to a
//! dynamically analyzed, interpreted one. See `DESIGN.md` at the
//! workspace root for the full grounding ledger.

pub mod abort;
pub mod analyzer;
pub mod config;
pub mod console;
pub mod error;
pub mod evaluator;
pub mod graph;
pub mod ids;
pub mod kernel;
pub mod protocol;
pub mod reactive;
pub mod reload;
pub mod runner;
pub mod session;

pub use config::{ExecutionMode, ExecutionType, KernelConfig, KernelConfigBuilder};
pub use error::{Error, Result};
pub use evaluator::{CellEvaluator, ExprEvaluator};
pub use ids::{CellId, CellIdFactory, Name, ObjectId};
pub use kernel::Kernel;
