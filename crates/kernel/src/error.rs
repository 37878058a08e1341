//! Error taxonomy for the reactive kernel.
//!
//! Each subsystem gets its own `thiserror` enum (mirroring the split the
//! teacher crate uses between its core engine and server errors); this module
//! composes them into one [`Error`] for callers that only care that
//! *something* failed, while subsystem-specific callers can match on the
//! narrower type directly.

use thiserror::Error;

use crate::graph::CellId;

/// Errors raised while statically analyzing a cell's source.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnalyzerError {
    /// `from x import *` is a hard compile error; the cell is refused.
    #[error("import-star is not allowed in cell {0}")]
    ImportStar(CellId),

    /// The distinguished setup cell referenced a name; setup cells may not have refs.
    #[error("setup cell {0} may not reference external names")]
    SetupRoot(CellId),

    /// The source could not be tokenized/parsed at all.
    #[error("syntax error in cell {cell_id}: {message}")]
    Syntax { cell_id: CellId, message: String },
}

/// Errors raised while mutating or querying the dataflow graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A name is defined by more than one live cell.
    #[error("name {name:?} is defined by multiple cells: {cells:?}")]
    MultipleDefinition { name: String, cells: Vec<CellId> },

    /// Registering or updating a cell introduced a cycle.
    #[error("cycle detected among cells: {0:?}")]
    Cycle(Vec<CellId>),

    /// A requested cell id does not exist in the graph.
    #[error("cell not found: {0}")]
    CellNotFound(CellId),
}

/// Errors raised by the cell runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The graph reported an error while computing the run set.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The evaluator failed to compile a cell's source prior to execution.
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
}

/// Errors raised by the module reloader / watcher subsystem.
#[derive(Debug, Error)]
pub enum ReloadError {
    /// The backing file for a module could not be read.
    #[error("failed to read module source at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Re-executing the module failed; it is left in a cleared state.
    #[error("module {module} failed to reload: {message}")]
    ReloadFailed { module: String, message: String },

    /// The underlying filesystem watcher could not be started.
    #[error("failed to start file watcher: {0}")]
    Watch(String),
}

/// Top-level error, composing every subsystem's error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Reload(#[from] ReloadError),

    /// An internal invariant was violated. Carries a fresh id; the taxonomy
    /// in spec.md §3/§7 redacts the detail to the frontend and logs the rest.
    #[error("internal error {id}: {detail}")]
    Internal { id: uuid::Uuid, detail: String },
}

impl Error {
    /// Build an [`Error::Internal`] with a fresh id, logging the detail at
    /// `error` level so it is recoverable from server logs even though the
    /// frontend only ever sees the id.
    pub fn internal(detail: impl Into<String>) -> Self {
        let id = uuid::Uuid::new_v4();
        let detail = detail.into();
        tracing::error!(error_id = %id, %detail, "internal kernel error");
        Self::Internal { id, detail }
    }
}

/// Result alias for kernel operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
