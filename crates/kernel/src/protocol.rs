//! Wire protocol (spec.md §6): the control requests a frontend sends and
//! the stream messages the kernel sends back, both tagged enums in the
//! teacher's `venus_server::protocol` style (`#[serde(tag = "type",
//! rename_all = "snake_case")]`).

use serde::{Deserialize, Serialize};

use crate::config::{ExecutionMode, ExecutionType};
use crate::ids::{CellId, ObjectId};
use crate::session::{CellOp, Dataset, DataSourceConnection, VariableValue, Variables};

/// Requests a frontend sends on the control channel (spec.md §6 "Control
/// requests").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Run one cell and its stale descendants.
    ExecutionRequest { cell_id: CellId, code: String },

    /// Run several cells together as one invocation.
    ExecuteMultiple { cell_ids: Vec<CellId>, codes: Vec<String> },

    /// Run every cell currently marked stale.
    ExecuteStale,

    /// Run an ad hoc scratchpad expression against the live globals,
    /// without registering it in the dataflow graph.
    ExecuteScratchpad { code: String },

    /// A UI element's bound value changed.
    SetUIElementValue { object_id: ObjectId, value: serde_json::Value },

    /// Update a cell's disabled/hidden/column config.
    SetCellConfig { cell_id: CellId, disabled: bool, hide_code: bool, column: Option<i32> },

    /// Invoke a named function exposed by a cell (e.g. a button handler).
    FunctionCall { cell_id: CellId, function_name: String, args: serde_json::Value },

    /// Remove a cell from the graph entirely.
    DeleteCell { cell_id: CellId },

    /// Rename the notebook (affects `__name__`-equivalent bookkeeping only).
    Rename { filename: String },

    /// Ask for a sample/summary of one column of a known dataset.
    PreviewDatasetColumn { source_type: String, dataset_name: String, column_name: String },

    /// Request completions for a partially-typed cell.
    CodeCompletion { cell_id: CellId, code: String, cursor: usize },

    /// Install packages the analyzer flagged as imported but unavailable.
    InstallMissingPackages { packages: Vec<String> },

    /// Interrupt whatever is currently running.
    Stop,

    /// Initial handshake: frontend declares the execution mode/type it wants.
    Creation { execution_mode: ExecutionMode, execution_type: ExecutionType },
}

/// Messages the kernel streams back (spec.md §6 "Stream messages"). Most
/// variants wrap a [`CellOp`] or a [`SessionView`](crate::session::SessionView)
/// field directly rather than re-deriving a parallel shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    CellOp(CellOp),
    Variables(Variables),
    VariableValues { values: Vec<VariableValue> },
    Datasets { datasets: Vec<Dataset> },
    DataColumnPreview { source_type: String, dataset_name: String, column_name: String, summary: serde_json::Value },
    DataSourceConnections { connections: Vec<DataSourceConnection> },
    RemoveUIElements { cell_id: CellId },
    Interrupted,
    CompletedRun,
    KernelReady { cell_ids: Vec<CellId> },
    CompletionResult { cell_id: CellId, cursor: usize, completions: Vec<String> },
    Alert { title: String, description: String },
    Banner { text: String },
    Reload,
    Reconnected,
    MissingPackageAlert { packages: Vec<String> },
    InstallingPackageAlert { packages: Vec<String> },
    FunctionCallResult { cell_id: CellId, function_name: String, result: serde_json::Value },
    UpdateCellIds { cell_ids: Vec<CellId> },
    UpdateCellCodes { cell_ids: Vec<CellId>, codes: Vec<String> },
    FocusCell { cell_id: CellId },
}

/// Wire shape for a [`crate::graph::ErrorKind`]/[`crate::evaluator::RunException`]
/// surfaced as a cell's error output (spec.md §6 "error taxonomy"). The
/// runner writes this as a `CellOutput`'s JSON `data` rather than a
/// dedicated message variant, matching the teacher's choice to keep
/// per-cell error detail inline on the cell rather than as a side-channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CellErrorInfo {
    Cycle { cells: Vec<CellId> },
    MultipleDefs { name: String, cells: Vec<CellId> },
    ImportStar,
    Interruption,
    AncestorStopped { ancestor: CellId },
    AncestorPrevented { ancestor: CellId },
    Exception { exception_type: String, message: String },
    Syntax { message: String },
    StrictException { missing_ref: String },
    Internal { id: uuid::Uuid },
    SqlError { message: String },
    Unknown { message: String },
}
