//! Per-cell data: the immutable analysis result plus the mutable runtime
//! slots the runner flips as a cell moves through its lifecycle.
//!
//! Mirrors the teacher's `graph::types::CellInfo`, generalized from "a
//! compiled `#[venus::cell]` function" to a dynamically-analyzed source cell
//! with multi-name defs/refs.

use std::collections::BTreeMap;
use std::time::SystemTime;

use crate::analyzer::{Analysis, VariableKind};
use crate::ids::{CellId, Name};

/// Disabled/hidden/column placement, independent of analysis (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellConfig {
    pub disabled: bool,
    pub hide_code: bool,
    pub column: Option<i32>,
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            hide_code: false,
            column: None,
        }
    }
}

/// How a name this cell defines was bound, plus what it itself needs to
/// resolve (spec.md §3 `VariableData`). Simplified from "list per name" to
/// "one entry per name" — a name redefined several times in the same cell
/// keeps only the kind of its last binding, which is all external consumers
/// (the graph, a variables panel) can observe anyway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableData {
    pub kind: VariableKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Idle,
    Queued,
    Running,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunResultStatus {
    Idle,
    Queued,
    Running,
    Success,
    Errored,
    Cancelled,
    Disabled,
}

/// Per-subsystem tag for the graph's own error marking (spec.md §3
/// `DirectedGraph.errors`). Runtime exception classification (§4.3) lives in
/// `runner::classify` and is distinct from this: these are *structural*
/// errors the graph itself can detect without running anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    MultipleDefinition { name: Name, cells: Vec<CellId> },
    Cycle(Vec<CellId>),
    ImportStar,
    SetupRoot,
    Syntax(String),
}

/// Mutable slots reset whenever a cell's code changes, but otherwise owned
/// by the runner across a run (spec.md §3's "mutable runtime fields").
#[derive(Debug, Clone)]
pub struct CellRuntime {
    pub runtime_state: RuntimeState,
    pub run_result_status: RunResultStatus,
    pub stale: bool,
    pub output: Option<crate::session::CellOutput>,
    pub last_run_at: Option<SystemTime>,
}

impl Default for CellRuntime {
    fn default() -> Self {
        Self {
            runtime_state: RuntimeState::Idle,
            run_result_status: RunResultStatus::Idle,
            stale: true,
            output: None,
            last_run_at: None,
        }
    }
}

/// Everything the graph and runner need to know about one cell.
#[derive(Debug, Clone)]
pub struct CellImpl {
    pub cell_id: CellId,
    pub code: String,
    pub code_hash: u64,
    pub analysis: Analysis,
    pub config: CellConfig,
    pub runtime: CellRuntime,
    /// Whether this is the notebook's distinguished setup cell (spec.md
    /// §4.1's "setup cells... may not have refs").
    pub is_setup: bool,
}

impl CellImpl {
    pub fn new(cell_id: CellId, code: String, analysis: Analysis) -> Self {
        let code_hash = hash_code(&code);
        Self {
            cell_id,
            code,
            code_hash,
            analysis,
            config: CellConfig::default(),
            runtime: CellRuntime::default(),
            is_setup: false,
        }
    }

    pub fn defs(&self) -> &std::collections::BTreeSet<Name> {
        &self.analysis.defs
    }

    pub fn refs(&self) -> &std::collections::BTreeSet<Name> {
        &self.analysis.refs
    }

    /// `true` if this cell imports nothing but names (i.e. every def came
    /// from an import), which is what `import_block_relatives` elision
    /// tests for (spec.md §4.2).
    pub fn is_import_only(&self) -> bool {
        !self.analysis.imports.is_empty()
            && self
                .analysis
                .defs
                .iter()
                .all(|n| matches!(self.analysis.kind_of.get(n), Some(VariableKind::Import)))
    }

    /// The top-level package each of this cell's imports belongs to, e.g.
    /// `"matplotlib"` for `import matplotlib.pyplot as plt`.
    pub fn imported_namespaces(&self) -> std::collections::HashSet<Name> {
        self.analysis
            .imports
            .iter()
            .map(|imp| imp.module.split('.').next().unwrap_or(&imp.module).to_string())
            .collect()
    }

    /// The local name bound for an import whose top-level package is
    /// `namespace` (e.g. `"plt"` for `namespace == "matplotlib"` given
    /// `import matplotlib.pyplot as plt`).
    pub fn namespace_to_variable(&self, namespace: &str) -> Option<Name> {
        self.analysis
            .imports
            .iter()
            .find(|imp| imp.module.split('.').next().unwrap_or(&imp.module) == namespace)
            .map(|imp| imp.bound_name.clone())
    }

    pub fn variable_data(&self) -> BTreeMap<Name, VariableData> {
        self.analysis
            .defs
            .iter()
            .map(|n| {
                let kind = self
                    .analysis
                    .kind_of
                    .get(n)
                    .copied()
                    .unwrap_or(VariableKind::Variable);
                (n.clone(), VariableData { kind })
            })
            .collect()
    }
}

fn hash_code(code: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = rustc_hash::FxHasher::default();
    code.hash(&mut hasher);
    hasher.finish()
}
