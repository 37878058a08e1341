//! The session view: a server-side materialized projection of per-cell
//! outputs, console streams, variable values, and execution status
//! (spec.md §3 `SessionView state`, §4.5).
//!
//! Mirrors the shape of the teacher's `venus_server::session::Session`
//! (which also holds a materialized, mutation-driven view of notebook
//! state for new subscribers to bootstrap from) but keyed by the spec's
//! incremental `CellOp` merge law rather than venus's full-snapshot
//! `NotebookState`.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::ids::{CellId, Name, ObjectId};

/// Which stream a piece of cell output arrived on (spec.md §3 `CellOutput`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    Stdout,
    Stderr,
    Stdin,
    Output,
    MarimoError,
    Media,
}

/// One piece of output bound for the frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellOutput {
    pub channel: Channel,
    pub mimetype: String,
    pub data: String,
    pub timestamp: f64,
}

impl CellOutput {
    pub fn new(channel: Channel, mimetype: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            channel,
            mimetype: mimetype.into(),
            data: data.into(),
            timestamp: now_ms(),
        }
    }

    /// `true` if `self` and `other` are mergeable by concatenating `data`
    /// (spec.md §4.6, §9: "the merge predicate must check mimetype
    /// compatibility" — concatenation is only valid for sequential
    /// text-like mimetypes, never e.g. an HTML fragment).
    pub fn mergeable_with(&self, other: &CellOutput) -> bool {
        self.channel == other.channel
            && self.mimetype == other.mimetype
            && is_text_like(&self.mimetype)
    }
}

fn is_text_like(mimetype: &str) -> bool {
    mimetype == "text/plain" || mimetype.is_empty()
}

/// Replace `data` with a warning if it exceeds `max_bytes` (spec.md §6,
/// `MARIMO_OUTPUT_MAX_BYTES`), so a single oversized output can't blow up a
/// session's memory or the wire payload to the frontend.
pub fn maybe_truncate_output(mimetype: String, data: String, max_bytes: usize) -> (String, String) {
    if data.len() <= max_bytes {
        return (mimetype, data);
    }
    let warning = format!(
        "**Your output is too large**\n\nYour output is too large for the kernel to show. \
         It has a size of {} bytes. Did you output this object by accident?\n\n\
         If this limit is a problem, raise `KernelConfig::output_max_bytes`.",
        data.len()
    );
    ("text/markdown".to_string(), warning)
}

pub fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

/// Console or output payload attached to a [`CellOp`]; a single entry or a
/// batch, matching spec.md §3's `console?: CellOutput | list<CellOutput>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConsolePayload {
    One(CellOutput),
    Many(Vec<CellOutput>),
}

impl ConsolePayload {
    pub fn as_list(&self) -> Vec<CellOutput> {
        match self {
            ConsolePayload::One(c) => vec![c.clone()],
            ConsolePayload::Many(cs) => cs.clone(),
        }
    }

    pub fn from_list(mut list: Vec<CellOutput>) -> Option<Self> {
        match list.len() {
            0 => None,
            1 => Some(ConsolePayload::One(list.remove(0))),
            _ => Some(ConsolePayload::Many(list)),
        }
    }
}

/// Wire-facing execution status for a cell (spec.md §6 `CellOp` wire shape).
/// Distinct from [`crate::graph::RunResultStatus`]: this is what a
/// *frontend* sees; the runner's internal status also tracks
/// success/errored/cancelled for run-order bookkeeping that never needs to
/// reach the wire directly (it is instead reflected through `output`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CellOpStatus {
    Idle,
    Queued,
    Running,
    /// The cell's own config disabled it.
    Disabled,
    /// An ancestor is disabled, so this cell is transitively unexecutable.
    DisabledTransitively,
}

/// One incremental frontend message (spec.md §3 `CellOp`). Absent fields
/// mean "unchanged" at the receiver — see [`SessionView::apply_cell_op`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CellOp {
    pub cell_id: Option<CellId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<CellOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub console: Option<ConsolePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CellOpStatus>,
    /// Set when a module-reload event marked this cell stale (spec.md §4.8
    /// step 4). Absent means unchanged, same as every other field here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale: Option<bool>,
    pub timestamp: f64,
}

impl CellOp {
    pub fn new(cell_id: CellId) -> Self {
        Self {
            cell_id: Some(cell_id),
            timestamp: now_ms(),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: CellOpStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_output(mut self, output: CellOutput) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_console(mut self, console: CellOutput) -> Self {
        self.console = Some(ConsolePayload::One(console));
        self
    }

    pub fn with_stale(mut self, stale: bool) -> Self {
        self.stale = Some(stale);
        self
    }
}

/// What a named binding currently is, for the variables panel (spec.md §3
/// `VariableData`, projected for wire consumption — required/unbounded
/// refs are analysis detail the session view doesn't need to re-expose).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub name: Name,
    pub defined_by: CellId,
    pub kind: crate::analyzer::VariableKind,
}

/// The full variable → defining-cell map, replaced wholesale on every
/// update (spec.md §4.5: "overwrite `variable_operations`").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Variables {
    pub entries: BTreeMap<Name, VariableInfo>,
}

impl Variables {
    pub fn names(&self) -> impl Iterator<Item = &Name> {
        self.entries.keys()
    }
}

/// A variable's last-known runtime value, as a display string — the kernel
/// doesn't retain arbitrary host values across the wire boundary, matching
/// "Out of scope: ... the frontend renderer."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableValue {
    pub name: Name,
    pub value_repr: String,
    pub datatype: String,
}

/// One table discovered in a cell (spec.md §3 `datasets`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub source_type: String,
    pub name: String,
    pub cell_id: CellId,
}

/// Whether a SQL/data connection is currently usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Connecting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceConnection {
    pub name: String,
    pub state: ConnectionState,
}

/// Notebook-level metadata that outlives any single cell (filename, layout)
/// — dropped by the distillation but needed by any reconnecting frontend
/// (SPEC_FULL.md §4.5 "added").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppMetadata {
    pub filename: Option<String>,
    pub layout: Option<serde_json::Value>,
}

/// The server's materialized projection of everything it has told the
/// frontend so far (spec.md §3 `SessionView state`). A freshly connecting
/// client is bootstrapped entirely from this struct.
#[derive(Debug, Default)]
pub struct SessionView {
    pub cell_operations: BTreeMap<CellId, CellOp>,
    pub variable_operations: Variables,
    pub variable_values: BTreeMap<Name, VariableValue>,
    pub ui_values: BTreeMap<ObjectId, serde_json::Value>,
    pub last_executed_code: BTreeMap<CellId, String>,
    pub last_execution_time: BTreeMap<CellId, f64>,
    pub datasets: Vec<Dataset>,
    pub data_connectors: BTreeMap<String, DataSourceConnection>,
    pub app_metadata: AppMetadata,
    pub has_auto_exported_html: bool,
    pub has_auto_exported_md: bool,
    run_start: BTreeMap<CellId, f64>,
}

impl SessionView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `next` onto whatever is stored for its cell and store the
    /// result, returning the merged op so callers can forward it to the
    /// stream (spec.md §4.5 "CellOp merge"). Implements the merge law
    /// exactly: status inheritance, console-clear-on-queued-to-running,
    /// append-otherwise, timestamp freeze on running→running, output
    /// inheritance when absent.
    pub fn apply_cell_op(&mut self, next: CellOp) -> CellOp {
        let Some(cell_id) = next.cell_id else {
            return next;
        };
        let previous = self.cell_operations.get(&cell_id).cloned();

        let mut merged = next.clone();

        merged.status = match (next.status, previous.as_ref().and_then(|p| p.status)) {
            (Some(s), _) => Some(s),
            (None, prev) => prev,
        };

        let queued_to_running = matches!(merged.status, Some(CellOpStatus::Running))
            && matches!(
                previous.as_ref().and_then(|p| p.status),
                Some(CellOpStatus::Queued)
            );

        merged.console = if queued_to_running {
            next.console.clone()
        } else {
            let mut list = previous
                .as_ref()
                .and_then(|p| p.console.as_ref())
                .map(|c| c.as_list())
                .unwrap_or_default();
            list.extend(next.console.as_ref().map(|c| c.as_list()).unwrap_or_default());
            ConsolePayload::from_list(list)
        };

        let same_run = matches!(merged.status, Some(CellOpStatus::Running))
            && matches!(
                previous.as_ref().and_then(|p| p.status),
                Some(CellOpStatus::Running)
            );
        if same_run {
            merged.timestamp = previous.as_ref().map(|p| p.timestamp).unwrap_or(merged.timestamp);
        }

        if merged.output.is_none() {
            merged.output = previous.as_ref().and_then(|p| p.output.clone());
        }

        if merged.stale.is_none() {
            merged.stale = previous.as_ref().and_then(|p| p.stale);
        }

        self.track_timing(cell_id, previous.as_ref().and_then(|p| p.status), merged.status);

        self.cell_operations.insert(cell_id, merged.clone());
        merged
    }

    /// queued→running starts the clock; running→idle stops it and records
    /// the elapsed milliseconds (spec.md §4.5 "Execution timing").
    fn track_timing(&mut self, cell_id: CellId, prev: Option<CellOpStatus>, next: Option<CellOpStatus>) {
        if matches!(prev, Some(CellOpStatus::Queued) | None) && matches!(next, Some(CellOpStatus::Running)) {
            self.run_start.insert(cell_id, now_ms());
        } else if matches!(prev, Some(CellOpStatus::Running)) && matches!(next, Some(CellOpStatus::Idle)) {
            if let Some(start) = self.run_start.remove(&cell_id) {
                self.last_execution_time.insert(cell_id, now_ms() - start);
            }
        }
    }

    /// Replace the variable map and garbage-collect `variable_values` and
    /// `datasets` down to the new visibility set (spec.md §4.5 "Variables",
    /// "pruning").
    pub fn apply_variables(&mut self, variables: Variables) {
        let in_scope: std::collections::HashSet<&Name> = variables.names().collect();
        self.variable_values.retain(|name, _| in_scope.contains(name));
        self.datasets.retain(|d| in_scope.contains(&d.name) || in_scope.contains(&d.source_type));
        self.variable_operations = variables;
        self.mark_mutated();
    }

    /// Per-name upsert into `variable_values` (spec.md §4.5 "VariableValues").
    pub fn apply_variable_value(&mut self, value: VariableValue) {
        self.variable_values.insert(value.name.clone(), value);
        self.mark_mutated();
    }

    /// Upsert a dataset by `(source_type, name)`, optionally first dropping
    /// all existing entries with the same `source_type` when `clear_channel`
    /// is set (spec.md §4.5 "Datasets").
    pub fn apply_dataset(&mut self, dataset: Dataset, clear_channel: bool) {
        if clear_channel {
            self.datasets.retain(|d| d.source_type != dataset.source_type);
        }
        if let Some(existing) = self
            .datasets
            .iter_mut()
            .find(|d| d.source_type == dataset.source_type && d.name == dataset.name)
        {
            *existing = dataset;
        } else {
            self.datasets.push(dataset);
        }
        self.mark_mutated();
    }

    /// Upsert by `name` (spec.md §4.5 "DataSourceConnections").
    pub fn apply_connection(&mut self, connection: DataSourceConnection) {
        self.data_connectors.insert(connection.name.clone(), connection);
        self.mark_mutated();
    }

    pub fn set_ui_value(&mut self, id: ObjectId, value: serde_json::Value) {
        self.ui_values.insert(id, value);
        self.mark_mutated();
    }

    pub fn record_executed_code(&mut self, cell_id: CellId, code: String) {
        self.last_executed_code.insert(cell_id, code);
        self.mark_mutated();
    }

    /// Convert any pending stdin prompt to a plain stdout line carrying the
    /// response (spec.md §4.5 "stdin response"). Returns `true` if a prompt
    /// was found and resolved.
    pub fn add_stdin_response(&mut self, response: &str) -> bool {
        for op in self.cell_operations.values_mut() {
            let Some(console) = &op.console else { continue };
            let mut list = console.as_list();
            if let Some(last) = list.last_mut() {
                if last.channel == Channel::Stdin {
                    let prompt = last.data.clone();
                    *last = CellOutput::new(Channel::Stdout, "text/plain", format!("{prompt} {response}\n"));
                    op.console = ConsolePayload::from_list(list);
                    return true;
                }
            }
        }
        false
    }

    /// On interruption, any cell with a pending stdin prompt resolves it
    /// with an empty response rather than hanging forever (spec.md §4.5
    /// "Interrupted").
    pub fn resolve_pending_stdin_on_interrupt(&mut self) {
        self.add_stdin_response("");
    }

    /// Any mutating operation clears the auto-export flags (spec.md §4.5
    /// "Auto-export flags"); mark-functions flip them back on explicitly.
    fn mark_mutated(&mut self) {
        self.has_auto_exported_html = false;
        self.has_auto_exported_md = false;
    }

    pub fn mark_auto_exported_html(&mut self) {
        self.has_auto_exported_html = true;
    }

    pub fn mark_auto_exported_md(&mut self) {
        self.has_auto_exported_md = true;
    }

    pub fn remove_cell(&mut self, cell_id: CellId) {
        self.cell_operations.remove(&cell_id);
        self.last_executed_code.remove(&cell_id);
        self.last_execution_time.remove(&cell_id);
        self.run_start.remove(&cell_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell() -> CellId {
        CellId::from_raw(1)
    }

    #[test]
    fn queued_to_running_clears_console() {
        let mut view = SessionView::new();
        let queued = CellOp::new(cell())
            .with_status(CellOpStatus::Queued)
            .with_console(CellOutput::new(Channel::Stdout, "text/plain", "stale\n"));
        view.apply_cell_op(queued);

        let running = CellOp::new(cell()).with_status(CellOpStatus::Running);
        let merged = view.apply_cell_op(running);
        assert!(merged.console.is_none());
    }

    #[test]
    fn console_appends_when_not_transitioning_from_queued() {
        let mut view = SessionView::new();
        let running = CellOp::new(cell())
            .with_status(CellOpStatus::Running)
            .with_console(CellOutput::new(Channel::Stdout, "text/plain", "a"));
        view.apply_cell_op(running);

        let more = CellOp::new(cell())
            .with_status(CellOpStatus::Running)
            .with_console(CellOutput::new(Channel::Stdout, "text/plain", "b"));
        let merged = view.apply_cell_op(more);
        let list = merged.console.unwrap().as_list();
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn status_none_inherits_previous() {
        let mut view = SessionView::new();
        view.apply_cell_op(CellOp::new(cell()).with_status(CellOpStatus::Running));
        let merged = view.apply_cell_op(CellOp::new(cell()));
        assert_eq!(merged.status, Some(CellOpStatus::Running));
    }

    #[test]
    fn output_none_inherits_previous_output() {
        let mut view = SessionView::new();
        view.apply_cell_op(CellOp::new(cell()).with_output(CellOutput::new(Channel::Output, "text/plain", "1")));
        let merged = view.apply_cell_op(CellOp::new(cell()).with_status(CellOpStatus::Idle));
        assert!(merged.output.is_some());
    }

    #[test]
    fn running_to_idle_records_execution_time() {
        let mut view = SessionView::new();
        view.apply_cell_op(CellOp::new(cell()).with_status(CellOpStatus::Running));
        view.apply_cell_op(CellOp::new(cell()).with_status(CellOpStatus::Idle));
        assert!(view.last_execution_time.contains_key(&cell()));
    }

    #[test]
    fn variable_pruning_drops_out_of_scope_values() {
        let mut view = SessionView::new();
        view.apply_variable_value(VariableValue {
            name: "x".into(),
            value_repr: "1".into(),
            datatype: "int".into(),
        });
        assert!(view.variable_values.contains_key("x"));

        view.apply_variables(Variables::default());
        assert!(view.variable_values.is_empty());
    }

    #[test]
    fn stdin_response_rewrites_exactly_one_prompt() {
        let mut view = SessionView::new();
        view.apply_cell_op(
            CellOp::new(cell())
                .with_status(CellOpStatus::Running)
                .with_console(CellOutput::new(Channel::Stdin, "text/plain", "name?")),
        );
        assert!(view.add_stdin_response("bob"));
        let op = view.cell_operations.get(&cell()).unwrap();
        let list = op.console.as_ref().unwrap().as_list();
        assert_eq!(list.last().unwrap().channel, Channel::Stdout);
        assert_eq!(list.last().unwrap().data, "name? bob\n");
        // A second call finds nothing left to resolve.
        assert!(!view.add_stdin_response("ignored"));
    }

    #[test]
    fn stale_is_inherited_when_absent_and_overwritten_when_present() {
        let mut view = SessionView::new();
        view.apply_cell_op(CellOp::new(cell()).with_stale(true));
        let merged = view.apply_cell_op(CellOp::new(cell()).with_status(CellOpStatus::Queued));
        assert_eq!(merged.stale, Some(true));

        let merged = view.apply_cell_op(CellOp::new(cell()).with_stale(false));
        assert_eq!(merged.stale, Some(false));
    }

    #[test]
    fn dataset_clear_channel_drops_same_source_type() {
        let mut view = SessionView::new();
        view.apply_dataset(
            Dataset {
                source_type: "duckdb".into(),
                name: "t1".into(),
                cell_id: cell(),
            },
            false,
        );
        view.apply_dataset(
            Dataset {
                source_type: "duckdb".into(),
                name: "t2".into(),
                cell_id: cell(),
            },
            true,
        );
        assert_eq!(view.datasets.len(), 1);
        assert_eq!(view.datasets[0].name, "t2");
    }

    #[test]
    fn oversized_output_is_replaced_with_a_warning() {
        let (mimetype, data) = maybe_truncate_output("text/plain".into(), "x".repeat(100), 10);
        assert_eq!(mimetype, "text/markdown");
        assert!(data.contains("too large"));
    }

    #[test]
    fn output_within_limit_is_untouched() {
        let (mimetype, data) = maybe_truncate_output("text/plain".into(), "ok".into(), 10);
        assert_eq!(mimetype, "text/plain");
        assert_eq!(data, "ok");
    }

    #[test]
    fn merge_is_associative_for_three_ops() {
        fn merge_via(view: &mut SessionView, ops: &[CellOp]) -> CellOp {
            let mut last = CellOp::new(cell());
            for op in ops {
                last = view.apply_cell_op(op.clone());
            }
            last
        }
        let a = CellOp::new(cell())
            .with_status(CellOpStatus::Queued)
            .with_console(CellOutput::new(Channel::Stdout, "text/plain", "a"));
        let b = CellOp::new(cell())
            .with_status(CellOpStatus::Running)
            .with_console(CellOutput::new(Channel::Stdout, "text/plain", "b"));
        let c = CellOp::new(cell())
            .with_status(CellOpStatus::Running)
            .with_console(CellOutput::new(Channel::Stdout, "text/plain", "c"));

        let mut left = SessionView::new();
        let merged_left = merge_via(&mut left, &[a.clone(), b.clone(), c.clone()]);

        let mut right = SessionView::new();
        let merged_right = merge_via(&mut right, &[a, b, c]);

        assert_eq!(merged_left.console.map(|c| c.as_list()), merged_right.console.map(|c| c.as_list()));
    }
}
