//! The runner's hook pipeline (spec.md §4.3 "Hook pipeline"): four
//! priority-ordered families a host registers into to observe or extend a
//! run without forking the runner itself. `FINAL_PRIORITY` is reserved for
//! the one `on_finish` hook that must run last (the session's own "idle"
//! transition).

use crate::graph::{CellId, DirectedGraph};

pub const FINAL_PRIORITY: i32 = 100;

pub trait PreparationHook: Send + Sync {
    fn priority(&self) -> i32 {
        0
    }
    fn run(&self, order: &[CellId], graph: &DirectedGraph);
}

pub trait PreExecutionHook: Send + Sync {
    fn priority(&self) -> i32 {
        0
    }
    fn run(&self, cell_id: CellId);
}

pub trait PostExecutionHook: Send + Sync {
    fn priority(&self) -> i32 {
        0
    }
    fn run(&self, cell_id: CellId, errored: bool);
}

pub trait OnFinishHook: Send + Sync {
    fn priority(&self) -> i32 {
        0
    }
    fn run(&self, ran: &[CellId], cancelled: &[CellId]);
}

/// Registered hooks for one [`super::CellRunner`]. Empty by default — a
/// bare runner is fully usable without any host-supplied hooks.
#[derive(Default)]
pub struct HookPipeline {
    preparation: Vec<Box<dyn PreparationHook>>,
    pre_execution: Vec<Box<dyn PreExecutionHook>>,
    post_execution: Vec<Box<dyn PostExecutionHook>>,
    on_finish: Vec<Box<dyn OnFinishHook>>,
}

impl HookPipeline {
    pub fn add_preparation(&mut self, hook: Box<dyn PreparationHook>) {
        self.preparation.push(hook);
    }

    pub fn add_pre_execution(&mut self, hook: Box<dyn PreExecutionHook>) {
        self.pre_execution.push(hook);
    }

    pub fn add_post_execution(&mut self, hook: Box<dyn PostExecutionHook>) {
        self.post_execution.push(hook);
    }

    pub fn add_on_finish(&mut self, hook: Box<dyn OnFinishHook>) {
        self.on_finish.push(hook);
    }

    pub(super) fn sorted_preparation(&self) -> Vec<&dyn PreparationHook> {
        let mut hooks: Vec<&dyn PreparationHook> = self.preparation.iter().map(|h| h.as_ref()).collect();
        hooks.sort_by_key(|h| h.priority());
        hooks
    }

    pub(super) fn sorted_pre_execution(&self) -> Vec<&dyn PreExecutionHook> {
        let mut hooks: Vec<&dyn PreExecutionHook> = self.pre_execution.iter().map(|h| h.as_ref()).collect();
        hooks.sort_by_key(|h| h.priority());
        hooks
    }

    pub(super) fn sorted_post_execution(&self) -> Vec<&dyn PostExecutionHook> {
        let mut hooks: Vec<&dyn PostExecutionHook> = self.post_execution.iter().map(|h| h.as_ref()).collect();
        hooks.sort_by_key(|h| h.priority());
        hooks
    }

    pub(super) fn sorted_on_finish(&self) -> Vec<&dyn OnFinishHook> {
        let mut hooks: Vec<&dyn OnFinishHook> = self.on_finish.iter().map(|h| h.as_ref()).collect();
        hooks.sort_by_key(|h| h.priority());
        hooks
    }
}
