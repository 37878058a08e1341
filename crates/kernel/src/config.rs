//! Kernel-wide configuration.
//!
//! There is no external config-file crate here because the teacher doesn't
//! reach for one at this layer either (`venus-core`'s `CompilerConfig` and
//! `venus-server`'s per-session settings are plain structs built with
//! defaults and overridden by the CLI's `clap` flags); a notebook host wires
//! `KernelConfig` up however it likes (env vars, a TOML file, CLI flags).

use std::time::Duration;

/// Whether descendants of a changed cell are automatically re-queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Re-run the changed/stale root set plus the transitive closure of
    /// children (minus import-block self-loops).
    Autorun,
    /// Only re-run what was explicitly asked for (plus stale ancestors).
    Lazy,
}

/// Whether a cell with a ref that no live cell defines is allowed to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionType {
    /// Missing refs resolve to whatever is already in globals (or `NameError`
    /// at actual evaluation time); descendants are blamed on the *immediate*
    /// raising ancestor.
    Relaxed,
    /// A cell with a statically-missing ref is refused before it runs
    /// (`StrictExecutionError`); blame traces back to the original raiser.
    Strict,
}

/// Default console-buffer flush interval (spec.md §4.6, `TIMEOUT`).
pub const DEFAULT_CONSOLE_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Default module watcher poll interval (spec.md §4.8).
pub const DEFAULT_WATCHER_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default output size cap in bytes (spec.md §6, `MARIMO_OUTPUT_MAX_BYTES`).
pub const DEFAULT_OUTPUT_MAX_BYTES: usize = 5 * 1024 * 1024;

/// Kernel-wide tunables.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub execution_mode: ExecutionMode,
    pub execution_type: ExecutionType,
    pub console_flush_interval: Duration,
    pub watcher_poll_interval: Duration,
    pub output_max_bytes: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Autorun,
            execution_type: ExecutionType::Relaxed,
            console_flush_interval: DEFAULT_CONSOLE_FLUSH_INTERVAL,
            watcher_poll_interval: DEFAULT_WATCHER_POLL_INTERVAL,
            output_max_bytes: DEFAULT_OUTPUT_MAX_BYTES,
        }
    }
}

/// Builder for [`KernelConfig`], following the teacher's `CompilerConfig`
/// builder shape.
#[derive(Debug, Clone, Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: KernelConfig::default(),
        }
    }

    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.config.execution_mode = mode;
        self
    }

    pub fn execution_type(mut self, ty: ExecutionType) -> Self {
        self.config.execution_type = ty;
        self
    }

    pub fn console_flush_interval(mut self, interval: Duration) -> Self {
        self.config.console_flush_interval = interval;
        self
    }

    pub fn watcher_poll_interval(mut self, interval: Duration) -> Self {
        self.config.watcher_poll_interval = interval;
        self
    }

    pub fn output_max_bytes(mut self, bytes: usize) -> Self {
        self.config.output_max_bytes = bytes;
        self
    }

    pub fn build(self) -> KernelConfig {
        self.config
    }
}
