//! Per-run execution state.
//!
//! One [`ExecutionContext`] exists per engine run. It owns the current row's
//! variable bindings, the pause/stop flags, and the progress counters —
//! nothing here is global, and nothing survives the run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::vars::RowBindings;
use crate::vision::Point;

/// Engine lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Preparing,
    Running,
    Paused,
    Completed,
    Stopped,
    Failed,
}

impl RunState {
    /// States from which a new run may be started.
    pub fn accepts_start(&self) -> bool {
        matches!(
            self,
            RunState::Idle | RunState::Completed | RunState::Stopped | RunState::Failed
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Preparing => "preparing",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Completed => "completed",
            RunState::Stopped => "stopped",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Default)]
struct ControlFlags {
    pause: AtomicBool,
    stop: AtomicBool,
}

/// Cloneable pause/stop signalling shared between the engine run and the
/// caller (UI thread, hotkey listener). Signals are honored at step
/// boundaries only — a running vision call always completes first.
#[derive(Debug, Clone, Default)]
pub struct ControlHandle {
    flags: Arc<ControlFlags>,
}

impl ControlHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.flags.pause.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.flags.pause.store(false, Ordering::SeqCst);
    }

    /// Requests a stop. Also clears pause so a paused run can wind down.
    pub fn stop(&self) {
        self.flags.pause.store(false, Ordering::SeqCst);
        self.flags.stop.store(true, Ordering::SeqCst);
    }

    pub fn pause_requested(&self) -> bool {
        self.flags.pause.load(Ordering::SeqCst)
    }

    pub fn stop_requested(&self) -> bool {
        self.flags.stop.load(Ordering::SeqCst)
    }

    /// Rearms the handle at the start of a run.
    pub fn reset(&self) {
        self.flags.pause.store(false, Ordering::SeqCst);
        self.flags.stop.store(false, Ordering::SeqCst);
    }
}

/// Final status of one data row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Complete,
    Failed,
    Skipped,
}

impl RowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowStatus::Complete => "complete",
            RowStatus::Failed => "failed",
            RowStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for RowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value produced by a successful search step.
#[derive(Debug, Clone, PartialEq)]
pub enum FoundValue {
    /// Matched location (center of the bounding box).
    Location(Point),
    /// Matched text.
    Text(String),
}

/// Outcome of one executed step, as reported to observers and the report.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub success: bool,
    pub error: Option<String>,
    pub value: Option<FoundValue>,
}

impl StepResult {
    pub fn ok(value: Option<FoundValue>) -> Self {
        Self {
            success: true,
            error: None,
            value,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            value: None,
        }
    }
}

/// Ephemeral state owned by one engine run.
#[derive(Debug)]
pub struct ExecutionContext {
    /// Index of the data row being executed, `None` in standalone mode.
    pub row_index: Option<usize>,
    pub bindings: RowBindings,
    pub control: ControlHandle,
    /// Fractional count of completed step units within the current row;
    /// loop iterations advance this by fractions of one unit.
    pub step_progress: f64,
    /// Resolver warnings (unresolved tokens) recorded during the row.
    pub warnings: Vec<String>,
    /// Result of the most recently executed step.
    pub last_result: Option<StepResult>,
}

impl ExecutionContext {
    pub fn standalone(control: ControlHandle) -> Self {
        Self {
            row_index: None,
            bindings: RowBindings::new(),
            control,
            step_progress: 0.0,
            warnings: Vec::new(),
            last_result: None,
        }
    }

    pub fn for_row(row_index: usize, bindings: RowBindings, control: ControlHandle) -> Self {
        Self {
            row_index: Some(row_index),
            bindings,
            control,
            step_progress: 0.0,
            warnings: Vec::new(),
            last_result: None,
        }
    }

    pub fn record_unresolved(&mut self, tokens: &[String]) {
        for token in tokens {
            tracing::warn!(token = %token, row = ?self.row_index, "unresolved variable left verbatim");
            self.warnings.push(format!("unresolved variable: ${{{token}}}"));
        }
    }
}
