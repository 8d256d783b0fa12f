//! Progress/observer callbacks exposed to the embedding application.
//!
//! All methods have no-op defaults; a UI implements what it renders.
//! Callbacks fire on the engine's worker task and must return quickly.

use crate::context::{RowStatus, RunState};
use crate::step::MacroStep;
use crate::vision::Screenshot;

pub trait ExecutionObserver: Send + Sync {
    fn state_changed(&self, _state: RunState) {}

    /// A step is about to execute. `row_index` is `None` in standalone mode.
    fn step_started(&self, _step: &MacroStep, _row_index: Option<usize>) {}

    fn step_completed(&self, _step: &MacroStep, _success: bool) {}

    /// Overall progress. In Excel mode `current`/`total` count rows
    /// (fractional within the active row), standalone they count steps.
    fn progress(&self, _current: f64, _total: f64, _percentage: f64) {}

    fn row_completed(&self, _row_index: usize, _status: RowStatus) {}

    /// A screenshot step captured an image.
    fn screenshot_captured(&self, _label: Option<&str>, _shot: &Screenshot) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl ExecutionObserver for NullObserver {}
