//! Run orchestration.
//!
//! The engine is the only component that touches the data source. It scans
//! the macro for a workflow block, selects rows, drives the executor once
//! per row (or once standalone), persists each row's status immediately,
//! and reports progress. One run at a time: `run` rejects callers while a
//! previous run is still active.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::context::{ControlHandle, ExecutionContext, RowStatus, RunState};
use crate::datasource::{ExcelDataSource, STATUS_COMPLETE};
use crate::error::{EngineError, ValidationIssue};
use crate::executor::{StepExecutor, StepFlow};
use crate::input::InputController;
use crate::observer::{ExecutionObserver, NullObserver};
use crate::progress::{count_units, ProgressTracker};
use crate::report::{RowReport, RunOutcome, RunReport};
use crate::step::{Macro, MacroStep, RepeatMode, WorkflowBlock};
use crate::vision::VisionService;

/// How driving one row (or the standalone pass) ended.
enum RowDrive {
    Finished,
    Skipped,
    Stopped,
    Failed(crate::error::StepExecutionError),
}

pub struct ExecutionEngine {
    vision: Arc<dyn VisionService>,
    input: Arc<dyn InputController>,
    observer: Arc<dyn ExecutionObserver>,
    config: EngineConfig,
    state: Mutex<RunState>,
    control: ControlHandle,
}

impl ExecutionEngine {
    pub fn new(vision: Arc<dyn VisionService>, input: Arc<dyn InputController>) -> Self {
        Self {
            vision,
            input,
            observer: Arc::new(NullObserver),
            config: EngineConfig::default(),
            state: Mutex::new(RunState::Idle),
            control: ControlHandle::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Handle for pausing/resuming/stopping the active run from another
    /// task (UI thread, hotkey listener).
    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: RunState) {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *guard != next {
            info!(from = %*guard, to = %next, "state changed");
            *guard = next;
            drop(guard);
            self.observer.state_changed(next);
        }
    }

    /// Atomically claims the engine for a new run.
    fn begin(&self) -> Result<(), EngineError> {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !guard.accepts_start() {
            return Err(EngineError::AlreadyRunning);
        }
        *guard = RunState::Preparing;
        drop(guard);
        self.observer.state_changed(RunState::Preparing);
        Ok(())
    }

    /// Executes the macro to completion.
    ///
    /// A macro containing an Excel workflow block needs `source`; without a
    /// block the macro runs standalone once and `source` is ignored. A user
    /// stop is a normal outcome ([`RunOutcome::Stopped`]); `Err` means the
    /// run never started (validation, busy) or failed
    /// (data source, standalone step failure).
    pub async fn run(
        &self,
        macro_def: &Macro,
        source: Option<Arc<dyn ExcelDataSource>>,
    ) -> Result<RunReport, EngineError> {
        self.begin()?;

        let issues = macro_def.validate();
        if !issues.is_empty() {
            warn!(count = issues.len(), "macro failed validation");
            self.set_state(RunState::Idle);
            return Err(EngineError::Validation(issues));
        }

        self.control.reset();
        let executor = StepExecutor::new(
            self.vision.clone(),
            self.input.clone(),
            self.observer.clone(),
            self.config.clone(),
        );
        let started_at = Utc::now();

        let result = match macro_def.find_workflow_block() {
            Some(block) => {
                let Some(source) = source else {
                    self.set_state(RunState::Idle);
                    return Err(EngineError::Validation(vec![ValidationIssue::macro_level(
                        "macro contains an excel workflow block but no data source was provided",
                    )]));
                };
                self.set_state(RunState::Running);
                self.run_excel(macro_def, &block, source, &executor, started_at)
                    .await
            }
            None => {
                self.set_state(RunState::Running);
                self.run_standalone(macro_def, &executor, started_at).await
            }
        };

        match &result {
            Ok(report) => self.set_state(match report.outcome {
                RunOutcome::Completed => RunState::Completed,
                RunOutcome::Stopped => RunState::Stopped,
            }),
            Err(_) => self.set_state(RunState::Failed),
        }
        result
    }

    async fn run_standalone(
        &self,
        macro_def: &Macro,
        executor: &StepExecutor,
        started_at: chrono::DateTime<Utc>,
    ) -> Result<RunReport, EngineError> {
        info!(macro_name = %macro_def.name, steps = macro_def.steps.len(), "starting standalone run");
        let tracker = ProgressTracker::standalone(count_units(&macro_def.steps));
        let mut ctx = ExecutionContext::standalone(self.control.clone());

        let outcome = match self
            .drive_steps(&macro_def.steps, &mut ctx, executor, &tracker)
            .await
        {
            RowDrive::Finished | RowDrive::Skipped => RunOutcome::Completed,
            RowDrive::Stopped => RunOutcome::Stopped,
            RowDrive::Failed(error) => return Err(EngineError::Step(error)),
        };
        Ok(RunReport {
            outcome,
            rows: Vec::new(),
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn run_excel(
        &self,
        macro_def: &Macro,
        block: &WorkflowBlock,
        source: Arc<dyn ExcelDataSource>,
        executor: &StepExecutor,
        started_at: chrono::DateTime<Utc>,
    ) -> Result<RunReport, EngineError> {
        let body = &macro_def.steps[block.start_index + 1..block.end_index];
        let rows = self.select_rows(block.repeat_mode, source.as_ref()).await?;
        info!(
            macro_name = %macro_def.name,
            rows = rows.len(),
            mode = ?block.repeat_mode,
            "starting excel-driven run"
        );

        let mut tracker = ProgressTracker::excel(count_units(body), rows.len());
        let mut reports = Vec::new();
        let mut outcome = RunOutcome::Completed;

        for &row_index in &rows {
            if self.wait_if_paused().await {
                outcome = RunOutcome::Stopped;
                break;
            }

            let row_started = Instant::now();
            let bindings = source.get_row(row_index).await?;
            let mut ctx = ExecutionContext::for_row(row_index, bindings, self.control.clone());
            debug!(row = row_index, "row started");

            let (status, first_error) =
                match self.drive_steps(body, &mut ctx, executor, &tracker).await {
                    RowDrive::Finished => (RowStatus::Complete, None),
                    RowDrive::Skipped => (RowStatus::Skipped, None),
                    RowDrive::Failed(error) => {
                        warn!(row = row_index, error = %error, "row failed");
                        (RowStatus::Failed, Some(error.to_string()))
                    }
                    RowDrive::Stopped => {
                        // The rest of the row is abandoned, nothing persisted
                        // for it; earlier rows remain durably recorded.
                        outcome = RunOutcome::Stopped;
                        break;
                    }
                };

            let label = match status {
                RowStatus::Complete => block.completion_status.as_str(),
                other => other.as_str(),
            };
            source.set_status(row_index, label).await?;

            reports.push(RowReport {
                row_index,
                status,
                first_error,
                duration_ms: row_started.elapsed().as_millis() as u64,
            });
            self.observer.row_completed(row_index, status);
            tracker.row_finished();
            let snap = tracker.snapshot(0.0);
            self.observer.progress(snap.current, snap.total, snap.percentage);

            sleep(self.config.row_delay()).await;
        }

        Ok(RunReport {
            outcome,
            rows: reports,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Computes the row index set for the block's repeat mode, ascending.
    async fn select_rows(
        &self,
        mode: RepeatMode,
        source: &dyn ExcelDataSource,
    ) -> Result<Vec<usize>, EngineError> {
        let total = source.row_count().await?;
        let rows = match mode {
            RepeatMode::All => (0..total).collect(),
            RepeatMode::IncompleteOnly => self.incomplete_rows(source, total, None).await?,
            RepeatMode::SpecificCount { count } => {
                self.incomplete_rows(source, total, Some(count)).await?
            }
            RepeatMode::Range { start_row, end_row } => {
                (start_row..=end_row).filter(|&i| i < total).collect()
            }
        };
        Ok(rows)
    }

    async fn incomplete_rows(
        &self,
        source: &dyn ExcelDataSource,
        total: usize,
        limit: Option<usize>,
    ) -> Result<Vec<usize>, EngineError> {
        let mut rows = Vec::new();
        for index in 0..total {
            if source.get_status(index).await? != STATUS_COMPLETE {
                rows.push(index);
                if limit.is_some_and(|n| rows.len() >= n) {
                    break;
                }
            }
        }
        Ok(rows)
    }

    /// Runs the given steps in order, honoring pause/stop strictly between
    /// steps.
    async fn drive_steps(
        &self,
        steps: &[MacroStep],
        ctx: &mut ExecutionContext,
        executor: &StepExecutor,
        tracker: &ProgressTracker,
    ) -> RowDrive {
        for step in steps {
            if self.wait_if_paused().await {
                return RowDrive::Stopped;
            }
            if !step.enabled {
                continue;
            }

            self.observer.step_started(step, ctx.row_index);
            match executor.run_step(step, ctx).await {
                Ok(StepFlow::Continue) => {
                    let success = ctx
                        .last_result
                        .as_ref()
                        .map(|r| r.success)
                        .unwrap_or(true);
                    self.observer.step_completed(step, success);
                    let snap = tracker.snapshot(ctx.step_progress);
                    self.observer.progress(snap.current, snap.total, snap.percentage);
                    sleep(self.config.step_delay()).await;
                }
                Ok(StepFlow::SkipRow) => {
                    debug!(row = ?ctx.row_index, "row skipped by search action");
                    self.observer.step_completed(step, true);
                    return RowDrive::Skipped;
                }
                Err(error) => {
                    self.observer.step_completed(step, false);
                    return RowDrive::Failed(error);
                }
            }
        }
        RowDrive::Finished
    }

    /// Parks the task while a pause is requested. Returns `true` when the
    /// run should stop instead of continuing with the next step.
    async fn wait_if_paused(&self) -> bool {
        if self.control.stop_requested() {
            return true;
        }
        if self.control.pause_requested() {
            self.set_state(RunState::Paused);
            while self.control.pause_requested() && !self.control.stop_requested() {
                sleep(self.config.poll_interval()).await;
            }
            if self.control.stop_requested() {
                return true;
            }
            self.set_state(RunState::Running);
        }
        false
    }
}
