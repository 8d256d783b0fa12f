use thiserror::Error;
use uuid::Uuid;

/// A problem detected while validating a macro before execution.
///
/// Validation issues are collected, not thrown: `Macro::validate` returns
/// every issue it finds so the editor can surface all of them at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Index of the offending step in the macro, if the issue is step-scoped.
    pub step_index: Option<usize>,
    pub message: String,
}

impl ValidationIssue {
    pub fn macro_level(message: impl Into<String>) -> Self {
        Self {
            step_index: None,
            message: message.into(),
        }
    }

    pub fn at_step(index: usize, message: impl Into<String>) -> Self {
        Self {
            step_index: Some(index),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.step_index {
            Some(i) => write!(f, "step {}: {}", i + 1, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("screen capture failed: {0}")]
    CaptureFailed(String),

    #[error("template image unusable: {0}")]
    BadTemplate(String),

    #[error("vision backend failure: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum InputError {
    #[error("pointer action failed: {0}")]
    Pointer(String),

    #[error("keyboard action failed: {0}")]
    Keyboard(String),

    #[error("input backend unavailable: {0}")]
    Unavailable(String),
}

/// Row bookkeeping failures. Always fatal to the run: once a row read or a
/// status write fails, per-row durability can no longer be guaranteed.
#[derive(Error, Debug)]
pub enum DataSourceError {
    #[error("failed to read row {index}: {message}")]
    RowRead { index: usize, message: String },

    #[error("failed to write status for row {index}: {message}")]
    StatusWrite { index: usize, message: String },

    #[error("data source unavailable: {0}")]
    Unavailable(String),
}

/// The underlying cause of a step failure, before error-policy handling.
#[derive(Error, Debug)]
pub enum StepFailure {
    /// A search target was not found and no descriptor branched on the miss.
    #[error("target not found: {0}")]
    NotFound(String),

    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error(transparent)]
    Vision(#[from] VisionError),

    #[error(transparent)]
    Input(#[from] InputError),

    /// A step inside a conditional branch or loop body failed under its own
    /// stop semantics.
    #[error("nested step failed: {0}")]
    Nested(#[source] Box<StepExecutionError>),

    #[error("loop aborted after {0} iterations")]
    LoopLimit(u32),

    /// A search descriptor requested stop.
    #[error("aborted: {0}")]
    Aborted(String),

    #[error("{0}")]
    Other(String),
}

/// A step handler failure after the step's error policy was exhausted.
#[derive(Error, Debug)]
#[error("step '{step_name}' failed: {cause}")]
pub struct StepExecutionError {
    pub step_id: Uuid,
    pub step_name: String,
    #[source]
    pub cause: StepFailure,
}

/// Run-level errors returned by [`ExecutionEngine::run`](crate::engine::ExecutionEngine::run).
///
/// A user-initiated stop is not an error; it surfaces as
/// [`RunOutcome::Stopped`](crate::report::RunOutcome::Stopped) in the run report.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("macro validation failed with {} issue(s)", .0.len())]
    Validation(Vec<ValidationIssue>),

    #[error("a run is already active")]
    AlreadyRunning,

    #[error(transparent)]
    DataSource(#[from] DataSourceError),

    #[error(transparent)]
    Step(#[from] StepExecutionError),
}
