//! Data-driven screen automation engine.
//!
//! gridpilot replays a macro — an ordered list of UI actions — against the
//! live screen once per spreadsheet row, substituting row values into step
//! parameters. The engine owns the step model, variable substitution, the
//! row-iteration state machine, and per-step error policy; screen capture,
//! image/text matching, pointer/keyboard control, and spreadsheet I/O are
//! injected behind the trait contracts in [`vision`], [`input`], and
//! [`datasource`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use gridpilot::{ExecutionEngine, Macro};
//! # async fn demo(vision: Arc<dyn gridpilot::VisionService>,
//! #               input: Arc<dyn gridpilot::InputController>,
//! #               source: Arc<dyn gridpilot::ExcelDataSource>,
//! #               macro_def: Macro) -> Result<(), gridpilot::EngineError> {
//! let engine = ExecutionEngine::new(vision, input);
//! let report = engine.run(&macro_def, Some(source)).await?;
//! println!("{} rows complete", report.completed_rows());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod datasource;
pub mod engine;
pub mod error;
pub mod executor;
pub mod input;
pub mod observer;
pub mod progress;
pub mod report;
pub mod step;
pub mod vars;
pub mod vision;

pub use config::EngineConfig;
pub use context::{ControlHandle, ExecutionContext, FoundValue, RowStatus, RunState, StepResult};
pub use datasource::{ExcelDataSource, STATUS_COMPLETE};
pub use engine::ExecutionEngine;
pub use error::{
    DataSourceError, EngineError, InputError, StepExecutionError, StepFailure, ValidationIssue,
    VisionError,
};
pub use executor::{StepExecutor, StepFlow};
pub use input::InputController;
pub use observer::{ExecutionObserver, NullObserver};
pub use report::{RowReport, RunOutcome, RunReport};
pub use step::{
    ClickParams, CompareOp, Condition, ConditionalParams, ErrorPolicy, ImageSearchParams,
    LoopMode, LoopParams, Macro, MacroStep, PointerButton, RepeatMode, RowEndParams,
    RowStartParams, ScreenshotParams, SearchAction, SearchActionKind, SearchActionParams,
    StepKind, TextSearchParams, TypeParams, WaitFixedParams, WaitImageParams, WaitTextParams,
    WorkflowBlock,
};
pub use vars::{normalize_fullwidth, text_matches, RowBindings, VariableResolver};
pub use vision::{
    ImageHit, ImageQuery, Point, Region, Screenshot, TextHit, TextQuery, VisionService,
};
