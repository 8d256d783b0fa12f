//! Macro step model.
//!
//! Every automation action is a [`MacroStep`]: a shared header (id, name,
//! enabled flag, error policy) plus a [`StepKind`] payload. The kind set is
//! closed — adding an action means adding a variant and getting an exhaustive
//! match everywhere it is dispatched.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationIssue;
use crate::vision::Region;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Propagate the failure, aborting the remainder of the current row/run.
    #[default]
    Stop,
    /// Record the failure and proceed to the next step.
    Continue,
    /// Re-invoke the handler up to `retry_count` additional times, then stop.
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PointerButton {
    #[default]
    Left,
    Right,
    Middle,
}

/// One automation action with its control header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroStep {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub error_policy: ErrorPolicy,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl MacroStep {
    pub fn new(kind: StepKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: String::new(),
            enabled: true,
            error_policy: ErrorPolicy::Stop,
            retry_count: 0,
            kind,
        }
    }

    pub fn named(name: impl Into<String>, kind: StepKind) -> Self {
        let mut step = Self::new(kind);
        step.name = name.into();
        step
    }

    /// Display label: the step name, or the kind when unnamed.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            self.kind.kind_name()
        } else {
            &self.name
        }
    }

    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        self.kind.collect_issues(&mut issues);
        issues
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    PointerClick(ClickParams),
    KeyboardType(TypeParams),
    WaitFixed(WaitFixedParams),
    WaitForImage(WaitImageParams),
    WaitForText(WaitTextParams),
    ImageSearch(ImageSearchParams),
    TextSearch(TextSearchParams),
    Conditional(ConditionalParams),
    Loop(LoopParams),
    Screenshot(ScreenshotParams),
    ExcelRowStart(RowStartParams),
    ExcelRowEnd(RowEndParams),
}

impl StepKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            StepKind::PointerClick(_) => "pointer_click",
            StepKind::KeyboardType(_) => "keyboard_type",
            StepKind::WaitFixed(_) => "wait_fixed",
            StepKind::WaitForImage(_) => "wait_for_image",
            StepKind::WaitForText(_) => "wait_for_text",
            StepKind::ImageSearch(_) => "image_search",
            StepKind::TextSearch(_) => "text_search",
            StepKind::Conditional(_) => "conditional",
            StepKind::Loop(_) => "loop",
            StepKind::Screenshot(_) => "screenshot",
            StepKind::ExcelRowStart(_) => "excel_row_start",
            StepKind::ExcelRowEnd(_) => "excel_row_end",
        }
    }

    /// Kinds that may not appear inside conditional branches or loop bodies.
    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            StepKind::Conditional(_)
                | StepKind::Loop(_)
                | StepKind::ExcelRowStart(_)
                | StepKind::ExcelRowEnd(_)
        )
    }

    fn collect_issues(&self, issues: &mut Vec<ValidationIssue>) {
        match self {
            StepKind::PointerClick(p) => {
                if p.x < 0 || p.y < 0 {
                    issues.push(ValidationIssue::macro_level(
                        "click coordinates must be non-negative",
                    ));
                }
                if p.clicks < 1 {
                    issues.push(ValidationIssue::macro_level("click count must be at least 1"));
                }
            }
            StepKind::KeyboardType(p) => {
                if p.text.is_empty() {
                    issues.push(ValidationIssue::macro_level("text to type cannot be empty"));
                }
            }
            StepKind::WaitFixed(p) => {
                if p.duration_ms == 0 {
                    issues.push(ValidationIssue::macro_level("wait duration must be positive"));
                }
            }
            StepKind::WaitForImage(p) => {
                if p.template.is_empty() {
                    issues.push(ValidationIssue::macro_level("image template cannot be empty"));
                }
                if p.timeout_ms == 0 {
                    issues.push(ValidationIssue::macro_level("wait timeout must be positive"));
                }
                check_confidence(p.confidence, issues);
            }
            StepKind::WaitForText(p) => {
                if p.target.is_empty() {
                    issues.push(ValidationIssue::macro_level("target text cannot be empty"));
                }
                if p.timeout_ms == 0 {
                    issues.push(ValidationIssue::macro_level("wait timeout must be positive"));
                }
                check_confidence(p.confidence, issues);
            }
            StepKind::ImageSearch(p) => {
                if p.template.is_empty() {
                    issues.push(ValidationIssue::macro_level("image template cannot be empty"));
                }
                check_confidence(p.confidence, issues);
            }
            StepKind::TextSearch(p) => {
                if p.search_text.is_empty() && p.excel_column.as_deref().unwrap_or("").is_empty() {
                    issues.push(ValidationIssue::macro_level(
                        "either search text or an excel column must be specified",
                    ));
                }
                check_confidence(p.confidence, issues);
            }
            StepKind::Conditional(p) => {
                p.condition.collect_issues(issues);
                check_linear(&p.then_steps, "conditional branch", issues);
                check_linear(&p.else_steps, "conditional branch", issues);
            }
            StepKind::Loop(p) => {
                if let LoopMode::Count { count } = p.mode {
                    if count < 1 {
                        issues.push(ValidationIssue::macro_level("loop count must be at least 1"));
                    }
                }
                if let LoopMode::While { ref condition } = p.mode {
                    condition.collect_issues(issues);
                }
                if p.body.is_empty() {
                    issues.push(ValidationIssue::macro_level(
                        "loop must contain at least one step",
                    ));
                }
                check_linear(&p.body, "loop body", issues);
            }
            StepKind::Screenshot(_) => {}
            StepKind::ExcelRowStart(p) => match p.repeat_mode {
                RepeatMode::SpecificCount { count } if count < 1 => {
                    issues.push(ValidationIssue::macro_level("repeat count must be at least 1"));
                }
                RepeatMode::Range { start_row, end_row } if end_row < start_row => {
                    issues.push(ValidationIssue::macro_level(
                        "range end row must not precede its start row",
                    ));
                }
                _ => {}
            },
            StepKind::ExcelRowEnd(p) => {
                if p.pair_id.is_nil() {
                    issues.push(ValidationIssue::macro_level(
                        "row end marker is not linked to a start marker",
                    ));
                }
            }
        }
    }
}

fn check_confidence(confidence: f32, issues: &mut Vec<ValidationIssue>) {
    if !(0.0..=1.0).contains(&confidence) {
        issues.push(ValidationIssue::macro_level(
            "confidence must be between 0 and 1",
        ));
    }
}

fn check_linear(steps: &[MacroStep], place: &str, issues: &mut Vec<ValidationIssue>) {
    for step in steps {
        if step.kind.is_control_flow() {
            issues.push(ValidationIssue::macro_level(format!(
                "{} steps are not allowed inside a {place}",
                step.kind.kind_name()
            )));
        } else {
            step.kind.collect_issues(issues);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickParams {
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub button: PointerButton,
    #[serde(default = "default_clicks")]
    pub clicks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeParams {
    pub text: String,
    /// When false the text is typed verbatim, `${...}` tokens included.
    #[serde(default = "default_true")]
    pub use_variables: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitFixedParams {
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitImageParams {
    pub template: String,
    #[serde(default)]
    pub region: Option<Region>,
    #[serde(default = "default_image_confidence")]
    pub confidence: f32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitTextParams {
    pub target: String,
    #[serde(default)]
    pub region: Option<Region>,
    #[serde(default)]
    pub exact_match: bool,
    #[serde(default = "default_text_confidence")]
    pub confidence: f32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSearchParams {
    pub template: String,
    #[serde(default)]
    pub region: Option<Region>,
    #[serde(default = "default_image_confidence")]
    pub confidence: f32,
    /// Optional (min, max) template scale factors the backend may try.
    #[serde(default)]
    pub scale_range: Option<(f32, f32)>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub on_found: Option<SearchAction>,
    #[serde(default)]
    pub on_not_found: Option<SearchAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextSearchParams {
    /// Literal target, may contain `${...}` tokens. Ignored when
    /// `excel_column` names a bound column for the current row.
    #[serde(default)]
    pub search_text: String,
    #[serde(default)]
    pub excel_column: Option<String>,
    #[serde(default)]
    pub region: Option<Region>,
    #[serde(default)]
    pub exact_match: bool,
    #[serde(default = "default_text_confidence")]
    pub confidence: f32,
    /// Offset from the match center applied by click-family actions.
    #[serde(default)]
    pub click_offset: (i32, i32),
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub on_found: Option<SearchAction>,
    #[serde(default)]
    pub on_not_found: Option<SearchAction>,
}

/// Secondary action attached to a search step's found / not-found outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchAction {
    pub action: SearchActionKind,
    #[serde(default)]
    pub params: SearchActionParams,
}

impl SearchAction {
    pub fn of(action: SearchActionKind) -> Self {
        Self {
            action,
            params: SearchActionParams::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchActionKind {
    Click,
    DoubleClick,
    Type,
    Continue,
    Stop,
    SkipRow,
    Retry,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchActionParams {
    /// Overrides the step-level click offset for click-family actions.
    #[serde(default)]
    pub offset: Option<(i32, i32)>,
    /// Overrides the typed text for `Type`; defaults to the search result.
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    ImageExists {
        template: String,
        #[serde(default)]
        region: Option<Region>,
        #[serde(default = "default_image_confidence")]
        confidence: f32,
    },
    TextExists {
        target: String,
        #[serde(default)]
        region: Option<Region>,
        #[serde(default)]
        exact_match: bool,
        #[serde(default = "default_text_confidence")]
        confidence: f32,
    },
    ExcelValueCompare {
        column: String,
        op: CompareOp,
        value: String,
    },
}

impl Condition {
    fn collect_issues(&self, issues: &mut Vec<ValidationIssue>) {
        match self {
            Condition::ImageExists { template, .. } => {
                if template.is_empty() {
                    issues.push(ValidationIssue::macro_level(
                        "image_exists condition needs a template",
                    ));
                }
            }
            Condition::TextExists { target, .. } => {
                if target.is_empty() {
                    issues.push(ValidationIssue::macro_level(
                        "text_exists condition needs a target",
                    ));
                }
            }
            Condition::ExcelValueCompare { column, .. } => {
                if column.is_empty() {
                    issues.push(ValidationIssue::macro_level(
                        "value comparison needs a column name",
                    ));
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalParams {
    pub condition: Condition,
    #[serde(default)]
    pub then_steps: Vec<MacroStep>,
    #[serde(default)]
    pub else_steps: Vec<MacroStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopParams {
    pub mode: LoopMode,
    pub body: Vec<MacroStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopMode {
    Count { count: u32 },
    While { condition: Condition },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScreenshotParams {
    #[serde(default)]
    pub region: Option<Region>,
    /// Label passed to the observer alongside the captured image.
    #[serde(default)]
    pub label: Option<String>,
}

/// Start marker of the Excel workflow block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowStartParams {
    #[serde(default)]
    pub repeat_mode: RepeatMode,
    pub pair_id: Uuid,
}

/// End marker of the Excel workflow block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowEndParams {
    pub pair_id: Uuid,
    /// Status label persisted when the row body finishes without error.
    #[serde(default = "default_completion_status")]
    pub completion_status: String,
}

/// Row-selection policy for the workflow block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RepeatMode {
    All,
    #[default]
    IncompleteOnly,
    SpecificCount {
        count: usize,
    },
    Range {
        start_row: usize,
        end_row: usize,
    },
}

/// The matched start/end pair found by [`Macro::find_workflow_block`].
#[derive(Debug, Clone)]
pub struct WorkflowBlock {
    pub start_index: usize,
    pub end_index: usize,
    pub repeat_mode: RepeatMode,
    pub completion_status: String,
}

/// An ordered list of steps plus metadata; the unit of automation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Macro {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub steps: Vec<MacroStep>,
}

impl Macro {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn with_steps(name: impl Into<String>, steps: Vec<MacroStep>) -> Self {
        let mut m = Self::new(name);
        m.steps = steps;
        m
    }

    /// Validates the macro as a whole: per-step issues plus workflow-block
    /// structure (at most one pair, matching ids, start before end).
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if self.name.is_empty() {
            issues.push(ValidationIssue::macro_level("macro name cannot be empty"));
        }

        for (i, step) in self.steps.iter().enumerate() {
            for issue in step.validate() {
                issues.push(ValidationIssue::at_step(i, issue.message));
            }
        }

        self.check_block_structure(&mut issues);
        issues
    }

    fn check_block_structure(&self, issues: &mut Vec<ValidationIssue>) {
        let starts: Vec<(usize, &RowStartParams)> = self
            .steps
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match &s.kind {
                StepKind::ExcelRowStart(p) => Some((i, p)),
                _ => None,
            })
            .collect();
        let ends: Vec<(usize, &RowEndParams)> = self
            .steps
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match &s.kind {
                StepKind::ExcelRowEnd(p) => Some((i, p)),
                _ => None,
            })
            .collect();

        if starts.len() > 1 || ends.len() > 1 {
            issues.push(ValidationIssue::macro_level(
                "only one excel workflow block is allowed per macro",
            ));
            return;
        }
        match (starts.first(), ends.first()) {
            (Some((si, start)), Some((ei, end))) => {
                if start.pair_id != end.pair_id {
                    issues.push(ValidationIssue::macro_level(
                        "row start and end markers are not paired",
                    ));
                }
                if ei < si {
                    issues.push(ValidationIssue::macro_level(
                        "row end marker precedes its start marker",
                    ));
                }
            }
            (Some(_), None) => issues.push(ValidationIssue::macro_level(
                "row start marker has no matching end marker",
            )),
            (None, Some(_)) => issues.push(ValidationIssue::macro_level(
                "row end marker has no matching start marker",
            )),
            (None, None) => {}
        }
    }

    /// Returns the workflow block when the macro contains a valid marker
    /// pair. `None` means the macro runs standalone.
    pub fn find_workflow_block(&self) -> Option<WorkflowBlock> {
        let mut start: Option<(usize, &RowStartParams)> = None;
        let mut end: Option<(usize, &RowEndParams)> = None;
        for (i, step) in self.steps.iter().enumerate() {
            match &step.kind {
                StepKind::ExcelRowStart(p) if start.is_none() => start = Some((i, p)),
                StepKind::ExcelRowEnd(p) if end.is_none() => end = Some((i, p)),
                _ => {}
            }
        }
        let ((si, s), (ei, e)) = (start?, end?);
        if s.pair_id != e.pair_id || ei < si {
            return None;
        }
        Some(WorkflowBlock {
            start_index: si,
            end_index: ei,
            repeat_mode: s.repeat_mode,
            completion_status: e.completion_status.clone(),
        })
    }

    /// Builds a matched start/end pair sharing a fresh `pair_id`.
    pub fn workflow_markers(repeat_mode: RepeatMode) -> (MacroStep, MacroStep) {
        let pair_id = Uuid::new_v4();
        let start = MacroStep::named(
            "row start",
            StepKind::ExcelRowStart(RowStartParams {
                repeat_mode,
                pair_id,
            }),
        );
        let end = MacroStep::named(
            "row end",
            StepKind::ExcelRowEnd(RowEndParams {
                pair_id,
                completion_status: default_completion_status(),
            }),
        );
        (start, end)
    }
}

fn default_true() -> bool {
    true
}

fn default_clicks() -> u32 {
    1
}

fn default_image_confidence() -> f32 {
    0.9
}

fn default_text_confidence() -> f32 {
    0.5
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_completion_status() -> String {
    "complete".to_string()
}
