//! Single-step dispatch and error policy.
//!
//! The executor owns no run state: everything a handler needs arrives via
//! the step's resolved parameters and the [`ExecutionContext`]. Dispatch is
//! an exhaustive match over [`StepKind`] — a new kind fails to compile until
//! every arm is written.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::context::{ExecutionContext, FoundValue, StepResult};
use crate::error::{StepExecutionError, StepFailure};
use crate::input::InputController;
use crate::observer::ExecutionObserver;
use crate::step::{
    ClickParams, CompareOp, Condition, ConditionalParams, ImageSearchParams, LoopMode, LoopParams,
    MacroStep, PointerButton, ScreenshotParams, SearchAction, SearchActionKind, StepKind,
    TextSearchParams, TypeParams, WaitImageParams, WaitTextParams,
};
use crate::vars::{self, VariableResolver};
use crate::vision::{ImageQuery, Point, TextQuery, VisionService};

/// What the engine should do after a step: keep going, or abandon the
/// remaining steps of the current row (the row is recorded as skipped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepFlow {
    Continue,
    SkipRow,
}

struct StepOutcome {
    flow: StepFlow,
    value: Option<FoundValue>,
}

impl StepOutcome {
    fn proceed() -> Self {
        Self {
            flow: StepFlow::Continue,
            value: None,
        }
    }

    fn with_value(value: FoundValue) -> Self {
        Self {
            flow: StepFlow::Continue,
            value: Some(value),
        }
    }

    fn skip_row() -> Self {
        Self {
            flow: StepFlow::SkipRow,
            value: None,
        }
    }
}

pub struct StepExecutor {
    vision: Arc<dyn VisionService>,
    input: Arc<dyn InputController>,
    observer: Arc<dyn ExecutionObserver>,
    config: EngineConfig,
    resolver: VariableResolver,
}

impl StepExecutor {
    pub fn new(
        vision: Arc<dyn VisionService>,
        input: Arc<dyn InputController>,
        observer: Arc<dyn ExecutionObserver>,
        config: EngineConfig,
    ) -> Self {
        Self {
            vision,
            input,
            observer,
            config,
            resolver: VariableResolver::new(),
        }
    }

    /// Executes one step under its error policy. `Err` means the policy
    /// settled on stop semantics and the row/run must not continue.
    pub async fn run_step(
        &self,
        step: &MacroStep,
        ctx: &mut ExecutionContext,
    ) -> Result<StepFlow, StepExecutionError> {
        if !step.enabled {
            debug!(step = step.label(), "skipping disabled step");
            return Ok(StepFlow::Continue);
        }

        let mut attempt: u32 = 0;
        loop {
            match self.dispatch(step, ctx).await {
                Ok(outcome) => {
                    ctx.step_progress += 1.0;
                    ctx.last_result = Some(StepResult::ok(outcome.value));
                    return Ok(outcome.flow);
                }
                Err(failure) => match step.error_policy {
                    crate::step::ErrorPolicy::Retry if attempt < step.retry_count => {
                        attempt += 1;
                        warn!(
                            step = step.label(),
                            attempt,
                            max = step.retry_count,
                            error = %failure,
                            "step failed, retrying"
                        );
                        sleep(self.config.retry_delay()).await;
                    }
                    crate::step::ErrorPolicy::Continue => {
                        warn!(step = step.label(), error = %failure, "step failed, continuing");
                        ctx.warnings
                            .push(format!("step '{}' failed: {failure}", step.label()));
                        ctx.step_progress += 1.0;
                        ctx.last_result = Some(StepResult::failed(failure.to_string()));
                        return Ok(StepFlow::Continue);
                    }
                    // Stop, or Retry with its budget exhausted.
                    _ => {
                        ctx.last_result = Some(StepResult::failed(failure.to_string()));
                        return Err(StepExecutionError {
                            step_id: step.id,
                            step_name: step.label().to_string(),
                            cause: failure,
                        });
                    }
                },
            }
        }
    }

    async fn dispatch(
        &self,
        step: &MacroStep,
        ctx: &mut ExecutionContext,
    ) -> Result<StepOutcome, StepFailure> {
        debug!(step = step.label(), kind = step.kind.kind_name(), "executing step");
        match &step.kind {
            StepKind::PointerClick(p) => self.pointer_click(p).await,
            StepKind::KeyboardType(p) => self.keyboard_type(p, ctx).await,
            StepKind::WaitFixed(p) => {
                sleep(Duration::from_millis(p.duration_ms)).await;
                Ok(StepOutcome::proceed())
            }
            StepKind::WaitForImage(p) => self.wait_for_image(p, ctx).await,
            StepKind::WaitForText(p) => self.wait_for_text(p, ctx).await,
            StepKind::ImageSearch(p) => self.image_search(p, ctx).await,
            StepKind::TextSearch(p) => self.text_search(p, ctx).await,
            StepKind::Conditional(p) => self.conditional(p, ctx).await,
            StepKind::Loop(p) => self.run_loop(p, ctx).await,
            StepKind::Screenshot(p) => self.screenshot(p, ctx).await,
            // Markers only delimit the row body; iteration is the engine's job.
            StepKind::ExcelRowStart(_) | StepKind::ExcelRowEnd(_) => Ok(StepOutcome::proceed()),
        }
    }

    fn resolve(&self, input: &str, ctx: &mut ExecutionContext) -> String {
        let resolution = self.resolver.resolve(input, &ctx.bindings);
        if !resolution.is_clean() {
            ctx.record_unresolved(&resolution.unresolved);
        }
        resolution.text
    }

    async fn pointer_click(&self, p: &ClickParams) -> Result<StepOutcome, StepFailure> {
        self.input.click(p.x, p.y, p.button, p.clicks).await?;
        Ok(StepOutcome::with_value(FoundValue::Location(Point {
            x: p.x,
            y: p.y,
        })))
    }

    async fn keyboard_type(
        &self,
        p: &TypeParams,
        ctx: &mut ExecutionContext,
    ) -> Result<StepOutcome, StepFailure> {
        let text = if p.use_variables {
            self.resolve(&p.text, ctx)
        } else {
            p.text.clone()
        };
        self.input.type_text(&text).await?;
        Ok(StepOutcome::with_value(FoundValue::Text(text)))
    }

    async fn wait_for_image(
        &self,
        p: &WaitImageParams,
        ctx: &mut ExecutionContext,
    ) -> Result<StepOutcome, StepFailure> {
        let query = ImageQuery {
            template: self.resolve(&p.template, ctx),
            region: p.region,
            confidence: p.confidence,
            scale_range: None,
            timeout: None,
        };
        let deadline = Instant::now() + Duration::from_millis(p.timeout_ms);
        loop {
            if let Some(hit) = self.vision.find_image(&query).await? {
                return Ok(StepOutcome::with_value(FoundValue::Location(hit.center)));
            }
            if Instant::now() >= deadline {
                return Err(StepFailure::Timeout(p.timeout_ms));
            }
            sleep(self.config.poll_interval()).await;
        }
    }

    async fn wait_for_text(
        &self,
        p: &WaitTextParams,
        ctx: &mut ExecutionContext,
    ) -> Result<StepOutcome, StepFailure> {
        let target = vars::normalize_fullwidth(self.resolve(&p.target, ctx).trim());
        let query = TextQuery {
            target,
            region: p.region,
            exact_match: p.exact_match,
            confidence_threshold: p.confidence,
            timeout: None,
        };
        let deadline = Instant::now() + Duration::from_millis(p.timeout_ms);
        loop {
            if let Some(hit) = self.vision.find_text(&query).await? {
                return Ok(StepOutcome::with_value(FoundValue::Location(hit.center)));
            }
            if Instant::now() >= deadline {
                return Err(StepFailure::Timeout(p.timeout_ms));
            }
            sleep(self.config.poll_interval()).await;
        }
    }

    async fn image_search(
        &self,
        p: &ImageSearchParams,
        ctx: &mut ExecutionContext,
    ) -> Result<StepOutcome, StepFailure> {
        let query = ImageQuery {
            template: self.resolve(&p.template, ctx),
            region: p.region,
            confidence: p.confidence,
            scale_range: p.scale_range,
            timeout: p.timeout_ms.map(Duration::from_millis),
        };
        let mut hit = self.vision.find_image(&query).await?;
        if hit.is_none() && wants_retry(&p.on_not_found) {
            sleep(self.config.retry_delay()).await;
            hit = self.vision.find_image(&query).await?;
        }
        match hit {
            Some(hit) => {
                debug!(x = hit.center.x, y = hit.center.y, confidence = hit.confidence, "image found");
                self.found_action(p.on_found.as_ref(), hit.center, None, (0, 0), ctx)
                    .await
            }
            None => {
                debug!(template = %query.template, "image not found");
                self.not_found_action(p.on_not_found.as_ref(), &query.template)
            }
        }
    }

    async fn text_search(
        &self,
        p: &TextSearchParams,
        ctx: &mut ExecutionContext,
    ) -> Result<StepOutcome, StepFailure> {
        // An excel column binding takes precedence over the literal target.
        let raw = match p.excel_column.as_deref() {
            Some(column) if !column.is_empty() => match ctx.bindings.get(column) {
                Some(value) => vars::stringify_cell(value),
                None => self.resolve(&p.search_text, ctx),
            },
            _ => self.resolve(&p.search_text, ctx),
        };
        let target = vars::normalize_fullwidth(raw.trim());
        if target.is_empty() {
            return Err(StepFailure::Other(
                "no search text left after variable resolution".to_string(),
            ));
        }

        let query = TextQuery {
            target,
            region: p.region,
            exact_match: p.exact_match,
            confidence_threshold: p.confidence,
            timeout: p.timeout_ms.map(Duration::from_millis),
        };
        let mut hit = self.vision.find_text(&query).await?;
        if hit.is_none() && wants_retry(&p.on_not_found) {
            sleep(self.config.retry_delay()).await;
            hit = self.vision.find_text(&query).await?;
        }
        match hit {
            Some(hit) => {
                debug!(text = %hit.text, x = hit.center.x, y = hit.center.y, "text found");
                self.found_action(
                    p.on_found.as_ref(),
                    hit.center,
                    Some(hit.text.as_str()),
                    p.click_offset,
                    ctx,
                )
                .await
            }
            None => {
                debug!(target = %query.target, "text not found");
                self.not_found_action(p.on_not_found.as_ref(), &query.target)
            }
        }
    }

    /// Runs the `on_found` descriptor against a search hit. Without a
    /// descriptor the hit itself is the step's value.
    async fn found_action(
        &self,
        action: Option<&SearchAction>,
        center: Point,
        matched_text: Option<&str>,
        base_offset: (i32, i32),
        ctx: &mut ExecutionContext,
    ) -> Result<StepOutcome, StepFailure> {
        let Some(action) = action else {
            return Ok(StepOutcome::with_value(FoundValue::Location(center)));
        };
        match action.action {
            SearchActionKind::Click | SearchActionKind::DoubleClick => {
                let (dx, dy) = action.params.offset.unwrap_or(base_offset);
                let point = center.offset(dx, dy);
                let clicks = if action.action == SearchActionKind::DoubleClick {
                    2
                } else {
                    1
                };
                self.input
                    .click(point.x, point.y, PointerButton::Left, clicks)
                    .await?;
                Ok(StepOutcome::with_value(FoundValue::Location(point)))
            }
            SearchActionKind::Type => {
                let text = match &action.params.text {
                    Some(text) => self.resolve(text, ctx),
                    None => matched_text
                        .map(str::to_string)
                        .ok_or_else(|| {
                            StepFailure::Other("type action has no text to type".to_string())
                        })?,
                };
                self.input.type_text(&text).await?;
                Ok(StepOutcome::with_value(FoundValue::Text(text)))
            }
            SearchActionKind::Stop => {
                Err(StepFailure::Aborted("search action requested stop".to_string()))
            }
            SearchActionKind::SkipRow => Ok(StepOutcome::skip_row()),
            // Retry only makes sense on the not-found side; a hit proceeds.
            SearchActionKind::Continue | SearchActionKind::Retry => {
                Ok(StepOutcome::with_value(FoundValue::Location(center)))
            }
        }
    }

    /// Applies the `on_not_found` descriptor. Without one, a miss escalates
    /// through the step's error policy.
    fn not_found_action(
        &self,
        action: Option<&SearchAction>,
        target: &str,
    ) -> Result<StepOutcome, StepFailure> {
        let Some(action) = action else {
            return Err(StepFailure::NotFound(target.to_string()));
        };
        match action.action {
            SearchActionKind::Continue => Ok(StepOutcome::proceed()),
            SearchActionKind::SkipRow => Ok(StepOutcome::skip_row()),
            SearchActionKind::Stop => Err(StepFailure::Aborted(format!(
                "'{target}' not found, search action requested stop"
            ))),
            // The extra probe already ran; a second miss is final.
            SearchActionKind::Retry => Err(StepFailure::NotFound(target.to_string())),
            SearchActionKind::Click | SearchActionKind::DoubleClick | SearchActionKind::Type => {
                Err(StepFailure::Other(
                    "click/type actions need a search result and cannot run on not-found"
                        .to_string(),
                ))
            }
        }
    }

    async fn conditional(
        &self,
        p: &ConditionalParams,
        ctx: &mut ExecutionContext,
    ) -> Result<StepOutcome, StepFailure> {
        let verdict = self.evaluate(&p.condition, ctx).await?;
        debug!(verdict, "condition evaluated");
        let branch = if verdict { &p.then_steps } else { &p.else_steps };
        // The whole conditional is one step unit; the branch must not
        // inflate row progress.
        let base = ctx.step_progress;
        let flow = self.run_linear(branch, ctx).await?;
        ctx.step_progress = base;
        Ok(StepOutcome {
            flow,
            value: None,
        })
    }

    async fn run_loop(
        &self,
        p: &LoopParams,
        ctx: &mut ExecutionContext,
    ) -> Result<StepOutcome, StepFailure> {
        let base = ctx.step_progress;
        match &p.mode {
            LoopMode::Count { count } => {
                for iteration in 0..*count {
                    let flow = self.run_linear(&p.body, ctx).await?;
                    // Iterations advance the loop's single unit fractionally.
                    ctx.step_progress = base + f64::from(iteration + 1) / f64::from(*count);
                    if flow == StepFlow::SkipRow {
                        ctx.step_progress = base;
                        return Ok(StepOutcome::skip_row());
                    }
                }
            }
            LoopMode::While { condition } => {
                let mut iterations: u32 = 0;
                while self.evaluate(condition, ctx).await? {
                    if iterations >= self.config.max_loop_iterations {
                        ctx.step_progress = base;
                        return Err(StepFailure::LoopLimit(iterations));
                    }
                    let flow = self.run_linear(&p.body, ctx).await?;
                    iterations += 1;
                    ctx.step_progress = base + f64::from(iterations) / f64::from(iterations + 1);
                    if flow == StepFlow::SkipRow {
                        ctx.step_progress = base;
                        return Ok(StepOutcome::skip_row());
                    }
                }
            }
        }
        ctx.step_progress = base;
        Ok(StepOutcome::proceed())
    }

    /// Runs a branch/loop body. Nested steps keep their own error policies;
    /// a nested stop surfaces as this step's failure.
    async fn run_linear(
        &self,
        steps: &[MacroStep],
        ctx: &mut ExecutionContext,
    ) -> Result<StepFlow, StepFailure> {
        for step in steps {
            let flow = self
                .run_step_boxed(step, ctx)
                .await
                .map_err(|e| StepFailure::Nested(Box::new(e)))?;
            if flow == StepFlow::SkipRow {
                return Ok(StepFlow::SkipRow);
            }
        }
        Ok(StepFlow::Continue)
    }

    fn run_step_boxed<'a>(
        &'a self,
        step: &'a MacroStep,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<StepFlow, StepExecutionError>> {
        Box::pin(self.run_step(step, ctx))
    }

    async fn evaluate(
        &self,
        condition: &Condition,
        ctx: &mut ExecutionContext,
    ) -> Result<bool, StepFailure> {
        match condition {
            Condition::ImageExists {
                template,
                region,
                confidence,
            } => {
                let query = ImageQuery {
                    template: self.resolve(template, ctx),
                    region: *region,
                    confidence: *confidence,
                    scale_range: None,
                    timeout: None,
                };
                Ok(self.vision.find_image(&query).await?.is_some())
            }
            Condition::TextExists {
                target,
                region,
                exact_match,
                confidence,
            } => {
                let query = TextQuery {
                    target: vars::normalize_fullwidth(self.resolve(target, ctx).trim()),
                    region: *region,
                    exact_match: *exact_match,
                    confidence_threshold: *confidence,
                    timeout: None,
                };
                Ok(self.vision.find_text(&query).await?.is_some())
            }
            Condition::ExcelValueCompare { column, op, value } => {
                let cell = ctx
                    .bindings
                    .get(column)
                    .map(vars::stringify_cell)
                    .unwrap_or_default();
                let rhs = self.resolve(value, ctx);
                Ok(compare_values(&cell, *op, &rhs))
            }
        }
    }

    async fn screenshot(
        &self,
        p: &ScreenshotParams,
        ctx: &mut ExecutionContext,
    ) -> Result<StepOutcome, StepFailure> {
        let shot = self.vision.capture_screen(p.region).await?;
        let label = p.label.as_deref().map(|l| self.resolve(l, ctx));
        self.observer.screenshot_captured(label.as_deref(), &shot);
        Ok(StepOutcome::proceed())
    }
}

fn wants_retry(action: &Option<SearchAction>) -> bool {
    matches!(
        action,
        Some(SearchAction {
            action: SearchActionKind::Retry,
            ..
        })
    )
}

/// Cell comparison: numeric when both sides parse as numbers, lexical
/// otherwise (mirrors how spreadsheet cells compare in practice).
fn compare_values(lhs: &str, op: CompareOp, rhs: &str) -> bool {
    let lhs = lhs.trim();
    let rhs = rhs.trim();
    match op {
        CompareOp::Equals => lhs == rhs,
        CompareOp::NotEquals => lhs != rhs,
        CompareOp::Contains => lhs.contains(rhs),
        CompareOp::GreaterThan | CompareOp::LessThan => {
            let ordering = match (lhs.parse::<f64>(), rhs.parse::<f64>()) {
                (Ok(a), Ok(b)) => a.partial_cmp(&b),
                _ => Some(lhs.cmp(rhs)),
            };
            match (op, ordering) {
                (CompareOp::GreaterThan, Some(std::cmp::Ordering::Greater)) => true,
                (CompareOp::LessThan, Some(std::cmp::Ordering::Less)) => true,
                _ => false,
            }
        }
    }
}
