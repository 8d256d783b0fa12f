//! Shared mock collaborators for the integration suites: a scripted screen,
//! a recording input backend, and an in-memory data source.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use gridpilot::{
    text_matches, ClickParams, ControlHandle, DataSourceError, EngineConfig, ExcelDataSource,
    ExecutionObserver, ImageHit, ImageQuery, InputController, InputError, MacroStep, Point,
    PointerButton, Region, RowBindings, RowStatus, RunState, Screenshot, StepKind, TextHit,
    TextQuery, TypeParams, VisionError, VisionService,
};

/// Routes engine logs into the test harness; `RUST_LOG=debug` to see them.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config with no pacing delays so suites run fast.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        retry_delay_ms: 0,
        step_delay_ms: 0,
        row_delay_ms: 0,
        poll_interval_ms: 1,
        max_loop_iterations: 50,
    }
}

pub fn click_step(x: i32, y: i32) -> MacroStep {
    MacroStep::new(StepKind::PointerClick(ClickParams {
        x,
        y,
        button: PointerButton::Left,
        clicks: 1,
    }))
}

pub fn type_step(text: &str) -> MacroStep {
    MacroStep::new(StepKind::KeyboardType(TypeParams {
        text: text.to_string(),
        use_variables: true,
    }))
}

pub fn bindings(pairs: &[(&str, &str)]) -> RowBindings {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect()
}

/// A fake screen: a set of visible template names and text fragments.
/// Matching follows the engine's shared text-match semantics.
#[derive(Default)]
pub struct ScriptedVision {
    images: Mutex<HashSet<String>>,
    texts: Mutex<Vec<String>>,
    pub image_probes: AtomicUsize,
    pub text_probes: AtomicUsize,
}

impl ScriptedVision {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show_image(&self, template: &str) {
        self.images.lock().unwrap().insert(template.to_string());
    }

    pub fn hide_image(&self, template: &str) {
        self.images.lock().unwrap().remove(template);
    }

    pub fn show_text(&self, text: &str) {
        self.texts.lock().unwrap().push(text.to_string());
    }
}

#[async_trait]
impl VisionService for ScriptedVision {
    async fn find_image(&self, query: &ImageQuery) -> Result<Option<ImageHit>, VisionError> {
        self.image_probes.fetch_add(1, Ordering::SeqCst);
        let found = self.images.lock().unwrap().contains(&query.template);
        Ok(found.then(|| ImageHit {
            bbox: Region::new(90, 90, 20, 20),
            center: Point { x: 100, y: 100 },
            confidence: 0.99,
        }))
    }

    async fn find_text(&self, query: &TextQuery) -> Result<Option<TextHit>, VisionError> {
        self.text_probes.fetch_add(1, Ordering::SeqCst);
        let texts = self.texts.lock().unwrap();
        Ok(texts
            .iter()
            .find(|candidate| text_matches(candidate, &query.target, query.exact_match))
            .map(|candidate| TextHit {
                text: candidate.clone(),
                bbox: Region::new(40, 40, 80, 20),
                center: Point { x: 80, y: 50 },
                confidence: 0.9,
            }))
    }

    async fn find_all_text(&self, query: &TextQuery) -> Result<Vec<TextHit>, VisionError> {
        Ok(self.find_text(query).await?.into_iter().collect())
    }

    async fn capture_screen(&self, region: Option<Region>) -> Result<Screenshot, VisionError> {
        Ok(Screenshot {
            data: vec![0u8; 4],
            region,
        })
    }
}

/// Records every input action. Can be scripted to fail clicks, or to raise
/// pause/stop on the engine's control handle after the n-th click —
/// standing in for a user hitting a hotkey mid-run.
#[derive(Default)]
pub struct RecordingInput {
    pub clicks: Mutex<Vec<(i32, i32, u32)>>,
    pub typed: Mutex<Vec<String>>,
    pub keys: Mutex<Vec<String>>,
    pub click_attempts: AtomicUsize,
    fail_clicks: AtomicBool,
    control: Mutex<Option<ControlHandle>>,
    pause_after_clicks: AtomicUsize,
    stop_after_clicks: AtomicUsize,
}

impl RecordingInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_clicks(&self) {
        self.fail_clicks.store(true, Ordering::SeqCst);
    }

    pub fn pause_after(&self, clicks: usize, control: ControlHandle) {
        self.pause_after_clicks.store(clicks, Ordering::SeqCst);
        *self.control.lock().unwrap() = Some(control);
    }

    pub fn stop_after(&self, clicks: usize, control: ControlHandle) {
        self.stop_after_clicks.store(clicks, Ordering::SeqCst);
        *self.control.lock().unwrap() = Some(control);
    }

    pub fn click_count(&self) -> usize {
        self.clicks.lock().unwrap().len()
    }

    pub fn typed_texts(&self) -> Vec<String> {
        self.typed.lock().unwrap().clone()
    }
}

#[async_trait]
impl InputController for RecordingInput {
    async fn click(
        &self,
        x: i32,
        y: i32,
        _button: PointerButton,
        clicks: u32,
    ) -> Result<(), InputError> {
        self.click_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_clicks.load(Ordering::SeqCst) {
            return Err(InputError::Pointer("scripted click failure".to_string()));
        }
        let count = {
            let mut recorded = self.clicks.lock().unwrap();
            recorded.push((x, y, clicks));
            recorded.len()
        };
        if let Some(control) = self.control.lock().unwrap().as_ref() {
            if count == self.pause_after_clicks.load(Ordering::SeqCst) {
                control.pause();
            }
            if count == self.stop_after_clicks.load(Ordering::SeqCst) {
                control.stop();
            }
        }
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<(), InputError> {
        self.typed.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn key_press(&self, key: &str) -> Result<(), InputError> {
        self.keys.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

/// In-memory spreadsheet with per-row status labels.
pub struct MemorySource {
    rows: Vec<RowBindings>,
    statuses: Mutex<Vec<String>>,
    fail_row_reads: AtomicBool,
}

impl MemorySource {
    pub fn new(rows: Vec<RowBindings>) -> Self {
        let count = rows.len();
        Self {
            rows,
            statuses: Mutex::new(vec![String::new(); count]),
            fail_row_reads: AtomicBool::new(false),
        }
    }

    /// Three rows binding `name` to row0/row1/row2.
    pub fn named_rows() -> Self {
        Self::new(vec![
            bindings(&[("name", "row0")]),
            bindings(&[("name", "row1")]),
            bindings(&[("name", "row2")]),
        ])
    }

    pub fn preset_status(&self, index: usize, status: &str) {
        self.statuses.lock().unwrap()[index] = status.to_string();
    }

    pub fn status_of(&self, index: usize) -> String {
        self.statuses.lock().unwrap()[index].clone()
    }

    pub fn fail_row_reads(&self) {
        self.fail_row_reads.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExcelDataSource for MemorySource {
    async fn row_count(&self) -> Result<usize, DataSourceError> {
        Ok(self.rows.len())
    }

    async fn get_row(&self, index: usize) -> Result<RowBindings, DataSourceError> {
        if self.fail_row_reads.load(Ordering::SeqCst) {
            return Err(DataSourceError::RowRead {
                index,
                message: "scripted read failure".to_string(),
            });
        }
        self.rows
            .get(index)
            .cloned()
            .ok_or_else(|| DataSourceError::RowRead {
                index,
                message: "row out of range".to_string(),
            })
    }

    async fn get_status(&self, index: usize) -> Result<String, DataSourceError> {
        Ok(self.status_of(index))
    }

    async fn set_status(&self, index: usize, status: &str) -> Result<(), DataSourceError> {
        self.statuses.lock().unwrap()[index] = status.to_string();
        Ok(())
    }

    async fn columns(&self) -> Result<Vec<String>, DataSourceError> {
        Ok(self
            .rows
            .first()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default())
    }
}

/// Observer that collects everything it is told.
#[derive(Default)]
pub struct CollectingObserver {
    pub states: Mutex<Vec<RunState>>,
    pub started_steps: Mutex<Vec<String>>,
    pub completed_rows: Mutex<Vec<(usize, RowStatus)>>,
    pub percentages: Mutex<Vec<f64>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionObserver for CollectingObserver {
    fn state_changed(&self, state: RunState) {
        self.states.lock().unwrap().push(state);
    }

    fn step_started(&self, step: &MacroStep, _row_index: Option<usize>) {
        self.started_steps
            .lock()
            .unwrap()
            .push(step.kind.kind_name().to_string());
    }

    fn progress(&self, _current: f64, _total: f64, percentage: f64) {
        self.percentages.lock().unwrap().push(percentage);
    }

    fn row_completed(&self, row_index: usize, status: RowStatus) {
        self.completed_rows.lock().unwrap().push((row_index, status));
    }
}
