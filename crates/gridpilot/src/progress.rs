//! Progress arithmetic.
//!
//! Progress is reported as `(completed_rows + step_progress / total_steps)
//! / total_rows` in Excel mode and `step_progress / total_steps`
//! standalone, where `step_progress` counts completed step units within the
//! current row — loop iterations contribute fractions of their step's unit.

use crate::step::MacroStep;

/// Number of step units in a step list: one unit per enabled step.
/// Conditionals and loops count as a single unit regardless of body size;
/// their internals surface as fractional progress while they run.
pub fn count_units(steps: &[MacroStep]) -> usize {
    steps.iter().filter(|s| s.enabled).count()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub current: f64,
    pub total: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone)]
enum Mode {
    Standalone,
    Excel { total_rows: usize, completed_rows: usize },
}

#[derive(Debug, Clone)]
pub struct ProgressTracker {
    mode: Mode,
    units_per_row: usize,
}

impl ProgressTracker {
    pub fn standalone(units: usize) -> Self {
        Self {
            mode: Mode::Standalone,
            units_per_row: units,
        }
    }

    pub fn excel(units_per_row: usize, total_rows: usize) -> Self {
        Self {
            mode: Mode::Excel {
                total_rows,
                completed_rows: 0,
            },
            units_per_row,
        }
    }

    pub fn row_finished(&mut self) {
        if let Mode::Excel { completed_rows, .. } = &mut self.mode {
            *completed_rows += 1;
        }
    }

    /// Snapshot given the fractional step progress within the current row.
    pub fn snapshot(&self, step_progress: f64) -> ProgressSnapshot {
        let units = self.units_per_row.max(1) as f64;
        let row_fraction = (step_progress / units).clamp(0.0, 1.0);
        match self.mode {
            Mode::Standalone => ProgressSnapshot {
                current: step_progress,
                total: units,
                percentage: row_fraction * 100.0,
            },
            Mode::Excel {
                total_rows,
                completed_rows,
            } => {
                let total = total_rows.max(1) as f64;
                let current = (completed_rows as f64 + row_fraction).min(total);
                ProgressSnapshot {
                    current,
                    total,
                    percentage: current / total * 100.0,
                }
            }
        }
    }
}
