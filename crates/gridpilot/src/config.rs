use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Engine tuning knobs. All fields have conservative defaults; applications
/// usually deserialize this from their settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed delay between retry attempts of a failing step.
    pub retry_delay_ms: u64,
    /// Settle delay applied after every executed step.
    pub step_delay_ms: u64,
    /// Delay between consecutive data rows.
    pub row_delay_ms: u64,
    /// Poll interval while paused and while waiting for images/text.
    pub poll_interval_ms: u64,
    /// Iteration cap for `While` loops; hitting it fails the loop step.
    pub max_loop_iterations: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 1_000,
            step_delay_ms: 100,
            row_delay_ms: 100,
            poll_interval_ms: 25,
            max_loop_iterations: 1_000,
        }
    }
}

impl EngineConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    pub fn row_delay(&self) -> Duration {
        Duration::from_millis(self.row_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
