//! Stress-test run detection
//!
//! A stress run (gpu-burn by default) is recognised by a substring in a
//! compute process name. The run starts the first cycle the marker appears
//! and ends the first cycle it is missing, unless a grace period is configured.

use serde::{Deserialize, Serialize};

use crate::core::process::ProcessSample;

/// Default process name marker
pub const DEFAULT_MARKER: &str = "gpu-burn";

/// Detector state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StressTestState {
    /// When the current run was first observed (epoch seconds)
    pub start_time: Option<f64>,
    /// Seconds since `start_time` as of the last cycle
    pub elapsed_seconds: f64,
    /// Errors reported during runs; cleared only by reset
    pub error_count: u64,
}

impl StressTestState {
    /// Whether a run is in progress
    pub fn is_running(&self) -> bool {
        self.start_time.is_some()
    }
}

/// Published view of the detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressMetrics {
    pub running: bool,
    /// Elapsed run time, one decimal (seconds)
    pub duration: f64,
    pub errors: u64,
}

impl From<&StressTestState> for StressMetrics {
    fn from(state: &StressTestState) -> Self {
        Self {
            running: state.is_running(),
            duration: (state.elapsed_seconds * 10.0).round() / 10.0,
            errors: state.error_count,
        }
    }
}

/// Tracks one process-wide stress run
#[derive(Debug, Clone)]
pub struct StressDetector {
    marker: String,
    grace_cycles: u32,
    missed: u32,
    state: StressTestState,
}

impl StressDetector {
    /// Detector for `marker` that ends a run after `grace_cycles + 1` absent cycles
    pub fn new(marker: impl Into<String>, grace_cycles: u32) -> Self {
        Self {
            marker: marker.into().to_lowercase(),
            grace_cycles,
            missed: 0,
            state: StressTestState::default(),
        }
    }

    /// Update from this cycle's full (unfiltered) process list
    pub fn observe(&mut self, processes: &[ProcessSample], now: f64) -> StressMetrics {
        let found = processes.iter().any(|p| p.name_contains(&self.marker));

        if found {
            self.missed = 0;
            match self.state.start_time {
                None => {
                    log::info!("Stress test detected (marker {:?})", self.marker);
                    self.state.start_time = Some(now);
                    self.state.elapsed_seconds = 0.0;
                }
                Some(start) => {
                    self.state.elapsed_seconds = (now - start).max(0.0);
                }
            }
        } else if self.state.is_running() && self.missed < self.grace_cycles {
            self.missed += 1;
            log::debug!(
                "Stress marker missing ({}/{} grace cycles)",
                self.missed,
                self.grace_cycles
            );
        } else {
            if self.state.is_running() {
                log::info!(
                    "Stress test ended after {:.1}s",
                    self.state.elapsed_seconds
                );
            }
            self.missed = 0;
            self.state.start_time = None;
            self.state.elapsed_seconds = 0.0;
        }

        self.metrics()
    }

    /// Count an error observed during a run
    pub fn record_error(&mut self) {
        self.state.error_count += 1;
    }

    /// Clear the error count; run state is untouched
    pub fn reset_errors(&mut self) {
        self.state.error_count = 0;
    }

    /// Raw detector state
    pub fn state(&self) -> &StressTestState {
        &self.state
    }

    /// Wire view of the current state
    pub fn metrics(&self) -> StressMetrics {
        StressMetrics::from(&self.state)
    }
}

impl Default for StressDetector {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER, 0)
    }
}
