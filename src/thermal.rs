//! Derived temperature metrics: trend and peak
//!
//! The trend compares the current reading with the oldest reading inside a
//! trailing lookback window (10 seconds by default). Both temperatures are
//! rounded to whole degrees first so sub-degree sensor jitter never shows up
//! as a trend.

use std::collections::BTreeMap;

use crate::history::{TemperatureHistory, TemperatureSample};

/// Default rate-of-change lookback (seconds)
pub const DEFAULT_WINDOW_SECS: f64 = 10.0;

/// Round half to even, as the dashboard's reference numbers do
fn round_degrees(temp: f64) -> f64 {
    temp.round_ties_even()
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Temperature trend in °C/minute for a device whose latest reading is `current`
///
/// `current` must already be recorded in `history`. Returns 0 when fewer than
/// two samples exist, when the rounded delta is under one degree, or when the
/// window spans no time.
pub fn rate_of_change(
    history: &TemperatureHistory,
    device_index: u32,
    current: &TemperatureSample,
    window_secs: f64,
) -> f64 {
    let held = history.get(device_index).map_or(0, |buf| buf.len());
    if held < 2 {
        return 0.0;
    }

    let cutoff = current.timestamp - window_secs;
    let Some(start) = history.window(device_index, cutoff).next() else {
        return 0.0;
    };

    let delta = round_degrees(current.temperature_c) - round_degrees(start.temperature_c);
    if delta.abs() < 1.0 {
        return 0.0;
    }

    let span = current.timestamp - start.timestamp;
    if span <= 0.0 {
        return 0.0;
    }

    round_to(delta / span * 60.0, 2)
}

/// All-time peak temperature per device
#[derive(Debug, Clone, Default)]
pub struct PeakTracker {
    peaks: BTreeMap<u32, f64>,
}

impl PeakTracker {
    /// Empty tracker with no peaks recorded
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the device's peak if `temperature_c` exceeds it; returns the peak
    pub fn update(&mut self, device_index: u32, temperature_c: f64) -> f64 {
        let peak = self.peaks.entry(device_index).or_insert(temperature_c);
        if temperature_c > *peak {
            *peak = temperature_c;
        }
        *peak
    }

    /// Current peak for a device
    pub fn get(&self, device_index: u32) -> Option<f64> {
        self.peaks.get(&device_index).copied()
    }

    /// Forget every peak
    pub fn reset(&mut self) {
        self.peaks.clear();
    }

    /// Forget one device's peak
    pub fn remove(&mut self, device_index: u32) -> bool {
        self.peaks.remove(&device_index).is_some()
    }

    /// Whether no device has a recorded peak
    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }
}

/// Derived metrics for one device in one cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermalReading {
    pub peak_temperature: f64,
    pub temp_change_rate: f64,
}

/// History and peaks for every device, updated together each cycle
#[derive(Debug, Clone)]
pub struct ThermalTracker {
    history: TemperatureHistory,
    peaks: PeakTracker,
    window_secs: f64,
}

impl ThermalTracker {
    /// Create a tracker keeping `capacity` samples per device
    pub fn new(capacity: usize, window_secs: f64) -> Self {
        Self {
            history: TemperatureHistory::new(capacity),
            peaks: PeakTracker::new(),
            window_secs,
        }
    }

    /// Record a reading and compute the device's peak and trend
    pub fn observe(
        &mut self,
        device_index: u32,
        timestamp: f64,
        temperature_c: f64,
    ) -> ThermalReading {
        self.history.record(device_index, timestamp, temperature_c);
        let peak_temperature = self.peaks.update(device_index, temperature_c);
        let current = TemperatureSample {
            timestamp,
            temperature_c,
        };
        let temp_change_rate =
            rate_of_change(&self.history, device_index, &current, self.window_secs);

        ThermalReading {
            peak_temperature,
            temp_change_rate,
        }
    }

    /// Clear peaks; history is kept
    pub fn reset_peaks(&mut self) {
        self.peaks.reset();
    }

    /// Drop everything known about a device
    pub fn forget(&mut self, device_index: u32) {
        self.history.remove(device_index);
        self.peaks.remove(device_index);
    }

    /// Per-device temperature history
    pub fn history(&self) -> &TemperatureHistory {
        &self.history
    }

    /// All-time peaks since the last reset
    pub fn peaks(&self) -> &PeakTracker {
        &self.peaks
    }
}

impl Default for ThermalTracker {
    fn default() -> Self {
        Self::new(crate::history::DEFAULT_HISTORY_SIZE, DEFAULT_WINDOW_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(tracker: &mut ThermalTracker, readings: &[(f64, f64)]) -> ThermalReading {
        let mut last = None;
        for &(t, temp) in readings {
            last = Some(tracker.observe(0, t, temp));
        }
        last.unwrap()
    }

    #[test]
    fn test_rising_scenario() {
        let mut tracker = ThermalTracker::default();
        let reading = feed(
            &mut tracker,
            &[(0.0, 60.0), (3.0, 62.0), (6.0, 65.0), (9.0, 70.0)],
        );
        // (70 - 60) / 9s * 60
        assert_eq!(reading.temp_change_rate, 66.67);
        assert_eq!(reading.peak_temperature, 70.0);
    }

    #[test]
    fn test_single_sample_has_no_rate() {
        let mut tracker = ThermalTracker::default();
        assert_eq!(tracker.observe(0, 100.0, 80.0).temp_change_rate, 0.0);
    }

    #[test]
    fn test_sub_degree_jitter_ignored() {
        let mut tracker = ThermalTracker::default();
        let reading = feed(&mut tracker, &[(0.0, 60.2), (2.0, 60.4), (4.0, 59.8)]);
        assert_eq!(reading.temp_change_rate, 0.0);
    }

    #[test]
    fn test_window_start_is_first_sample_inside_lookback() {
        let mut tracker = ThermalTracker::default();
        // t=0 falls outside the 10s window at t=14; start is t=5 (50 °C)
        let reading = feed(&mut tracker, &[(0.0, 30.0), (5.0, 50.0), (14.0, 56.0)]);
        assert_eq!(reading.temp_change_rate, 40.0);
    }

    #[test]
    fn test_falling_rate_is_negative() {
        let mut tracker = ThermalTracker::default();
        let reading = feed(&mut tracker, &[(0.0, 80.0), (6.0, 74.0)]);
        assert_eq!(reading.temp_change_rate, -60.0);
    }

    #[test]
    fn test_only_current_sample_in_window() {
        let mut tracker = ThermalTracker::default();
        // previous sample is 20s old, so the window holds only the current one
        let reading = feed(&mut tracker, &[(0.0, 40.0), (20.0, 70.0)]);
        assert_eq!(reading.temp_change_rate, 0.0);
    }

    #[test]
    fn test_peak_is_running_max() {
        let mut peaks = PeakTracker::new();
        let temps = [55.0, 61.0, 58.0, 64.0, 63.0, 40.0];
        let mut max_seen = f64::MIN;
        let mut last_peak = f64::MIN;
        for t in temps {
            let peak = peaks.update(3, t);
            max_seen = max_seen.max(t);
            assert!(peak >= last_peak);
            assert_eq!(peak, max_seen);
            last_peak = peak;
        }
    }

    #[test]
    fn test_reset_peaks_keeps_history() {
        let mut tracker = ThermalTracker::default();
        feed(&mut tracker, &[(0.0, 60.0), (1.0, 75.0)]);
        tracker.reset_peaks();

        let reading = tracker.observe(0, 2.0, 62.0);
        assert_eq!(reading.peak_temperature, 62.0);
        assert_eq!(tracker.history().get(0).unwrap().len(), 3);
    }

    #[test]
    fn test_forget_device() {
        let mut tracker = ThermalTracker::default();
        tracker.observe(2, 0.0, 50.0);
        tracker.forget(2);
        assert!(tracker.history().get(2).is_none());
        assert!(tracker.peaks().get(2).is_none());
    }
}
