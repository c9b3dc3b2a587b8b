//! Poll cycle and snapshot composition
//!
//! [`GpuMonitor`] owns all state that survives between cycles: temperature
//! history, peaks and the stress detector. One call to [`GpuMonitor::poll`]
//! runs the sampler, parses the output, updates that state and returns a
//! freshly built [`Snapshot`]. Past snapshots are not kept.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::core::gpu::{GpuStats, NvidiaInfo};
use crate::core::process::{ProcessFilter, ProcessSample};
use crate::error::Result;
use crate::smi::{self, parser, NvidiaSmi, SmiSource};
use crate::stress::{StressDetector, StressMetrics};
use crate::thermal::ThermalTracker;

/// Result of one poll cycle, in the dashboard's JSON shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub nvidia_info: NvidiaInfo,
    pub gpus: Vec<GpuStats>,
    pub processes: Vec<ProcessSample>,
    pub gpu_burn_metrics: StressMetrics,
    pub success: bool,
    /// When the cycle ran (epoch seconds)
    #[serde(skip)]
    pub timestamp: f64,
}

/// Current wall-clock time as fractional epoch seconds
pub fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Sampling engine
pub struct GpuMonitor {
    source: Box<dyn SmiSource>,
    thermal: ThermalTracker,
    stress: StressDetector,
    filter: ProcessFilter,
    evict_after_cycles: u32,
    absent_cycles: BTreeMap<u32, u32>,
    cycles: u64,
}

impl GpuMonitor {
    /// Monitor with default settings reading from `source`
    pub fn new(source: impl SmiSource + 'static) -> Self {
        Self::with_config(source, &Config::default())
    }

    /// Monitor reading from `source` with settings from `config`
    pub fn with_config(source: impl SmiSource + 'static, config: &Config) -> Self {
        Self {
            source: Box::new(source),
            thermal: ThermalTracker::new(config.history.capacity, config.history.window_secs),
            stress: StressDetector::new(config.stress.marker.clone(), config.stress.grace_cycles),
            filter: ProcessFilter::new(&config.processes.hidden_names),
            evict_after_cycles: config.devices.evict_after_cycles,
            absent_cycles: BTreeMap::new(),
            cycles: 0,
        }
    }

    /// Monitor running the real nvidia-smi described by `config`
    pub fn from_config(config: &Config) -> Self {
        Self::with_config(NvidiaSmi::from_config(&config.sampler), config)
    }

    /// Run one cycle at the current time
    pub fn poll(&mut self) -> Result<Snapshot> {
        self.poll_at(now_secs())
    }

    /// Run one cycle stamped `now` (epoch seconds)
    pub fn poll_at(&mut self, now: f64) -> Result<Snapshot> {
        let raw = smi::sample(&self.source)?;
        self.cycles += 1;

        let nvidia_info = parser::parse_nvidia_info(&raw.driver.text, &raw.banner.text);
        let devices = parser::parse_devices(&raw.devices.text);
        let all_processes = parser::parse_processes(&raw.processes.text);

        let mut gpus = Vec::with_capacity(devices.len());
        for sample in devices {
            let reading = self
                .thermal
                .observe(sample.index, now, sample.temperature_c);
            gpus.push(GpuStats {
                sample,
                peak_temperature: reading.peak_temperature,
                temp_change_rate: reading.temp_change_rate,
            });
        }

        self.evict_stale(&gpus);

        let gpu_burn_metrics = self.stress.observe(&all_processes, now);
        let processes = self.filter.visible(&all_processes);

        log::debug!(
            "Cycle {}: {} GPUs, {} processes ({} shown)",
            self.cycles,
            gpus.len(),
            all_processes.len(),
            processes.len()
        );

        Ok(Snapshot {
            nvidia_info,
            gpus,
            processes,
            gpu_burn_metrics,
            success: true,
            timestamp: now,
        })
    }

    /// Drop state for devices missing longer than the configured limit
    fn evict_stale(&mut self, seen: &[GpuStats]) {
        if self.evict_after_cycles == 0 {
            return;
        }

        let tracked: Vec<u32> = self.thermal.history().devices().collect();
        for index in tracked {
            if seen.iter().any(|g| g.sample.index == index) {
                self.absent_cycles.remove(&index);
                continue;
            }
            let missed = self.absent_cycles.entry(index).or_insert(0);
            *missed += 1;
            if *missed >= self.evict_after_cycles {
                log::info!("Evicting GPU {} after {} absent cycles", index, missed);
                self.absent_cycles.remove(&index);
                self.thermal.forget(index);
            }
        }
    }

    /// Clear every peak and the stress error count
    ///
    /// Temperature history and the stress run state are left alone.
    pub fn reset_peaks(&mut self) {
        self.thermal.reset_peaks();
        self.stress.reset_errors();
        log::info!("Peak temperatures and stress error count reset");
    }

    /// Count an error against the current stress run
    pub fn record_stress_error(&mut self) {
        self.stress.record_error();
    }

    /// Temperature history and peaks
    pub fn thermal(&self) -> &ThermalTracker {
        &self.thermal
    }

    /// Stress-test detector
    pub fn stress(&self) -> &StressDetector {
        &self.stress
    }

    /// Cycles completed so far
    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}
