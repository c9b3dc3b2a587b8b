//! GPU device records

use serde::{Deserialize, Serialize};

/// One device's metrics from a single `--query-gpu` line
///
/// Serialized field names follow the dashboard's JSON contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSample {
    /// Device index as reported by the driver
    pub index: u32,
    /// Product name (e.g., "NVIDIA GeForce RTX 4090")
    pub name: String,
    /// Fan speed (%)
    #[serde(rename = "fan_speed")]
    pub fan_speed_pct: f64,
    /// Power draw (W)
    #[serde(rename = "power_draw")]
    pub power_draw_w: f64,
    /// Enforced power limit (W)
    #[serde(rename = "power_limit")]
    pub power_limit_w: f64,
    /// Total framebuffer memory (MiB)
    #[serde(rename = "memory_total")]
    pub memory_total_mib: f64,
    /// Used framebuffer memory (MiB)
    #[serde(rename = "memory_used")]
    pub memory_used_mib: f64,
    /// GPU utilization (%)
    #[serde(rename = "gpu_utilization")]
    pub utilization_pct: f64,
    /// Core temperature (°C)
    #[serde(rename = "temperature")]
    pub temperature_c: f64,
    /// Compute mode string (Default, Exclusive_Process, Prohibited)
    pub compute_mode: String,
}

impl DeviceSample {
    /// Memory usage percentage, 0 when the total is unknown
    pub fn memory_usage_percent(&self) -> f64 {
        if self.memory_total_mib > 0.0 {
            self.memory_used_mib / self.memory_total_mib * 100.0
        } else {
            0.0
        }
    }
}

/// A device sample enriched with the engine's derived metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuStats {
    #[serde(flatten)]
    pub sample: DeviceSample,
    /// Highest temperature seen since start or the last reset (°C)
    pub peak_temperature: f64,
    /// Temperature trend over the lookback window (°C/min)
    pub temp_change_rate: f64,
}

/// Driver and CUDA runtime versions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NvidiaInfo {
    pub driver_version: String,
    pub cuda_version: String,
}

/// Placeholder for a version the tool could not report
pub const UNKNOWN_VERSION: &str = "Unknown";

impl Default for NvidiaInfo {
    fn default() -> Self {
        Self {
            driver_version: UNKNOWN_VERSION.to_string(),
            cuda_version: UNKNOWN_VERSION.to_string(),
        }
    }
}
