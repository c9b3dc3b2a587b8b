//! # gpuwatch
//!
//! Samples `nvidia-smi`, keeps a short temperature history per GPU, and
//! republishes the result as a JSON API for a browser dashboard.
//!
//! Each poll cycle:
//!
//! 1. runs the driver, banner, device and process queries ([`smi`])
//! 2. parses the CSV output into [`DeviceSample`]s and [`ProcessSample`]s
//! 3. records temperatures and derives the peak and 10-second trend ([`thermal`])
//! 4. updates the stress-test detector ([`stress`])
//! 5. composes a [`Snapshot`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use gpuwatch::{Config, GpuMonitor};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load()?;
//! let mut monitor = GpuMonitor::from_config(&config);
//!
//! let snapshot = monitor.poll()?;
//! for gpu in &snapshot.gpus {
//!     println!(
//!         "GPU {}: {:.0}°C (peak {:.0}°C, {:+.2}°C/min)",
//!         gpu.sample.index,
//!         gpu.sample.temperature_c,
//!         gpu.peak_temperature,
//!         gpu.temp_change_rate
//!     );
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Serving the dashboard API
//!
//! ```no_run
//! use gpuwatch::{server, Config, GpuMonitor};
//!
//! # async fn run() -> gpuwatch::Result<()> {
//! let config = Config::load()?;
//! let monitor = GpuMonitor::from_config(&config);
//! server::run_server(monitor, &config.server).await
//! # }
//! ```
//!
//! ## Errors
//!
//! A missing or failing `nvidia-smi` never fails a cycle: the affected query
//! is treated as empty and versions read `"Unknown"`. Malformed CSV lines are
//! skipped. Only unexpected failures surface, as `{"success": false}` at the
//! API boundary.

pub mod config; // TOML configuration
pub mod core; // Device and process records
pub mod error;
pub mod history; // Per-device temperature ring buffers
pub mod monitor; // Poll cycle and snapshot composition
pub mod server; // axum JSON API
pub mod smi; // nvidia-smi invocation and CSV parsing
pub mod stress; // Stress-test run detection
pub mod thermal; // Temperature trend and peak tracking

pub use config::Config;
pub use crate::core::{
    gpu::{DeviceSample, GpuStats, NvidiaInfo},
    process::{ProcessFilter, ProcessSample},
};
pub use error::{Error, RecordKind, Result};
pub use history::{HistoryBuffer, TemperatureHistory, TemperatureSample, DEFAULT_HISTORY_SIZE};
pub use monitor::{GpuMonitor, Snapshot};
pub use smi::{NvidiaSmi, Query, SmiSource};
pub use stress::{StressDetector, StressMetrics, StressTestState};
pub use thermal::{rate_of_change, PeakTracker, ThermalTracker};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
