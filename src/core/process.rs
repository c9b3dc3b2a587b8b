//! GPU compute process records

use serde::{Deserialize, Serialize};

/// One compute process from a `--query-compute-apps` line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSample {
    /// UUID of the GPU the process runs on
    #[serde(rename = "gpu_uuid")]
    pub device_uuid: String,
    /// Process ID
    pub pid: u32,
    /// GPU memory used by the process (MiB)
    #[serde(rename = "used_memory")]
    pub used_memory_mib: f64,
    /// Process name or path
    pub name: String,
    /// Product name of the GPU
    #[serde(rename = "gpu_name")]
    pub device_name: String,
    /// PCI bus id of the GPU
    #[serde(rename = "gpu_bus_id")]
    pub device_bus_id: String,
}

impl ProcessSample {
    /// Case-insensitive substring match on the process name
    pub fn name_contains(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(&needle.to_lowercase())
    }
}

/// Hides desktop noise (display server, shell helpers) from the published list
///
/// This is a display filter only; the stress detector sees every process.
#[derive(Debug, Clone)]
pub struct ProcessFilter {
    hidden: Vec<String>,
}

impl ProcessFilter {
    /// Create a filter from name substrings
    pub fn new<I, S>(hidden: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hidden: hidden
                .into_iter()
                .map(|s| s.as_ref().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Whether a process should appear in the snapshot
    pub fn is_visible(&self, process: &ProcessSample) -> bool {
        let name = process.name.to_lowercase();
        !self.hidden.iter().any(|h| name.contains(h.as_str()))
    }

    /// Visible processes, in input order
    pub fn visible(&self, processes: &[ProcessSample]) -> Vec<ProcessSample> {
        processes
            .iter()
            .filter(|p| self.is_visible(p))
            .cloned()
            .collect()
    }
}

impl Default for ProcessFilter {
    fn default() -> Self {
        Self::new(["xorg", "shell"])
    }
}
