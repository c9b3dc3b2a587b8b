//! Per-device temperature history
//!
//! Each device gets a fixed-capacity ring buffer of `(timestamp, temperature)`
//! samples, created the first time the device is seen. The default capacity of
//! 40 holds ten seconds of data at the dashboard's fastest polling rate (250ms).

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

/// Default samples kept per device
pub const DEFAULT_HISTORY_SIZE: usize = 40;

/// A single temperature reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureSample {
    /// Seconds since the Unix epoch
    pub timestamp: f64,
    /// Temperature (°C)
    pub temperature_c: f64,
}

/// Fixed-capacity FIFO buffer for time-series data
#[derive(Debug, Clone)]
pub struct HistoryBuffer<T: Clone> {
    data: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> HistoryBuffer<T> {
    /// Create a new history buffer with given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a new value, removing oldest if at capacity
    pub fn push(&mut self, value: T) {
        if self.capacity == 0 {
            return;
        }
        if self.data.len() >= self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(value);
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get number of values in buffer
    pub fn len(&self) -> usize {
        self.data.len()
    }
}

impl HistoryBuffer<TemperatureSample> {
    /// Samples with `timestamp >= since`, oldest first
    ///
    /// The iterator borrows the buffer, so calling this again restarts the scan.
    pub fn window(&self, since: f64) -> impl Iterator<Item = &TemperatureSample> + Clone {
        self.data.iter().filter(move |s| s.timestamp >= since)
    }
}

/// Temperature histories for every device seen so far
#[derive(Debug, Clone)]
pub struct TemperatureHistory {
    capacity: usize,
    devices: BTreeMap<u32, HistoryBuffer<TemperatureSample>>,
}

impl TemperatureHistory {
    /// Create an empty store whose buffers hold `capacity` samples
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            devices: BTreeMap::new(),
        }
    }

    /// Append a sample, creating the device's buffer on first use
    pub fn record(&mut self, device_index: u32, timestamp: f64, temperature_c: f64) {
        let capacity = self.capacity;
        self.devices
            .entry(device_index)
            .or_insert_with(|| HistoryBuffer::new(capacity))
            .push(TemperatureSample {
                timestamp,
                temperature_c,
            });
    }

    /// A device's buffer, if it has been observed
    pub fn get(&self, device_index: u32) -> Option<&HistoryBuffer<TemperatureSample>> {
        self.devices.get(&device_index)
    }

    /// Samples for a device with `timestamp >= since`, oldest first
    ///
    /// An unseen device yields an empty sequence.
    pub fn window(
        &self,
        device_index: u32,
        since: f64,
    ) -> impl Iterator<Item = &TemperatureSample> + Clone {
        self.devices
            .get(&device_index)
            .into_iter()
            .flat_map(move |buf| buf.window(since))
    }

    /// Drop a device's buffer
    pub fn remove(&mut self, device_index: u32) -> bool {
        self.devices.remove(&device_index).is_some()
    }

    /// Indices with a buffer, ascending
    pub fn devices(&self) -> impl Iterator<Item = u32> + '_ {
        self.devices.keys().copied()
    }
}

impl Default for TemperatureHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}
