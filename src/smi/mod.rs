//! nvidia-smi sampling
//!
//! The engine never spawns processes itself: it asks an [`SmiSource`] for the
//! raw text of each query. [`NvidiaSmi`] is the real subprocess-backed source;
//! tests substitute canned output.
//!
//! A cycle issues four queries (driver version, banner, devices, processes).
//! Tool failures degrade to empty output so the cycle still produces a
//! snapshot; see [`sample`].

pub mod command;
pub mod parser;

pub use command::NvidiaSmi;

use crate::error::Result;

/// Device query columns, in the order the parser expects them
pub const DEVICE_FIELDS: &str = "index,name,fan.speed,power.draw,memory.total,memory.used,\
utilization.gpu,temperature.gpu,compute_mode,power.limit";

/// Process query columns, in the order the parser expects them
pub const PROCESS_FIELDS: &str = "gpu_uuid,pid,used_memory,name,gpu_name,gpu_bus_id";

/// CSV output without header or units
pub const CSV_FORMAT: &str = "--format=csv,noheader,nounits";

/// A single nvidia-smi invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Query {
    /// `--query-gpu=driver_version`
    DriverVersion,
    /// Plain `nvidia-smi` banner (carries the CUDA version)
    Banner,
    /// Per-device metrics
    Devices,
    /// Per-process metrics
    Processes,
}

impl Query {
    /// Command-line arguments for this query
    pub fn args(&self) -> Vec<String> {
        match self {
            Query::DriverVersion => vec![
                "--query-gpu=driver_version".to_string(),
                CSV_FORMAT.to_string(),
            ],
            Query::Banner => Vec::new(),
            Query::Devices => vec![
                format!("--query-gpu={}", DEVICE_FIELDS),
                CSV_FORMAT.to_string(),
            ],
            Query::Processes => vec![
                format!("--query-compute-apps={}", PROCESS_FIELDS),
                CSV_FORMAT.to_string(),
            ],
        }
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Query::DriverVersion => write!(f, "driver version"),
            Query::Banner => write!(f, "banner"),
            Query::Devices => write!(f, "devices"),
            Query::Processes => write!(f, "processes"),
        }
    }
}

/// Source of raw nvidia-smi output
pub trait SmiSource: Send {
    /// Run one query and return its stdout
    ///
    /// A missing tool, non-zero exit or timeout is reported as
    /// [`crate::Error::ToolUnavailable`].
    fn query(&self, query: Query) -> Result<String>;
}

impl<S: SmiSource + Sync + ?Sized> SmiSource for std::sync::Arc<S> {
    fn query(&self, query: Query) -> Result<String> {
        (**self).query(query)
    }
}

impl<S: SmiSource + ?Sized> SmiSource for Box<S> {
    fn query(&self, query: Query) -> Result<String> {
        (**self).query(query)
    }
}

/// Output of one query; `error` is set when the text was degraded to empty
#[derive(Debug, Default)]
pub struct RawOutput {
    pub text: String,
    pub error: Option<String>,
}

impl RawOutput {
    fn from_result(query: Query, result: Result<String>) -> Result<Self> {
        match result {
            Ok(text) => {
                log::debug!("nvidia-smi {} output: {:?}", query, text);
                Ok(Self { text, error: None })
            }
            Err(e) if e.is_degradable() => {
                log::warn!("nvidia-smi {} query failed: {}", query, e);
                Ok(Self {
                    text: String::new(),
                    error: Some(e.to_string()),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Whether the query produced output
    pub fn is_available(&self) -> bool {
        self.error.is_none()
    }
}

/// Raw text of every query in one cycle
#[derive(Debug, Default)]
pub struct RawSample {
    pub driver: RawOutput,
    pub banner: RawOutput,
    pub devices: RawOutput,
    pub processes: RawOutput,
}

/// Run every query once
///
/// Degradable failures become empty output; anything else aborts the cycle.
pub fn sample<S: SmiSource + ?Sized>(source: &S) -> Result<RawSample> {
    Ok(RawSample {
        driver: RawOutput::from_result(Query::DriverVersion, source.query(Query::DriverVersion))?,
        banner: RawOutput::from_result(Query::Banner, source.query(Query::Banner))?,
        devices: RawOutput::from_result(Query::Devices, source.query(Query::Devices))?,
        processes: RawOutput::from_result(Query::Processes, source.query(Query::Processes))?,
    })
}

/// Canned output for tests
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use crate::error::Error;
    use std::sync::Mutex;

    /// Replays fixed text per query; a missing entry behaves like an absent tool
    #[derive(Default)]
    pub struct FakeSmi {
        outputs: Mutex<std::collections::HashMap<Query, Result<String>>>,
    }

    impl FakeSmi {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(self, query: Query, text: &str) -> Self {
            self.set(query, text);
            self
        }

        pub fn set(&self, query: Query, text: &str) {
            self.outputs
                .lock()
                .unwrap()
                .insert(query, Ok(text.to_string()));
        }

        pub fn fail(&self, query: Query, err: Error) {
            self.outputs.lock().unwrap().insert(query, Err(err));
        }
    }

    impl SmiSource for FakeSmi {
        fn query(&self, query: Query) -> Result<String> {
            match self.outputs.lock().unwrap().get(&query) {
                Some(Ok(text)) => Ok(text.clone()),
                Some(Err(Error::Internal(msg))) => Err(Error::Internal(msg.clone())),
                Some(Err(e)) => Err(Error::ToolUnavailable(e.to_string())),
                None => Err(Error::ToolUnavailable("nvidia-smi: not found".to_string())),
            }
        }
    }
}
