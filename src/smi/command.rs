//! Subprocess-backed nvidia-smi source

use super::{Query, SmiSource};
use crate::config::SamplerConfig;
use crate::error::{Error, Result};
use std::io::{self, Read};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_STEP: Duration = Duration::from_millis(10);

/// Runs the real `nvidia-smi` binary with a bounded wall-clock timeout
#[derive(Debug, Clone)]
pub struct NvidiaSmi {
    binary: String,
    timeout: Duration,
}

impl NvidiaSmi {
    /// Create a source for `binary` killing each invocation after `timeout`
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// Create a source from the `[sampler]` config section
    pub fn from_config(config: &SamplerConfig) -> Self {
        Self::new(config.binary.clone(), Duration::from_millis(config.timeout_ms))
    }

    /// Binary this source invokes
    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn run(&self, args: &[String]) -> Result<String> {
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::ToolUnavailable(format!("{}: {}", self.binary, e)))?;

        // Drain both pipes concurrently so a chatty child cannot block on a full buffer
        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::ToolUnavailable(format!(
                        "{} timed out after {} ms",
                        self.binary,
                        self.timeout.as_millis()
                    )));
                }
                Ok(None) => thread::sleep(POLL_STEP),
                Err(e) => {
                    let _ = child.kill();
                    return Err(Error::ToolUnavailable(format!(
                        "{}: wait failed: {}",
                        self.binary, e
                    )));
                }
            }
        };

        let out = join_reader(&self.binary, stdout)?;
        let err = join_reader(&self.binary, stderr).unwrap_or_else(|e| {
            log::debug!("{}", e);
            String::new()
        });

        if !err.trim().is_empty() {
            log::debug!("{} stderr: {}", self.binary, err.trim());
        }

        if !status.success() {
            return Err(Error::ToolUnavailable(format!(
                "{} exited with {}: {}",
                self.binary,
                status,
                err.trim()
            )));
        }

        Ok(out)
    }
}

impl Default for NvidiaSmi {
    fn default() -> Self {
        Self::from_config(&SamplerConfig::default())
    }
}

impl SmiSource for NvidiaSmi {
    fn query(&self, query: Query) -> Result<String> {
        self.run(&query.args())
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<io::Result<String>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    })
}

/// Collect a reader's output; a failed or panicked read yields no usable text
fn join_reader(binary: &str, handle: Option<JoinHandle<io::Result<String>>>) -> Result<String> {
    let Some(handle) = handle else {
        return Ok(String::new());
    };
    match handle.join() {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => {
            log::debug!("{} pipe read failed: {}", binary, e);
            Err(Error::ToolUnavailable(format!("{}: read failed: {}", binary, e)))
        }
        Err(_) => {
            log::debug!("{} pipe reader panicked", binary);
            Err(Error::ToolUnavailable(format!("{}: pipe reader panicked", binary)))
        }
    }
}
