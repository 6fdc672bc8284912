//! Scoped wrapper around external segmenter/encoder processes.
//!
//! Acquisition and release are paired on every exit path: `terminate`
//! closes the input pipe, waits out a grace period, and force-kills on
//! timeout, while `kill_on_drop` covers panics and cancellation.

use crate::error::PipelineError;
use anyhow::{Context, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }
}

#[derive(Debug)]
pub struct ExternalProcess {
    program: String,
    child: Child,
    stdin: Option<ChildStdin>,
}

impl ExternalProcess {
    pub fn spawn(spec: &ProcessSpec) -> Result<Self> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", spec.program))?;
        let stdin = child.stdin.take();
        info!(program = %spec.program, "external process spawned");
        Ok(Self { program: spec.program.clone(), child, stdin })
    }

    /// Liveness is determined by the process itself, not by pipe success.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Write one raw frame to the process input pipe.
    ///
    /// A dead process surfaces as [`PipelineError::ProcessDead`]; callers
    /// handle it by restart-with-backoff inside their own loop.
    pub async fn write_frame(&mut self, bytes: &[u8]) -> Result<(), PipelineError> {
        if !self.is_alive() {
            return Err(PipelineError::ProcessDead(self.program.clone()));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| PipelineError::ProcessDead(self.program.clone()))?;
        stdin
            .write_all(bytes)
            .await
            .map_err(|_| PipelineError::ProcessDead(self.program.clone()))?;
        Ok(())
    }

    /// Graceful shutdown: close the input pipe, wait up to `grace`, then
    /// force-kill.
    pub async fn terminate(mut self, grace: Duration) {
        drop(self.stdin.take());
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(_) => info!(program = %self.program, "external process exited"),
            Err(_) => {
                warn!(program = %self.program, "external process did not exit in time, killing");
                let _ = self.child.start_kill();
                let _ = self.child.wait().await;
            }
        }
    }
}
