//! # Playback Process Supervisor
//!
//! Owns the lifecycle of at most one sink process for a session.
//!
//! ## States:
//! - **NoProcess**: nothing running (initial state, and after exit or terminate)
//! - **Running**: a sink was started and has not been seen to exit
//!
//! ## Transitions:
//! - `ensure_running` in NoProcess (or with an exited process) spawns → Running
//! - `ensure_running` in Running is a no-op
//! - a failed `write` → NoProcess
//! - `terminate` → NoProcess (no-op when already there)
//!
//! Process exit is only noticed lazily, the next time `ensure_running` checks.
//! Nothing here waits for a process to finish; termination is fire-and-forget.

use crate::error::{SessionError, SessionResult};
use crate::playback::sink::{SinkLauncher, SinkProcess};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Supervisor state as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NoProcess,
    Running,
}

/// Starts, feeds and stops the sink program for one session.
///
/// ## Ownership:
/// The sink's input pipe is only ever written through `write`, which takes
/// `&mut self`, so bytes from one session can never interleave.
pub struct PlaybackSupervisor {
    launcher: Arc<dyn SinkLauncher>,
    process: Option<Box<dyn SinkProcess>>,
    spawn_count: u64,
}

impl PlaybackSupervisor {
    pub fn new(launcher: Arc<dyn SinkLauncher>) -> Self {
        Self {
            launcher,
            process: None,
            spawn_count: 0,
        }
    }

    pub fn state(&self) -> SupervisorState {
        if self.process.is_some() {
            SupervisorState::Running
        } else {
            SupervisorState::NoProcess
        }
    }

    /// Number of sink processes started over this supervisor's lifetime.
    pub fn spawn_count(&self) -> u64 {
        self.spawn_count
    }

    /// Make sure a sink process is running, starting one if needed.
    ///
    /// ## Returns:
    /// - **Ok(true)**: a new process was started
    /// - **Ok(false)**: a process was already running
    /// - **Err(ProcessSpawn)**: starting the program failed; state stays NoProcess
    pub fn ensure_running(&mut self) -> SessionResult<bool> {
        if let Some(process) = self.process.as_mut() {
            match process.has_exited() {
                Ok(false) => return Ok(false),
                Ok(true) => debug!("Sink program is no longer running"),
                Err(err) => {
                    warn!(error = %err, "Could not check sink program status, replacing it");
                    let _ = process.start_kill();
                }
            }
            self.process = None;
        }

        let process = self.launcher.launch()?;
        info!(pid = ?process.id(), "Started sink program");

        self.process = Some(process);
        self.spawn_count += 1;
        Ok(true)
    }

    /// Write bytes to the sink, waiting while its input pipe is full.
    ///
    /// ## Errors:
    /// - **NoProcess**: called without a running process (call `ensure_running` first)
    /// - **SinkWrite**: the pipe broke; the process is dropped and state becomes NoProcess
    pub async fn write(&mut self, bytes: &[u8]) -> SessionResult<()> {
        let process = self.process.as_mut().ok_or(SessionError::NoProcess)?;

        let stdin = process.stdin();
        let result = match stdin.write_all(bytes).await {
            Ok(()) => stdin.flush().await,
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            if let Some(mut process) = self.process.take() {
                warn!(pid = ?process.id(), error = %err, "Sink program stopped accepting audio");
                let _ = process.start_kill();
            }
            return Err(SessionError::SinkWrite(err.to_string()));
        }

        Ok(())
    }

    /// Stop the sink process, if any, without waiting for it to exit.
    ///
    /// Never fails: a process that already exited is simply forgotten.
    pub fn terminate(&mut self) {
        if let Some(mut process) = self.process.take() {
            debug!(pid = ?process.id(), "Stopping sink program");
            if let Err(err) = process.start_kill() {
                debug!(error = %err, "Sink program was already gone");
            }
        }
    }
}

impl Drop for PlaybackSupervisor {
    fn drop(&mut self) {
        self.terminate();
    }
}
