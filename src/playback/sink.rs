//! # Sink Processes
//!
//! The external playback program and the seam the supervisor uses to start it.
//!
//! ## Key Types:
//! - **SinkProcess**: a running sink with a writable input and a liveness check
//! - **SinkLauncher**: starts a new sink process
//! - **CommandLauncher**: the real launcher, backed by `tokio::process::Command`
//!
//! Only standard input is piped. Standard output and error stay attached to
//! this process's own streams, so whatever the sink prints ends up in our logs.

use crate::error::{SessionError, SessionResult};
use std::io;
use std::process::Stdio;
use tokio::io::AsyncWrite;
use tokio::process::{Child, ChildStdin, Command};
use tracing::debug;

/// A running sink program owned by exactly one supervisor.
pub trait SinkProcess: Send {
    /// The program's standard input.
    fn stdin(&mut self) -> &mut (dyn AsyncWrite + Unpin + Send);

    /// Non-blocking check whether the program has exited.
    fn has_exited(&mut self) -> io::Result<bool>;

    /// Ask the program to stop without waiting for it to do so.
    fn start_kill(&mut self) -> io::Result<()>;

    /// OS process id, if known. Used for logging only.
    fn id(&self) -> Option<u32>;
}

/// Starts sink programs.
pub trait SinkLauncher: Send + Sync {
    fn launch(&self) -> SessionResult<Box<dyn SinkProcess>>;
}

/// Launches the configured command with a piped standard input.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    argv: Vec<String>,
}

impl CommandLauncher {
    /// Create a launcher for an already split argument vector.
    ///
    /// ## Returns:
    /// - **Err(ProcessSpawn)**: the argument vector is empty
    pub fn new(argv: Vec<String>) -> SessionResult<Self> {
        if argv.is_empty() {
            return Err(SessionError::ProcessSpawn(
                "sink command line is empty".to_string(),
            ));
        }
        Ok(Self { argv })
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

impl SinkLauncher for CommandLauncher {
    fn launch(&self) -> SessionResult<Box<dyn SinkProcess>> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| SessionError::ProcessSpawn("sink command line is empty".to_string()))?;

        debug!(command = ?self.argv, "Running sink program");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| SessionError::ProcessSpawn(format!("{}: {}", program, e)))?;

        let stdin = child.stdin.take().ok_or_else(|| {
            SessionError::ProcessSpawn(format!("{}: standard input was not captured", program))
        })?;

        Ok(Box::new(ChildSink { child, stdin }))
    }
}

/// A sink program started by `CommandLauncher`.
///
/// Dropping it does not kill the program; a child that exits after being
/// dropped is reaped by tokio in the background.
struct ChildSink {
    child: Child,
    stdin: ChildStdin,
}

impl SinkProcess for ChildSink {
    fn stdin(&mut self) -> &mut (dyn AsyncWrite + Unpin + Send) {
        &mut self.stdin
    }

    fn has_exited(&mut self) -> io::Result<bool> {
        match self.child.try_wait()? {
            Some(status) => {
                debug!(pid = ?self.child.id(), %status, "Sink program exited");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn start_kill(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }

    fn id(&self) -> Option<u32> {
        self.child.id()
    }
}
