//! # Playback Module
//!
//! Everything needed to get converted audio into the external sink program.
//!
//! ## Key Components:
//! - **Command splitting**: turns the configured command line into an argv
//! - **Sink processes**: the launcher seam and the real `tokio::process` launcher
//! - **Supervisor**: lazy start, liveness check, backpressured writes, termination

pub mod command; // Shell-style command line splitting
pub mod sink; // SinkProcess / SinkLauncher and the real child process launcher
pub mod supervisor; // Per-session sink lifecycle

#[cfg(test)]
pub mod testing; // Recording fake sink for tests
