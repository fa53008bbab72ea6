//! # Error Handling
//!
//! Error types for a single client session. Every failure a session can run into
//! falls into one of a few categories, and the category decides what happens next:
//!
//! ## Error Categories:
//! - **Conversion**: the incoming chunk is malformed; only that event is dropped
//! - **ProcessSpawn**: the sink program could not be started; retried on the next event
//! - **SinkWrite**: the sink program went away mid-write; the chunk is lost
//! - **NoProcess**: a write was attempted with no live sink (caller bug)
//! - **Protocol**: an event could not be decoded; the connection keeps going
//! - **Transport**: the connection itself failed; the session ends
//!
//! Startup code (configuration, binding sockets) uses `anyhow` instead, since
//! nothing there needs to be matched on.

use std::fmt; // Display formatting
use std::io; // Connection I/O errors

/// Errors produced while handling events for one connection.
///
/// ## Rust Concepts:
/// - **enum with data**: each variant carries its own message, and `match` must cover all of them
/// - **Debug derive**: lets `{:?}` print the variant for logs and test failures
///
/// ## Usage Example:
/// ```rust
/// return Err(SessionError::Conversion("chunk is not frame aligned".to_string()));
/// ```
#[derive(Debug)]
pub enum SessionError {
    /// Audio chunk is malformed for its declared format
    Conversion(String),

    /// Sink executable missing, not executable, or the spawn call failed
    ProcessSpawn(String),

    /// Broken pipe or sink exited while bytes were being written
    SinkWrite(String),

    /// `write` was called without a running sink process
    NoProcess,

    /// Event frame decoded but its contents are invalid
    Protocol(String),

    /// Connection-level failure (read, write, or framing)
    Transport(String),
}

impl SessionError {
    /// Whether this error ends the session.
    ///
    /// Only connection-level failures are fatal. Everything else aborts the
    /// event that triggered it and the session moves on to the next event.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Transport(_))
    }

    /// Short machine-readable name, used as a structured logging field.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Conversion(_) => "conversion_error",
            SessionError::ProcessSpawn(_) => "process_spawn_error",
            SessionError::SinkWrite(_) => "sink_write_error",
            SessionError::NoProcess => "no_process",
            SessionError::Protocol(_) => "protocol_error",
            SessionError::Transport(_) => "transport_error",
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Conversion(msg) => write!(f, "Conversion error: {}", msg),
            SessionError::ProcessSpawn(msg) => write!(f, "Failed to start sink program: {}", msg),
            SessionError::SinkWrite(msg) => write!(f, "Failed to write to sink program: {}", msg),
            SessionError::NoProcess => write!(f, "No sink program is running"),
            SessionError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            SessionError::Transport(msg) => write!(f, "Transport error: {}", msg),
        }
    }
}

// Lets `SessionError` flow into `anyhow::Error` and `Box<dyn Error>`
impl std::error::Error for SessionError {}

/// I/O errors reaching this conversion come from the connection, never the sink:
/// the supervisor maps its own pipe errors to `SinkWrite` explicitly.
impl From<io::Error> for SessionError {
    fn from(err: io::Error) -> Self {
        SessionError::Transport(err.to_string())
    }
}

/// JSON errors mean an event carried data we could not make sense of.
impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Protocol(format!("invalid event data: {}", err))
    }
}

/// Shorthand for `Result<T, SessionError>`.
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_errors_are_fatal() {
        assert!(SessionError::Transport("reset".to_string()).is_fatal());
        assert!(!SessionError::Conversion("odd length".to_string()).is_fatal());
        assert!(!SessionError::ProcessSpawn("not found".to_string()).is_fatal());
        assert!(!SessionError::SinkWrite("broken pipe".to_string()).is_fatal());
        assert!(!SessionError::NoProcess.is_fatal());
        assert!(!SessionError::Protocol("bad data".to_string()).is_fatal());
    }

    #[test]
    fn test_io_errors_become_transport_errors() {
        let err: SessionError = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert_eq!(err.kind(), "transport_error");
        assert!(err.to_string().contains("eof"));
    }
}
