//! # Server Loop
//!
//! Accepts client connections and runs one independent `Session` per
//! connection on its own task.
//!
//! ## Transports:
//! - `stdio://`: a single session over this process's stdin/stdout
//! - `tcp://host:port`: one session per TCP connection
//! - `unix://path`: one session per Unix socket connection (stale socket files are removed)
//!
//! ## Shutdown:
//! When the shutdown channel flips to `true` the listener stops accepting,
//! every live session is told to stop through its own receiver, and the
//! server waits for their tasks to finish.

use crate::audio::converter::ChunkConverter;
use crate::audio::format::AudioFormat;
use crate::playback::sink::SinkLauncher;
use crate::playback::supervisor::PlaybackSupervisor;
use crate::session::Session;
use crate::state::ServerState;
use anyhow::{Context, Result};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, info_span, warn};

/// Where the server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerUri {
    Stdio,
    /// `host:port`
    Tcp(String),
    Unix(PathBuf),
}

impl FromStr for ServerUri {
    type Err = anyhow::Error;

    fn from_str(uri: &str) -> Result<Self> {
        if uri == "stdio://" {
            return Ok(ServerUri::Stdio);
        }

        if let Some(address) = uri.strip_prefix("tcp://") {
            let (host, port) = address
                .rsplit_once(':')
                .ok_or_else(|| anyhow::anyhow!("TCP URI needs a port: {}", uri))?;
            if host.is_empty() {
                return Err(anyhow::anyhow!("TCP URI needs a host: {}", uri));
            }
            port.parse::<u16>()
                .with_context(|| format!("Invalid port in {}", uri))?;
            return Ok(ServerUri::Tcp(address.to_string()));
        }

        if let Some(path) = uri.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(anyhow::anyhow!("Unix URI needs a socket path: {}", uri));
            }
            return Ok(ServerUri::Unix(PathBuf::from(path)));
        }

        Err(anyhow::anyhow!(
            "Unsupported URI {:?} (expected stdio://, tcp://host:port or unix://path)",
            uri
        ))
    }
}

impl fmt::Display for ServerUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerUri::Stdio => write!(f, "stdio://"),
            ServerUri::Tcp(address) => write!(f, "tcp://{}", address),
            ServerUri::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Builds a fresh `Session` for every connection.
///
/// Nothing mutable is shared between the sessions it creates apart from the
/// server-wide counters in `ServerState`.
pub struct SessionFactory {
    state: ServerState,
    launcher: Arc<dyn SinkLauncher>,
    target: AudioFormat,
    clock: Instant,
    last_id: AtomicU64,
}

impl SessionFactory {
    pub fn new(state: ServerState, launcher: Arc<dyn SinkLauncher>) -> Self {
        let target = state.config().target_format();
        Self {
            state,
            launcher,
            target,
            clock: Instant::now(),
            last_id: AtomicU64::new(0),
        }
    }

    pub fn create(&self) -> Session {
        let client_id = self.next_client_id();
        Session::new(
            client_id,
            ChunkConverter::new(self.target),
            PlaybackSupervisor::new(Arc::clone(&self.launcher)),
            self.state.clone(),
            info_span!("session", client_id),
        )
    }

    /// Nanoseconds on a monotonic clock, bumped when two connections land on the same tick.
    fn next_client_id(&self) -> u64 {
        let now = u64::try_from(self.clock.elapsed().as_nanos()).unwrap_or(u64::MAX - 1);
        let previous = self
            .last_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(now.max(prev + 1))
            })
            .unwrap_or_else(|prev| prev);
        now.max(previous + 1)
    }
}

/// Resolves once shutdown has been requested. Never resolves if the sender is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Serve clients on `uri` until shutdown is requested (or, for stdio, the client leaves).
pub async fn run(
    uri: &ServerUri,
    factory: Arc<SessionFactory>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    match uri {
        ServerUri::Stdio => {
            info!("Serving a single client on stdin/stdout");
            let session = factory.create();
            session
                .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), shutdown)
                .await;
            Ok(())
        }
        ServerUri::Tcp(address) => {
            let listener = TcpListener::bind(address)
                .await
                .with_context(|| format!("Failed to bind {}", uri))?;
            info!(address = %listener.local_addr()?, "Listening on TCP");
            serve(listener, factory, shutdown).await;
            Ok(())
        }
        #[cfg(unix)]
        ServerUri::Unix(path) => {
            if tokio::fs::symlink_metadata(path).await.is_ok() {
                debug!(path = %path.display(), "Removing stale socket");
                tokio::fs::remove_file(path)
                    .await
                    .with_context(|| format!("Failed to remove stale socket {}", path.display()))?;
            }
            let listener = tokio::net::UnixListener::bind(path)
                .with_context(|| format!("Failed to bind {}", uri))?;
            info!(path = %path.display(), "Listening on Unix socket");
            serve(listener, factory, shutdown).await;

            if let Err(err) = tokio::fs::remove_file(path).await {
                debug!(error = %err, "Could not remove socket file");
            }
            Ok(())
        }
        #[cfg(not(unix))]
        ServerUri::Unix(_) => Err(anyhow::anyhow!(
            "Unix sockets are not supported on this platform"
        )),
    }
}

/// A listener that yields client streams.
trait Accept {
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    async fn accept_client(&self) -> io::Result<(Self::Stream, String)>;
}

impl Accept for TcpListener {
    type Stream = TcpStream;

    async fn accept_client(&self) -> io::Result<(TcpStream, String)> {
        let (stream, peer) = self.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, peer.to_string()))
    }
}

#[cfg(unix)]
impl Accept for tokio::net::UnixListener {
    type Stream = tokio::net::UnixStream;

    async fn accept_client(&self) -> io::Result<(tokio::net::UnixStream, String)> {
        let (stream, _) = self.accept().await?;
        Ok((stream, "unix".to_string()))
    }
}

async fn serve<L: Accept>(
    listener: L,
    factory: Arc<SessionFactory>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break,
            Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                log_finished(finished);
            }
            accepted = listener.accept_client() => match accepted {
                Ok((stream, peer)) => {
                    let session = factory.create();
                    debug!(client_id = session.client_id(), peer = %peer, "Accepted connection");
                    let (reader, writer) = tokio::io::split(stream);
                    sessions.spawn(session.run(BufReader::new(reader), writer, shutdown.clone()));
                }
                Err(err) => {
                    warn!(error = %err, "Failed to accept connection");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
        }
    }

    if !sessions.is_empty() {
        info!(sessions = sessions.len(), "Waiting for sessions to finish");
    }
    while let Some(finished) = sessions.join_next().await {
        log_finished(finished);
    }
}

fn log_finished(result: Result<(), JoinError>) {
    if let Err(err) = result {
        if err.is_panic() {
            error!(error = %err, "Session task panicked");
        }
    }
}
