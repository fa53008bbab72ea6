//! # Client Session
//!
//! One `Session` per client connection. It reads events one at a time, turns
//! them into converter and supervisor calls, and answers `audio-stop` with
//! `played`.
//!
//! ## Event Handling:
//! - **audio-start**: make sure the sink program is running
//! - **audio-chunk**: make sure the sink is running, convert, write (an
//!   implicit start if no `audio-start` came first)
//! - **audio-stop**: send `played`; the sink keeps running for the next stream
//! - **anything else**: ignored
//!
//! ## Error Handling:
//! - Per-event errors (conversion, spawn, sink write, bad event data) are
//!   logged and counted; the session goes on with the next event
//! - Transport errors end the session
//!
//! Whichever way the session ends (client closed, transport error, server
//! shutdown) the sink is terminated exactly once.

use crate::audio::converter::ChunkConverter;
use crate::audio::format::AudioChunk;
use crate::error::SessionResult;
use crate::playback::supervisor::PlaybackSupervisor;
use crate::protocol::codec::{read_frame, write_frame};
use crate::protocol::event::Event;
use crate::server::shutdown_requested;
use crate::state::ServerState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument, Span};

/// Per-connection counters, logged when the client disconnects.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub connected_at: DateTime<Utc>,
    pub events: u64,
    pub chunks: u64,
    pub bytes_written: u64,
    pub played_sent: u64,
    pub errors: u64,
}

impl SessionStats {
    fn new() -> Self {
        Self {
            connected_at: Utc::now(),
            events: 0,
            chunks: 0,
            bytes_written: 0,
            played_sent: 0,
            errors: 0,
        }
    }
}

pub struct Session {
    client_id: u64,
    converter: ChunkConverter,
    supervisor: PlaybackSupervisor,
    state: ServerState,
    /// Most frames handed to the sink in one write
    samples_per_chunk: usize,
    stats: SessionStats,
    /// Between audio-start (or an implicit start) and audio-stop
    streaming: bool,
    span: Span,
}

impl Session {
    /// ## Parameters:
    /// - **client_id**: unique id for this connection, used in logs
    /// - **converter**: converts to the configured sink format
    /// - **supervisor**: a fresh supervisor with no process yet
    /// - **state**: shared counters and configuration
    /// - **span**: span all of this session's work runs in
    pub fn new(
        client_id: u64,
        converter: ChunkConverter,
        supervisor: PlaybackSupervisor,
        state: ServerState,
        span: Span,
    ) -> Self {
        let samples_per_chunk = state.config().sink.samples_per_chunk.max(1);
        Self {
            client_id,
            converter,
            supervisor,
            state,
            samples_per_chunk,
            stats: SessionStats::new(),
            streaming: false,
            span,
        }
    }

    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Serve the connection until the client leaves, the transport fails, or
    /// shutdown is signalled.
    pub async fn run<R, W>(self, reader: R, writer: W, shutdown: watch::Receiver<bool>)
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let span = self.span.clone();
        self.serve(reader, writer, shutdown).instrument(span).await
    }

    async fn serve<R, W>(mut self, mut reader: R, mut writer: W, mut shutdown: watch::Receiver<bool>)
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.state.session_started();
        info!(format = %self.converter.target(), "Client connected");

        loop {
            // A write suspended on a full pipe is abandoned when shutdown wins.
            let step = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => {
                    debug!("Server is shutting down");
                    break;
                }
                step = self.next_event(&mut reader, &mut writer) => step,
            };

            match step {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Client closed the connection");
                    break;
                }
                Err(err) if err.is_fatal() => {
                    warn!(error = %err, "Connection failed");
                    break;
                }
                Err(err) => {
                    self.stats.errors += 1;
                    self.state.record_error();
                    warn!(kind = err.kind(), error = %err, "Event failed");
                }
            }
        }

        self.disconnected();
    }

    /// Read and handle one event. `Ok(false)` means the client closed the connection.
    async fn next_event<R, W>(&mut self, reader: &mut R, writer: &mut W) -> SessionResult<bool>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let Some(frame) = read_frame(reader).await? else {
            return Ok(false);
        };
        let event = Event::from_frame(frame)?;
        self.handle_event(event, writer).await?;
        Ok(true)
    }

    /// Handle one decoded event, writing any reply to `writer`.
    ///
    /// ## Errors:
    /// - **ProcessSpawn**: the sink program could not be started (retried on the next event)
    /// - **Conversion**: the chunk was malformed; nothing was written
    /// - **SinkWrite**: the sink went away; the chunk is dropped
    /// - **Transport**: `played` could not be sent
    pub async fn handle_event<W>(&mut self, event: Event, writer: &mut W) -> SessionResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        self.stats.events += 1;

        match event {
            Event::AudioStart(start) => {
                debug!(rate = ?start.rate, width = ?start.width, channels = ?start.channels, "Audio started");
                self.streaming = true;
                self.ensure_sink()?;
            }
            Event::AudioChunk(chunk) => {
                if !self.streaming {
                    debug!("Audio chunk without audio-start, starting implicitly");
                    self.streaming = true;
                }
                self.ensure_sink()?;
                self.play_chunk(chunk).await?;
            }
            Event::AudioStop(_) => {
                self.streaming = false;
                let played = Event::Played.into_frame()?;
                write_frame(writer, &played).await?;
                self.stats.played_sent += 1;
                debug!(sink = ?self.supervisor.state(), "Audio stopped, sent played");
            }
            other => debug!(kind = other.kind(), "Ignoring event"),
        }

        Ok(())
    }

    fn ensure_sink(&mut self) -> SessionResult<()> {
        if self.supervisor.ensure_running()? {
            self.state.record_spawn();
        }
        Ok(())
    }

    async fn play_chunk(&mut self, chunk: AudioChunk) -> SessionResult<()> {
        let source = chunk.format;
        let converted = self.converter.convert(chunk)?;
        if source != converted.format {
            debug!(
                from = %source,
                to = %converted.format,
                frames = converted.frame_count(),
                "Converted chunk"
            );
        }

        let slice_len = self.samples_per_chunk * converted.format.frame_size().max(1);
        for slice in converted.audio.chunks(slice_len) {
            self.supervisor.write(slice).await?;
        }

        self.stats.chunks += 1;
        self.stats.bytes_written += converted.audio.len() as u64;
        self.state.record_chunk(converted.audio.len());
        Ok(())
    }

    fn disconnected(&mut self) {
        self.supervisor.terminate();
        self.state.session_ended();

        let stats = self.stats();
        let connected_for = Utc::now() - stats.connected_at;
        info!(
            events = stats.events,
            chunks = stats.chunks,
            bytes = stats.bytes_written,
            played = stats.played_sent,
            errors = stats.errors,
            spawns = self.supervisor.spawn_count(),
            duration_ms = connected_for.num_milliseconds(),
            "Client disconnected"
        );
    }
}
