//! # Server State
//!
//! State shared by every client session: the loaded configuration and a small
//! set of service counters.
//!
//! ## Sharing Pattern:
//! - **Arc<AppConfig>**: configuration is fixed after startup, so it is shared read-only
//! - **Arc<RwLock<ServerMetrics>>**: counters are updated by many sessions at once
//! - **Instant**: start time for uptime, never changes
//!
//! Sessions never share sink processes or conversion state through here; this
//! is bookkeeping only.

use crate::config::AppConfig; // Loaded configuration
use serde::Serialize; // Snapshot is logged as JSON
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard}; // Shared, lockable counters
use std::time::Instant; // Monotonic clock for uptime

/// State handed to every session.
///
/// ## Rust Concepts:
/// - **Clone**: cloning copies three pointers, not the config or the counters
/// - **RwLock**: many readers or one writer; each update holds the lock briefly
#[derive(Debug, Clone)]
pub struct ServerState {
    pub config: Arc<AppConfig>,
    pub metrics: Arc<RwLock<ServerMetrics>>,
    pub start_time: Instant,
}

/// Counters collected across all sessions since startup.
///
/// ## Fields:
/// - `sessions_started`: connections accepted
/// - `active_sessions`: connections currently open
/// - `chunks_forwarded` / `bytes_forwarded`: converted audio written to sinks
/// - `sink_spawns`: sink processes launched
/// - `event_errors`: non-fatal errors reported by sessions
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ServerMetrics {
    pub sessions_started: u64,
    pub active_sessions: u32,
    pub chunks_forwarded: u64,
    pub bytes_forwarded: u64,
    pub sink_spawns: u64,
    pub event_errors: u64,
}

/// Point-in-time copy of the counters, logged at shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    #[serde(flatten)]
    pub metrics: ServerMetrics,
}

impl ServerState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(ServerMetrics::default())),
            start_time: Instant::now(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// A new client connected.
    pub fn session_started(&self) {
        let mut metrics = self.write_metrics();
        metrics.sessions_started += 1;
        metrics.active_sessions += 1;
    }

    /// A client disconnected. Never goes below zero.
    pub fn session_ended(&self) {
        let mut metrics = self.write_metrics();
        // Guard against underflow if a session is torn down twice
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    /// A converted chunk of `bytes` length reached a sink.
    pub fn record_chunk(&self, bytes: usize) {
        let mut metrics = self.write_metrics();
        metrics.chunks_forwarded += 1;
        metrics.bytes_forwarded += bytes as u64;
    }

    /// A sink process was launched (first audio, or after the previous one died).
    pub fn record_spawn(&self) {
        self.write_metrics().sink_spawns += 1;
    }

    pub fn record_error(&self) {
        self.write_metrics().event_errors += 1;
    }

    /// Copy the counters out so the lock is released before serializing.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_seconds: self.uptime_seconds(),
            metrics: self.read_metrics().clone(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    // Poisoned locks are used as-is; the counters stay meaningful after a panic.
    fn read_metrics(&self) -> RwLockReadGuard<'_, ServerMetrics> {
        self.metrics.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_metrics(&self) -> RwLockWriteGuard<'_, ServerMetrics> {
        self.metrics.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_counters() {
        let state = ServerState::new(AppConfig::default());
        state.session_started();
        state.session_started();
        state.session_ended();

        let snapshot = state.snapshot();
        assert_eq!(snapshot.metrics.sessions_started, 2);
        assert_eq!(snapshot.metrics.active_sessions, 1);
    }

    #[test]
    fn test_active_sessions_never_underflow() {
        let state = ServerState::new(AppConfig::default());
        state.session_ended();
        assert_eq!(state.snapshot().metrics.active_sessions, 0);
    }

    #[test]
    fn test_chunk_and_error_counters() {
        let state = ServerState::new(AppConfig::default());
        state.record_chunk(12);
        state.record_chunk(20);
        state.record_spawn();
        state.record_error();

        let metrics = state.snapshot().metrics;
        assert_eq!(metrics.chunks_forwarded, 2);
        assert_eq!(metrics.bytes_forwarded, 32);
        assert_eq!(metrics.sink_spawns, 1);
        assert_eq!(metrics.event_errors, 1);
    }

    #[test]
    fn test_snapshot_serializes_flat() {
        let state = ServerState::new(AppConfig::default());
        state.session_started();

        let json = serde_json::to_value(state.snapshot()).unwrap();
        assert_eq!(json["sessions_started"], 1);
        assert!(json.get("uptime_seconds").is_some());
    }

    #[test]
    fn test_clones_share_counters() {
        let state = ServerState::new(AppConfig::default());
        let other = state.clone();
        other.record_spawn();
        assert_eq!(state.snapshot().metrics.sink_spawns, 1);
    }
}
