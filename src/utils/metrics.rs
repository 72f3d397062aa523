//! Observability and Metrics
//!
//! Relay counters: connections, frames per direction, dispatch outcomes and
//! the failures that degrade decoding.
//!
//! Uses atomic counters for thread-safe metrics collection.

use crate::protocol::dispatcher::Direction;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Global metrics collector for relay operations
#[derive(Debug)]
pub struct Metrics {
    /// Total client connections accepted
    pub connections_total: AtomicU64,
    /// Currently relayed connections
    pub connections_active: AtomicU64,
    /// Failed upstream connects and socket errors
    pub connection_errors: AtomicU64,
    /// Frames received from clients
    pub frames_from_client: AtomicU64,
    /// Frames received from servers
    pub frames_from_server: AtomicU64,
    /// Frames forwarded with their original bytes
    pub frames_forwarded: AtomicU64,
    /// Frames forwarded after re-encoding
    pub frames_rewritten: AtomicU64,
    /// Frames dropped by a handler or a decode failure
    pub frames_dropped: AtomicU64,
    /// Frames that failed to decode
    pub decode_errors: AtomicU64,
    /// Rewritten events that failed to encode
    pub encode_errors: AtomicU64,
    /// Client frames whose counter was not found in the keystream table
    pub counter_misses: AtomicU64,
    /// Total bytes received from either peer
    pub bytes_received: AtomicU64,
    /// Total bytes written to either peer
    pub bytes_sent: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            frames_from_client: AtomicU64::new(0),
            frames_from_server: AtomicU64::new(0),
            frames_forwarded: AtomicU64::new(0),
            frames_rewritten: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            encode_errors: AtomicU64::new(0),
            counter_misses: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new connection
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection closed
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an inbound frame
    pub fn frame_received(&self, direction: Direction, byte_count: u64) {
        match direction {
            Direction::FromClient => self.frames_from_client.fetch_add(1, Ordering::Relaxed),
            Direction::FromServer => self.frames_from_server.fetch_add(1, Ordering::Relaxed),
        };
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn frame_forwarded(&self) {
        self.frames_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_rewritten(&self) {
        self.frames_rewritten.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, byte_count: u64) {
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn encode_error(&self) {
        self.encode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counter_miss(&self) {
        self.counter_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            frames_from_client: self.frames_from_client.load(Ordering::Relaxed),
            frames_from_server: self.frames_from_server.load(Ordering::Relaxed),
            frames_forwarded: self.frames_forwarded.load(Ordering::Relaxed),
            frames_rewritten: self.frames_rewritten.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            encode_errors: self.encode_errors.load(Ordering::Relaxed),
            counter_misses: self.counter_misses.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            connection_errors = snapshot.connection_errors,
            frames_from_client = snapshot.frames_from_client,
            frames_from_server = snapshot.frames_from_server,
            frames_forwarded = snapshot.frames_forwarded,
            frames_rewritten = snapshot.frames_rewritten,
            frames_dropped = snapshot.frames_dropped,
            decode_errors = snapshot.decode_errors,
            encode_errors = snapshot.encode_errors,
            counter_misses = snapshot.counter_misses,
            bytes_received = snapshot.bytes_received,
            bytes_sent = snapshot.bytes_sent,
            uptime_seconds = snapshot.uptime_seconds,
            "Relay metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connection_errors: u64,
    pub frames_from_client: u64,
    pub frames_from_server: u64,
    pub frames_forwarded: u64,
    pub frames_rewritten: u64,
    pub frames_dropped: u64,
    pub decode_errors: u64,
    pub encode_errors: u64,
    pub counter_misses: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub uptime_seconds: u64,
}

/// Global metrics instance
static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Initialize metrics collection (call once at startup)
pub fn init_metrics() {
    let _ = global_metrics();
    info!("Metrics collection initialized");
}

/// Logs how long an operation took when dropped
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        debug!(
            operation = self.operation,
            duration_us = self.start.elapsed().as_micros() as u64,
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_counters_split_by_direction() {
        let metrics = Metrics::new();
        metrics.connection_established();
        metrics.frame_received(Direction::FromClient, 10);
        metrics.frame_received(Direction::FromServer, 20);
        metrics.frame_received(Direction::FromServer, 5);
        metrics.frame_dropped();
        metrics.connection_closed();

        let snap = metrics.snapshot();
        assert_eq!(snap.connections_total, 1);
        assert_eq!(snap.connections_active, 0);
        assert_eq!(snap.frames_from_client, 1);
        assert_eq!(snap.frames_from_server, 2);
        assert_eq!(snap.bytes_received, 35);
        assert_eq!(snap.frames_dropped, 1);
    }
}
