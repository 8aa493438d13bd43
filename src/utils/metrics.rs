//! Observability and Metrics
//!
//! Per-messenger counters for frames, bytes, dropped data and context churn.
//!
//! Uses atomic counters so the receive task, handler tasks and timers can all
//! record without locking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Metrics collector for one messenger
#[derive(Debug)]
pub struct Metrics {
    /// Frames written to the socket
    pub frames_sent: AtomicU64,
    /// Frames decoded from the socket
    pub frames_received: AtomicU64,
    /// Bytes written to the socket
    pub bytes_sent: AtomicU64,
    /// Bytes read from the socket
    pub bytes_received: AtomicU64,
    /// Resynchronizations after a bad delimiter, size or checksum
    pub corrupt_frames: AtomicU64,
    /// Intact frames whose body could not be decoded
    pub rejected_frames: AtomicU64,
    /// Reassembly buffer overflows
    pub buffer_overflows: AtomicU64,
    /// Handlers that returned an error or panicked
    pub handler_errors: AtomicU64,
    /// Contexts created by the registry
    pub contexts_created: AtomicU64,
    /// Contexts removed by the custodian
    pub contexts_evicted: AtomicU64,
    /// Keep-alive pings sent
    pub keepalives_sent: AtomicU64,
    /// Keep-alive pings answered
    pub keepalives_replied: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            corrupt_frames: AtomicU64::new(0),
            rejected_frames: AtomicU64::new(0),
            buffer_overflows: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
            contexts_created: AtomicU64::new(0),
            contexts_evicted: AtomicU64::new(0),
            keepalives_sent: AtomicU64::new(0),
            keepalives_replied: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a frame sent
    pub fn frame_sent(&self, byte_count: u64) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a decoded frame
    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a datagram read from the socket
    pub fn bytes_read(&self, byte_count: u64) {
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn corrupt_frame(&self) {
        self.corrupt_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rejected_frame(&self) {
        self.rejected_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn buffer_overflow(&self) {
        self.buffer_overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn context_created(&self) {
        self.contexts_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn contexts_evicted(&self, count: u64) {
        self.contexts_evicted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn keepalive_sent(&self) {
        self.keepalives_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn keepalive_replied(&self) {
        self.keepalives_replied.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            corrupt_frames: self.corrupt_frames.load(Ordering::Relaxed),
            rejected_frames: self.rejected_frames.load(Ordering::Relaxed),
            buffer_overflows: self.buffer_overflows.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            contexts_created: self.contexts_created.load(Ordering::Relaxed),
            contexts_evicted: self.contexts_evicted.load(Ordering::Relaxed),
            keepalives_sent: self.keepalives_sent.load(Ordering::Relaxed),
            keepalives_replied: self.keepalives_replied.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_summary(&self) {
        let snapshot = self.snapshot();
        info!(
            frames_sent = snapshot.frames_sent,
            frames_received = snapshot.frames_received,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            corrupt_frames = snapshot.corrupt_frames,
            rejected_frames = snapshot.rejected_frames,
            buffer_overflows = snapshot.buffer_overflows,
            handler_errors = snapshot.handler_errors,
            contexts_created = snapshot.contexts_created,
            contexts_evicted = snapshot.contexts_evicted,
            keepalives_sent = snapshot.keepalives_sent,
            keepalives_replied = snapshot.keepalives_replied,
            uptime_seconds = snapshot.uptime_seconds,
            "Messenger metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub corrupt_frames: u64,
    pub rejected_frames: u64,
    pub buffer_overflows: u64,
    pub handler_errors: u64,
    pub contexts_created: u64,
    pub contexts_evicted: u64,
    pub keepalives_sent: u64,
    pub keepalives_replied: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}
