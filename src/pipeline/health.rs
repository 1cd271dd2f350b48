//! Health counters of a capture session

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-session counters, updated from the capture and control threads.
#[derive(Debug, Default)]
pub struct SessionHealth {
    /// Frames delivered by the capturer
    pub frames_received: AtomicU64,

    /// Frames handed to the video encoder
    pub frames_queued: AtomicU64,

    /// Still frames posted to the client
    pub frames_delivered: AtomicU64,

    /// Still frames dropped because too many were unacknowledged
    pub frame_drops: AtomicU64,

    /// Frames that failed to encode
    pub encode_failures: AtomicU64,

    /// Total size of the posted still frames (base64)
    pub bytes_delivered: AtomicU64,
}

impl SessionHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queued(&self) {
        self.frames_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, size: usize) {
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
        self.bytes_delivered.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn record_frame_drop(&self) {
        self.frame_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_encode_failure(&self) {
        self.encode_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Percentage of received frames that were dropped.
    pub fn frame_drop_rate(&self) -> f64 {
        let drops = self.frame_drops.load(Ordering::Relaxed);
        let received = self.frames_received.load(Ordering::Relaxed);
        if received == 0 {
            return 0.0;
        }
        (drops as f64 / received as f64) * 100.0
    }

    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_queued: self.frames_queued.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frame_drops: self.frame_drops.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
            frame_drop_rate: self.frame_drop_rate(),
        }
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSummary {
    pub frames_received: u64,
    pub frames_queued: u64,
    pub frames_delivered: u64,
    pub frame_drops: u64,
    pub encode_failures: u64,
    pub bytes_delivered: u64,
    pub frame_drop_rate: f64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} frames received, {} queued for encoding, {} delivered ({} drops, {:.2}%), {} encode failures, {} bytes",
            self.frames_received,
            self.frames_queued,
            self.frames_delivered,
            self.frame_drops,
            self.frame_drop_rate,
            self.encode_failures,
            self.bytes_delivered
        )
    }
}
