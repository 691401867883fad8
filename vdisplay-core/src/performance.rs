//! Pipeline metrics and latency tracking
//!
//! Provides:
//! - Per-stage timing (staging, encode, transmit) as rolling averages
//! - Tracking delay (sample capture on the client to encode on the server)
//! - Frame, packet and drop counters

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Maximum number of samples to keep for rolling averages
const MAX_SAMPLES: usize = 120;

/// Metrics snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    /// Average staging (copy/composite) time in milliseconds
    pub stage_ms: f64,
    /// Average encode + send time in milliseconds
    pub encode_ms: f64,
    /// Average client sample → server encode delay in milliseconds
    pub tracking_delay_ms: f64,
    /// Average presentation → packet emission delay in milliseconds
    pub encoding_delay_ms: f64,
    /// Frames handed to the staging compositor
    pub frames_staged: u64,
    /// Frames that went through the encoder
    pub frames_encoded: u64,
    /// Frames lost to sync timeouts, stale tracking references or encode failures
    pub frames_dropped: u64,
    /// Frames whose packets went out after the vsync they were aimed at
    pub vsync_misses: u64,
    /// Packets handed to the transport
    pub packets_sent: u64,
    /// Bytes handed to the transport
    pub bytes_sent: u64,
    /// Seconds since the metrics were created or reset
    pub uptime_secs: f64,
}

impl PipelineStats {
    /// Format stats as a single line for periodic logging
    pub fn format_line(&self) -> String {
        format!(
            "Stage: {:.2}ms | Encode: {:.2}ms | Tracking: {:.1}ms | Frames: {} | Drops: {}",
            self.stage_ms, self.encode_ms, self.tracking_delay_ms, self.frames_encoded, self.frames_dropped
        )
    }

    /// Format stats as a multi-line summary
    pub fn format_detailed(&self) -> String {
        format!(
            "Latency: stage={:.2}ms encode={:.2}ms tracking={:.2}ms encoding={:.2}ms\n\
             Frames: staged={} encoded={} dropped={} late={}\n\
             Transport: packets={} bytes={} uptime={:.1}s",
            self.stage_ms,
            self.encode_ms,
            self.tracking_delay_ms,
            self.encoding_delay_ms,
            self.frames_staged,
            self.frames_encoded,
            self.frames_dropped,
            self.vsync_misses,
            self.packets_sent,
            self.bytes_sent,
            self.uptime_secs
        )
    }

    /// JSON export
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Rolling average calculator for timing data
#[derive(Debug)]
struct RollingAverage {
    samples: VecDeque<Duration>,
    max_samples: usize,
}

impl RollingAverage {
    fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    fn add(&mut self, duration: Duration) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(duration);
    }

    fn average_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: Duration = self.samples.iter().sum();
        (total / self.samples.len() as u32).as_secs_f64() * 1000.0
    }

    fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Thread-safe metrics shared between the render path and the encode worker
#[derive(Debug)]
pub struct PipelineMetrics {
    stage: RwLock<RollingAverage>,
    encode: RwLock<RollingAverage>,
    tracking_delay: RwLock<RollingAverage>,
    encoding_delay: RwLock<RollingAverage>,
    frames_staged: AtomicU64,
    frames_encoded: AtomicU64,
    frames_dropped: AtomicU64,
    vsync_misses: AtomicU64,
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    start_time: RwLock<Instant>,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            stage: RwLock::new(RollingAverage::new(MAX_SAMPLES)),
            encode: RwLock::new(RollingAverage::new(MAX_SAMPLES)),
            tracking_delay: RwLock::new(RollingAverage::new(MAX_SAMPLES)),
            encoding_delay: RwLock::new(RollingAverage::new(MAX_SAMPLES)),
            frames_staged: AtomicU64::new(0),
            frames_encoded: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            vsync_misses: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            start_time: RwLock::new(Instant::now()),
        }
    }

    /// Record a staged frame and how long staging took
    pub fn record_stage(&self, duration: Duration) {
        self.stage.write().add(duration);
        self.frames_staged.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an encoded frame and how long encode + send took
    pub fn record_encode(&self, duration: Duration) {
        self.encode.write().add(duration);
        self.frames_encoded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the delay between the client sampling a pose and the frame
    /// rendered for it reaching the encoder (microseconds)
    pub fn record_tracking_delay_us(&self, delay_us: u64) {
        self.tracking_delay.write().add(Duration::from_micros(delay_us));
    }

    /// Record presentation → transmit delay (microseconds)
    pub fn record_encoding_delay_us(&self, delay_us: u64) {
        self.encoding_delay.write().add(Duration::from_micros(delay_us));
    }

    /// Record a dropped frame
    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame sent after its target vsync
    pub fn record_vsync_miss(&self) {
        self.vsync_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a packet handed to the transport
    pub fn record_packet(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn vsync_misses(&self) -> u64 {
        self.vsync_misses.load(Ordering::Relaxed)
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }

    /// Current snapshot
    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            stage_ms: self.stage.read().average_ms(),
            encode_ms: self.encode.read().average_ms(),
            tracking_delay_ms: self.tracking_delay.read().average_ms(),
            encoding_delay_ms: self.encoding_delay.read().average_ms(),
            frames_staged: self.frames_staged.load(Ordering::Relaxed),
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            vsync_misses: self.vsync_misses.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            uptime_secs: self.start_time.read().elapsed().as_secs_f64(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.stage.write().clear();
        self.encode.write().clear();
        self.tracking_delay.write().clear();
        self.encoding_delay.write().clear();
        self.frames_staged.store(0, Ordering::Relaxed);
        self.frames_encoded.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.vsync_misses.store(0, Ordering::Relaxed);
        self.packets_sent.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
        *self.start_time.write() = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_average() {
        let mut avg = RollingAverage::new(3);
        avg.add(Duration::from_millis(10));
        avg.add(Duration::from_millis(20));
        avg.add(Duration::from_millis(30));
        assert!((avg.average_ms() - 20.0).abs() < 0.1);

        // Oldest sample falls out
        avg.add(Duration::from_millis(40));
        assert!((avg.average_ms() - 30.0).abs() < 0.1);
    }

    #[test]
    fn test_counters() {
        let metrics = PipelineMetrics::new();
        metrics.record_stage(Duration::from_millis(1));
        metrics.record_encode(Duration::from_millis(4));
        metrics.record_packet(1200);
        metrics.record_packet(300);
        metrics.record_frame_dropped();
        metrics.record_vsync_miss();

        let stats = metrics.snapshot();
        assert_eq!(stats.frames_staged, 1);
        assert_eq!(stats.frames_encoded, 1);
        assert_eq!(stats.packets_sent, 2);
        assert_eq!(stats.bytes_sent, 1500);
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(stats.vsync_misses, 1);
        assert!(stats.encode_ms > 0.0);
    }

    #[test]
    fn test_json_snapshot() {
        let metrics = PipelineMetrics::new();
        metrics.record_tracking_delay_us(12_000);
        let json = metrics.snapshot().to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!((value["tracking_delay_ms"].as_f64().unwrap() - 12.0).abs() < 0.01);
    }

    #[test]
    fn test_reset() {
        let metrics = PipelineMetrics::new();
        metrics.record_encode(Duration::from_millis(1));
        metrics.record_frame_dropped();
        metrics.reset();
        assert_eq!(metrics.frames_encoded(), 0);
        assert_eq!(metrics.frames_dropped(), 0);
    }
}
