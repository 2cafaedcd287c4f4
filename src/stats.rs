//! Transfer statistics for offline downloads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Outcome of one finished video download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub bytes: u64,
    pub elapsed: Duration,
    /// Bytes per second over the whole transfer.
    pub average_speed: u64,
    pub peak_speed: u64,
}

/// Live counter for a transfer in progress. Shared between the writer and
/// whoever reports progress.
#[derive(Debug)]
pub struct TransferMeter {
    started: Instant,
    bytes: AtomicU64,
    peak_speed: AtomicU64,
}

impl Default for TransferMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn bytes_per_second(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        (bytes as f64 / secs) as u64
    } else {
        0
    }
}

impl TransferMeter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            bytes: AtomicU64::new(0),
            peak_speed: AtomicU64::new(0),
        }
    }

    /// Adds `delta` bytes and returns the running average speed.
    pub fn record(&self, delta: u64) -> u64 {
        let total = self.bytes.fetch_add(delta, Ordering::Relaxed) + delta;
        let speed = bytes_per_second(total, self.started.elapsed());
        self.peak_speed.fetch_max(speed, Ordering::Relaxed);
        speed
    }

    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn finish(&self) -> TransferStats {
        let elapsed = self.started.elapsed();
        let bytes = self.bytes();
        TransferStats {
            bytes,
            elapsed,
            average_speed: bytes_per_second(bytes, elapsed),
            peak_speed: self.peak_speed.load(Ordering::Relaxed),
        }
    }
}

/// Totals for a batch of downloads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub downloaded: usize,
    /// Items already on disk.
    pub skipped: usize,
    pub failed: usize,
    pub bytes: u64,
    pub elapsed: Duration,
    pub peak_speed: u64,
}

impl BatchStats {
    #[must_use]
    pub fn average_speed(&self) -> u64 {
        bytes_per_second(self.bytes, self.elapsed)
    }

    pub fn add(&mut self, stats: &TransferStats) {
        self.downloaded += 1;
        self.bytes += stats.bytes;
        self.peak_speed = self.peak_speed.max(stats.peak_speed);
    }
}
