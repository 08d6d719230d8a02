//! Progress tracking for archive jobs.
//!
//! Three independent counter pairs feed one estimate:
//! - the directory scanner's totals (how much work there is),
//! - the entry processor's resolved counters (how much work is done),
//! - the archive writer's own `(completed, total)` units, when it reports them.
//!
//! Writers update atomics with relaxed increments; readers take lock-free snapshots.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Sentinel for "fraction not yet computable". Distinct from 0%.
pub const INDETERMINATE: f32 = -1.0;

/// Monotonic (files, bytes) counter pair.
#[derive(Debug, Default)]
pub struct WorkCounters {
    files: AtomicU64,
    bytes: AtomicU64,
}

impl WorkCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one entry of `size` bytes.
    pub fn record_entry(&self, size: u64) {
        self.files.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(size, Ordering::Relaxed);
    }

    pub fn files(&self) -> u64 {
        self.files.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// Encoder-reported progress. `total == 0` means unknown.
#[derive(Debug, Default)]
pub struct WriterProgress {
    completed: AtomicU64,
    total: AtomicU64,
}

impl WriterProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, completed: u64, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        self.completed.fetch_max(completed, Ordering::Relaxed);
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Fraction in `[0,1]`, or [`INDETERMINATE`] while either counter is zero.
    pub fn fraction(&self) -> f32 {
        let completed = self.completed();
        let total = self.total();
        if total == 0 || completed == 0 {
            return INDETERMINATE;
        }
        (completed as f64 / total as f64).min(1.0) as f32
    }
}

/// Tunable weights of the estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorWeights {
    /// Highest fraction reported while the scanner is still counting.
    pub scan_ceiling: f32,
    /// Weight of the byte-based fraction; the file-count fraction gets the rest.
    pub size_weight: f32,
}

impl Default for EstimatorWeights {
    fn default() -> Self {
        Self { scan_ceiling: 0.05, size_weight: 0.8 }
    }
}

/// Everything the estimator reads, captured at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressInputs {
    /// Writer fraction or [`INDETERMINATE`].
    pub writer_fraction: f32,
    pub scan_completed: bool,
    pub total_files: u64,
    pub total_bytes: u64,
    pub processed_files: u64,
    pub processed_bytes: u64,
}

/// Combines the counters into one fraction in `[0,1]`.
pub fn estimate(inputs: &ProgressInputs, weights: &EstimatorWeights) -> f32 {
    if inputs.writer_fraction >= 0.0 {
        return inputs.writer_fraction.clamp(0.0, 1.0);
    }

    let by_count = ratio(inputs.processed_files, inputs.total_files);
    let by_size = if inputs.total_bytes == 0 {
        by_count
    } else {
        ratio(inputs.processed_bytes, inputs.total_bytes)
    };
    let blended = by_size * weights.size_weight + by_count * (1.0 - weights.size_weight);

    if !inputs.scan_completed {
        return blended.max(0.0).min(weights.scan_ceiling);
    }
    if inputs.total_files == 0 {
        return 1.0;
    }
    blended.clamp(0.0, 1.0)
}

fn ratio(done: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (done as f64 / total as f64) as f32
}

/// Keeps reported progress non-decreasing across racing inputs.
#[derive(Debug, Default)]
pub struct HighWaterMark {
    bits: AtomicU32,
}

impl HighWaterMark {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `fraction` and returns the highest value seen so far.
    pub fn observe(&self, fraction: f32) -> f32 {
        // Non-negative f32 bit patterns order like their values.
        let bits = fraction.clamp(0.0, 1.0).to_bits();
        let prev = self.bits.fetch_max(bits, Ordering::AcqRel);
        f32::from_bits(prev.max(bits))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }
}

/// Current progress state of a job, for display.
#[derive(Debug, Clone)]
pub struct ProgressState {
    pub total_files: u64,
    pub processed_files: u64,
    pub total_bytes: u64,
    pub processed_bytes: u64,
    pub scan_completed: bool,
    pub elapsed_time: Duration,
    pub speed_mbps: f32,
    pub progress_percent: f32,
}

impl ProgressState {
    /// Calculate estimated time remaining based on current speed
    pub fn estimated_time_remaining(&self) -> Duration {
        if self.speed_mbps <= 0.0 {
            return Duration::from_secs(0);
        }

        let remaining_bytes = self.total_bytes.saturating_sub(self.processed_bytes);
        let remaining_mb = remaining_bytes as f32 / (1024.0 * 1024.0);
        Duration::from_secs_f32((remaining_mb / self.speed_mbps).max(0.0))
    }
}
