//! Interval histogram and running statistics for the sampling thread
//!
//! The sampling thread is the only writer; the display side reads the same
//! counters lock-free. Relaxed atomics give an eventually-consistent
//! snapshot, which is all the display needs: the values are independent
//! counters consumed for human-readable output, not for control decisions.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Number of histogram buckets. One bucket covers 0.1 ms, so the table
/// spans 0..30 ms; the final bucket collects everything at or beyond that.
pub const BUCKET_COUNT: usize = 300;

/// Bucket scale: intervals are quantized in units of 0.1 ms.
pub const BUCKETS_PER_SECOND: f64 = 10_000.0;

/// Seconds of interval covered by one bucket.
pub const BUCKET_WIDTH_SECONDS: f64 = 1.0 / BUCKETS_PER_SECOND;

/// The first samples of a run carry the startup transient (thread priority
/// elevation, first interrupt latency) and are kept out of the histogram.
pub const WARMUP_SAMPLES: u64 = 10;

/// The running average period is recomputed once per this many samples.
pub const AVERAGE_WINDOW: u64 = 100;

/// Counters shared between the sampling thread (sole writer) and the
/// display side (reader). Also carries the per-run control flags.
pub struct SharedStats {
    histogram: [AtomicU64; BUCKET_COUNT],
    total_samples: AtomicU64,
    run_count: AtomicU64,
    average_period: AtomicU64,
    max_interval: AtomicU64,
    running: AtomicBool,
    abort_requested: AtomicBool,
}

impl SharedStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            histogram: std::array::from_fn(|_| AtomicU64::new(0)),
            total_samples: AtomicU64::new(0),
            run_count: AtomicU64::new(0),
            average_period: AtomicU64::new(0),
            max_interval: AtomicU64::new(0),
            running: AtomicBool::new(false),
            abort_requested: AtomicBool::new(false),
        })
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn set_running(&self, value: bool) {
        self.running.store(value, Ordering::Relaxed);
    }

    pub fn abort_requested(&self) -> bool {
        self.abort_requested.load(Ordering::Relaxed)
    }

    pub fn request_abort(&self) {
        self.abort_requested.store(true, Ordering::Relaxed);
    }

    /// Read every counter into an owned snapshot. Fields may be torn with
    /// respect to each other mid-run; each individual value is consistent.
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut histogram = [0u64; BUCKET_COUNT];
        for (slot, bucket) in histogram.iter_mut().zip(&self.histogram) {
            *slot = bucket.load(Ordering::Relaxed);
        }
        StatsSnapshot {
            histogram,
            running_average_period: f64::from_bits(self.average_period.load(Ordering::Relaxed)),
            max_observed_interval: f64::from_bits(self.max_interval.load(Ordering::Relaxed)),
            total_sample_count: self.total_samples.load(Ordering::Relaxed),
            run_count_since_average: self.run_count.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the shared counters, for display and reporting.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    /// Frequency table of observed intervals, 0.1 ms per bucket. The final
    /// bucket is the overflow bucket for intervals at or beyond the span.
    pub histogram: [u64; BUCKET_COUNT],
    /// Average interval over the most recent completed 100-sample window,
    /// in seconds. Holds its last computed value between recomputations.
    pub running_average_period: f64,
    /// Largest interval that landed in the overflow bucket, in seconds.
    pub max_observed_interval: f64,
    /// Every sample of the run, warm-up included.
    pub total_sample_count: u64,
    /// Samples accepted since the average was last recomputed.
    pub run_count_since_average: u64,
}

impl StatsSnapshot {
    /// Sum of the histogram buckets, i.e. samples recorded after warm-up.
    pub fn recorded_samples(&self) -> u64 {
        self.histogram.iter().sum()
    }
}

/// Single mutation point for the shared statistics. Owned by the sampling
/// thread; must only ever be driven from one logical thread of control.
pub struct StatsAccumulator {
    shared: Arc<SharedStats>,
    interval_sum: f64,
    window_count: u64,
    total: u64,
}

impl StatsAccumulator {
    pub fn new(shared: Arc<SharedStats>) -> Self {
        Self {
            shared,
            interval_sum: 0.0,
            window_count: 0,
            total: 0,
        }
    }

    /// Record one observed inter-sample interval, in seconds.
    pub fn record_interval(&mut self, dt: f64) {
        let mut h = (dt * BUCKETS_PER_SECOND).round() as i64;
        if h < 0 {
            h = 0;
        }
        if h >= BUCKET_COUNT as i64 {
            h = BUCKET_COUNT as i64 - 1;
            let max = f64::from_bits(self.shared.max_interval.load(Ordering::Relaxed));
            if dt > max {
                self.shared
                    .max_interval
                    .store(dt.to_bits(), Ordering::Relaxed);
            }
        }

        self.total += 1;
        self.shared.total_samples.store(self.total, Ordering::Relaxed);

        // The first samples carry startup transient jitter; keep them out
        // of the table so the distribution reflects steady-state behavior.
        if self.total > WARMUP_SAMPLES {
            self.shared.histogram[h as usize].fetch_add(1, Ordering::Relaxed);
        }

        self.interval_sum += dt;
        self.window_count += 1;
        if self.window_count >= AVERAGE_WINDOW {
            let average = self.interval_sum / self.window_count as f64;
            self.shared
                .average_period
                .store(average.to_bits(), Ordering::Relaxed);
            self.interval_sum = 0.0;
            self.window_count = 0;
        }
        self.shared
            .run_count
            .store(self.window_count, Ordering::Relaxed);
    }

    pub fn shared(&self) -> &Arc<SharedStats> {
        &self.shared
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accumulator() -> StatsAccumulator {
        StatsAccumulator::new(SharedStats::new())
    }

    #[test]
    fn bucket_index_is_rounded_tenths_of_a_millisecond() {
        let mut acc = accumulator();
        // Push past warm-up with out-of-band values first.
        for _ in 0..WARMUP_SAMPLES {
            acc.record_interval(0.02);
        }
        acc.record_interval(0.005);
        let snap = acc.shared().snapshot();
        assert_eq!(snap.histogram[50], 1);
    }

    #[test]
    fn overflow_bucket_clamps_and_tracks_max() {
        let mut acc = accumulator();
        for _ in 0..WARMUP_SAMPLES {
            acc.record_interval(0.001);
        }
        acc.record_interval(0.05);
        let snap = acc.shared().snapshot();
        assert_eq!(snap.histogram[BUCKET_COUNT - 1], 1);
        assert_eq!(snap.max_observed_interval, 0.05);

        // A smaller overflowing interval must not shrink the max.
        acc.record_interval(0.04);
        let snap = acc.shared().snapshot();
        assert_eq!(snap.histogram[BUCKET_COUNT - 1], 2);
        assert_eq!(snap.max_observed_interval, 0.05);
    }

    #[test]
    fn negative_interval_lands_in_bucket_zero() {
        let mut acc = accumulator();
        for _ in 0..WARMUP_SAMPLES {
            acc.record_interval(0.001);
        }
        acc.record_interval(-0.002);
        let snap = acc.shared().snapshot();
        assert_eq!(snap.histogram[0], 1);
    }

    #[test]
    fn warmup_samples_are_counted_but_not_recorded() {
        let mut acc = accumulator();
        for _ in 0..WARMUP_SAMPLES {
            acc.record_interval(0.001);
        }
        let snap = acc.shared().snapshot();
        assert_eq!(snap.total_sample_count, WARMUP_SAMPLES);
        assert_eq!(snap.recorded_samples(), 0);

        acc.record_interval(0.001);
        let snap = acc.shared().snapshot();
        assert_eq!(snap.total_sample_count, WARMUP_SAMPLES + 1);
        assert_eq!(snap.recorded_samples(), 1);
    }

    #[test]
    fn bucket_sum_equals_total_minus_warmup() {
        let mut acc = accumulator();
        for _ in 0..500 {
            acc.record_interval(0.0103);
        }
        let snap = acc.shared().snapshot();
        assert_eq!(snap.total_sample_count, 500);
        assert_eq!(snap.recorded_samples(), 500 - WARMUP_SAMPLES);
    }

    #[test]
    fn average_recomputed_every_hundred_samples() {
        let mut acc = accumulator();
        for _ in 0..99 {
            acc.record_interval(0.01);
        }
        let snap = acc.shared().snapshot();
        assert_eq!(snap.running_average_period, 0.0);
        assert_eq!(snap.run_count_since_average, 99);

        acc.record_interval(0.01);
        let snap = acc.shared().snapshot();
        assert!((snap.running_average_period - 0.01).abs() < 1e-12);
        assert_eq!(snap.run_count_since_average, 0);

        // Stable between recomputations.
        for _ in 0..50 {
            acc.record_interval(0.02);
        }
        let snap = acc.shared().snapshot();
        assert!((snap.running_average_period - 0.01).abs() < 1e-12);
        assert_eq!(snap.run_count_since_average, 50);
    }

    #[test]
    fn fresh_shared_block_is_zeroed_with_flags_clear() {
        let shared = SharedStats::new();
        let snap = shared.snapshot();
        assert_eq!(snap.total_sample_count, 0);
        assert_eq!(snap.recorded_samples(), 0);
        assert_eq!(snap.running_average_period, 0.0);
        assert_eq!(snap.max_observed_interval, 0.0);
        assert!(!shared.running());
        assert!(!shared.abort_requested());
    }

    #[test]
    fn abort_flag_is_sticky_on_its_block() {
        let shared = SharedStats::new();
        shared.request_abort();
        let mut acc = StatsAccumulator::new(shared.clone());
        acc.record_interval(0.01);
        assert!(shared.abort_requested());
    }
}
