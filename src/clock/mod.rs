//! High resolution elapsed-time source for interval measurement
//!
//! This module provides the monotonic clock the sampling thread uses to
//! measure actual inter-wakeup intervals.

use std::time::Instant;

/// Monotonic elapsed-time source with sub-millisecond resolution.
///
/// `elapsed_seconds()` never goes backward within a run: a backward jump of
/// the underlying counter is absorbed into an accumulated offset instead of
/// being propagated to callers.
#[derive(Debug, Clone)]
pub struct HighResClock {
    origin: Instant,
    offset: f64,
    last: f64,
}

impl HighResClock {
    /// Create a clock with time zero marked at the moment of creation.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: 0.0,
            last: 0.0,
        }
    }

    /// Mark time zero. Subsequent reads are relative to this point.
    pub fn reset(&mut self) {
        self.origin = Instant::now();
        self.offset = 0.0;
        self.last = 0.0;
    }

    /// Elapsed seconds since the last reset, monotonically non-decreasing.
    pub fn elapsed_seconds(&mut self) -> f64 {
        let raw = self.origin.elapsed().as_secs_f64();
        let t = raw + self.offset;
        if t < self.last {
            // Counter went backward; fold the jump into the offset so the
            // caller only ever sees non-decreasing time.
            self.offset += self.last - t;
            return self.last;
        }
        self.last = t;
        t
    }
}

impl Default for HighResClock {
    fn default() -> Self {
        Self::new()
    }
}
