//! Statistics accumulation for wakeup jitter measurement

pub mod histogram;

pub use histogram::{
    SharedStats, StatsAccumulator, StatsSnapshot, AVERAGE_WINDOW, BUCKET_COUNT,
    BUCKET_WIDTH_SECONDS, WARMUP_SAMPLES,
};
