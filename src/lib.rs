//! Wakeup Jitter Benchmark Library
//!
//! Measures the jitter of periodic thread wakeups: timer events, plain
//! sleeps or hardware RTC interrupts, with an optional UDP echo peer.

pub mod clock;
pub mod core;
pub mod sampler;
pub mod stats;
pub mod ui;
pub mod utils;

pub use core::run_benchmark;

/// Library version
pub const VERSION: &str = "0.1.0";
