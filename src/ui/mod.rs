//! Presentation of run results

pub mod report;
