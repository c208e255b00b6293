//! Metrics emitted by connection establishment and release
//!
//! Uses the `metrics` facade; the host installs the recorder.

pub mod counters;
pub mod histograms;
pub mod labels;
