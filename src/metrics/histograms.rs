//! Histogram helpers

use super::labels;
use metrics::histogram;

/// Time spent dialing, retries included
pub fn dial_duration(mode: &'static str, duration_ms: u64) {
    histogram!(labels::DIAL_DURATION_MS, labels::MODE => mode).record(duration_ms as f64);
}
