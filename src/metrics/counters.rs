//! Counter helpers

use super::labels;
use metrics::counter;

/// A dial attempt started (one per backoff retry)
pub fn dial_attempted(mode: &'static str) {
    counter!(labels::DIAL_ATTEMPTS_TOTAL, labels::MODE => mode).increment(1);
}

/// A dial produced a usable connection
pub fn connection_established(mode: &'static str) {
    counter!(labels::CONNECTIONS_ESTABLISHED_TOTAL, labels::MODE => mode).increment(1);
}

/// A dial gave up
pub fn connection_failed(category: &'static str) {
    counter!(labels::CONNECTIONS_FAILED_TOTAL, labels::ERROR_CATEGORY => category).increment(1);
}

/// A connection was closed by its owner
pub fn connection_released(result: &'static str) {
    counter!(labels::CONNECTIONS_RELEASED_TOTAL, labels::RESULT => result).increment(1);
}
