//! Metric names and label values

/// Dial attempts, labelled by mode
pub const DIAL_ATTEMPTS_TOTAL: &str = "plugin_channel_dial_attempts_total";
/// Successful dials
pub const CONNECTIONS_ESTABLISHED_TOTAL: &str = "plugin_channel_connections_established_total";
/// Failed dials, labelled by error category
pub const CONNECTIONS_FAILED_TOTAL: &str = "plugin_channel_connections_failed_total";
/// Releases, labelled by result
pub const CONNECTIONS_RELEASED_TOTAL: &str = "plugin_channel_connections_released_total";
/// Dial duration including retries
pub const DIAL_DURATION_MS: &str = "plugin_channel_dial_duration_ms";

pub const MODE: &str = "mode";
pub const ERROR_CATEGORY: &str = "error_category";
pub const RESULT: &str = "result";

pub const MODE_BLOCK: &str = "block";
pub const MODE_LAZY: &str = "lazy";

pub const RESULT_OK: &str = "ok";
pub const RESULT_ERROR: &str = "error";
