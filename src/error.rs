//! Error types

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by the underlying transport stack
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for plugin-channel operations
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid address, option or TLS material
    #[error("configuration error: {0}")]
    Config(String),

    /// The execution context was cancelled before the connection was ready
    #[error("connection attempt cancelled")]
    Cancelled,

    /// The execution context's deadline elapsed before the connection was ready
    #[error("connection attempt deadline exceeded")]
    DeadlineExceeded,

    /// Transport could not be opened (refused, unreachable, name resolution)
    #[error("failed to reach {address}: {source}")]
    Unreachable {
        /// Address that was dialed
        address: String,
        /// Underlying cause
        #[source]
        source: BoxError,
    },

    /// Transport opened but the HTTP/2 handshake did not complete
    #[error("protocol negotiation with {address} failed: {source}")]
    Protocol {
        /// Address that was dialed
        address: String,
        /// Underlying cause
        #[source]
        source: BoxError,
    },

    /// A socket reported an error while being closed
    #[error("failed to close connection: {0}")]
    Release(#[source] io::Error),

    /// Sockets were still open when the release grace period ran out
    #[error("connection still open {0:?} after release")]
    ReleaseTimeout(Duration),

    /// Invalid lifecycle transition
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether establishing a connection failed
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Cancelled
                | Self::DeadlineExceeded
                | Self::Unreachable { .. }
                | Self::Protocol { .. }
        )
    }

    /// Whether the failure is attributable to the context deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::DeadlineExceeded)
    }

    /// Whether the failure is attributable to context cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether closing an established connection failed
    pub fn is_release_error(&self) -> bool {
        matches!(self, Self::Release(_) | Self::ReleaseTimeout(_))
    }

    /// Stable category label, used for metrics
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Unreachable { .. } => "unreachable",
            Self::Protocol { .. } => "protocol",
            Self::Release(_) | Self::ReleaseTimeout(_) => "release",
            Self::InvalidState { .. } => "invalid_state",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refused() -> Error {
        Error::Unreachable {
            address: "127.0.0.1:1".into(),
            source: Box::new(io::Error::from(io::ErrorKind::ConnectionRefused)),
        }
    }

    #[test]
    fn test_connection_error_classification() {
        assert!(Error::Cancelled.is_connection_error());
        assert!(Error::DeadlineExceeded.is_connection_error());
        assert!(refused().is_connection_error());
        assert!(!Error::Config("bad".into()).is_connection_error());
        assert!(!Error::ReleaseTimeout(Duration::from_secs(1)).is_connection_error());
    }

    #[test]
    fn test_release_error_classification() {
        let err = Error::Release(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(err.is_release_error());
        assert!(!err.is_connection_error());
        assert_eq!(err.category(), "release");
    }

    #[test]
    fn test_unreachable_keeps_source() {
        let err = refused();
        let source = std::error::Error::source(&err).expect("source attached");
        assert!(source.to_string().to_lowercase().contains("refused"));
        assert!(err.to_string().contains("127.0.0.1:1"));
    }

    #[test]
    fn test_category_labels() {
        assert_eq!(Error::Cancelled.category(), "cancelled");
        assert_eq!(Error::DeadlineExceeded.category(), "deadline_exceeded");
        assert_eq!(refused().category(), "unreachable");
        assert!(Error::DeadlineExceeded.is_timeout());
        assert!(Error::Cancelled.is_cancelled());
    }
}
