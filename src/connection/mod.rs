//! Connection management
//!
//! This module handles:
//! * Address parsing (TCP vs Unix socket targets)
//! * Option resolution into an HTTP/2 endpoint
//! * Socket transport with release-aware shutdown
//! * Lifecycle state machine enforcement
//! * TLS configuration and dial backoff

mod address;
mod backoff;
mod conn;
mod lifecycle;
mod options;
mod state;
mod tls;
mod transport;

pub use address::Target;
pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use conn::{dial, Connection, RELEASE_TIMEOUT};
pub use lifecycle::Lifecycle;
pub use options::{ConnectMode, DialOption, DialSettings, Security};
pub use state::ConnectionState;
pub use tls::{parse_server_name, TlsConfig, TlsConfigBuilder};
pub use transport::{GuardedStream, Transport};
