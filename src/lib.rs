//! plugin-channel: deterministic gRPC connections to co-located plugins
//!
//! A host process uses this crate to obtain a ready-to-use client for a plugin
//! listening on a loopback or Unix socket address, and to tear that connection
//! down again without leaking sockets.
//!
//! * [`compose`] appends the mandatory "block until connected" and
//!   "no transport security" options to the caller's list
//! * [`ClientHandle::establish`] dials under a cancellable [`Context`] and
//!   wraps the generated stub
//! * [`ClientHandle::release`] closes every socket behind the handle
//!
//! # Example
//!
//! ```no_run
//! # async fn example() -> plugin_channel::Result<()> {
//! use plugin_channel::{ClientHandle, Context, DialOption};
//! use std::time::Duration;
//! use tonic_health::pb::{health_client::HealthClient, HealthCheckRequest};
//!
//! let ctx = Context::background().with_timeout(Duration::from_secs(5));
//! let mut handle = ClientHandle::establish(
//!     &ctx,
//!     "127.0.0.1:50051",
//!     &[DialOption::RequestTimeout(Duration::from_secs(1))],
//!     HealthClient::new,
//! )
//! .await?;
//!
//! let status = handle
//!     .client_mut()
//!     .check(HealthCheckRequest { service: String::new() })
//!     .await;
//! println!("{:?}", status);
//!
//! handle.release().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs, rust_2018_idioms)]

pub mod client;
pub mod connection;
pub mod context;
pub mod error;
#[allow(missing_docs)]
pub mod metrics;

pub use client::{compose, ClientHandle};
pub use connection::DialOption;
pub use context::Context;
pub use error::{BoxError, Error, Result};
pub use tonic::transport::Channel;
