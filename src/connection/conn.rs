//! Core connection type

use super::address::Target;
use super::backoff::ExponentialBackoff;
use super::lifecycle::Lifecycle;
use super::options::{ConnectMode, DialOption, DialSettings};
use super::state::ConnectionState;
use super::transport::GuardedStream;
use crate::context::Context;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tonic::transport::{Channel, Endpoint, Uri};
use tracing::Instrument;

/// How long `close` waits for sockets to drop
pub const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on tearing down the sockets of a failed attempt
const ABANDON_TIMEOUT: Duration = Duration::from_secs(1);

/// Releases the lifecycle when dropped
#[derive(Debug)]
struct ReleaseGuard(Arc<Lifecycle>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if self.0.release() {
            tracing::debug!(address = %self.0.address(), "connection dropped without close");
        }
    }
}

/// A live HTTP/2 channel to a plugin and the sockets behind it
///
/// The channel may be cloned freely; closing the connection tears the sockets
/// down for every clone. Dropping an unclosed connection also tears them down,
/// without waiting or reporting errors.
#[derive(Debug)]
pub struct Connection {
    channel: Channel,
    target: Target,
    guard: ReleaseGuard,
}

/// Dial `address` with `options`, honoring `ctx` for the whole attempt
///
/// See [`Connection::dial`].
pub async fn dial(ctx: &Context, address: &str, options: &[DialOption]) -> Result<Connection> {
    Connection::dial(ctx, address, options).await
}

impl Connection {
    /// Dial `address` with `options`, honoring `ctx` for the whole attempt
    ///
    /// With [`DialOption::Block`] this returns once the server has sent its
    /// HTTP/2 preface; with [`DialOption::Lazy`] it returns immediately and
    /// the first call opens the socket. Transport failures are retried only
    /// when the options carry [`DialOption::Backoff`]. On any error every
    /// socket opened by the attempt is torn down before returning.
    pub async fn dial(ctx: &Context, address: &str, options: &[DialOption]) -> Result<Self> {
        let target = Target::parse(address)?;
        let settings = DialSettings::resolve(options);
        let endpoint = settings.endpoint(&target)?;

        if !settings.security.is_tls() && !target.is_loopback() {
            tracing::warn!(address = %target, "dialing a non-loopback address without transport security");
        }

        let mode = match settings.connect_mode {
            ConnectMode::Block => crate::metrics::labels::MODE_BLOCK,
            ConnectMode::Lazy => crate::metrics::labels::MODE_LAZY,
        };

        async {
            let started = Instant::now();
            let mut backoff = settings.backoff.as_ref().map(ExponentialBackoff::from_config);
            let mut attempt: u32 = 0;

            let result = loop {
                attempt += 1;
                crate::metrics::counters::dial_attempted(mode);

                let lifecycle = Arc::new(Lifecycle::new(target.to_string()));
                let outcome = ctx
                    .run(Self::attempt(&endpoint, &target, &settings, &lifecycle))
                    .await
                    .and_then(|attempt| attempt);

                let err = match outcome {
                    Ok(channel) => {
                        break Ok(Self {
                            channel,
                            target: target.clone(),
                            guard: ReleaseGuard(lifecycle),
                        })
                    }
                    Err(err) => err,
                };

                Self::abandon(&lifecycle).await;

                let retry = matches!(err, Error::Unreachable { .. });
                match backoff.as_mut() {
                    Some(backoff) if retry => {
                        let delay = backoff.next_delay();
                        tracing::debug!(attempt, error = %err, ?delay, "dial failed, retrying");
                        if let Err(ctx_err) = ctx.run(tokio::time::sleep(delay)).await {
                            break Err(ctx_err);
                        }
                    }
                    _ => break Err(err),
                }
            };

            let elapsed_ms = started.elapsed().as_millis() as u64;
            crate::metrics::histograms::dial_duration(mode, elapsed_ms);
            match &result {
                Ok(_) => {
                    crate::metrics::counters::connection_established(mode);
                    tracing::info!(attempts = attempt, elapsed_ms, "connection established");
                }
                Err(err) => {
                    crate::metrics::counters::connection_failed(err.category());
                    tracing::debug!(attempts = attempt, error = %err, "dial failed");
                }
            }
            result
        }
        .instrument(tracing::info_span!("dial", address = %target, mode))
        .await
    }

    /// One dial attempt on a fresh lifecycle
    async fn attempt(
        endpoint: &Endpoint,
        target: &Target,
        settings: &DialSettings,
        lifecycle: &Arc<Lifecycle>,
    ) -> Result<Channel> {
        let check_preface = settings.connect_mode == ConnectMode::Block && !settings.security.is_tls();
        let connector = {
            let target = target.clone();
            let lifecycle = lifecycle.clone();
            let connect_timeout = settings.connect_timeout;
            let nodelay = settings.tcp_nodelay;
            tower::service_fn(move |_: Uri| {
                let target = target.clone();
                let lifecycle = lifecycle.clone();
                async move {
                    GuardedStream::connect(&target, lifecycle, connect_timeout, nodelay, check_preface)
                        .await
                }
            })
        };

        match settings.connect_mode {
            ConnectMode::Lazy => {
                let channel = endpoint.connect_with_connector_lazy(connector);
                lifecycle.transition(ConnectionState::Ready)?;
                Ok(channel)
            }
            ConnectMode::Block => {
                let channel = endpoint
                    .connect_with_connector(connector)
                    .await
                    .map_err(|e| lifecycle.classify(e))?;
                if check_preface {
                    lifecycle.server_preface().await?;
                }
                lifecycle.transition(ConnectionState::Ready)?;
                Ok(channel)
            }
        }
    }

    /// Tear down whatever a failed attempt left open
    async fn abandon(lifecycle: &Lifecycle) {
        lifecycle.release();
        if let Err(err) = lifecycle.wait_closed(ABANDON_TIMEOUT).await {
            tracing::debug!(error = %err, "failed attempt did not close cleanly");
        }
    }

    /// The HTTP/2 channel; clones share this connection's sockets
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Dialed target
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.guard.0.state()
    }

    /// Number of sockets currently open
    pub fn open_streams(&self) -> usize {
        self.guard.0.open_streams()
    }

    /// Close the connection
    ///
    /// Shuts every socket down, refuses reconnects from channel clones and
    /// waits up to [`RELEASE_TIMEOUT`] for the sockets to drop. In-flight
    /// calls are not drained; they fail.
    pub async fn close(self) -> Result<()> {
        let Connection {
            channel,
            target,
            guard,
        } = self;
        drop(channel);

        async {
            guard.0.release();
            let result = guard.0.wait_closed(RELEASE_TIMEOUT).await;
            match &result {
                Ok(()) => {
                    crate::metrics::counters::connection_released(crate::metrics::labels::RESULT_OK);
                    tracing::info!("connection released");
                }
                Err(err) => {
                    crate::metrics::counters::connection_released(
                        crate::metrics::labels::RESULT_ERROR,
                    );
                    tracing::warn!(error = %err, "connection release reported an error");
                }
            }
            result
        }
        .instrument(tracing::info_span!("close", address = %target))
        .await
    }
}
