//! ClientHandle implementation

use super::compose::compose;
use crate::connection::{Connection, ConnectionState, DialOption, Target};
use crate::context::Context;
use crate::Result;
use tonic::transport::Channel;
use tracing::Instrument;

/// A generated plugin stub together with the connection it runs over
///
/// The handle owns the connection exclusively. Service calls go through
/// [`client`](Self::client) / [`client_mut`](Self::client_mut) unchanged.
/// [`release`](Self::release) consumes the handle, so it can only be released
/// once:
///
/// ```compile_fail
/// # async fn example(handle: plugin_channel::ClientHandle<()>) {
/// handle.release().await.ok();
/// handle.release().await.ok();
/// # }
/// ```
///
/// Dropping a handle without releasing it still tears the sockets down, but
/// does not wait for them or report errors.
pub struct ClientHandle<C> {
    client: C,
    conn: Connection,
}

impl<C> ClientHandle<C> {
    /// Connect to a plugin and build its stub
    ///
    /// The dial always blocks until the HTTP/2 connection is usable and never
    /// uses transport security, whatever `options` say. `ctx` bounds the whole
    /// attempt, including backoff sleeps when [`DialOption::Backoff`] is given.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # async fn example() -> plugin_channel::Result<()> {
    /// use plugin_channel::{ClientHandle, Context};
    /// use std::time::Duration;
    /// use tonic_health::pb::health_client::HealthClient;
    ///
    /// let ctx = Context::background().with_timeout(Duration::from_secs(5));
    /// let handle = ClientHandle::establish(&ctx, "127.0.0.1:50051", &[], HealthClient::new).await?;
    /// // ... use handle.client() ...
    /// handle.release().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn establish<F>(
        ctx: &Context,
        address: &str,
        options: &[DialOption],
        new_client: F,
    ) -> Result<Self>
    where
        F: FnOnce(Channel) -> C,
    {
        async {
            let effective = compose(options);
            let conn = Connection::dial(ctx, address, &effective).await?;
            let client = new_client(conn.channel().clone());
            tracing::debug!("plugin client ready");
            Ok(Self { client, conn })
        }
        .instrument(tracing::info_span!("establish", address))
        .await
    }

    /// The plugin stub
    pub fn client(&self) -> &C {
        &self.client
    }

    /// The plugin stub, mutably (generated tonic methods take `&mut self`)
    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    /// The underlying channel
    pub fn channel(&self) -> &Channel {
        self.conn.channel()
    }

    /// Connected target
    pub fn address(&self) -> &Target {
        self.conn.target()
    }

    /// Connection state
    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// Close the connection
    ///
    /// Every socket is shut down and clones of the stub fail from here on.
    /// Calls still in flight are not waited for. An error means a socket
    /// reported a failure while closing, or did not close in time; the
    /// connection is released either way.
    pub async fn release(self) -> Result<()> {
        let Self { client, conn } = self;
        drop(client);
        conn.close().await
    }
}

impl<C> std::fmt::Debug for ClientHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("address", self.address())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_establish_overrides_lazy_request() {
        // Lazy would succeed without a server; establish must block instead.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let ctx = Context::background().with_timeout(Duration::from_secs(5));
        let err = ClientHandle::establish(&ctx, &address, &[DialOption::Lazy], |ch| ch)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unreachable { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_establish_rejects_bad_address() {
        let err = ClientHandle::establish(&Context::background(), "ftp://x:1", &[], |ch| ch)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_establish_ignores_tls_request_for_unix() {
        // Tls over Unix is a config error, but the appended Insecure wins.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.sock");
        let tls = crate::connection::TlsConfig::builder().build().unwrap();

        let ctx = Context::background().with_timeout(Duration::from_secs(5));
        let err = ClientHandle::establish(
            &ctx,
            &format!("unix://{}", path.display()),
            &[DialOption::Tls(tls)],
            |ch| ch,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Unreachable { .. }), "got {err:?}");
    }
}
