//! Transport abstraction (TCP vs Unix socket) and release-aware streams

use super::address::Target;
use super::lifecycle::{released_error, Lifecycle, Preface};
use std::future::Future;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UnixStream};
use tokio_util::sync::WaitForCancellationFutureOwned;

/// HTTP/2 frame header length
const FRAME_HEADER_LEN: usize = 9;

/// HTTP/2 SETTINGS frame type
const FRAME_TYPE_SETTINGS: u8 = 0x4;

/// Transport layer abstraction
#[derive(Debug)]
pub enum Transport {
    /// TCP socket
    Tcp(TcpStream),
    /// Unix domain socket
    Unix(UnixStream),
}

impl Transport {
    /// Connect via TCP
    pub async fn connect_tcp(host: &str, port: u16) -> io::Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        Ok(Transport::Tcp(stream))
    }

    /// Connect via Unix socket
    pub async fn connect_unix(path: &Path) -> io::Result<Self> {
        let stream = UnixStream::connect(path).await?;
        Ok(Transport::Unix(stream))
    }

    /// Connect to a parsed target
    pub async fn connect(target: &Target, nodelay: bool) -> io::Result<Self> {
        match target {
            Target::Tcp { host, port } => {
                let transport = Self::connect_tcp(host, *port).await?;
                if let Transport::Tcp(stream) = &transport {
                    stream.set_nodelay(nodelay)?;
                }
                Ok(transport)
            }
            Target::Unix(path) => Self::connect_unix(path).await,
        }
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Transport::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Transport::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_write_vectored(cx, bufs),
            Transport::Unix(stream) => Pin::new(stream).poll_write_vectored(cx, bufs),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            Transport::Tcp(stream) => stream.is_write_vectored(),
            Transport::Unix(stream) => stream.is_write_vectored(),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Transport::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Transport::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Accumulates the first frame header sent by the server
#[derive(Debug, Default)]
struct PrefaceProbe {
    header: [u8; FRAME_HEADER_LEN],
    len: usize,
}

impl PrefaceProbe {
    /// Feed freshly read bytes; `Some` once a verdict is reached
    fn feed(&mut self, read: &[u8]) -> Option<Preface> {
        if read.is_empty() {
            return Some(Preface::Closed(
                "connection closed before the server sent its HTTP/2 preface".into(),
            ));
        }

        let take = (FRAME_HEADER_LEN - self.len).min(read.len());
        self.header[self.len..self.len + take].copy_from_slice(&read[..take]);
        self.len += take;
        if self.len < FRAME_HEADER_LEN {
            return None;
        }

        let frame_type = self.header[3];
        let flags = self.header[4];
        let stream_id = u32::from_be_bytes([
            self.header[5] & 0x7F,
            self.header[6],
            self.header[7],
            self.header[8],
        ]);

        if frame_type != FRAME_TYPE_SETTINGS || stream_id != 0 || flags & 0x1 != 0 {
            return Some(Preface::Rejected(format!(
                "expected an HTTP/2 SETTINGS frame, got frame type 0x{:02X} on stream {}",
                frame_type, stream_id
            )));
        }
        Some(Preface::Received)
    }
}

/// A transport bound to a connection lifecycle
///
/// Once the lifecycle is released, the next poll shuts the socket down and
/// every later read or write fails with `ConnectionAborted`.
pub struct GuardedStream {
    inner: Transport,
    lifecycle: Arc<Lifecycle>,
    released: Pin<Box<WaitForCancellationFutureOwned>>,
    probe: Option<PrefaceProbe>,
    shut_down: bool,
}

impl std::fmt::Debug for GuardedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedStream")
            .field("inner", &self.inner)
            .field("address", &self.lifecycle.address())
            .field("shut_down", &self.shut_down)
            .finish()
    }
}

impl GuardedStream {
    /// Open a transport to `target` on behalf of `lifecycle`
    ///
    /// Refused once the lifecycle is released. Failures are recorded on the
    /// lifecycle so the dial can report the underlying cause.
    pub(crate) async fn connect(
        target: &Target,
        lifecycle: Arc<Lifecycle>,
        connect_timeout: Option<Duration>,
        nodelay: bool,
        check_preface: bool,
    ) -> io::Result<Self> {
        if lifecycle.is_released() {
            return Err(released_error());
        }

        let result = match connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, Transport::connect(target, nodelay))
                .await
                .unwrap_or_else(|_| {
                    Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect to {} timed out after {:?}", target, timeout),
                    ))
                }),
            None => Transport::connect(target, nodelay).await,
        };

        let transport = match result {
            Ok(transport) => transport,
            Err(err) => {
                tracing::debug!(address = %target, error = %err, "transport connect failed");
                lifecycle.record_dial_error(&err);
                return Err(err);
            }
        };

        lifecycle.transport_opened()?;
        tracing::debug!(address = %target, "transport connected");

        let probe = (check_preface && lifecycle.awaiting_preface()).then(PrefaceProbe::default);
        Ok(Self::new(transport, lifecycle, probe))
    }

    fn new(inner: Transport, lifecycle: Arc<Lifecycle>, probe: Option<PrefaceProbe>) -> Self {
        lifecycle.stream_opened();
        let released = Box::pin(lifecycle.released_future());
        Self {
            inner,
            lifecycle,
            released,
            probe,
            shut_down: false,
        }
    }

    /// `Ready` with the error to return once released, after shutting down
    fn poll_released(&mut self, cx: &mut Context<'_>) -> Poll<io::Error> {
        if !self.shut_down {
            if self.released.as_mut().poll(cx).is_pending() {
                return Poll::Pending;
            }
            match Pin::new(&mut self.inner).poll_shutdown(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Err(err)) if err.kind() != io::ErrorKind::NotConnected => {
                    tracing::debug!(error = %err, "socket shutdown failed");
                    self.lifecycle.record_close_error(err);
                }
                Poll::Ready(_) => {}
            }
            self.shut_down = true;
            tracing::debug!(address = %self.lifecycle.address(), "socket shut down");
        }
        Poll::Ready(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            "connection released",
        ))
    }

    fn observe_read(&mut self, read: &[u8]) {
        if let Some(probe) = self.probe.as_mut() {
            if let Some(outcome) = probe.feed(read) {
                self.lifecycle.report_preface(outcome);
                self.probe = None;
            }
        }
    }
}

impl Drop for GuardedStream {
    fn drop(&mut self) {
        if self.probe.take().is_some() {
            self.lifecycle.report_preface(Preface::Closed(
                "connection dropped before the server sent its HTTP/2 preface".into(),
            ));
        }
        self.lifecycle.stream_closed();
    }
}

impl AsyncRead for GuardedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Poll::Ready(err) = this.poll_released(cx) {
            return Poll::Ready(Err(err));
        }

        let before = buf.filled().len();
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);
        match &result {
            Poll::Ready(Ok(())) => this.observe_read(&buf.filled()[before..]),
            Poll::Ready(Err(err)) => {
                if this.probe.take().is_some() {
                    this.lifecycle.report_preface(Preface::Closed(err.to_string()));
                }
            }
            Poll::Pending => {}
        }
        result
    }
}

impl AsyncWrite for GuardedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Poll::Ready(err) = this.poll_released(cx) {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Poll::Ready(err) = this.poll_released(cx) {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut this.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Poll::Ready(err) = this.poll_released(cx) {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.shut_down {
            return Poll::Ready(Ok(()));
        }
        let result = Pin::new(&mut this.inner).poll_shutdown(cx);
        if result.is_ready() {
            this.shut_down = true;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const SETTINGS_HEADER: [u8; 9] = [0, 0, 0, 0x4, 0, 0, 0, 0, 0];

    #[tokio::test]
    async fn test_tcp_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = Transport::connect_tcp("127.0.0.1", port).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unix_connect_failure() {
        let dir = tempfile::tempdir().unwrap();
        let result = Transport::connect_unix(&dir.path().join("missing.sock")).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_probe_accepts_settings_in_pieces() {
        let mut probe = PrefaceProbe::default();
        assert_eq!(probe.feed(&SETTINGS_HEADER[..4]), None);
        assert_eq!(probe.feed(&SETTINGS_HEADER[4..]), Some(Preface::Received));
    }

    #[test]
    fn test_probe_rejects_http1_response() {
        let mut probe = PrefaceProbe::default();
        let outcome = probe.feed(b"HTTP/1.1 400 Bad Request\r\n");
        assert!(matches!(outcome, Some(Preface::Rejected(_))));
    }

    #[test]
    fn test_probe_rejects_settings_ack() {
        let mut header = SETTINGS_HEADER;
        header[4] = 0x1;
        let mut probe = PrefaceProbe::default();
        assert!(matches!(probe.feed(&header), Some(Preface::Rejected(_))));
    }

    #[test]
    fn test_probe_reports_eof() {
        let mut probe = PrefaceProbe::default();
        assert!(matches!(probe.feed(&[]), Some(Preface::Closed(_))));
    }

    #[tokio::test]
    async fn test_guarded_stream_counts_and_reports_preface() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = Target::parse(&listener.local_addr().unwrap().to_string()).unwrap();
        let lifecycle = Arc::new(Lifecycle::new(target.to_string()));

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&SETTINGS_HEADER).await.unwrap();
            socket
        });

        let mut stream = GuardedStream::connect(&target, lifecycle.clone(), None, true, true)
            .await
            .expect("connect");
        let _server_socket = server.await.unwrap();
        assert_eq!(lifecycle.open_streams(), 1);

        let mut buf = [0u8; 9];
        stream.read_exact(&mut buf).await.unwrap();
        lifecycle.server_preface().await.expect("preface");

        drop(stream);
        assert_eq!(lifecycle.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_guarded_stream_fails_after_release() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = Target::parse(&listener.local_addr().unwrap().to_string()).unwrap();
        let lifecycle = Arc::new(Lifecycle::new(target.to_string()));

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            // Returns once the client shuts its side down.
            socket.read_to_end(&mut buf).await.unwrap();
            buf
        });

        let mut stream = GuardedStream::connect(&target, lifecycle.clone(), None, true, false)
            .await
            .expect("connect");
        stream.write_all(b"ping").await.unwrap();

        lifecycle.release();
        let err = stream.write_all(b"more").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);

        let received = server.await.unwrap();
        assert_eq!(received, b"ping");

        let refused = GuardedStream::connect(&target, lifecycle, None, true, false).await;
        assert_eq!(refused.unwrap_err().kind(), io::ErrorKind::NotConnected);
    }
}
