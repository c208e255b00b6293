//! Shared lifecycle of the sockets behind one connection
//!
//! The connector, every socket it opens and the owning [`Connection`] share
//! one `Lifecycle`. Releasing it shuts every socket down and makes the
//! connector refuse reconnects, even for channel clones still held elsewhere.
//!
//! [`Connection`]: super::Connection

use super::state::ConnectionState;
use crate::{BoxError, Error, Result};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// What the first bytes from the server looked like
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Preface {
    /// Nothing read yet
    Pending,
    /// HTTP/2 SETTINGS frame received
    Received,
    /// Server sent something other than a SETTINGS frame
    Rejected(String),
    /// Server closed or reset the connection first
    Closed(String),
}

/// Lifecycle shared between a connection, its connector and its sockets
#[derive(Debug)]
pub struct Lifecycle {
    address: String,
    state: Mutex<ConnectionState>,
    released: CancellationToken,
    open_streams: AtomicUsize,
    streams_closed: Notify,
    dial_error: Mutex<Option<io::Error>>,
    close_error: Mutex<Option<io::Error>>,
    preface: watch::Sender<Preface>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Lifecycle {
    pub(crate) fn new(address: impl Into<String>) -> Self {
        let (preface, _) = watch::channel(Preface::Pending);
        Self {
            address: address.into(),
            state: Mutex::new(ConnectionState::Dialing),
            released: CancellationToken::new(),
            open_streams: AtomicUsize::new(0),
            streams_closed: Notify::new(),
            dial_error: Mutex::new(None),
            close_error: Mutex::new(None),
            preface,
        }
    }

    /// Address being dialed
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    /// Number of sockets still open
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::Acquire)
    }

    /// Whether `release` has been called
    pub fn is_released(&self) -> bool {
        self.released.is_cancelled()
    }

    pub(crate) fn transition(&self, next: ConnectionState) -> Result<()> {
        lock(&self.state).transition(next)
    }

    /// Record that a socket was opened; only the first one moves the state
    pub(crate) fn transport_opened(&self) -> io::Result<()> {
        let mut state = lock(&self.state);
        match *state {
            ConnectionState::Released => Err(released_error()),
            ConnectionState::Dialing => {
                *state = ConnectionState::Connected;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Whether sockets opened now should check the server preface
    pub(crate) fn awaiting_preface(&self) -> bool {
        matches!(*self.preface.borrow(), Preface::Pending)
    }

    /// Future resolving once the lifecycle is released
    pub(crate) fn released_future(&self) -> WaitForCancellationFutureOwned {
        self.released.clone().cancelled_owned()
    }

    pub(crate) fn stream_opened(&self) {
        self.open_streams.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn stream_closed(&self) {
        if self.open_streams.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.streams_closed.notify_waiters();
        }
    }

    pub(crate) fn record_dial_error(&self, err: &io::Error) {
        *lock(&self.dial_error) = Some(io::Error::new(err.kind(), err.to_string()));
    }

    pub(crate) fn record_close_error(&self, err: io::Error) {
        let mut slot = lock(&self.close_error);
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// First report wins
    pub(crate) fn report_preface(&self, outcome: Preface) {
        self.preface.send_if_modified(|current| {
            if *current == Preface::Pending {
                *current = outcome;
                true
            } else {
                false
            }
        });
    }

    /// Wait for the server's HTTP/2 preface on the first socket
    pub(crate) async fn server_preface(&self) -> Result<()> {
        let mut rx = self.preface.subscribe();
        let outcome = match rx.wait_for(|p| *p != Preface::Pending).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => Preface::Closed("lifecycle dropped".into()),
        };
        match outcome {
            Preface::Received | Preface::Pending => Ok(()),
            Preface::Rejected(reason) | Preface::Closed(reason) => Err(Error::Protocol {
                address: self.address.clone(),
                source: reason.into(),
            }),
        }
    }

    /// Turn a failed HTTP/2 connect into a caller-visible error
    ///
    /// Failures before any socket opened are transport failures; failures
    /// after one opened are negotiation failures.
    pub(crate) fn classify(&self, err: tonic::transport::Error) -> Error {
        let source: BoxError = match lock(&self.dial_error).take() {
            Some(io_err) => Box::new(io_err),
            None => Box::new(err),
        };
        match self.state() {
            ConnectionState::Dialing => Error::Unreachable {
                address: self.address.clone(),
                source,
            },
            _ => Error::Protocol {
                address: self.address.clone(),
                source,
            },
        }
    }

    /// Mark released and wake every socket; returns false if already released
    pub(crate) fn release(&self) -> bool {
        {
            let mut state = lock(&self.state);
            // Any state may move to Released.
            let _ = state.transition(ConnectionState::Released);
        }
        let first = !self.released.is_cancelled();
        self.released.cancel();
        first
    }

    /// Wait until every socket is dropped, then report the first close error
    pub(crate) async fn wait_closed(&self, grace: Duration) -> Result<()> {
        let drained = async {
            loop {
                let notified = self.streams_closed.notified();
                if self.open_streams() == 0 {
                    break;
                }
                notified.await;
            }
        };
        tokio::time::timeout(grace, drained)
            .await
            .map_err(|_| Error::ReleaseTimeout(grace))?;

        match lock(&self.close_error).take() {
            Some(err) => Err(Error::Release(err)),
            None => Ok(()),
        }
    }
}

pub(crate) fn released_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection released")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_opened_moves_to_connected_once() {
        let lifecycle = Lifecycle::new("127.0.0.1:1");
        assert_eq!(lifecycle.state(), ConnectionState::Dialing);
        lifecycle.transport_opened().unwrap();
        assert_eq!(lifecycle.state(), ConnectionState::Connected);
        lifecycle.transition(ConnectionState::Ready).unwrap();
        lifecycle.transport_opened().unwrap();
        assert_eq!(lifecycle.state(), ConnectionState::Ready);
    }

    #[test]
    fn test_released_refuses_transport() {
        let lifecycle = Lifecycle::new("127.0.0.1:1");
        assert!(lifecycle.release());
        assert!(!lifecycle.release());
        assert!(lifecycle.is_released());
        let err = lifecycle.transport_opened().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn test_first_preface_report_wins() {
        let lifecycle = Lifecycle::new("127.0.0.1:1");
        assert!(lifecycle.awaiting_preface());
        lifecycle.report_preface(Preface::Received);
        lifecycle.report_preface(Preface::Rejected("late".into()));
        assert!(!lifecycle.awaiting_preface());
        assert_eq!(*lifecycle.preface.borrow(), Preface::Received);
    }

    #[tokio::test]
    async fn test_server_preface_rejection_is_protocol_error() {
        let lifecycle = Lifecycle::new("127.0.0.1:1");
        lifecycle.report_preface(Preface::Rejected("frame type 0x48".into()));
        let err = lifecycle.server_preface().await.unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_wait_closed_returns_once_streams_drop() {
        let lifecycle = std::sync::Arc::new(Lifecycle::new("127.0.0.1:1"));
        lifecycle.stream_opened();
        lifecycle.stream_opened();

        let closer = lifecycle.clone();
        tokio::spawn(async move {
            closer.stream_closed();
            tokio::task::yield_now().await;
            closer.stream_closed();
        });

        lifecycle
            .wait_closed(Duration::from_secs(5))
            .await
            .expect("streams closed");
        assert_eq!(lifecycle.open_streams(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_closed_times_out() {
        let lifecycle = Lifecycle::new("127.0.0.1:1");
        lifecycle.stream_opened();
        let err = lifecycle
            .wait_closed(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReleaseTimeout(_)));
    }

    #[tokio::test]
    async fn test_wait_closed_surfaces_close_error() {
        let lifecycle = Lifecycle::new("127.0.0.1:1");
        lifecycle.record_close_error(io::Error::from(io::ErrorKind::BrokenPipe));
        let err = lifecycle
            .wait_closed(Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_release_error());
    }
}
