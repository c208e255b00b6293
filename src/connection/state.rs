//! Connection state machine

use crate::{Error, Result};

/// Lifecycle of the sockets behind one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport opened yet
    Dialing,

    /// Transport opened, HTTP/2 handshake pending
    Connected,

    /// Handed to the caller
    Ready,

    /// Released; sockets shut down and reconnects refused
    Released,
}

impl ConnectionState {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Dialing, Connected) | (Connected, Ready) | (Dialing, Ready) | (_, Released)
        )
    }

    /// Transition to new state
    pub fn transition(&mut self, next: ConnectionState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidState {
                expected: format!("valid transition from {:?}", self),
                actual: format!("{:?}", next),
            });
        }
        *self = next;
        Ok(())
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dialing => write!(f, "dialing"),
            Self::Connected => write!(f, "connected"),
            Self::Ready => write!(f, "ready"),
            Self::Released => write!(f, "released"),
        }
    }
}
