//! Peer connection state machine.
//!
//! ```text
//! Accepted ──▶ Handshaking ──▶ Active ──▶ Closed
//!                   │
//!                   └────────▶ Rejected
//! ```

use std::fmt;

/// State of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerState {
    /// TCP connection established, nothing exchanged yet.
    #[default]
    Accepted,
    /// Handshake strategy is running.
    Handshaking,
    /// Handshake and `on_peer` succeeded; the decode loop is running.
    Active,
    /// Handshake or `on_peer` refused the connection. Terminal.
    Rejected,
    /// Connection closed after being active. Terminal.
    Closed,
}

impl PeerState {
    /// Check if the peer is registered and exchanging messages.
    pub fn is_active(&self) -> bool {
        matches!(self, PeerState::Active)
    }

    /// Check if the state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PeerState::Rejected | PeerState::Closed)
    }

    /// Move to `next`, logging the transition.
    pub fn transition_to(&mut self, next: PeerState) {
        debug_assert!(
            self.can_transition_to(next),
            "illegal peer state transition {self} -> {next}"
        );
        tracing::trace!(from = %self, to = %next, "Peer state transition");
        *self = next;
    }

    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: PeerState) -> bool {
        matches!(
            (self, next),
            (PeerState::Accepted, PeerState::Handshaking)
                | (PeerState::Handshaking, PeerState::Active)
                | (PeerState::Handshaking, PeerState::Rejected)
                | (PeerState::Active, PeerState::Closed)
        )
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerState::Accepted => write!(f, "accepted"),
            PeerState::Handshaking => write!(f, "handshaking"),
            PeerState::Active => write!(f, "active"),
            PeerState::Rejected => write!(f, "rejected"),
            PeerState::Closed => write!(f, "closed"),
        }
    }
}
