//! Peer connection management.
//!
//! This module provides:
//! - Peer identification and metadata
//! - Connection state machine
//! - Handshake-time connections and active peer handles

pub mod connection;
pub mod info;
pub mod state;

// Re-export main types
pub use connection::{Connection, Peer, PeerCommand, PeerHandle};
pub use info::{ConnectionDirection, PeerId, PeerInfo};
pub use state::PeerState;
