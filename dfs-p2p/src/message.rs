//! Inbound message type.

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;

/// A unit of data received from a peer.
///
/// Produced by a connection task after decoding and moved onto the
/// transport's inbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Remote address of the peer that sent the payload.
    pub from: SocketAddr,
    /// Decoded payload bytes.
    pub payload: Bytes,
}

impl Message {
    /// Create a new message.
    pub fn new(from: SocketAddr, payload: Bytes) -> Self {
        Self { from, payload }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "message from {} ({} bytes)", self.from, self.payload.len())
    }
}
