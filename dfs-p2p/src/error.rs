//! P2P error types.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum P2pError {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failed to bind the listening socket.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The transport is already running an accept loop.
    #[error("Transport is already listening")]
    AlreadyListening,

    /// A frame could not be decoded.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Frame length exceeds the configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Invalid network magic bytes.
    #[error("Invalid network magic: expected {expected:?}, got {actual:?}")]
    InvalidMagic { expected: [u8; 4], actual: [u8; 4] },

    /// Protocol version incompatible.
    #[error("Incompatible protocol version: {peer_version} (our version: {our_version})")]
    IncompatibleVersion { peer_version: u32, our_version: u32 },

    /// Handshake failed.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Handshake timed out.
    #[error("Handshake timeout")]
    HandshakeTimeout,

    /// The embedding application refused the peer.
    #[error("Peer rejected: {0}")]
    PeerRejected(String),

    /// Connection timed out.
    #[error("Connection timeout to {addr}")]
    ConnectionTimeout { addr: SocketAddr },

    /// Maximum connections reached.
    #[error("Maximum connections reached: {max}")]
    MaxConnectionsReached { max: usize },

    /// Peer not found.
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Channel send error.
    #[error("Channel send error: {0}")]
    ChannelSend(String),
}

impl P2pError {
    /// Whether the error means the remote side went away rather than
    /// misbehaved.
    pub fn is_disconnect(&self) -> bool {
        match self {
            P2pError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Result type for P2P operations.
pub type P2pResult<T> = Result<T, P2pError>;
