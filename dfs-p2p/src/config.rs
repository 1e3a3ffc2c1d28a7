//! Transport configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Network magic bytes used by [`MagicHandshake`](crate::handshake::MagicHandshake).
pub const NETWORK_MAGIC: [u8; 4] = [0x44, 0x46, 0x53, 0x31]; // "DFS1"

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";

/// Default maximum number of simultaneously active peers.
pub const DEFAULT_MAX_PEERS: usize = 128;

/// Default capacity of the inbound message queue.
pub const DEFAULT_INBOUND_CAPACITY: usize = 1024;

/// Default timeout for outbound connection attempts.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the TCP transport.
#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// Address to bind the listener to.
    pub listen_addr: SocketAddr,

    /// Maximum number of peers that may be connected at once. Connections
    /// accepted beyond this are dropped before the handshake.
    pub max_peers: usize,

    /// Capacity of the shared inbound queue. A full queue suspends the
    /// producing connection only.
    pub inbound_capacity: usize,

    /// Deadline for the handshake. `None` waits indefinitely.
    pub handshake_timeout: Option<Duration>,

    /// Timeout for establishing outbound connections.
    pub connect_timeout: Duration,

    /// Set `TCP_NODELAY` on every connection.
    pub nodelay: bool,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            max_peers: DEFAULT_MAX_PEERS,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            handshake_timeout: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            nodelay: true,
        }
    }
}

impl TcpTransportConfig {
    /// Create a new configuration with the specified listen address.
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    /// Set the maximum number of connected peers.
    pub fn with_max_peers(mut self, count: usize) -> Self {
        self.max_peers = count;
        self
    }

    /// Set the inbound queue capacity.
    pub fn with_inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity.max(1);
        self
    }

    /// Set the handshake deadline.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    /// Set the outbound connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable or disable `TCP_NODELAY`.
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}
