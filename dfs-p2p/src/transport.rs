//! Transport abstraction.
//!
//! Keeps the node decoupled from the concrete link. [`TcpTransport`] is the
//! only implementation today.
//!
//! [`TcpTransport`]: crate::tcp::TcpTransport

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::P2pResult;
use crate::message::Message;
use crate::peer::Peer;

/// Something that moves bytes between this node and its peers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Handle type for connected peers.
    type Peer: Peer;

    /// Bind the listener and accept connections until [`close`](Self::close)
    /// is called. Bind failures are returned; per-connection failures are
    /// logged and only drop that connection.
    async fn listen_and_accept(&self) -> P2pResult<()>;

    /// Open an outbound connection and run it through the same handshake and
    /// `on_peer` pipeline as accepted ones.
    async fn dial(&self, addr: SocketAddr) -> P2pResult<Self::Peer>;

    /// Take the receiving end of the inbound queue. Only the first call
    /// returns `Some`.
    fn consume(&self) -> Option<mpsc::Receiver<Message>>;

    /// Stop accepting connections. Connected peers are left alone. Calling
    /// this more than once has no further effect.
    fn close(&self) -> P2pResult<()>;
}
