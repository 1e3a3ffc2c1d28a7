//! Connection and peer handles.
//!
//! A [`Connection`] is what the handshake sees: the raw stream of a freshly
//! accepted or dialled socket. Once the handshake and the `on_peer` hook have
//! both accepted it, the connection task owns the socket and the rest of the
//! system talks to the peer through a cloneable [`PeerHandle`].

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::{P2pError, P2pResult};
use crate::peer::{ConnectionDirection, PeerId, PeerInfo};

/// Capability every peer exposes, regardless of the underlying link.
pub trait Peer: Send + Sync {
    /// Session-local identifier.
    fn id(&self) -> PeerId;

    /// Address of the remote end.
    fn remote_addr(&self) -> SocketAddr;

    /// Who opened the connection.
    fn direction(&self) -> ConnectionDirection;

    /// Close the connection. Closing an already closed peer is not an error.
    fn close(&self) -> P2pResult<()>;
}

/// A connection that has not completed its handshake yet.
#[derive(Debug)]
pub struct Connection {
    info: PeerInfo,
    stream: TcpStream,
}

impl Connection {
    pub(crate) fn new(
        id: PeerId,
        addr: SocketAddr,
        direction: ConnectionDirection,
        stream: TcpStream,
    ) -> Self {
        Self {
            info: PeerInfo::new(id, addr, direction),
            stream,
        }
    }

    /// Session-local identifier the peer will carry once active.
    pub fn id(&self) -> PeerId {
        self.info.id
    }

    /// Address of the remote end.
    pub fn remote_addr(&self) -> SocketAddr {
        self.info.addr
    }

    /// Who opened the connection.
    pub fn direction(&self) -> ConnectionDirection {
        self.info.direction
    }

    /// Raw stream, for handshakes that exchange bytes.
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub(crate) fn into_parts(self) -> (PeerInfo, TcpStream) {
        (self.info, self.stream)
    }
}

/// Commands that can be sent to a connection task.
#[derive(Debug)]
pub enum PeerCommand {
    /// Write raw bytes to the peer.
    Send(Bytes),
    /// Stop the connection task and drop the socket.
    Disconnect,
}

/// Handle to an active peer.
///
/// Commands go through an unbounded channel so callers never block on a slow
/// peer.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    info: PeerInfo,
    command_tx: mpsc::UnboundedSender<PeerCommand>,
}

impl PeerHandle {
    pub(crate) fn new(info: PeerInfo, command_tx: mpsc::UnboundedSender<PeerCommand>) -> Self {
        Self { info, command_tx }
    }

    /// Connection metadata.
    pub fn info(&self) -> &PeerInfo {
        &self.info
    }

    /// Queue raw bytes for the peer. Framing is up to the caller.
    pub fn send(&self, payload: Bytes) -> P2pResult<()> {
        self.command_tx
            .send(PeerCommand::Send(payload))
            .map_err(|_| P2pError::ChannelSend(format!("{} is closed", self.info.id)))
    }

    /// Whether the connection task has ended.
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }
}

impl Peer for PeerHandle {
    fn id(&self) -> PeerId {
        self.info.id
    }

    fn remote_addr(&self) -> SocketAddr {
        self.info.addr
    }

    fn direction(&self) -> ConnectionDirection {
        self.info.direction
    }

    fn close(&self) -> P2pResult<()> {
        // A closed channel means the task is already gone.
        let _ = self.command_tx.send(PeerCommand::Disconnect);
        Ok(())
    }
}
