//! Handshake strategies.
//!
//! A handshake runs exactly once per connection, after the TCP connection is
//! established and before any message is decoded. Returning an error rejects
//! the connection: it is closed and the peer is never registered.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::config::{NETWORK_MAGIC, PROTOCOL_VERSION};
use crate::error::{P2pError, P2pResult};
use crate::peer::Connection;

/// Magic + big-endian version.
const HELLO_SIZE: usize = 8;

/// Pre-flight check run on every new connection.
#[async_trait]
pub trait Handshake: Send + Sync + 'static {
    /// Negotiate with, or vet, the remote side.
    async fn handshake(&self, conn: &mut Connection) -> P2pResult<()>;
}

/// Handshake that accepts every connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopHandshake;

#[async_trait]
impl Handshake for NopHandshake {
    async fn handshake(&self, _conn: &mut Connection) -> P2pResult<()> {
        Ok(())
    }
}

/// Handshake backed by a synchronous function of the connection.
///
/// ```ignore
/// let allow_local = HandshakeFn::new(|conn: &Connection| {
///     if conn.remote_addr().ip().is_loopback() {
///         Ok(())
///     } else {
///         Err(P2pError::HandshakeFailed("not a local peer".into()))
///     }
/// });
/// ```
pub struct HandshakeFn<F> {
    check: F,
}

impl<F> HandshakeFn<F>
where
    F: Fn(&Connection) -> P2pResult<()> + Send + Sync + 'static,
{
    /// Wrap a function as a handshake.
    pub fn new(check: F) -> Self {
        Self { check }
    }
}

#[async_trait]
impl<F> Handshake for HandshakeFn<F>
where
    F: Fn(&Connection) -> P2pResult<()> + Send + Sync + 'static,
{
    async fn handshake(&self, conn: &mut Connection) -> P2pResult<()> {
        (self.check)(conn)
    }
}

/// Hello exchange: both sides send network magic and protocol version and
/// reject a peer whose values differ from ours.
#[derive(Debug, Clone, Copy)]
pub struct MagicHandshake {
    magic: [u8; 4],
    version: u32,
}

impl MagicHandshake {
    /// Create a handshake with explicit magic and version.
    pub fn new(magic: [u8; 4], version: u32) -> Self {
        Self { magic, version }
    }

    fn hello(&self) -> [u8; HELLO_SIZE] {
        let mut hello = [0u8; HELLO_SIZE];
        hello[..4].copy_from_slice(&self.magic);
        hello[4..].copy_from_slice(&self.version.to_be_bytes());
        hello
    }

    fn validate(&self, received: &[u8; HELLO_SIZE]) -> P2pResult<()> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&received[..4]);
        if magic != self.magic {
            return Err(P2pError::InvalidMagic {
                expected: self.magic,
                actual: magic,
            });
        }

        let mut version = [0u8; 4];
        version.copy_from_slice(&received[4..]);
        let peer_version = u32::from_be_bytes(version);
        // Exact match for now
        if peer_version != self.version {
            return Err(P2pError::IncompatibleVersion {
                peer_version,
                our_version: self.version,
            });
        }

        Ok(())
    }
}

impl Default for MagicHandshake {
    fn default() -> Self {
        Self::new(NETWORK_MAGIC, PROTOCOL_VERSION)
    }
}

#[async_trait]
impl Handshake for MagicHandshake {
    async fn handshake(&self, conn: &mut Connection) -> P2pResult<()> {
        let stream = conn.stream_mut();
        stream.write_all(&self.hello()).await?;
        stream.flush().await?;

        let mut received = [0u8; HELLO_SIZE];
        stream.read_exact(&mut received).await?;
        self.validate(&received)
    }
}
