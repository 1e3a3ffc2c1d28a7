//! Peer-to-peer transport for the dfs storage node.
//!
//! This crate accepts and dials TCP peers and turns their byte streams into
//! [`Message`]s, including:
//!
//! - Pluggable handshakes run once per connection
//! - Pluggable decoders (raw chunks or length-prefixed frames)
//! - An `on_peer` hook that can veto a peer before it is registered
//! - A bounded inbound queue with a single consumer
//!
//! # Architecture
//!
//! Every connection runs in its own tokio task. Decoded messages flow to the
//! consumer over one channel; commands flow to each peer over its own.
//!
//! ```text
//! TcpTransport::listen_and_accept()
//! ├── Peer Task 1 (handshake, then read/write loop)
//! ├── Peer Task 2 (handshake, then read/write loop)
//! └── ...           │
//!                   ▼
//!         inbound queue ──▶ consume()
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use dfs_p2p::{FrameDecoder, MagicHandshake, TcpTransport, TcpTransportConfig, Transport};
//!
//! let config = TcpTransportConfig::new("0.0.0.0:3000".parse().unwrap());
//! let transport = TcpTransport::builder(config)
//!     .handshake(MagicHandshake::default())
//!     .decoder(FrameDecoder::default())
//!     .on_peer(|peer| {
//!         tracing::info!(peer = %peer.info(), "new peer");
//!         Ok(())
//!     })
//!     .build();
//!
//! let mut inbound = transport.consume().unwrap();
//! tokio::spawn(async move {
//!     while let Some(msg) = inbound.recv().await {
//!         println!("{msg}");
//!     }
//! });
//! transport.listen_and_accept().await?;
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod decoder;
pub mod error;
pub mod handshake;
pub mod message;
pub mod peer;
pub mod registry;
pub mod tcp;
pub mod transport;

// Re-export main types
pub use config::{TcpTransportConfig, NETWORK_MAGIC, PROTOCOL_VERSION};
pub use decoder::{ChunkDecoder, Decoder, FrameCodec, FrameDecoder};
pub use error::{P2pError, P2pResult};
pub use handshake::{Handshake, HandshakeFn, MagicHandshake, NopHandshake};
pub use message::Message;
pub use peer::{Connection, ConnectionDirection, Peer, PeerHandle, PeerId, PeerInfo, PeerState};
pub use registry::PeerRegistry;
pub use tcp::{OnPeer, TcpTransport, TcpTransportBuilder};
pub use transport::Transport;
