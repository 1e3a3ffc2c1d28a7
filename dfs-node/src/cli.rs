//! Command-line argument parsing.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// How keys map to paths on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PathTransformKind {
    /// SHA-1 sharded directories.
    Cas,
    /// `{root}/{key}/{key}`.
    Plain,
}

/// What a delete removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeleteScopeKind {
    /// Only the key's file.
    Entry,
    /// The key's whole first-level directory.
    Shard,
}

/// How inbound bytes are split into messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DecoderKind {
    /// Raw reads of up to 1028 bytes.
    Chunk,
    /// Length-prefixed frames.
    Frame,
}

/// Connection handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HandshakeKind {
    /// Accept every connection.
    None,
    /// Exchange network magic and protocol version.
    Magic,
}

/// dfs storage node.
#[derive(Parser, Debug, Clone)]
#[command(name = "dfs-node")]
#[command(about = "Distributed file store node")]
#[command(version)]
pub struct Cli {
    /// P2P listen address.
    #[arg(long, default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// Root directory of the local store.
    #[arg(long, default_value = "~/.dfs/store")]
    pub root: PathBuf,

    /// Key to path mapping.
    #[arg(long, value_enum, default_value_t = PathTransformKind::Cas)]
    pub path_transform: PathTransformKind,

    /// Hex characters per directory level for the CAS layout.
    #[arg(long, default_value_t = dfs_store::DEFAULT_BLOCK_SIZE)]
    pub block_size: usize,

    /// Delete granularity.
    #[arg(long, value_enum, default_value_t = DeleteScopeKind::Entry)]
    pub delete_scope: DeleteScopeKind,

    /// Inbound message decoder.
    #[arg(long, value_enum, default_value_t = DecoderKind::Chunk)]
    pub decoder: DecoderKind,

    /// Connection handshake.
    #[arg(long, value_enum, default_value_t = HandshakeKind::None)]
    pub handshake: HandshakeKind,

    /// Handshake deadline in milliseconds. Unlimited if unset.
    #[arg(long)]
    pub handshake_timeout_ms: Option<u64>,

    /// Maximum number of connected peers.
    #[arg(long, default_value_t = dfs_p2p::config::DEFAULT_MAX_PEERS)]
    pub max_peers: usize,

    /// Comma-separated list of peers to dial on startup.
    #[arg(long, value_delimiter = ',')]
    pub bootstrap: Option<Vec<SocketAddr>>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Expand the store root (handle ~ for home).
    pub fn expanded_root(&self) -> PathBuf {
        let path_str = self.root.to_string_lossy();
        if let Some(stripped) = path_str.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        }
        self.root.clone()
    }
}
