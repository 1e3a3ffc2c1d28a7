//! Node configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use dfs_p2p::config::DEFAULT_MAX_PEERS;
use dfs_p2p::TcpTransportConfig;
use dfs_store::{
    CasPathTransform, DeleteScope, PassthroughPathTransform, StoreConfig, DEFAULT_BLOCK_SIZE,
};

use crate::cli::{Cli, DecoderKind, DeleteScopeKind, HandshakeKind, PathTransformKind};

/// Complete node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// P2P listen address.
    pub listen_addr: SocketAddr,

    /// Root directory of the local store.
    pub store_root: PathBuf,

    /// Key to path mapping.
    pub path_transform: PathTransformKind,

    /// Hex characters per directory level for the CAS layout.
    pub block_size: usize,

    /// Delete granularity.
    pub delete_scope: DeleteScopeKind,

    /// Inbound message decoder.
    pub decoder: DecoderKind,

    /// Connection handshake.
    pub handshake: HandshakeKind,

    /// Handshake deadline.
    pub handshake_timeout: Option<Duration>,

    /// Maximum number of connected peers.
    pub max_peers: usize,

    /// Peers dialled on startup.
    pub bootstrap: Vec<SocketAddr>,

    /// Log level.
    pub log_level: String,
}

impl NodeConfig {
    /// Create a node configuration from CLI arguments.
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            listen_addr: cli.listen,
            store_root: cli.expanded_root(),
            path_transform: cli.path_transform,
            block_size: cli.block_size,
            delete_scope: cli.delete_scope,
            decoder: cli.decoder,
            handshake: cli.handshake,
            handshake_timeout: cli.handshake_timeout_ms.map(Duration::from_millis),
            max_peers: cli.max_peers,
            bootstrap: cli.bootstrap.clone().unwrap_or_default(),
            log_level: cli.log_level.clone(),
        }
    }

    /// Build transport configuration from node config.
    pub fn transport_config(&self) -> TcpTransportConfig {
        let mut config = TcpTransportConfig::new(self.listen_addr).with_max_peers(self.max_peers);
        if let Some(timeout) = self.handshake_timeout {
            config = config.with_handshake_timeout(timeout);
        }
        config
    }

    /// Build store configuration from node config.
    pub fn store_config(&self) -> StoreConfig {
        let scope = match self.delete_scope {
            DeleteScopeKind::Entry => DeleteScope::Entry,
            DeleteScopeKind::Shard => DeleteScope::Shard,
        };
        let config = StoreConfig::new(&self.store_root).with_delete_scope(scope);

        match self.path_transform {
            PathTransformKind::Cas => {
                config.with_path_transform(CasPathTransform::new(self.block_size))
            }
            PathTransformKind::Plain => config.with_path_transform(PassthroughPathTransform),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            store_root: PathBuf::from(dfs_store::DEFAULT_ROOT),
            path_transform: PathTransformKind::Cas,
            block_size: DEFAULT_BLOCK_SIZE,
            delete_scope: DeleteScopeKind::Entry,
            decoder: DecoderKind::Chunk,
            handshake: HandshakeKind::None,
            handshake_timeout: None,
            max_peers: DEFAULT_MAX_PEERS,
            bootstrap: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}
