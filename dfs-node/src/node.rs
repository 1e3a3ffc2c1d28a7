//! Node orchestrator.
//!
//! Owns the local store and runs the transport: accept loop, bootstrap
//! dials and the inbound message drain.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tokio::sync::{broadcast, oneshot};

use dfs_p2p::{
    ChunkDecoder, Decoder, FrameDecoder, Handshake, MagicHandshake, Message, NopHandshake,
    PeerInfo, TcpTransport, Transport,
};
use dfs_store::Store;

use crate::cli::{DecoderKind, HandshakeKind};
use crate::config::NodeConfig;
use crate::shutdown::{shutdown_channel, wait_for_shutdown_signal, ShutdownTx};

/// Capacity of the node event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something observable that happened on the node.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// The listener is bound.
    Started {
        /// Bound listen address.
        addr: SocketAddr,
    },
    /// A peer passed the handshake.
    PeerConnected(PeerInfo),
    /// A peer sent a message.
    MessageReceived(Message),
    /// The node is stopping.
    ShuttingDown,
}

/// The main node structure.
pub struct Node {
    /// Node configuration.
    config: NodeConfig,

    /// Local store.
    store: Store,

    /// Shutdown signal sender.
    shutdown_tx: ShutdownTx,

    /// Node events.
    events_tx: broadcast::Sender<NodeEvent>,

    /// Receives the bound address once listening.
    bound_addr_tx: Mutex<Option<oneshot::Sender<SocketAddr>>>,
}

impl Node {
    /// Create a new node with the given configuration.
    pub fn new(config: NodeConfig) -> anyhow::Result<Self> {
        let store = Store::new(config.store_config());
        std::fs::create_dir_all(store.root())
            .with_context(|| format!("failed to create store root {}", store.root().display()))?;
        tracing::info!(root = %store.root().display(), "Store initialized");

        let (shutdown_tx, _) = shutdown_channel();
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            store,
            shutdown_tx,
            events_tx,
            bound_addr_tx: Mutex::new(None),
        })
    }

    /// Node configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Local store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Get the shutdown sender for external shutdown signals.
    pub fn shutdown_handle(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Subscribe to node events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<NodeEvent> {
        self.events_tx.subscribe()
    }

    /// Get a oneshot receiver that will receive the bound address when the
    /// node starts.
    pub fn bound_addr_receiver(&self) -> oneshot::Receiver<SocketAddr> {
        let (tx, rx) = oneshot::channel();
        *self
            .bound_addr_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(tx);
        rx
    }

    /// Run the node until SIGINT, SIGTERM or a shutdown request.
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!("Starting dfs node...");
        tracing::info!("  Listen address: {}", self.config.listen_addr);
        tracing::info!("  Store root: {}", self.store.root().display());
        tracing::info!("  Decoder: {:?}", self.config.decoder);
        tracing::info!("  Handshake: {:?}", self.config.handshake);

        match (self.config.handshake, self.config.decoder) {
            (HandshakeKind::None, DecoderKind::Chunk) => {
                self.serve(self.transport(NopHandshake, ChunkDecoder::default())).await
            }
            (HandshakeKind::None, DecoderKind::Frame) => {
                self.serve(self.transport(NopHandshake, FrameDecoder::default())).await
            }
            (HandshakeKind::Magic, DecoderKind::Chunk) => {
                self.serve(self.transport(MagicHandshake::default(), ChunkDecoder::default()))
                    .await
            }
            (HandshakeKind::Magic, DecoderKind::Frame) => {
                self.serve(self.transport(MagicHandshake::default(), FrameDecoder::default()))
                    .await
            }
        }
    }

    fn transport<H: Handshake, D: Decoder>(&self, handshake: H, decoder: D) -> TcpTransport<H, D> {
        let events_tx = self.events_tx.clone();

        TcpTransport::builder(self.config.transport_config())
            .handshake(handshake)
            .decoder(decoder)
            .on_peer(move |peer| {
                tracing::info!(peer = %peer.info(), "New peer");
                let _ = events_tx.send(NodeEvent::PeerConnected(peer.info().clone()));
                Ok(())
            })
            .build()
    }

    async fn serve<H: Handshake, D: Decoder>(
        &self,
        transport: TcpTransport<H, D>,
    ) -> anyhow::Result<()> {
        let transport = Arc::new(transport);
        let mut inbound = transport
            .consume()
            .context("inbound queue already taken")?;
        let bound_rx = transport.bound_addr_receiver();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let mut listener = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { transport.listen_and_accept().await })
        };

        let addr = tokio::select! {
            addr = bound_rx => addr.context("listener stopped before binding")?,
            result = &mut listener => {
                result??;
                anyhow::bail!("listener stopped before binding");
            }
        };
        self.announce_bound(addr);

        for peer in &self.config.bootstrap {
            let transport = Arc::clone(&transport);
            let peer = *peer;
            tokio::spawn(async move {
                match transport.dial(peer).await {
                    Ok(handle) => {
                        tracing::info!(peer = %handle.info(), "Connected to bootstrap peer");
                    }
                    Err(e) => {
                        tracing::warn!(addr = %peer, error = %e, "Failed to dial bootstrap peer");
                    }
                }
            });
        }

        let signal = wait_for_shutdown_signal();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                Some(msg) = inbound.recv() => {
                    self.handle_message(msg);
                }

                _ = shutdown_rx.recv() => {
                    tracing::info!("Shutdown requested");
                    break;
                }

                result = &mut signal => {
                    result.context("failed to install signal handlers")?;
                    break;
                }
            }
        }

        tracing::info!("Shutting down node...");
        let _ = self.events_tx.send(NodeEvent::ShuttingDown);
        transport.close()?;
        listener.await??;

        tracing::info!("Node shutdown complete");
        Ok(())
    }

    fn announce_bound(&self, addr: SocketAddr) {
        let bound_addr_tx = self
            .bound_addr_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(tx) = bound_addr_tx {
            let _ = tx.send(addr);
        }
        let _ = self.events_tx.send(NodeEvent::Started { addr });
    }

    fn handle_message(&self, msg: Message) {
        tracing::info!(from = %msg.from, bytes = msg.len(), "Received message");
        tracing::trace!(payload = ?msg.payload, "Message payload");
        let _ = self.events_tx.send(NodeEvent::MessageReceived(msg));
    }
}
