//! TCP transport.
//!
//! One task runs the accept loop and one task per connection runs the
//! pipeline:
//!
//! ```text
//! accept/dial ─▶ handshake ─▶ on_peer ─▶ register ─▶ decode loop ─▶ deregister
//!                    │            │
//!                    └── reject ──┴──▶ drop socket
//! ```
//!
//! Decoded payloads go onto one bounded queue read by a single consumer. A
//! full queue only stalls the connection that produced the message.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::FramedRead;

use crate::config::TcpTransportConfig;
use crate::decoder::{ChunkDecoder, Decoder};
use crate::error::{P2pError, P2pResult};
use crate::handshake::{Handshake, NopHandshake};
use crate::message::Message;
use crate::peer::{
    Connection, ConnectionDirection, Peer, PeerCommand, PeerHandle, PeerId, PeerInfo, PeerState,
};
use crate::registry::{PeerRegistry, SlotGuard};
use crate::transport::Transport;

/// Hook run once per peer after a successful handshake. Returning an error
/// drops the peer before it is registered.
pub type OnPeer = Arc<dyn Fn(&PeerHandle) -> P2pResult<()> + Send + Sync>;

/// State shared with every connection task.
struct Shared<H, D> {
    config: TcpTransportConfig,
    handshake: H,
    decoder: D,
    on_peer: Option<OnPeer>,
    registry: PeerRegistry,
    inbound_tx: mpsc::Sender<Message>,
    next_peer_id: AtomicU64,
}

impl<H, D> Shared<H, D> {
    fn next_peer_id(&self) -> PeerId {
        PeerId::new(self.next_peer_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Builder for [`TcpTransport`].
///
/// Strategies change the builder's type, so a transport is monomorphic over
/// its handshake and decoder.
pub struct TcpTransportBuilder<H = NopHandshake, D = ChunkDecoder> {
    config: TcpTransportConfig,
    handshake: H,
    decoder: D,
    on_peer: Option<OnPeer>,
}

impl<H: Handshake, D: Decoder> TcpTransportBuilder<H, D> {
    /// Use a different handshake.
    pub fn handshake<H2: Handshake>(self, handshake: H2) -> TcpTransportBuilder<H2, D> {
        TcpTransportBuilder {
            config: self.config,
            handshake,
            decoder: self.decoder,
            on_peer: self.on_peer,
        }
    }

    /// Use a different decoder.
    pub fn decoder<D2: Decoder>(self, decoder: D2) -> TcpTransportBuilder<H, D2> {
        TcpTransportBuilder {
            config: self.config,
            handshake: self.handshake,
            decoder,
            on_peer: self.on_peer,
        }
    }

    /// Set the hook invoked for every new peer.
    pub fn on_peer<F>(mut self, on_peer: F) -> Self
    where
        F: Fn(&PeerHandle) -> P2pResult<()> + Send + Sync + 'static,
    {
        self.on_peer = Some(Arc::new(on_peer));
        self
    }

    /// Create the transport. Nothing is bound until
    /// [`listen_and_accept`](Transport::listen_and_accept).
    pub fn build(self) -> TcpTransport<H, D> {
        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.inbound_capacity.max(1));
        let (shutdown_tx, _) = watch::channel(false);
        let registry = PeerRegistry::new(self.config.max_peers);

        TcpTransport {
            shared: Arc::new(Shared {
                config: self.config,
                handshake: self.handshake,
                decoder: self.decoder,
                on_peer: self.on_peer,
                registry,
                inbound_tx,
                next_peer_id: AtomicU64::new(1),
            }),
            inbound_rx: Mutex::new(Some(inbound_rx)),
            shutdown_tx,
            listening: AtomicBool::new(false),
            local_addr: Mutex::new(None),
            bound_addr_tx: Mutex::new(None),
        }
    }
}

/// TCP implementation of [`Transport`].
pub struct TcpTransport<H = NopHandshake, D = ChunkDecoder> {
    shared: Arc<Shared<H, D>>,
    inbound_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    shutdown_tx: watch::Sender<bool>,
    listening: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
    bound_addr_tx: Mutex<Option<oneshot::Sender<SocketAddr>>>,
}

impl TcpTransport {
    /// Start building a transport with the default handshake and decoder.
    pub fn builder(config: TcpTransportConfig) -> TcpTransportBuilder {
        TcpTransportBuilder {
            config,
            handshake: NopHandshake,
            decoder: ChunkDecoder::default(),
            on_peer: None,
        }
    }

    /// Transport with the default handshake and decoder and no hook.
    pub fn new(config: TcpTransportConfig) -> Self {
        Self::builder(config).build()
    }
}

impl<H: Handshake, D: Decoder> TcpTransport<H, D> {
    /// Get a oneshot receiver that will receive the bound address once the
    /// listener is up. Useful when listening on port 0.
    pub fn bound_addr_receiver(&self) -> oneshot::Receiver<SocketAddr> {
        let (tx, rx) = oneshot::channel();
        *lock(&self.bound_addr_tx) = Some(tx);
        rx
    }

    /// Address the listener is bound to, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.local_addr)
    }

    /// Transport configuration.
    pub fn config(&self) -> &TcpTransportConfig {
        &self.shared.config
    }

    /// Snapshot of the active peers.
    pub async fn peers(&self) -> Vec<PeerInfo> {
        self.shared.registry.snapshot().await
    }

    /// Number of active peers.
    pub async fn peer_count(&self) -> usize {
        self.shared.registry.len().await
    }

    /// Handle to an active peer.
    pub async fn peer(&self, peer_id: &PeerId) -> Option<PeerHandle> {
        self.shared.registry.get(peer_id).await
    }

    /// Queue raw bytes for a peer.
    pub async fn send_to(&self, peer_id: &PeerId, payload: Bytes) -> P2pResult<()> {
        self.shared.registry.send_to(peer_id, payload).await
    }

    /// Close one peer's connection.
    pub async fn disconnect(&self, peer_id: &PeerId) -> P2pResult<()> {
        self.shared.registry.disconnect(peer_id).await
    }

    fn spawn_inbound(&self, stream: TcpStream, addr: SocketAddr) {
        let Some(slot) = self.shared.registry.try_reserve() else {
            tracing::debug!(addr = %addr, "Rejecting inbound connection: no slots available");
            drop(stream);
            return;
        };

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            match establish(&shared, stream, addr, ConnectionDirection::Inbound).await {
                Ok(established) => drive(shared, established, slot).await,
                Err(e) => {
                    tracing::debug!(addr = %addr, error = %e, "Dropping inbound connection");
                }
            }
        });
    }
}

#[async_trait]
impl<H: Handshake, D: Decoder> Transport for TcpTransport<H, D> {
    type Peer = PeerHandle;

    async fn listen_and_accept(&self) -> P2pResult<()> {
        if self.listening.swap(true, Ordering::AcqRel) {
            return Err(P2pError::AlreadyListening);
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow() {
            return Ok(());
        }

        let addr = self.shared.config.listen_addr;
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                // Allow a retry once the address frees up.
                self.listening.store(false, Ordering::Release);
                return Err(P2pError::Bind { addr, source });
            }
        };
        let local_addr = listener.local_addr()?;
        *lock(&self.local_addr) = Some(local_addr);
        let bound_addr_tx = lock(&self.bound_addr_tx).take();
        if let Some(tx) = bound_addr_tx {
            let _ = tx.send(local_addr);
        }
        tracing::info!(addr = %local_addr, "Listening for inbound connections");

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    tracing::info!(addr = %local_addr, "Listener shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            tracing::debug!(addr = %addr, "Accepted inbound connection");
                            self.spawn_inbound(stream, addr);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn dial(&self, addr: SocketAddr) -> P2pResult<PeerHandle> {
        let slot = self
            .shared
            .registry
            .try_reserve()
            .ok_or(P2pError::MaxConnectionsReached {
                max: self.shared.config.max_peers,
            })?;

        tracing::debug!(addr = %addr, "Connecting to peer");
        let stream = tokio::time::timeout(
            self.shared.config.connect_timeout,
            TcpStream::connect(addr),
        )
        .await
        .map_err(|_| P2pError::ConnectionTimeout { addr })??;

        let established =
            establish(&self.shared, stream, addr, ConnectionDirection::Outbound).await?;
        let handle = established.handle.clone();
        tokio::spawn(drive(Arc::clone(&self.shared), established, slot));

        Ok(handle)
    }

    fn consume(&self) -> Option<mpsc::Receiver<Message>> {
        lock(&self.inbound_rx).take()
    }

    fn close(&self) -> P2pResult<()> {
        self.shutdown_tx.send_replace(true);
        Ok(())
    }
}

/// A peer that passed the handshake and the `on_peer` hook.
struct Established {
    handle: PeerHandle,
    stream: TcpStream,
    command_rx: mpsc::UnboundedReceiver<PeerCommand>,
    state: PeerState,
}

async fn establish<H: Handshake, D: Decoder>(
    shared: &Shared<H, D>,
    stream: TcpStream,
    addr: SocketAddr,
    direction: ConnectionDirection,
) -> P2pResult<Established> {
    if shared.config.nodelay {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(addr = %addr, error = %e, "Failed to set TCP_NODELAY");
        }
    }

    let mut state = PeerState::default();
    let mut conn = Connection::new(shared.next_peer_id(), addr, direction, stream);

    state.transition_to(PeerState::Handshaking);
    let outcome = match shared.config.handshake_timeout {
        Some(limit) => tokio::time::timeout(limit, shared.handshake.handshake(&mut conn))
            .await
            .unwrap_or_else(|_| Err(P2pError::HandshakeTimeout)),
        None => shared.handshake.handshake(&mut conn).await,
    };
    if let Err(e) = outcome {
        state.transition_to(PeerState::Rejected);
        tracing::debug!(addr = %addr, peer = %conn.id(), error = %e, "Handshake failed");
        return Err(e);
    }

    let (info, stream) = conn.into_parts();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let handle = PeerHandle::new(info, command_tx);

    if let Some(on_peer) = &shared.on_peer {
        if let Err(e) = on_peer(&handle) {
            state.transition_to(PeerState::Rejected);
            tracing::debug!(addr = %addr, peer = %handle.id(), error = %e, "Peer rejected");
            return Err(e);
        }
    }

    state.transition_to(PeerState::Active);
    shared.registry.insert(handle.clone()).await;
    tracing::info!(peer = %handle.info(), "Peer connected");

    Ok(Established {
        handle,
        stream,
        command_rx,
        state,
    })
}

/// Connection task body: decode inbound bytes and serve commands until
/// either side ends the connection.
async fn drive<H: Handshake, D: Decoder>(
    shared: Arc<Shared<H, D>>,
    established: Established,
    _slot: SlotGuard,
) {
    let Established {
        handle,
        stream,
        mut command_rx,
        mut state,
    } = established;
    let info = handle.info().clone();
    let peer_id = info.id;
    let from = info.addr;
    // The registry keeps the sender alive; our copy must not.
    drop(handle);

    let (read_half, mut write_half) = stream.into_split();
    let mut frames = FramedRead::new(read_half, shared.decoder.new_codec());
    // Decoded message waiting for queue space. Reading pauses meanwhile,
    // commands do not.
    let mut pending: Option<Message> = None;

    loop {
        tokio::select! {
            command = command_rx.recv() => {
                match command {
                    Some(PeerCommand::Send(payload)) => {
                        if let Err(e) = write_half.write_all(&payload).await {
                            tracing::debug!(peer = %peer_id, error = %e, "Write failed");
                            break;
                        }
                    }
                    Some(PeerCommand::Disconnect) | None => {
                        tracing::debug!(peer = %peer_id, "Disconnect requested");
                        break;
                    }
                }
            }

            permit = shared.inbound_tx.reserve(), if pending.is_some() => {
                match permit {
                    Ok(permit) => {
                        if let Some(message) = pending.take() {
                            permit.send(message);
                        }
                    }
                    Err(_) => {
                        tracing::debug!(peer = %peer_id, "Inbound consumer gone");
                        break;
                    }
                }
            }

            frame = frames.next(), if pending.is_none() => {
                match frame {
                    Some(Ok(payload)) => {
                        pending = Some(Message::new(from, payload));
                    }
                    Some(Err(e)) if e.is_disconnect() => {
                        tracing::debug!(peer = %peer_id, error = %e, "Connection lost");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(peer = %peer_id, error = %e, "Decode error");
                        break;
                    }
                    None => {
                        tracing::debug!(peer = %peer_id, "Peer closed connection");
                        break;
                    }
                }
            }
        }
    }

    let _ = write_half.shutdown().await;
    shared.registry.remove(&peer_id).await;
    state.transition_to(PeerState::Closed);
    tracing::info!(
        peer = %peer_id,
        addr = %from,
        duration = ?info.connection_duration(),
        "Peer disconnected"
    );
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
