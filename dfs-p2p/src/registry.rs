//! Active peer registry.
//!
//! Tracks connection slots and the handles of peers that completed their
//! handshake. Slots are taken when a connection is accepted or dialled, so
//! the peer limit also covers connections still in their handshake.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::RwLock;

use crate::error::{P2pError, P2pResult};
use crate::peer::{Peer, PeerHandle, PeerId, PeerInfo};

/// Registry of active peers, shared by the accept loop and every
/// connection task.
#[derive(Debug)]
pub struct PeerRegistry {
    max_peers: usize,
    /// Connections holding a slot, registered or not.
    slots_in_use: Arc<AtomicUsize>,
    peers: RwLock<HashMap<PeerId, PeerHandle>>,
}

impl PeerRegistry {
    /// Create an empty registry with the given slot limit.
    pub fn new(max_peers: usize) -> Self {
        Self {
            max_peers,
            slots_in_use: Arc::new(AtomicUsize::new(0)),
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Take a connection slot, or `None` if all are in use.
    ///
    /// The slot is released when the returned guard is dropped.
    pub fn try_reserve(&self) -> Option<SlotGuard> {
        let reserved = self
            .slots_in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < self.max_peers).then_some(used + 1)
            })
            .is_ok();

        reserved.then(|| SlotGuard {
            slots_in_use: Arc::clone(&self.slots_in_use),
        })
    }

    /// Number of slots currently taken.
    pub fn slots_in_use(&self) -> usize {
        self.slots_in_use.load(Ordering::Acquire)
    }

    /// Register an active peer.
    pub async fn insert(&self, handle: PeerHandle) {
        self.peers.write().await.insert(handle.id(), handle);
    }

    /// Remove a peer.
    pub async fn remove(&self, peer_id: &PeerId) -> Option<PeerHandle> {
        self.peers.write().await.remove(peer_id)
    }

    /// Get a handle by ID.
    pub async fn get(&self, peer_id: &PeerId) -> Option<PeerHandle> {
        self.peers.read().await.get(peer_id).cloned()
    }

    /// Number of active peers.
    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Whether no peer is active.
    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Snapshot of all active peers.
    pub async fn snapshot(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self
            .peers
            .read()
            .await
            .values()
            .map(|handle| handle.info().clone())
            .collect();
        peers.sort_by_key(|info| info.id);
        peers
    }

    /// Queue raw bytes for a specific peer.
    /// Uses unbounded channel so this never blocks.
    pub async fn send_to(&self, peer_id: &PeerId, payload: Bytes) -> P2pResult<()> {
        self.get(peer_id)
            .await
            .ok_or_else(|| P2pError::PeerNotFound(peer_id.to_string()))?
            .send(payload)
    }

    /// Ask a peer's connection task to stop.
    pub async fn disconnect(&self, peer_id: &PeerId) -> P2pResult<()> {
        self.get(peer_id)
            .await
            .ok_or_else(|| P2pError::PeerNotFound(peer_id.to_string()))?
            .close()
    }
}

/// A taken connection slot.
#[derive(Debug)]
pub struct SlotGuard {
    slots_in_use: Arc<AtomicUsize>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slots_in_use.fetch_sub(1, Ordering::AcqRel);
    }
}
