//! Acceptance tests for the TCP transport.
//!
//! These tests run real sockets on loopback and verify:
//! 1. Delivery - N peers × M framed messages arrive with per-peer order
//! 2. Handshake rejection - rejected peers never reach `on_peer` or the queue
//! 3. Peer veto - `on_peer` errors drop the peer
//! 4. Magic handshake - matching nodes connect, mismatched ones do not
//! 5. Lifecycle - close stops accepting, peer limits, handshake deadlines
//! 6. Peer handles - sending to and disconnecting a registered peer

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use dfs_p2p::{
    Connection, Decoder, FrameCodec, FrameDecoder, Handshake, HandshakeFn, MagicHandshake,
    Message, P2pError, P2pResult, Peer, TcpTransport, TcpTransportConfig, Transport,
};

/// Timeout for anything that should happen promptly on loopback.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn test_config() -> TcpTransportConfig {
    TcpTransportConfig::new("127.0.0.1:0".parse().unwrap())
}

/// Start a transport's accept loop and return its bound address.
async fn start_transport<H: Handshake, D: Decoder>(
    transport: TcpTransport<H, D>,
) -> (
    Arc<TcpTransport<H, D>>,
    SocketAddr,
    JoinHandle<P2pResult<()>>,
) {
    let transport = Arc::new(transport);
    let addr_rx = transport.bound_addr_receiver();

    let handle = {
        let transport = Arc::clone(&transport);
        tokio::spawn(async move { transport.listen_and_accept().await })
    };

    let addr = addr_rx.await.expect("Failed to get bound address");
    (transport, addr, handle)
}

/// Wait for a condition to become true, polling periodically.
async fn wait_for<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    loop {
        if condition().await {
            return true;
        }
        if start.elapsed() > TEST_TIMEOUT {
            return false;
        }
        sleep(Duration::from_millis(20)).await;
    }
}

async fn recv_n(inbound: &mut mpsc::Receiver<Message>, n: usize) -> Vec<Message> {
    let mut received = Vec::with_capacity(n);
    while received.len() < n {
        let msg = timeout(TEST_TIMEOUT, inbound.recv())
            .await
            .expect("Timed out waiting for messages")
            .expect("Inbound queue closed");
        received.push(msg);
    }
    received
}

/// Assert the remote side dropped the connection.
async fn assert_closed_by_peer(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    let result = timeout(TEST_TIMEOUT, stream.read(&mut buf))
        .await
        .expect("Connection was not closed");
    match result {
        Ok(0) | Err(_) => {}
        Ok(n) => panic!("Expected the connection to close, read {n} bytes"),
    }
}

// ============================================================================
// Test 1: Delivery
// ============================================================================

#[tokio::test]
async fn test_many_peers_framed_messages_keep_per_peer_order() {
    const PEERS: usize = 4;
    const MESSAGES: usize = 25;

    let transport = TcpTransport::builder(test_config())
        .decoder(FrameDecoder::default())
        .build();
    let mut inbound = transport.consume().unwrap();
    let (transport, addr, listener) = start_transport(transport).await;

    let mut clients = Vec::new();
    for peer in 0..PEERS {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut wire = Vec::new();
        for seq in 0..MESSAGES {
            let payload = format!("peer-{peer}-msg-{seq}");
            wire.extend_from_slice(&FrameCodec::frame(payload.as_bytes()).unwrap());
        }
        stream.write_all(&wire).await.unwrap();
        clients.push((peer, stream.local_addr().unwrap(), stream));
    }

    let received = recv_n(&mut inbound, PEERS * MESSAGES).await;

    let mut by_sender: HashMap<SocketAddr, Vec<String>> = HashMap::new();
    for msg in received {
        by_sender
            .entry(msg.from)
            .or_default()
            .push(String::from_utf8(msg.payload.to_vec()).unwrap());
    }
    assert_eq!(by_sender.len(), PEERS);

    for (peer, local_addr, _) in &clients {
        let expected: Vec<String> = (0..MESSAGES)
            .map(|seq| format!("peer-{peer}-msg-{seq}"))
            .collect();
        assert_eq!(by_sender[local_addr], expected);
    }

    assert!(wait_for(|| async { transport.peer_count().await == PEERS }).await);

    transport.close().unwrap();
    listener.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_chunk_decoder_delivers_raw_bytes() {
    let transport = TcpTransport::new(test_config());
    let mut inbound = transport.consume().unwrap();
    let (transport, addr, _listener) = start_transport(transport).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"hi how are you bruh").await.unwrap();

    let mut collected = Vec::new();
    while collected.len() < 19 {
        let msg = timeout(TEST_TIMEOUT, inbound.recv()).await.unwrap().unwrap();
        assert_eq!(msg.from, client.local_addr().unwrap());
        collected.extend_from_slice(&msg.payload);
    }
    assert_eq!(collected, b"hi how are you bruh");

    transport.close().unwrap();
}

#[tokio::test]
async fn test_stream_frame_delivered_at_eof() {
    let transport = TcpTransport::builder(test_config())
        .decoder(FrameDecoder::default())
        .build();
    let mut inbound = transport.consume().unwrap();
    let (transport, addr, _listener) = start_transport(transport).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(&[dfs_p2p::decoder::CONTROL_STREAM])
        .await
        .unwrap();
    client.write_all(b"streamed ").await.unwrap();
    client.write_all(b"content").await.unwrap();
    client.shutdown().await.unwrap();

    let received = recv_n(&mut inbound, 1).await;
    assert_eq!(received[0].payload, Bytes::from_static(b"streamed content"));

    assert!(wait_for(|| async { transport.peer_count().await == 0 }).await);
    transport.close().unwrap();
}

// ============================================================================
// Test 2: Handshake rejection
// ============================================================================

#[tokio::test]
async fn test_rejected_handshake_never_reaches_on_peer() {
    let on_peer_calls = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&on_peer_calls);

    let transport = TcpTransport::builder(test_config())
        .handshake(HandshakeFn::new(|_conn: &Connection| {
            Err(P2pError::HandshakeFailed("denied".to_string()))
        }))
        .on_peer(move |_peer| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build();
    let mut inbound = transport.consume().unwrap();
    let (transport, addr, _listener) = start_transport(transport).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    let _ = client.write_all(b"should never be delivered").await;
    assert_closed_by_peer(&mut client).await;

    assert_eq!(on_peer_calls.load(Ordering::SeqCst), 0);
    assert!(inbound.try_recv().is_err());
    assert_eq!(transport.peer_count().await, 0);

    transport.close().unwrap();
}

#[tokio::test]
async fn test_handshake_timeout_rejects_silent_peer() {
    let on_peer_calls = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&on_peer_calls);

    let transport = TcpTransport::builder(
        test_config().with_handshake_timeout(Duration::from_millis(200)),
    )
    .handshake(MagicHandshake::default())
    .on_peer(move |_peer| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .build();
    let (transport, addr, _listener) = start_transport(transport).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    let mut hello = [0u8; 8];
    client.read_exact(&mut hello).await.unwrap();
    assert_eq!(&hello[..4], &dfs_p2p::NETWORK_MAGIC);

    // Never answer; the server gives up.
    assert_closed_by_peer(&mut client).await;
    assert_eq!(on_peer_calls.load(Ordering::SeqCst), 0);

    transport.close().unwrap();
}

// ============================================================================
// Test 3: Peer veto
// ============================================================================

#[tokio::test]
async fn test_on_peer_error_drops_peer() {
    let transport = TcpTransport::builder(test_config())
        .on_peer(|peer| Err(P2pError::PeerRejected(format!("{} not welcome", peer.id()))))
        .build();
    let mut inbound = transport.consume().unwrap();
    let (transport, addr, _listener) = start_transport(transport).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    let _ = client.write_all(b"hello?").await;
    assert_closed_by_peer(&mut client).await;

    assert!(inbound.try_recv().is_err());
    assert_eq!(transport.peer_count().await, 0);

    transport.close().unwrap();
}

// ============================================================================
// Test 4: Magic handshake
// ============================================================================

#[tokio::test]
async fn test_magic_handshake_nodes_exchange_messages() {
    let server = TcpTransport::builder(test_config())
        .handshake(MagicHandshake::default())
        .decoder(FrameDecoder::default())
        .build();
    let mut server_inbound = server.consume().unwrap();
    let (server, addr, _listener) = start_transport(server).await;

    let client = TcpTransport::builder(test_config())
        .handshake(MagicHandshake::default())
        .decoder(FrameDecoder::default())
        .build();

    let peer = client.dial(addr).await.unwrap();
    assert_eq!(peer.remote_addr(), addr);
    assert!(peer.info().is_outbound());
    assert_eq!(client.peer_count().await, 1);

    peer.send(FrameCodec::frame(b"ping").unwrap()).unwrap();

    let received = recv_n(&mut server_inbound, 1).await;
    assert_eq!(received[0].payload, Bytes::from_static(b"ping"));
    assert!(wait_for(|| async { server.peer_count().await == 1 }).await);

    server.close().unwrap();
}

#[tokio::test]
async fn test_magic_handshake_mismatch_is_rejected() {
    let server = TcpTransport::builder(test_config())
        .handshake(MagicHandshake::default())
        .build();
    let (server, addr, _listener) = start_transport(server).await;

    let client = TcpTransport::builder(test_config())
        .handshake(MagicHandshake::new(*b"XXXX", 1))
        .build();

    let result = client.dial(addr).await;
    assert!(matches!(result, Err(P2pError::InvalidMagic { .. })));
    assert_eq!(client.peer_count().await, 0);

    sleep(Duration::from_millis(100)).await;
    assert_eq!(server.peer_count().await, 0);

    server.close().unwrap();
}

// ============================================================================
// Test 5: Lifecycle
// ============================================================================

#[tokio::test]
async fn test_close_stops_accepting() {
    let (transport, addr, listener) = start_transport(TcpTransport::new(test_config())).await;

    transport.close().unwrap();
    timeout(TEST_TIMEOUT, listener)
        .await
        .expect("Accept loop did not stop")
        .unwrap()
        .unwrap();

    assert!(TcpStream::connect(addr).await.is_err());
    assert!(transport.close().is_ok());
}

#[tokio::test]
async fn test_close_leaves_connected_peers() {
    let transport = TcpTransport::new(test_config());
    let mut inbound = transport.consume().unwrap();
    let (transport, addr, listener) = start_transport(transport).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    assert!(wait_for(|| async { transport.peer_count().await == 1 }).await);

    transport.close().unwrap();
    listener.await.unwrap().unwrap();

    client.write_all(b"still here").await.unwrap();
    let received = recv_n(&mut inbound, 1).await;
    assert_eq!(received[0].from, client.local_addr().unwrap());
}

#[tokio::test]
async fn test_connections_beyond_limit_are_dropped() {
    let (transport, addr, _listener) =
        start_transport(TcpTransport::new(test_config().with_max_peers(1))).await;

    let _first = TcpStream::connect(addr).await.unwrap();
    assert!(wait_for(|| async { transport.peer_count().await == 1 }).await);

    let mut second = TcpStream::connect(addr).await.unwrap();
    assert_closed_by_peer(&mut second).await;
    assert_eq!(transport.peer_count().await, 1);

    transport.close().unwrap();
}

// ============================================================================
// Test 6: Peer handles
// ============================================================================

#[tokio::test]
async fn test_send_to_and_disconnect_registered_peer() {
    let (transport, addr, _listener) = start_transport(TcpTransport::new(test_config())).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    assert!(wait_for(|| async { transport.peer_count().await == 1 }).await);

    let peers = transport.peers().await;
    let peer_id = peers[0].id;
    assert!(peers[0].is_inbound());
    assert_eq!(peers[0].addr, client.local_addr().unwrap());

    transport
        .send_to(&peer_id, Bytes::from_static(b"welcome"))
        .await
        .unwrap();
    let mut buf = [0u8; 7];
    timeout(TEST_TIMEOUT, client.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"welcome");

    transport.disconnect(&peer_id).await.unwrap();
    assert_closed_by_peer(&mut client).await;
    assert!(wait_for(|| async { transport.peer_count().await == 0 }).await);

    let gone = transport.send_to(&peer_id, Bytes::new()).await;
    assert!(matches!(gone, Err(P2pError::PeerNotFound(_))));

    transport.close().unwrap();
}

#[tokio::test]
async fn test_disconnect_while_inbound_queue_is_full() {
    let transport = TcpTransport::builder(test_config().with_inbound_capacity(1))
        .decoder(FrameDecoder::default())
        .build();
    // Taken but never drained.
    let _inbound = transport.consume().unwrap();
    let (transport, addr, _listener) = start_transport(transport).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    let mut wire = Vec::new();
    for seq in 0..3 {
        let payload = format!("backlog-{seq}");
        wire.extend_from_slice(&FrameCodec::frame(payload.as_bytes()).unwrap());
    }
    client.write_all(&wire).await.unwrap();
    assert!(wait_for(|| async { transport.peer_count().await == 1 }).await);

    // Give the connection time to fill the queue and block on it.
    sleep(Duration::from_millis(100)).await;

    let peer_id = transport.peers().await[0].id;
    transport.disconnect(&peer_id).await.unwrap();

    assert_closed_by_peer(&mut client).await;
    assert!(wait_for(|| async { transport.peer_count().await == 0 }).await);

    transport.close().unwrap();
}

#[tokio::test]
async fn test_remote_close_deregisters_peer() {
    let (transport, addr, _listener) = start_transport(TcpTransport::new(test_config())).await;

    let client = TcpStream::connect(addr).await.unwrap();
    assert!(wait_for(|| async { transport.peer_count().await == 1 }).await);

    drop(client);
    assert!(wait_for(|| async { transport.peer_count().await == 0 }).await);

    transport.close().unwrap();
}
