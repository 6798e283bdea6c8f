//! Inbound TCP endpoint: listener, per-peer read loops, peer registry.
//!
//! Each accepted socket is registered in a concurrent map keyed by remote
//! address. A dedicated read loop per peer feeds a [`FrameBuffer`] (owned
//! exclusively by that loop), classifies completed frames through the
//! [`StalenessPolicy`], and delivers fresh messages upward on the inbound
//! channel - the "message arrived" event. Garbage frames are logged and
//! dropped; a structural protocol error tears the connection down since the
//! stream cannot be resynchronized.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{Result, SpaError};
use crate::protocol::{DeliveryEvent, Frame, FrameBuffer, StalenessPolicy};

/// Capacity of the inbound message channel.
const INBOUND_CHANNEL_CAPACITY: usize = 1024;

/// A fully reassembled message delivered upward from a peer connection.
#[derive(Debug)]
pub struct InboundMessage {
    /// Remote address the frame arrived from (registry key).
    pub peer: SocketAddr,
    /// The completed, fresh frame.
    pub frame: Frame,
}

/// Per-peer registry entry.
struct PeerHandle {
    /// Write half for the reply path, shared with `send_to`.
    writer: Arc<Mutex<OwnedWriteHalf>>,
    /// Milliseconds since server start of the last read activity.
    last_activity_ms: Arc<AtomicU64>,
    /// The peer's read loop, aborted on eviction.
    task: JoinHandle<()>,
}

/// Listening SPA endpoint.
///
/// One accept loop per server instance, one read loop per connected peer,
/// and a periodic sweep evicting idle registry entries.
pub struct SpaServer {
    local_addr: SocketAddr,
    registry: Arc<DashMap<SocketAddr, PeerHandle>>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
    sweep_task: JoinHandle<()>,
}

impl SpaServer {
    /// Bind the listener and start accept and sweep loops.
    ///
    /// Returns the running server plus the receiver of the "message
    /// arrived" event stream.
    pub async fn start(config: ServerConfig) -> Result<(Self, mpsc::Receiver<InboundMessage>)> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(SpaError::from_socket)?;
        let local_addr = listener.local_addr().map_err(SpaError::from_socket)?;
        info!(addr = %local_addr, "SPA server listening");

        let registry: Arc<DashMap<SocketAddr, PeerHandle>> = Arc::new(DashMap::new());
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let started = Instant::now();
        let policy = StalenessPolicy::new(config.hour_offset);

        let accept_task = tokio::spawn(Self::accept_loop(
            listener,
            config.clone(),
            policy,
            registry.clone(),
            inbound_tx,
            shutdown_rx.clone(),
            started,
        ));

        let sweep_task = tokio::spawn(Self::sweep_loop(
            config,
            registry.clone(),
            shutdown_rx,
            started,
        ));

        Ok((
            Self {
                local_addr,
                registry,
                shutdown_tx,
                accept_task,
                sweep_task,
            },
            inbound_rx,
        ))
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of currently registered peers.
    pub fn peer_count(&self) -> usize {
        self.registry.len()
    }

    /// Addresses of currently registered peers.
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.registry.iter().map(|entry| *entry.key()).collect()
    }

    /// Send a pre-built frame back to a registered peer.
    pub async fn send_to(&self, peer: SocketAddr, frame: &[u8]) -> Result<()> {
        // Clone the writer out so no registry shard lock is held across await.
        let writer = self
            .registry
            .get(&peer)
            .map(|entry| entry.writer.clone())
            .ok_or(SpaError::ConnectionClosed)?;

        let mut guard = writer.lock().await;
        guard
            .write_all(frame)
            .await
            .map_err(SpaError::from_socket)?;
        guard.flush().await.map_err(SpaError::from_socket)?;
        debug!(peer = %peer, bytes = frame.len(), "frame sent to peer");
        Ok(())
    }

    /// Signal shutdown: accept and sweep loops stop, read loops exit on
    /// their next wakeup, in-flight deliveries complete.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.accept_task.abort();
        self.sweep_task.abort();
        for entry in self.registry.iter() {
            entry.task.abort();
        }
        self.registry.clear();
        info!(addr = %self.local_addr, "SPA server shut down");
    }

    async fn accept_loop(
        listener: TcpListener,
        config: ServerConfig,
        policy: StalenessPolicy,
        registry: Arc<DashMap<SocketAddr, PeerHandle>>,
        inbound_tx: mpsc::Sender<InboundMessage>,
        mut shutdown_rx: watch::Receiver<bool>,
        started: Instant,
    ) {
        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return;
                    }
                    continue;
                }
            };

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
            }
            info!(peer = %peer, "peer connected");

            Self::register_peer(
                stream,
                peer,
                &config,
                policy,
                registry.clone(),
                inbound_tx.clone(),
                shutdown_rx.clone(),
                started,
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn register_peer(
        stream: TcpStream,
        peer: SocketAddr,
        config: &ServerConfig,
        policy: StalenessPolicy,
        registry: Arc<DashMap<SocketAddr, PeerHandle>>,
        inbound_tx: mpsc::Sender<InboundMessage>,
        shutdown_rx: watch::Receiver<bool>,
        started: Instant,
    ) {
        let (read_half, write_half) = stream.into_split();
        let last_activity_ms = Arc::new(AtomicU64::new(started.elapsed().as_millis() as u64));

        let task = tokio::spawn(Self::read_loop(
            read_half,
            peer,
            config.buffer_size,
            config.max_message_size,
            policy,
            registry.clone(),
            inbound_tx,
            shutdown_rx,
            last_activity_ms.clone(),
            started,
        ));

        registry.insert(
            peer,
            PeerHandle {
                writer: Arc::new(Mutex::new(write_half)),
                last_activity_ms,
                task,
            },
        );
    }

    /// Per-peer read loop; the frame buffer is owned here and nowhere else.
    #[allow(clippy::too_many_arguments)]
    async fn read_loop(
        mut read_half: tokio::net::tcp::OwnedReadHalf,
        peer: SocketAddr,
        buffer_size: usize,
        max_message_size: u32,
        policy: StalenessPolicy,
        registry: Arc<DashMap<SocketAddr, PeerHandle>>,
        inbound_tx: mpsc::Sender<InboundMessage>,
        mut shutdown_rx: watch::Receiver<bool>,
        last_activity_ms: Arc<AtomicU64>,
        started: Instant,
    ) {
        let mut frame_buffer = FrameBuffer::with_max_message(max_message_size);
        let mut buf = vec![0u8; buffer_size];

        loop {
            let n = tokio::select! {
                read = read_half.read(&mut buf) => match read {
                    Ok(0) => {
                        debug!(peer = %peer, "peer closed connection");
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        warn!(peer = %peer, error = %SpaError::from_socket(e), "read failed");
                        break;
                    }
                },
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
            };

            last_activity_ms.store(started.elapsed().as_millis() as u64, Ordering::Release);

            let frames = match frame_buffer.push(&buf[..n]) {
                Ok(frames) => frames,
                Err(e) => {
                    // No resynchronization past a structural error.
                    warn!(peer = %peer, error = %e, "protocol error, dropping connection");
                    break;
                }
            };

            for frame in frames {
                match policy.classify(frame) {
                    DeliveryEvent::Message(frame) => {
                        debug!(
                            peer = %peer,
                            bytes = frame.wire_len(),
                            agency = frame.header.origin.agency,
                            "message arrived"
                        );
                        if inbound_tx
                            .send(InboundMessage { peer, frame })
                            .await
                            .is_err()
                        {
                            // Consumer gone; nothing left to deliver to.
                            registry.remove(&peer);
                            return;
                        }
                    }
                    DeliveryEvent::Garbage { frame, reason } => {
                        warn!(
                            peer = %peer,
                            badge = frame.header.badge,
                            timeout = frame.header.timeout_secs,
                            reason,
                            "garbage message dropped"
                        );
                    }
                    DeliveryEvent::Invalid { reason } => {
                        warn!(peer = %peer, reason = %reason, "invalid bytes dropped");
                    }
                }
            }
        }

        registry.remove(&peer);
        info!(peer = %peer, "peer deregistered");
    }

    /// Periodic sweep evicting idle peers from the registry.
    async fn sweep_loop(
        config: ServerConfig,
        registry: Arc<DashMap<SocketAddr, PeerHandle>>,
        mut shutdown_rx: watch::Receiver<bool>,
        started: Instant,
    ) {
        let mut ticker = tokio::time::interval(config.sweep_interval);
        let idle_ms = config.idle_timeout.as_millis() as u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return;
                    }
                    continue;
                }
            }

            let now_ms = started.elapsed().as_millis() as u64;
            let stale_peers: Vec<SocketAddr> = registry
                .iter()
                .filter(|entry| {
                    now_ms.saturating_sub(entry.last_activity_ms.load(Ordering::Acquire)) > idle_ms
                })
                .map(|entry| *entry.key())
                .collect();

            for peer in stale_peers {
                if let Some((_, handle)) = registry.remove(&peer) {
                    handle.task.abort();
                    info!(peer = %peer, "idle peer evicted");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, pack_badge, Header, RoutePoint, HEADER_SIZE};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        }
    }

    fn inbound_header(payload_len: u32) -> Header {
        Header::new(
            RoutePoint {
                agency: 42,
                post: 3,
                operator: 900,
                logical_id: 5,
                ip: [127, 0, 0, 1],
                port: 0,
            },
            RoutePoint::default(),
            pack_badge(8, 30, 0),
            0, // staleness disabled, classification still checks the badge
            payload_len,
        )
    }

    #[tokio::test]
    async fn test_message_arrives_and_peer_is_registered() {
        let (server, mut inbound) = SpaServer::start(test_config()).await.unwrap();
        let addr = server.local_addr();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let frame = build_frame(&inbound_header(7), b"BALANCE");
        client.write_all(&frame).await.unwrap();

        let message = inbound.recv().await.unwrap();
        assert_eq!(message.frame.payload(), b"BALANCE");
        assert_eq!(message.frame.header.origin.agency, 42);
        assert_eq!(server.peer_count(), 1);
        assert_eq!(server.peers()[0], message.peer);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_split_writes_reassemble() {
        let (server, mut inbound) = SpaServer::start(test_config()).await.unwrap();
        let addr = server.local_addr();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let frame = build_frame(&inbound_header(100), &vec![0x41; 100]);

        // 40/40/20 payload split after the header, flushed separately.
        client.write_all(&frame[..HEADER_SIZE]).await.unwrap();
        client.flush().await.unwrap();
        client
            .write_all(&frame[HEADER_SIZE..HEADER_SIZE + 40])
            .await
            .unwrap();
        client.flush().await.unwrap();
        client
            .write_all(&frame[HEADER_SIZE + 40..HEADER_SIZE + 80])
            .await
            .unwrap();
        client.flush().await.unwrap();
        client.write_all(&frame[HEADER_SIZE + 80..]).await.unwrap();
        client.flush().await.unwrap();

        let message = inbound.recv().await.unwrap();
        assert_eq!(message.frame.payload_len(), 100);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_garbage_badge_is_dropped() {
        let (server, mut inbound) = SpaServer::start(test_config()).await.unwrap();
        let addr = server.local_addr();

        let mut client = TcpStream::connect(addr).await.unwrap();

        // First frame carries an impossible badge and must be dropped.
        let mut bad_header = inbound_header(3);
        bad_header.badge = 999_999;
        client
            .write_all(&build_frame(&bad_header, b"BAD"))
            .await
            .unwrap();

        // Second frame is valid and must be the first delivery.
        client
            .write_all(&build_frame(&inbound_header(4), b"GOOD"))
            .await
            .unwrap();

        let message = inbound.recv().await.unwrap();
        assert_eq!(message.frame.payload(), b"GOOD");

        server.shutdown();
    }

    #[tokio::test]
    async fn test_reply_path_via_registry() {
        let (server, mut inbound) = SpaServer::start(test_config()).await.unwrap();
        let addr = server.local_addr();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(&build_frame(&inbound_header(4), b"PING"))
            .await
            .unwrap();

        let message = inbound.recv().await.unwrap();
        let reply = message.frame.reply_with(bytes::Bytes::from_static(b"PONG"));
        server
            .send_to(message.peer, &build_frame(&reply.header, reply.payload()))
            .await
            .unwrap();

        let mut buf = vec![0u8; HEADER_SIZE + 4];
        client.read_exact(&mut buf).await.unwrap();
        let header = Header::decode(&buf).unwrap();
        assert_eq!(header.destination.agency, 42);
        assert_eq!(&buf[HEADER_SIZE..], b"PONG");

        server.shutdown();
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer_fails() {
        let (server, _inbound) = SpaServer::start(test_config()).await.unwrap();
        let unknown: SocketAddr = "127.0.0.1:1".parse().unwrap();

        let err = server.send_to(unknown, b"x").await.unwrap_err();
        assert!(matches!(err, SpaError::ConnectionClosed));

        server.shutdown();
    }

    #[tokio::test]
    async fn test_peer_deregistered_on_disconnect() {
        let (server, mut inbound) = SpaServer::start(test_config()).await.unwrap();
        let addr = server.local_addr();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(&build_frame(&inbound_header(2), b"HI"))
            .await
            .unwrap();
        let _ = inbound.recv().await.unwrap();
        assert_eq!(server.peer_count(), 1);

        client.shutdown().await.unwrap();
        drop(client);

        // Give the read loop a moment to observe EOF.
        for _ in 0..50 {
            if server.peer_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.peer_count(), 0);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_idle_peer_swept() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            idle_timeout: Duration::from_millis(100),
            sweep_interval: Duration::from_millis(50),
            ..Default::default()
        };
        let (server, mut inbound) = SpaServer::start(config).await.unwrap();
        let addr = server.local_addr();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(&build_frame(&inbound_header(2), b"HI"))
            .await
            .unwrap();
        let _ = inbound.recv().await.unwrap();
        assert_eq!(server.peer_count(), 1);

        // No further activity; the sweep must evict the peer.
        for _ in 0..100 {
            if server.peer_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(server.peer_count(), 0);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_structural_error_drops_connection() {
        let (server, mut inbound) = SpaServer::start(test_config()).await.unwrap();
        let addr = server.local_addr();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut header = inbound_header(10);
        header.header_length = 12; // inconsistent with the fixed size
        client.write_all(&header.encode()).await.unwrap();

        // Connection is torn down; nothing is delivered.
        for _ in 0..50 {
            if server.peer_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.peer_count(), 0);
        assert!(inbound.try_recv().is_err());

        server.shutdown();
    }
}
