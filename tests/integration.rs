//! Integration tests for spalink.
//!
//! These tests verify the integration between different modules.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use spalink::{
    build_frame, pack_badge, spawn_dispatch_queue, FrameBuffer, Header, QueueConfig, QueueKind,
    Result, RoutePoint, ServerConfig, SpaClient, SpaServer, WorkItem, WorkProcessor, HEADER_SIZE,
};
use spalink::ClientConfig;

fn terminal() -> RoutePoint {
    RoutePoint {
        agency: 120,
        post: 3,
        operator: 88_001,
        logical_id: 7,
        ip: [10, 4, 0, 21],
        port: 9400,
    }
}

fn branch_server() -> RoutePoint {
    RoutePoint {
        agency: 1,
        post: 0,
        operator: 0,
        logical_id: 1,
        ip: [10, 4, 0, 1],
        port: 9400,
    }
}

fn header_for(payload_len: usize) -> Header {
    // timeout 0 disables staleness checks, keeping tests independent of
    // the wall clock.
    let mut header = Header::new(
        terminal(),
        branch_server(),
        pack_badge(9, 15, 0),
        0,
        payload_len as u32,
    );
    header.account = 4_200_123;
    header.product = 31;
    header
}

/// Full frame build and reassembly cycle across arbitrary read boundaries.
#[test]
fn test_frame_roundtrip_with_split_reads() {
    let payload = b"0740|00123|150.00";
    let wire = build_frame(&header_for(payload.len()), payload);
    assert_eq!(wire.len(), HEADER_SIZE + payload.len());

    let mut buffer = FrameBuffer::new();
    let mid = wire.len() / 2;
    assert!(buffer.push(&wire[..mid]).unwrap().is_empty());
    let frames = buffer.push(&wire[mid..]).unwrap();

    assert_eq!(frames.len(), 1);
    let frame = &frames[0];
    assert_eq!(frame.header.origin.agency, 120);
    assert_eq!(frame.header.destination.agency, 1);
    assert_eq!(frame.header.account, 4_200_123);
    assert_eq!(frame.payload(), payload.as_slice());
}

/// A reply frame routes back to where the request came from.
#[test]
fn test_reply_swaps_route_points() {
    let payload = b"BALANCE?";
    let wire = build_frame(&header_for(payload.len()), payload);

    let mut buffer = FrameBuffer::new();
    let request = buffer.push(&wire).unwrap().remove(0);

    let reply = request.reply_with(Bytes::from_static(b"1500.00"));
    assert_eq!(reply.header.origin, branch_server());
    assert_eq!(reply.header.destination, terminal());
    assert_eq!(reply.header.message_length, 7);
    assert_eq!(reply.payload(), b"1500.00".as_slice());
}

struct CollectingProcessor {
    codes: Mutex<Vec<String>>,
}

#[async_trait]
impl WorkProcessor for CollectingProcessor {
    async fn process(&self, item: WorkItem) -> Result<()> {
        self.codes.lock().unwrap().push(item.transaction_code);
        Ok(())
    }
}

async fn wait_for_codes(processor: &CollectingProcessor, expected: usize) {
    for _ in 0..200 {
        if processor.codes.lock().unwrap().len() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {} processed items", expected);
}

/// Items flow through the async queue variant in submission order.
#[tokio::test]
async fn test_async_queue_preserves_order() {
    let processor = Arc::new(CollectingProcessor {
        codes: Mutex::new(Vec::new()),
    });
    let config = QueueConfig {
        kind: QueueKind::Async,
        poll_delay: Duration::from_millis(10),
    };
    let worker = spawn_dispatch_queue(&config, processor.clone());

    for i in 0..5 {
        worker
            .enqueue(WorkItem::new(format!("07{}0", i), serde_json::json!({})))
            .unwrap();
    }

    wait_for_codes(&processor, 5).await;
    worker.shutdown();
    worker.join().await;

    let codes = processor.codes.lock().unwrap().clone();
    assert_eq!(codes, vec!["0700", "0710", "0720", "0730", "0740"]);
}

/// The polling variant drains its backlog the same way.
#[tokio::test]
async fn test_polling_queue_drains_backlog() {
    let processor = Arc::new(CollectingProcessor {
        codes: Mutex::new(Vec::new()),
    });
    let config = QueueConfig {
        kind: QueueKind::Polling,
        poll_delay: Duration::from_millis(5),
    };
    let worker = spawn_dispatch_queue(&config, processor.clone());

    for i in 0..3 {
        worker
            .enqueue(WorkItem::new(format!("08{}0", i), serde_json::json!({})))
            .unwrap();
    }

    wait_for_codes(&processor, 3).await;
    worker.shutdown();
    worker.join().await;

    let codes = processor.codes.lock().unwrap().clone();
    assert_eq!(codes, vec!["0800", "0810", "0820"]);
}

fn test_server_config(bind: std::net::SocketAddr) -> ServerConfig {
    ServerConfig {
        bind_addr: bind,
        ..ServerConfig::default()
    }
}

/// End-to-end: raw client socket to server, message delivered, reply
/// routed back through the peer registry.
#[tokio::test]
async fn test_server_inbound_and_reply() {
    let config = test_server_config("127.0.0.1:0".parse().unwrap());
    let (server, mut inbound) = SpaServer::start(config).await.unwrap();
    let addr = server.local_addr();

    let mut socket = TcpStream::connect(addr).await.unwrap();
    let payload = b"0740|00123|150.00";
    let wire = build_frame(&header_for(payload.len()), payload);
    socket.write_all(&wire).await.unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(2), inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.frame.payload(), payload.as_slice());

    let reply = msg.frame.reply_with(Bytes::from_static(b"OK"));
    let reply_wire = build_frame(&reply.header, reply.payload());
    server.send_to(msg.peer, &reply_wire).await.unwrap();

    let mut buf = vec![0u8; HEADER_SIZE + 2];
    socket.read_exact(&mut buf).await.unwrap();
    let mut buffer = FrameBuffer::new();
    let frame = buffer.push(&buf).unwrap().remove(0);
    assert_eq!(frame.header.destination, terminal());
    assert_eq!(frame.payload(), b"OK".as_slice());

    server.shutdown();
}

/// End-to-end through the client: request out, reply frame back.
#[tokio::test]
async fn test_client_request_against_server() {
    let config = test_server_config("127.0.0.1:0".parse().unwrap());
    let (server, mut inbound) = SpaServer::start(config).await.unwrap();
    let addr = server.local_addr();

    let echo = tokio::spawn(async move {
        let msg = inbound.recv().await.unwrap();
        let reply = msg.frame.reply_with(Bytes::from_static(b"CONFIRMED"));
        let wire = build_frame(&reply.header, reply.payload());
        server.send_to(msg.peer, &wire).await.unwrap();
        server
    });

    let client = SpaClient::new(ClientConfig::new(addr.ip().to_string(), addr.port()));
    let payload = b"0740|00123|150.00";
    let wire = build_frame(&header_for(payload.len()), payload);

    let reply = client.send_request(&wire, 2).await.unwrap();
    assert_eq!(reply.payload(), b"CONFIRMED".as_slice());
    assert_eq!(reply.header.destination, terminal());

    let server = echo.await.unwrap();
    server.shutdown();
    client.disconnect().await;
}
