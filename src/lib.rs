//! # spalink
//!
//! Transport and dispatch engine for the SPA legacy banking terminal
//! protocol.
//!
//! This crate speaks the fixed 60-byte binary header format used by SPA
//! branch terminals, reassembles frames from arbitrary TCP read
//! boundaries, detects stale ("garbage") messages from the packed
//! time-of-day badge in each header, and routes accepted messages into a
//! dispatch queue with per-item failure isolation.
//!
//! ## Architecture
//!
//! - **Protocol** ([`protocol`]): header codec, frame reassembly,
//!   staleness classification
//! - **Transport** ([`transport`]): TCP client and multi-peer server
//! - **Dispatch** ([`dispatch`]): async and polling work queues
//! - **Transactions** ([`txn`]): ledger-backed lifecycle state machine
//!   with compensating cancel
//!
//! ## Example
//!
//! ```ignore
//! use spalink::{ServerConfig, SpaServer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::default();
//!     let (server, mut inbound) = SpaServer::start(config).await.unwrap();
//!
//!     while let Some(msg) = inbound.recv().await {
//!         let reply = msg.frame.reply_with(bytes::Bytes::from_static(b"ACK"));
//!         let wire = spalink::build_frame(&reply.header, reply.payload());
//!         let _ = server.send_to(msg.peer, &wire).await;
//!     }
//! }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod txn;

pub use config::{ClientConfig, QueueConfig, QueueKind, ServerConfig};
pub use dispatch::{spawn_dispatch_queue, DispatchQueue, QueueWorker, WorkItem, WorkProcessor};
pub use error::{Result, SpaError};
pub use protocol::{
    build_frame, pack_badge, DeliveryEvent, Frame, FrameBuffer, Header, RoutePoint,
    StalenessPolicy, HEADER_SIZE,
};
pub use transport::{InboundMessage, SpaClient, SpaServer, Transport};
pub use txn::{Transaction, TransactionLedger, TxnParams, TxnState};
