//! Socket transport layer - client and server TCP endpoints.
//!
//! Provides:
//! - [`Transport`] - capability trait implemented by concrete endpoints,
//!   composed with protocol-aware callers instead of inherited from
//! - [`SpaClient`] - outbound connection to a legacy peer
//! - [`SpaServer`] - listener with a per-peer registry and read loops

mod client;
mod server;

use async_trait::async_trait;

use crate::error::Result;

pub use client::SpaClient;
pub use server::{InboundMessage, SpaServer};

/// Capability interface for sending raw frames to a peer.
///
/// Implemented by [`SpaClient`]; protocol-aware components hold a
/// `dyn Transport` and stay independent of the concrete socket type.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one complete frame, raising a typed transport error on failure.
    async fn send(&self, frame: &[u8]) -> Result<()>;

    /// Non-blocking probe of connection health.
    fn is_connected(&self) -> bool;
}
