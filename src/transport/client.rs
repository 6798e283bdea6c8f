//! Outbound TCP endpoint for calling the legacy peer.
//!
//! Two send paths exist on purpose:
//! - [`SpaClient::send_fire_and_forget`] for flows where the caller already
//!   returned a response upstream and cannot act on a later failure; every
//!   error is logged and swallowed at this boundary.
//! - [`SpaClient::send_request`] for flows that must know the outcome; it
//!   raises typed transport errors and awaits the peer's reply frame.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{Result, SpaError};
use crate::protocol::{Frame, FrameBuffer};
use crate::transport::Transport;

/// Client endpoint owning one outbound TCP connection.
pub struct SpaClient {
    config: ClientConfig,
    connection: Arc<RwLock<Option<TcpStream>>>,
}

impl SpaClient {
    /// Create a disconnected client endpoint.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            connection: Arc::new(RwLock::new(None)),
        }
    }

    /// The configured remote endpoint as `host:port`.
    pub fn remote(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// Attempt a bounded-time connection.
    ///
    /// On failure the error is logged and the endpoint stays disconnected;
    /// nothing is raised to the caller. The next send retries transparently.
    pub async fn connect(&self) {
        if let Err(e) = self.try_connect().await {
            warn!(peer = %self.remote(), error = %e, "SPA connect failed");
        }
    }

    /// Non-blocking probe of socket health.
    pub fn is_connected(&self) -> bool {
        match self.connection.try_read() {
            Ok(guard) => guard.is_some(),
            Err(_) => true, // lock held by an in-flight operation
        }
    }

    /// Shut down and drop the connection.
    pub async fn disconnect(&self) {
        let mut guard = self.connection.write().await;
        if let Some(mut stream) = guard.take() {
            if let Err(e) = stream.shutdown().await {
                debug!(peer = %self.remote(), error = %e, "error during shutdown");
            }
            info!(peer = %self.remote(), "SPA connection closed");
        }
    }

    /// Write a frame without awaiting a response.
    ///
    /// Ensures a connection first, reconnecting transparently (exactly one
    /// attempt) when disconnected. Never raises: all failures are logged
    /// only, since the original caller has already been answered.
    pub async fn send_fire_and_forget(&self, frame: &[u8]) {
        if let Err(e) = self.send_raw(frame).await {
            warn!(
                peer = %self.remote(),
                bytes = frame.len(),
                error = %e,
                "fire-and-forget send failed"
            );
        }
    }

    /// Write a frame and await one complete reply frame.
    ///
    /// Retries the full exchange up to `attempts` times, reconnecting
    /// between attempts; the final typed error propagates to the caller.
    pub async fn send_request(&self, frame: &[u8], attempts: u32) -> Result<Frame> {
        let mut last_err = SpaError::ConnectionClosed;

        for attempt in 1..=attempts.max(1) {
            match self.exchange(frame).await {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    warn!(
                        peer = %self.remote(),
                        attempt,
                        error = %e,
                        "SPA request attempt failed"
                    );
                    self.drop_connection().await;
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    /// One write + read-reply exchange over the current connection.
    async fn exchange(&self, frame: &[u8]) -> Result<Frame> {
        self.ensure_connected().await?;

        let mut guard = self.connection.write().await;
        let stream = guard.as_mut().ok_or(SpaError::ConnectionClosed)?;

        stream
            .write_all(frame)
            .await
            .map_err(SpaError::from_socket)?;
        stream.flush().await.map_err(SpaError::from_socket)?;
        debug!(peer = %self.remote(), bytes = frame.len(), "SPA request written");

        let reply = tokio::time::timeout(
            self.config.request_timeout,
            Self::read_one_frame(stream, self.config.buffer_size, self.config.max_message_size),
        )
        .await
        .map_err(|_| SpaError::ResponseTimeout)??;

        debug!(
            peer = %self.remote(),
            bytes = reply.wire_len(),
            "SPA reply received"
        );
        Ok(reply)
    }

    /// Read until the reassembly buffer yields one complete frame.
    async fn read_one_frame(
        stream: &mut TcpStream,
        buffer_size: usize,
        max_message_size: u32,
    ) -> Result<Frame> {
        let mut frame_buffer = FrameBuffer::with_max_message(max_message_size);
        let mut buf = vec![0u8; buffer_size];

        loop {
            let n = stream.read(&mut buf).await.map_err(SpaError::from_socket)?;
            if n == 0 {
                return Err(SpaError::ConnectionClosed);
            }

            let mut frames = frame_buffer.push(&buf[..n])?;
            if !frames.is_empty() {
                return Ok(frames.remove(0));
            }
        }
    }

    /// Write a frame, reconnecting once if disconnected; typed error on failure.
    async fn send_raw(&self, frame: &[u8]) -> Result<()> {
        self.ensure_connected().await?;

        let mut guard = self.connection.write().await;
        let stream = guard.as_mut().ok_or(SpaError::ConnectionClosed)?;

        if let Err(e) = stream.write_all(frame).await {
            drop(guard);
            self.drop_connection().await;
            return Err(SpaError::from_socket(e));
        }
        stream.flush().await.map_err(SpaError::from_socket)?;

        debug!(peer = %self.remote(), bytes = frame.len(), "SPA frame written");
        Ok(())
    }

    /// Establish the connection when none is live (one attempt).
    async fn ensure_connected(&self) -> Result<()> {
        {
            let guard = self.connection.read().await;
            if guard.is_some() {
                return Ok(());
            }
        }
        self.try_connect().await
    }

    async fn try_connect(&self) -> Result<()> {
        let remote = self.remote();

        let addr = lookup_host(&remote)
            .await
            .map_err(|_| SpaError::HostUnresolved(self.config.host.clone()))?
            .next()
            .ok_or_else(|| SpaError::HostUnresolved(self.config.host.clone()))?;

        let stream = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| SpaError::ResponseTimeout)?
            .map_err(SpaError::from_socket)?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %remote, error = %e, "failed to set TCP_NODELAY");
        }

        let mut guard = self.connection.write().await;
        *guard = Some(stream);
        info!(peer = %remote, "SPA connection established");
        Ok(())
    }

    async fn drop_connection(&self) {
        let mut guard = self.connection.write().await;
        *guard = None;
    }
}

#[async_trait]
impl Transport for SpaClient {
    async fn send(&self, frame: &[u8]) -> Result<()> {
        self.send_raw(frame).await
    }

    fn is_connected(&self) -> bool {
        self.is_connected()
    }
}
