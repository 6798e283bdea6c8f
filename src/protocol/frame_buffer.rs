//! Frame buffer for accumulating partial socket reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `AwaitingHeader`: need at least 60 bytes
//! - `AwaitingPayload`: header parsed, need N more payload bytes
//!
//! For any split of a byte stream into sub-reads, the emitted sequence of
//! complete frames is identical to that produced by one contiguous read,
//! as are the final received/processed byte counts.
//!
//! A header whose declared length never arrives leaves the buffer in
//! `AwaitingPayload` indefinitely, bounded only by the connection timeout.
//! No resynchronization is attempted for internally inconsistent headers;
//! the stream is considered unrecoverable past a structural error.

use bytes::{Bytes, BytesMut};

use super::frame::Frame;
use super::wire_format::{Header, DEFAULT_MAX_MESSAGE_SIZE, HEADER_SIZE};
use crate::error::{Result, SpaError};

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for a complete header (need 60 bytes).
    AwaitingHeader,
    /// Header parsed, accumulating payload bytes.
    AwaitingPayload { header: Header, remaining: u32 },
}

/// Per-connection accumulator turning arbitrary reads into complete frames.
///
/// Owned exclusively by the connection's read loop; never shared across
/// threads. All data lives in a single `BytesMut` to minimize allocations.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed declared message length.
    max_message_size: u32,
    /// Total bytes appended since creation/clear.
    bytes_received: u64,
    /// Total bytes consumed into emitted frames since creation/clear.
    bytes_processed: u64,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max message: 1 MiB.
    pub fn new() -> Self {
        Self::with_max_message(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Create a new frame buffer with a custom max message size.
    pub fn with_max_message(max_message_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::AwaitingHeader,
            max_message_size,
            bytes_received: 0,
            bytes_processed: 0,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// This is the main API for processing incoming data from the socket.
    /// Returns a vector of complete frames. If data is fragmented,
    /// partial data is buffered internally for the next push. Surplus bytes
    /// past a complete frame start accumulating the next one.
    ///
    /// # Errors
    ///
    /// Returns an error if a decoded header is structurally inconsistent
    /// (declared header length wrong, or message length above the maximum).
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.extend(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    /// Append data to the buffer without extracting frames.
    ///
    /// Non-blocking copy; prefer [`push`](Self::push) which does
    /// append + extract in one call.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        self.bytes_received += data.len() as u64;
    }

    /// Try to extract a single frame from the buffer.
    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        match &self.state {
            State::AwaitingHeader => {
                if self.buffer.len() < HEADER_SIZE {
                    return Ok(None);
                }

                // Decode cannot fail here, the buffer holds enough bytes.
                let header = match Header::decode(&self.buffer[..HEADER_SIZE]) {
                    Some(h) => h,
                    None => return Ok(None),
                };

                if header.header_length as usize != HEADER_SIZE {
                    return Err(SpaError::Protocol(format!(
                        "Declared header length {} does not match fixed size {}",
                        header.header_length, HEADER_SIZE
                    )));
                }

                if header.message_length > self.max_message_size {
                    return Err(SpaError::Protocol(format!(
                        "Message size {} exceeds maximum {}",
                        header.message_length, self.max_message_size
                    )));
                }

                // Consume header bytes.
                let _ = self.buffer.split_to(HEADER_SIZE);
                self.bytes_processed += HEADER_SIZE as u64;

                if header.message_length == 0 {
                    return Ok(Some(Frame::new(header, Bytes::new())));
                }

                self.state = State::AwaitingPayload {
                    header,
                    remaining: header.message_length,
                };

                // Payload may already be buffered.
                self.try_extract_one()
            }

            State::AwaitingPayload { header, remaining } => {
                let remaining = *remaining as usize;

                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                // Zero-copy freeze of exactly the declared payload.
                let payload = self.buffer.split_to(remaining).freeze();
                self.bytes_processed += remaining as u64;
                let header = *header;

                self.state = State::AwaitingHeader;

                Ok(Some(Frame::new(header, payload)))
            }
        }
    }

    /// Get the number of buffered (not yet consumed) bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Total bytes appended since creation or the last clear.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Total bytes handed to consumers as frames since creation or clear.
    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    /// Whether the buffer sits mid-frame waiting for more payload bytes.
    pub fn is_accumulating(&self) -> bool {
        matches!(self.state, State::AwaitingPayload { .. })
    }

    /// Clear the buffer and reset state and counters.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::AwaitingHeader;
        self.bytes_received = 0;
        self.bytes_processed = 0;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::AwaitingHeader => "AwaitingHeader",
            State::AwaitingPayload { .. } => "AwaitingPayload",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
