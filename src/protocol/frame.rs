//! Frame struct with typed accessors.
//!
//! Represents a complete protocol frame with header and payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing.

use std::borrow::Cow;

use bytes::Bytes;

use super::wire_format::{Header, HEADER_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Create a frame from header and raw bytes (copies data).
    pub fn from_parts(header: Header, payload: &[u8]) -> Self {
        Self {
            header,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get a clone of the payload as Bytes (cheap, zero-copy).
    #[inline]
    pub fn payload_bytes(&self) -> Bytes {
        self.payload.clone()
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Decode the payload as the terminal text it carries.
    ///
    /// Legacy peers send 7-bit text; anything undecodable is replaced
    /// rather than rejected, the header routing fields stay authoritative.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Total on-wire size of this frame (header + payload).
    #[inline]
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Build the reply frame addressed back to this frame's sender.
    pub fn reply_with(&self, payload: Bytes) -> Frame {
        Frame {
            header: self.header.reply(payload.len() as u32),
            payload,
        }
    }
}

/// One hand-off from transport to parser.
///
/// Transient value describing what the reassembly/classification step
/// produced for a chunk of inbound bytes. Never persisted.
#[derive(Debug)]
pub enum DeliveryEvent {
    /// A complete, valid, fresh message.
    Message(Frame),
    /// A structurally complete frame that must be dropped (stale or
    /// carrying an invalid badge).
    Garbage {
        /// The offending frame, kept for logging.
        frame: Frame,
        /// Why it was flagged.
        reason: &'static str,
    },
    /// Bytes that could not be decoded into a frame at all.
    Invalid {
        /// Why the stream content was rejected.
        reason: String,
    },
}

/// Build a complete frame as a single byte vector.
///
/// Encodes header and appends payload into a contiguous buffer.
pub fn build_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}
