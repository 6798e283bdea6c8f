//! Wire format encoding and decoding.
//!
//! Implements the fixed 60-byte SPA header:
//! ```text
//! ┌─────────┬─────┬─────────┬────────────┬──────────┬─────────┬─────────┬─────────┬─────────┬─────────┬─────────┐
//! │ Version │ TTL │ DestOk  │ Compaction │ Hdr len  │ Msg len │ Badge   │ Timeout │ Origin  │ Dest    │ Acct/Prd│
//! │ 1 byte  │ 1 B │ 1 byte  │ 1 byte     │ u16 BE   │ u32 BE  │ u32 BE  │ i16 BE  │ 16 bytes│ 16 bytes│ 12 bytes│
//! └─────────┴─────┴─────────┴────────────┴──────────┴─────────┴─────────┴─────────┴─────────┴─────────┴─────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. The badge field packs the
//! origination time as decimal HHMMSS (e.g. `134501` for 13:45:01).

use crate::error::{Result, SpaError};

/// Header size in bytes (fixed, exactly 60).
pub const HEADER_SIZE: usize = 60;

/// Default maximum message (payload) size accepted from a peer (1 MiB).
///
/// Legacy terminal frames are small; anything larger is a protocol violation.
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 1_048_576;

/// Protocol version emitted by this implementation.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default time-to-live for outbound frames.
pub const DEFAULT_TTL: u8 = 8;

/// Routing quadruple identifying one end of a frame.
///
/// Embedded in the header so intermediate components can route without
/// inspecting the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoutePoint {
    /// Agency number.
    pub agency: u16,
    /// Branch / post number within the agency.
    pub post: u16,
    /// Operator identifier.
    pub operator: u32,
    /// Logical terminal id.
    pub logical_id: u16,
    /// Peer IPv4 address, network order.
    pub ip: [u8; 4],
    /// Peer TCP port.
    pub port: u16,
}

impl RoutePoint {
    /// Encoded size of a route point (16 bytes).
    pub const SIZE: usize = 16;

    fn encode_into(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.agency.to_be_bytes());
        buf[2..4].copy_from_slice(&self.post.to_be_bytes());
        buf[4..8].copy_from_slice(&self.operator.to_be_bytes());
        buf[8..10].copy_from_slice(&self.logical_id.to_be_bytes());
        buf[10..14].copy_from_slice(&self.ip);
        buf[14..16].copy_from_slice(&self.port.to_be_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            agency: u16::from_be_bytes([buf[0], buf[1]]),
            post: u16::from_be_bytes([buf[2], buf[3]]),
            operator: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            logical_id: u16::from_be_bytes([buf[8], buf[9]]),
            ip: [buf[10], buf[11], buf[12], buf[13]],
            port: u16::from_be_bytes([buf[14], buf[15]]),
        }
    }
}

/// Pack an HH:MM:SS triplet into the decimal badge encoding.
#[inline]
pub fn pack_badge(hour: u32, minute: u32, second: u32) -> u32 {
    hour * 10_000 + minute * 100 + second
}

/// Decoded header value.
///
/// Immutable value type: decode produces a fresh `Header`, encode writes
/// into a caller-provided or fresh buffer. In-flight byte buffers are never
/// aliased by header state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol version.
    pub version: u8,
    /// Time-to-live (hop budget for intermediate routers).
    pub ttl: u8,
    /// Destination-reachable flag set by intermediate routers.
    pub destination_ok: bool,
    /// Payload compaction flag.
    pub compaction: bool,
    /// Declared header length; must equal [`HEADER_SIZE`].
    pub header_length: u16,
    /// Declared payload length in bytes.
    pub message_length: u32,
    /// Origination time packed as decimal HHMMSS.
    pub badge: u32,
    /// Staleness timeout in seconds; non-positive disables the check.
    pub timeout_secs: i16,
    /// Routing quadruple of the sender.
    pub origin: RoutePoint,
    /// Routing quadruple of the receiver.
    pub destination: RoutePoint,
    /// Account routing field.
    pub account: u64,
    /// Product routing field.
    pub product: u32,
}

impl Header {
    /// Create a new header with protocol defaults for version, TTL and flags.
    pub fn new(
        origin: RoutePoint,
        destination: RoutePoint,
        badge: u32,
        timeout_secs: i16,
        message_length: u32,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            ttl: DEFAULT_TTL,
            destination_ok: false,
            compaction: false,
            header_length: HEADER_SIZE as u16,
            message_length,
            badge,
            timeout_secs,
            origin,
            destination,
            account: 0,
            product: 0,
        }
    }

    /// Encode header to bytes (Big Endian).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (60 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = self.version;
        buf[1] = self.ttl;
        buf[2] = self.destination_ok as u8;
        buf[3] = self.compaction as u8;
        buf[4..6].copy_from_slice(&self.header_length.to_be_bytes());
        buf[6..10].copy_from_slice(&self.message_length.to_be_bytes());
        buf[10..14].copy_from_slice(&self.badge.to_be_bytes());
        buf[14..16].copy_from_slice(&self.timeout_secs.to_be_bytes());
        self.origin.encode_into(&mut buf[16..32]);
        self.destination.encode_into(&mut buf[32..48]);
        buf[48..56].copy_from_slice(&self.account.to_be_bytes());
        buf[56..60].copy_from_slice(&self.product.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if the buffer is shorter than `HEADER_SIZE`.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            version: buf[0],
            ttl: buf[1],
            destination_ok: buf[2] != 0,
            compaction: buf[3] != 0,
            header_length: u16::from_be_bytes([buf[4], buf[5]]),
            message_length: u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]),
            badge: u32::from_be_bytes([buf[10], buf[11], buf[12], buf[13]]),
            timeout_secs: i16::from_be_bytes([buf[14], buf[15]]),
            origin: RoutePoint::decode(&buf[16..32]),
            destination: RoutePoint::decode(&buf[32..48]),
            account: u64::from_be_bytes([
                buf[48], buf[49], buf[50], buf[51], buf[52], buf[53], buf[54], buf[55],
            ]),
            product: u32::from_be_bytes([buf[56], buf[57], buf[58], buf[59]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - declared header length equals the fixed header size, so that
    ///   `header_length + message_length` equals the total frame length
    /// - message length doesn't exceed the configured maximum
    /// - badge decodes to a valid HHMMSS triplet
    pub fn validate(&self, max_message_size: u32) -> Result<()> {
        if self.header_length as usize != HEADER_SIZE {
            return Err(SpaError::Protocol(format!(
                "Declared header length {} does not match fixed size {}",
                self.header_length, HEADER_SIZE
            )));
        }

        if self.message_length > max_message_size {
            return Err(SpaError::Protocol(format!(
                "Message size {} exceeds maximum {}",
                self.message_length, max_message_size
            )));
        }

        if self.badge_hms().is_none() {
            return Err(SpaError::Protocol(format!(
                "Badge {} is not a valid HHMMSS timestamp",
                self.badge
            )));
        }

        Ok(())
    }

    /// Decode the badge field into an (hour, minute, second) triplet.
    ///
    /// Returns `None` when any component is out of range (0-23/0-59/0-59).
    pub fn badge_hms(&self) -> Option<(u32, u32, u32)> {
        let hour = self.badge / 10_000;
        let minute = (self.badge / 100) % 100;
        let second = self.badge % 100;
        if hour > 23 || minute > 59 || second > 59 {
            return None;
        }
        Some((hour, minute, second))
    }

    /// Total frame length this header declares (header + payload).
    #[inline]
    pub fn total_length(&self) -> usize {
        HEADER_SIZE + self.message_length as usize
    }

    /// Whether staleness checking applies to this frame.
    #[inline]
    pub fn staleness_enabled(&self) -> bool {
        self.timeout_secs > 0
    }

    /// Build a header addressing a response back to the original sender.
    ///
    /// Swaps the origin/destination routing quadruples, zeroes the
    /// compaction flag, sets the new message length and preserves every
    /// other field, so a reply can be routed without recomputing anything.
    pub fn reply(&self, new_length: u32) -> Header {
        Header {
            origin: self.destination,
            destination: self.origin,
            compaction: false,
            message_length: new_length,
            ..*self
        }
    }
}
