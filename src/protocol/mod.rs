//! Protocol module - wire format, framing, and staleness detection.
//!
//! This module implements the SPA binary protocol:
//! - 60-byte header encoding/decoding with routing quadruples
//! - Frame buffer for accumulating partial reads
//! - Frame struct with typed accessors
//! - Staleness ("garbage message") classification

mod frame;
mod frame_buffer;
mod staleness;
mod wire_format;

pub use frame::{build_frame, DeliveryEvent, Frame};
pub use frame_buffer::FrameBuffer;
pub use staleness::StalenessPolicy;
pub use wire_format::{
    pack_badge, Header, RoutePoint, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_TTL, HEADER_SIZE,
    PROTOCOL_VERSION,
};
