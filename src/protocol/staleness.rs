//! Staleness ("garbage message") detection.
//!
//! The badge field of a header encodes the origination wall-clock time as
//! packed HHMMSS. A frame whose origination time lies more than
//! `timeout_secs` in the past is garbage and must be dropped.
//!
//! Peers outside the primary deployment environment run with a known clock
//! skew; the configurable hour offset shifts the decoded badge time before
//! comparison. The exact reconciliation semantics between peers are an open
//! question upstream; the offset is exposed as explicit configuration
//! instead of a process-wide flag.

use chrono::{DateTime, Local, NaiveTime, TimeDelta};

use super::frame::{DeliveryEvent, Frame};
use super::wire_format::Header;

/// Staleness classification policy for inbound frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct StalenessPolicy {
    /// Hours added to the decoded badge time before comparing with now.
    pub hour_offset: i64,
}

impl StalenessPolicy {
    /// Create a policy with the given clock-skew hour offset.
    pub fn new(hour_offset: i64) -> Self {
        Self { hour_offset }
    }

    /// Check a header against the current local time.
    pub fn is_stale(&self, header: &Header) -> bool {
        self.is_stale_at(header, Local::now())
    }

    /// Check a header against an explicit "now".
    ///
    /// A non-positive timeout disables the check entirely. The badge time
    /// is combined with the current date; a decoded time later than now
    /// (negative elapsed) is never stale. Elapsed time strictly greater
    /// than the timeout is stale; exactly at the boundary is not.
    ///
    /// An unparseable badge classifies as stale so the frame is dropped.
    pub fn is_stale_at(&self, header: &Header, now: DateTime<Local>) -> bool {
        if !header.staleness_enabled() {
            return false;
        }

        let Some((hour, minute, second)) = header.badge_hms() else {
            return true;
        };
        let Some(time) = NaiveTime::from_hms_opt(hour, minute, second) else {
            return true;
        };

        let origination = now.date_naive().and_time(time) + TimeDelta::hours(self.hour_offset);
        let elapsed = now.naive_local().signed_duration_since(origination);

        elapsed > TimeDelta::seconds(header.timeout_secs as i64)
    }

    /// Classify a reassembled frame into a delivery event.
    ///
    /// Valid and fresh frames pass through as messages; malformed badges
    /// and stale frames are flagged as garbage for the caller to drop.
    pub fn classify(&self, frame: Frame) -> DeliveryEvent {
        self.classify_at(frame, Local::now())
    }

    /// Classify against an explicit "now".
    pub fn classify_at(&self, frame: Frame, now: DateTime<Local>) -> DeliveryEvent {
        if frame.header.badge_hms().is_none() {
            return DeliveryEvent::Garbage {
                frame,
                reason: "invalid badge timestamp",
            };
        }
        if self.is_stale_at(&frame.header, now) {
            return DeliveryEvent::Garbage {
                frame,
                reason: "stale message",
            };
        }
        DeliveryEvent::Message(frame)
    }
}
