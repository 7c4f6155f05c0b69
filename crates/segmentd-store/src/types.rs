//! Stored record types.
//!
//! These types are serialized to redb via bincode. Timestamps are kept as
//! UTC unix milliseconds so they can double as index key components.

use chrono::{DateTime, Utc};
use segmentd_common::{LogEntry, Operation, Segment, SegmentState, UserId};
use serde::{Deserialize, Serialize};

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Segment definition row
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SegmentRecord {
    pub rollout_percent: Option<u8>,
    pub state: SegmentState,
    pub created_at: i64,
}

impl SegmentRecord {
    pub fn into_segment(self, slug: &str) -> Segment {
        Segment {
            slug: slug.to_string(),
            rollout_percent: self.rollout_percent,
            state: self.state,
            created_at: from_millis(self.created_at),
        }
    }
}

/// Explicit user-to-segment link
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct LinkRecord {
    pub ttl_ms: Option<i64>,
    pub inserted_at: i64,
}

impl LinkRecord {
    /// Instant from which the link no longer counts
    pub fn expires_at(&self) -> Option<i64> {
        self.ttl_ms.map(|ttl| self.inserted_at.saturating_add(ttl))
    }

    /// A link is expired once `now >= inserted_at + ttl`.
    pub fn is_live(&self, now: i64) -> bool {
        self.expires_at().is_none_or(|expires_at| now < expires_at)
    }
}

/// Audit log row
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct LogRecord {
    pub user_id: i64,
    pub segment_id: String,
    pub operation: Operation,
    pub inserted_at: i64,
}

impl LogRecord {
    pub fn into_entry(self, id: u64) -> LogEntry {
        LogEntry {
            id,
            user_id: UserId::new(self.user_id),
            segment_id: self.segment_id,
            operation: self.operation,
            inserted_at: from_millis(self.inserted_at),
        }
    }
}
