//! Core type definitions for segmentd
//!
//! This module defines the identifiers and records shared by the engine
//! and its callers: users, segments, their lifecycle and audit entries.

use chrono::{DateTime, Utc};
use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a user.
///
/// Users have no record of their own beyond what membership links
/// reference; the id is whatever the caller's system uses.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, From, Into,
)]
#[display("{_0}")]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

/// Kind of change recorded in the audit log
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// User was linked to a segment
    Add,
    /// User was unlinked from a segment
    Delete,
}

impl Operation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a segment definition.
///
/// `Active -> SoftDeleted -> Purged`. Only the first two are ever stored;
/// a purged segment has no row left and is reported in this state by the
/// retention engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentState {
    Active,
    SoftDeleted,
    Purged,
}

/// Rejected lifecycle transition
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("illegal segment transition: {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: SegmentState,
    pub to: SegmentState,
}

impl SegmentState {
    /// Flag an active segment as deleted.
    pub const fn soft_delete(self) -> Result<Self, IllegalTransition> {
        match self {
            Self::Active => Ok(Self::SoftDeleted),
            from => Err(IllegalTransition {
                from,
                to: Self::SoftDeleted,
            }),
        }
    }

    /// Physically remove a soft-deleted segment.
    pub const fn purge(self) -> Result<Self, IllegalTransition> {
        match self {
            Self::SoftDeleted => Ok(Self::Purged),
            from => Err(IllegalTransition {
                from,
                to: Self::Purged,
            }),
        }
    }

    /// Whether members of a segment in this state are resolved
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

/// A segment definition as seen by callers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub slug: String,
    /// Share of users (by bucket) auto-enrolled; `None` means explicit-only
    pub rollout_percent: Option<u8>,
    pub state: SegmentState,
    pub created_at: DateTime<Utc>,
}

/// One row of the audit log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub user_id: UserId,
    pub segment_id: String,
    pub operation: Operation,
    pub inserted_at: DateTime<Utc>,
}
