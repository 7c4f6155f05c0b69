//! Redb table definitions for persistent membership storage.
//!
//! Primary tables hold bincode-encoded records; the `()`-valued tables are
//! secondary indexes kept in step with them inside the same transaction.

use redb::TableDefinition;

// Segments
// Key: slug, Value: bincode SegmentRecord
pub const SEGMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("segments");

// Key: slug of a soft-deleted segment; drives the segment purge
pub const DELETED_SEGMENTS: TableDefinition<&str, ()> = TableDefinition::new("deleted_segments");

// Users
// Key: user id, Value: first-seen unix millis
pub const USERS: TableDefinition<i64, i64> = TableDefinition::new("users");

// Membership links
// Key: (user_id, slug), Value: bincode LinkRecord
pub const USER_SEGMENTS: TableDefinition<(i64, &str), &[u8]> =
    TableDefinition::new("user_segments");
// Key: (slug, user_id); drives the cascade when a segment is purged
pub const SEGMENT_USERS: TableDefinition<(&str, i64), ()> = TableDefinition::new("segment_users");
// Key: (expires_at millis, user_id, slug); only links with a TTL
pub const LINK_EXPIRY: TableDefinition<(i64, i64, &str), ()> =
    TableDefinition::new("link_expiry");

// Audit log
// Key: log id, Value: bincode LogRecord
pub const LOGS: TableDefinition<u64, &[u8]> = TableDefinition::new("logs");
// Key: (user_id, inserted_at millis, log id)
pub const LOGS_BY_USER: TableDefinition<(i64, i64, u64), ()> =
    TableDefinition::new("logs_by_user");
// Key: (inserted_at millis, log id)
pub const LOGS_BY_TIME: TableDefinition<(i64, u64), ()> = TableDefinition::new("logs_by_time");

// Monotonic counters
// Key: sequence name, Value: last issued value
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

pub const LOG_ID_SEQUENCE: &str = "log_id";
