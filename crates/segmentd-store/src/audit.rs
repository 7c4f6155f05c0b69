//! Audit log of membership changes
//!
//! Entries are appended inside the transaction that changes the links they
//! describe, so a link change and its entry commit or vanish together.

use crate::context::OpContext;
use crate::error::{Result, StoreResultExt};
use crate::store::{Store, UnitOfWork};
use crate::tables;
use crate::types::{LogRecord, to_millis};
use chrono::{DateTime, Utc};
use redb::ReadableTable;
use segmentd_common::{LogEntry, Operation, UserId};

/// Sink for audit entries written as part of a unit of work
pub trait AuditWriter: Send + Sync {
    /// Append one entry per slug.
    fn append(
        &self,
        uow: &UnitOfWork<'_>,
        user_id: UserId,
        slugs: &[&str],
        operation: Operation,
    ) -> Result<()>;
}

/// The redb-backed audit log
#[derive(Clone, Copy, Debug, Default)]
pub struct AuditLog;

impl AuditLog {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Entries of `user_id` with `from <= inserted_at < to`, oldest first.
    ///
    /// Runs on a read snapshot; it never joins or opens a write transaction.
    pub fn query(
        &self,
        store: &Store,
        ctx: &OpContext,
        user_id: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LogEntry>> {
        const OP: &str = "query audit log";
        if from >= to {
            return Ok(Vec::new());
        }
        let (from, to) = (to_millis(from), to_millis(to));

        store.read(ctx, OP, |view| {
            let index = view.open(tables::LOGS_BY_USER, OP)?;
            let logs = view.open(tables::LOGS, OP)?;

            let mut entries = Vec::new();
            let range = (user_id.get(), from, 0)..(user_id.get(), to, 0);
            for entry in index.range(range).with_op(OP)? {
                let (key, _) = entry.with_op(OP)?;
                let (_, _, id) = key.value();
                let Some(bytes) = logs.get(id).with_op(OP)? else {
                    continue;
                };
                let record: LogRecord = bincode::deserialize(bytes.value()).with_op(OP)?;
                entries.push(record.into_entry(id));
            }
            Ok(entries)
        })
    }
}

impl AuditWriter for AuditLog {
    fn append(
        &self,
        uow: &UnitOfWork<'_>,
        user_id: UserId,
        slugs: &[&str],
        operation: Operation,
    ) -> Result<()> {
        const OP: &str = "append audit log";
        let inserted_at = to_millis(uow.now());

        for slug in slugs {
            let id = uow.next_sequence(tables::LOG_ID_SEQUENCE, OP)?;
            let record = LogRecord {
                user_id: user_id.get(),
                segment_id: (*slug).to_string(),
                operation,
                inserted_at,
            };
            let bytes = bincode::serialize(&record).with_op(OP)?;
            uow.open(tables::LOGS, OP)?
                .insert(id, bytes.as_slice())
                .with_op(OP)?;
            uow.open(tables::LOGS_BY_USER, OP)?
                .insert((user_id.get(), inserted_at, id), ())
                .with_op(OP)?;
            uow.open(tables::LOGS_BY_TIME, OP)?
                .insert((inserted_at, id), ())
                .with_op(OP)?;
        }
        Ok(())
    }
}

/// Delete up to `limit` entries with `inserted_at <= cutoff`, oldest first.
pub(crate) fn purge_before(
    uow: &UnitOfWork<'_>,
    cutoff: i64,
    limit: u64,
    op: &'static str,
) -> Result<u64> {
    let doomed: Vec<(i64, u64)> = {
        let index = uow.open(tables::LOGS_BY_TIME, op)?;
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        let mut doomed = Vec::new();
        for entry in index.range(..=(cutoff, u64::MAX)).with_op(op)?.take(limit) {
            let (key, _) = entry.with_op(op)?;
            doomed.push(key.value());
        }
        doomed
    };

    let mut logs = uow.open(tables::LOGS, op)?;
    let mut by_user = uow.open(tables::LOGS_BY_USER, op)?;
    let mut by_time = uow.open(tables::LOGS_BY_TIME, op)?;
    for &(inserted_at, id) in &doomed {
        let record = logs
            .remove(id)
            .with_op(op)?
            .map(|v| bincode::deserialize::<LogRecord>(v.value()))
            .transpose()
            .with_op(op)?;
        if let Some(record) = record {
            by_user
                .remove((record.user_id, inserted_at, id))
                .with_op(op)?;
        }
        by_time.remove((inserted_at, id)).with_op(op)?;
    }
    Ok(doomed.len() as u64)
}
