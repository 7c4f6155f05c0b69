//! Segment registry: create, soft-delete and inspect segment definitions

use crate::context::OpContext;
use crate::error::{Error, Result, StoreResultExt};
use crate::store::{Query, Reader, Transact, UnitOfWork};
use crate::tables;
use crate::types::{SegmentRecord, to_millis};
use redb::ReadableTable;
use segmentd_common::{Segment, SegmentState};
use tracing::info;

/// Segment definition operations
#[derive(Clone, Copy, Debug, Default)]
pub struct Registry;

impl Registry {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Register a new segment.
    ///
    /// `rollout_percent` is stored as given; range checks belong to the
    /// caller. A slug that is soft-deleted but not yet purged is still taken.
    pub fn create(
        &self,
        tx: &impl Transact,
        ctx: &OpContext,
        slug: &str,
        rollout_percent: Option<u8>,
    ) -> Result<()> {
        const OP: &str = "create segment";
        tx.transact(ctx, OP, |uow| {
            let record = SegmentRecord {
                rollout_percent,
                state: SegmentState::Active,
                created_at: to_millis(uow.now()),
            };
            let bytes = bincode::serialize(&record).with_op(OP)?;

            let mut table = uow.open(tables::SEGMENTS, OP)?;
            if table.get(slug).with_op(OP)?.is_some() {
                return Err(Error::AlreadyExists(slug.to_string()));
            }
            table.insert(slug, bytes.as_slice()).with_op(OP)?;
            Ok(())
        })?;

        info!("Created segment '{}' (rollout: {:?})", slug, rollout_percent);
        Ok(())
    }

    /// Flag a segment as deleted. Its row and links stay until the
    /// retention engine purges them.
    pub fn soft_delete(&self, tx: &impl Transact, ctx: &OpContext, slug: &str) -> Result<()> {
        const OP: &str = "delete segment";
        tx.transact(ctx, OP, |uow| {
            let mut table = uow.open(tables::SEGMENTS, OP)?;
            let record = table
                .get(slug)
                .with_op(OP)?
                .map(|v| bincode::deserialize::<SegmentRecord>(v.value()))
                .transpose()
                .with_op(OP)?;

            let Some(mut record) = record else {
                return Err(Error::NotFound(slug.to_string()));
            };
            record.state = record
                .state
                .soft_delete()
                .map_err(|_| Error::NotFound(slug.to_string()))?;

            let bytes = bincode::serialize(&record).with_op(OP)?;
            table.insert(slug, bytes.as_slice()).with_op(OP)?;
            uow.open(tables::DELETED_SEGMENTS, OP)?
                .insert(slug, ())
                .with_op(OP)?;
            Ok(())
        })?;

        info!("Soft-deleted segment '{}'", slug);
        Ok(())
    }

    /// Look up one segment, whatever its state.
    ///
    /// Given an open [`UnitOfWork`] the lookup sees its uncommitted writes.
    pub fn get(&self, src: &impl Query, ctx: &OpContext, slug: &str) -> Result<Option<Segment>> {
        const OP: &str = "get segment";
        src.query(ctx, OP, |reader| {
            let record = match reader {
                Reader::Txn(uow) => lookup(&uow.open(tables::SEGMENTS, OP)?, slug, OP)?,
                Reader::Snapshot(view) => lookup(&view.open(tables::SEGMENTS, OP)?, slug, OP)?,
            };
            Ok(record.map(|r| r.into_segment(slug)))
        })
    }

    /// All stored segments, active and soft-deleted, ordered by slug.
    pub fn list(&self, src: &impl Query, ctx: &OpContext) -> Result<Vec<Segment>> {
        const OP: &str = "list segments";
        src.query(ctx, OP, |reader| {
            let records = match reader {
                Reader::Txn(uow) => scan(&uow.open(tables::SEGMENTS, OP)?, OP)?,
                Reader::Snapshot(view) => scan(&view.open(tables::SEGMENTS, OP)?, OP)?,
            };
            Ok(records
                .into_iter()
                .map(|(slug, record)| record.into_segment(&slug))
                .collect())
        })
    }
}

fn lookup(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    slug: &str,
    op: &'static str,
) -> Result<Option<SegmentRecord>> {
    table
        .get(slug)
        .with_op(op)?
        .map(|v| bincode::deserialize::<SegmentRecord>(v.value()))
        .transpose()
        .with_op(op)
}

fn scan(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    op: &'static str,
) -> Result<Vec<(String, SegmentRecord)>> {
    let mut result = Vec::new();
    for entry in table.iter().with_op(op)? {
        let (key, value) = entry.with_op(op)?;
        let record: SegmentRecord = bincode::deserialize(value.value()).with_op(op)?;
        result.push((key.value().to_string(), record));
    }
    Ok(result)
}

/// Fail with `NotFound` unless `slug` names an active segment.
pub(crate) fn require_active(uow: &UnitOfWork<'_>, slug: &str, op: &'static str) -> Result<()> {
    match lookup(&uow.open(tables::SEGMENTS, op)?, slug, op)? {
        Some(r) if r.state.is_active() => Ok(()),
        _ => Err(Error::NotFound(slug.to_string())),
    }
}

/// Active segments with a rollout percentage, as `(slug, percent)`.
pub(crate) fn rollout_segments(
    uow: &UnitOfWork<'_>,
    op: &'static str,
) -> Result<Vec<(String, Option<u8>)>> {
    let segments = scan(&uow.open(tables::SEGMENTS, op)?, op)?;
    Ok(segments
        .into_iter()
        .filter(|(_, record)| record.state.is_active())
        .map(|(slug, record)| (slug, record.rollout_percent))
        .collect())
}

/// Up to `limit` soft-deleted slugs, in slug order.
pub(crate) fn deleted_slugs(uow: &UnitOfWork<'_>, limit: u64, op: &'static str) -> Result<Vec<String>> {
    let table = uow.open(tables::DELETED_SEGMENTS, op)?;
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    let mut slugs = Vec::new();
    for entry in table.iter().with_op(op)?.take(limit) {
        let (key, _) = entry.with_op(op)?;
        slugs.push(key.value().to_string());
    }
    Ok(slugs)
}

/// Remove a soft-deleted segment row and its index entry. Returns the
/// record in state `Purged`, or `None` when the slug is not soft-deleted.
pub(crate) fn purge(uow: &UnitOfWork<'_>, slug: &str, op: &'static str) -> Result<Option<Segment>> {
    uow.open(tables::DELETED_SEGMENTS, op)?
        .remove(slug)
        .with_op(op)?;
    let Some(mut record) = lookup(&uow.open(tables::SEGMENTS, op)?, slug, op)? else {
        return Ok(None);
    };
    let Ok(purged) = record.state.purge() else {
        return Ok(None);
    };
    record.state = purged;
    uow.open(tables::SEGMENTS, op)?
        .remove(slug)
        .with_op(op)?;
    Ok(Some(record.into_segment(slug)))
}
