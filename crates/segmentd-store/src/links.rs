//! Membership link rows and their indexes.
//!
//! A link lives in `user_segments`, mirrored by `segment_users` for the
//! segment cascade and, when it has a TTL, by `link_expiry`. Every helper
//! here keeps the three in step.

use crate::error::{Error, Result, StoreResultExt};
use crate::store::UnitOfWork;
use crate::tables;
use crate::types::{LinkRecord, to_millis};
use redb::ReadableTable;
use segmentd_common::UserId;

/// What to do when a live link already exists
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OnConflict {
    Fail,
    Ignore,
}

/// Outcome of [`insert`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LinkWrite {
    Inserted,
    /// An expired, not yet purged link was overwritten
    Replaced,
    /// A live link was already present and the conflict was ignored
    Skipped,
}

impl LinkWrite {
    pub const fn wrote(self) -> bool {
        matches!(self, Self::Inserted | Self::Replaced)
    }
}

/// Record the user's first appearance, if this is it.
pub(crate) fn ensure_user(uow: &UnitOfWork<'_>, user_id: UserId, op: &'static str) -> Result<()> {
    let mut users = uow.open(tables::USERS, op)?;
    let seen = users.get(user_id.get()).with_op(op)?.is_some();
    if !seen {
        users
            .insert(user_id.get(), to_millis(uow.now()))
            .with_op(op)?;
    }
    Ok(())
}

fn get(
    uow: &UnitOfWork<'_>,
    user_id: UserId,
    slug: &str,
    op: &'static str,
) -> Result<Option<LinkRecord>> {
    let table = uow.open(tables::USER_SEGMENTS, op)?;
    let record = table
        .get((user_id.get(), slug))
        .with_op(op)?
        .map(|v| bincode::deserialize::<LinkRecord>(v.value()))
        .transpose()
        .with_op(op)?;
    Ok(record)
}

/// Insert a link stamped with the transaction's `now`.
pub(crate) fn insert(
    uow: &UnitOfWork<'_>,
    user_id: UserId,
    slug: &str,
    ttl_ms: Option<i64>,
    on_conflict: OnConflict,
    op: &'static str,
) -> Result<LinkWrite> {
    let now = to_millis(uow.now());
    let outcome = match get(uow, user_id, slug, op)? {
        Some(existing) if existing.is_live(now) => match on_conflict {
            OnConflict::Fail => {
                return Err(Error::AlreadyMember {
                    user_id,
                    slug: slug.to_string(),
                });
            }
            OnConflict::Ignore => return Ok(LinkWrite::Skipped),
        },
        Some(expired) => {
            remove_expiry(uow, user_id, slug, &expired, op)?;
            LinkWrite::Replaced
        }
        None => LinkWrite::Inserted,
    };

    let record = LinkRecord {
        ttl_ms,
        inserted_at: now,
    };
    let bytes = bincode::serialize(&record).with_op(op)?;
    uow.open(tables::USER_SEGMENTS, op)?
        .insert((user_id.get(), slug), bytes.as_slice())
        .with_op(op)?;
    uow.open(tables::SEGMENT_USERS, op)?
        .insert((slug, user_id.get()), ())
        .with_op(op)?;
    if let Some(expires_at) = record.expires_at() {
        uow.open(tables::LINK_EXPIRY, op)?
            .insert((expires_at, user_id.get(), slug), ())
            .with_op(op)?;
    }
    Ok(outcome)
}

/// Delete a link and its index entries. Returns whether one existed.
pub(crate) fn remove(
    uow: &UnitOfWork<'_>,
    user_id: UserId,
    slug: &str,
    op: &'static str,
) -> Result<bool> {
    let Some(record) = get(uow, user_id, slug, op)? else {
        return Ok(false);
    };
    uow.open(tables::USER_SEGMENTS, op)?
        .remove((user_id.get(), slug))
        .with_op(op)?;
    uow.open(tables::SEGMENT_USERS, op)?
        .remove((slug, user_id.get()))
        .with_op(op)?;
    remove_expiry(uow, user_id, slug, &record, op)?;
    Ok(true)
}

fn remove_expiry(
    uow: &UnitOfWork<'_>,
    user_id: UserId,
    slug: &str,
    record: &LinkRecord,
    op: &'static str,
) -> Result<()> {
    if let Some(expires_at) = record.expires_at() {
        uow.open(tables::LINK_EXPIRY, op)?
            .remove((expires_at, user_id.get(), slug))
            .with_op(op)?;
    }
    Ok(())
}

/// All link rows of a user, expired ones included, as `(slug, record)`.
pub(crate) fn for_user(
    uow: &UnitOfWork<'_>,
    user_id: UserId,
    op: &'static str,
) -> Result<Vec<(String, LinkRecord)>> {
    let table = uow.open(tables::USER_SEGMENTS, op)?;
    let mut result = Vec::new();
    for entry in table.range((user_id.get(), "")..).with_op(op)? {
        let (key, value) = entry.with_op(op)?;
        let (owner, slug) = key.value();
        if owner != user_id.get() {
            break;
        }
        let record: LinkRecord = bincode::deserialize(value.value()).with_op(op)?;
        result.push((slug.to_string(), record));
    }
    Ok(result)
}

/// Delete every link pointing at `slug`. Returns how many were removed.
pub(crate) fn remove_for_segment(uow: &UnitOfWork<'_>, slug: &str, op: &'static str) -> Result<u64> {
    let members: Vec<i64> = {
        let table = uow.open(tables::SEGMENT_USERS, op)?;
        let mut members = Vec::new();
        for entry in table.range((slug, i64::MIN)..).with_op(op)? {
            let (key, _) = entry.with_op(op)?;
            let (segment, user_id) = key.value();
            if segment != slug {
                break;
            }
            members.push(user_id);
        }
        members
    };

    let mut removed = 0;
    for user_id in members {
        if remove(uow, UserId::new(user_id), slug, op)? {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Delete up to `limit` links whose expiry lies strictly before `now`.
pub(crate) fn purge_expired(
    uow: &UnitOfWork<'_>,
    now: i64,
    limit: u64,
    op: &'static str,
) -> Result<u64> {
    let expired: Vec<(i64, String)> = {
        let table = uow.open(tables::LINK_EXPIRY, op)?;
        let mut expired = Vec::new();
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        for entry in table.range(..(now, i64::MIN, "")).with_op(op)?.take(limit) {
            let (key, _) = entry.with_op(op)?;
            let (_, user_id, slug) = key.value();
            expired.push((user_id, slug.to_string()));
        }
        expired
    };

    let mut removed = 0;
    for (user_id, slug) in &expired {
        if remove(uow, UserId::new(*user_id), slug, op)? {
            removed += 1;
        }
    }
    Ok(removed)
}
