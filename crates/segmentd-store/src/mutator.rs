//! Membership mutator: explicit add/remove of user-to-segment links
//!
//! Each call is one unit of work: link rows and their audit entries are
//! written together or not at all.

use crate::audit::{AuditLog, AuditWriter};
use crate::context::OpContext;
use crate::error::{Error, Result};
use crate::links::{self, OnConflict};
use crate::registry;
use crate::store::{Transact, UnitOfWork};
use segmentd_common::{Operation, UserId};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Adds and removes explicit memberships
pub struct Mutator<A = AuditLog> {
    audit: Arc<A>,
}

impl<A> Clone for Mutator<A> {
    fn clone(&self) -> Self {
        Self {
            audit: Arc::clone(&self.audit),
        }
    }
}

impl Default for Mutator<AuditLog> {
    fn default() -> Self {
        Self::new(AuditLog::new())
    }
}

impl<A: AuditWriter> Mutator<A> {
    pub fn new(audit: A) -> Self {
        Self {
            audit: Arc::new(audit),
        }
    }

    pub(crate) fn audit(&self) -> &A {
        &self.audit
    }

    /// Link `user_id` to every slug, all sharing the same optional TTL.
    ///
    /// Every slug must name an active segment and must not already hold a
    /// live link for this user; any violation rolls back the whole batch.
    pub fn add<S: AsRef<str>>(
        &self,
        tx: &impl Transact,
        ctx: &OpContext,
        user_id: UserId,
        slugs: &[S],
        ttl: Option<Duration>,
    ) -> Result<()> {
        const OP: &str = "add user to segments";
        if slugs.is_empty() {
            return Ok(());
        }
        let ttl_ms = ttl.map(ttl_millis).transpose()?;
        let slugs: Vec<&str> = slugs.iter().map(AsRef::as_ref).collect();

        tx.transact(ctx, OP, |uow| {
            for slug in &slugs {
                registry::require_active(uow, slug, OP)?;
            }
            self.link(uow, user_id, &slugs, ttl_ms, OnConflict::Fail, OP)
                .map(|_| ())
        })?;

        debug!("Added user {} to {} segment(s)", user_id, slugs.len());
        Ok(())
    }

    /// Unlink `user_id` from every slug. Missing links are not an error;
    /// a `Delete` entry is logged for every requested slug regardless.
    pub fn delete<S: AsRef<str>>(
        &self,
        tx: &impl Transact,
        ctx: &OpContext,
        user_id: UserId,
        slugs: &[S],
    ) -> Result<()> {
        const OP: &str = "delete user from segments";
        if slugs.is_empty() {
            return Ok(());
        }
        let slugs: Vec<&str> = slugs.iter().map(AsRef::as_ref).collect();

        let removed = tx.transact(ctx, OP, |uow| {
            let mut removed = 0;
            for slug in &slugs {
                if links::remove(uow, user_id, slug, OP)? {
                    removed += 1;
                }
            }
            self.audit.append(uow, user_id, &slugs, Operation::Delete)?;
            Ok(removed)
        })?;

        debug!(
            "Removed user {} from {}/{} segment(s)",
            user_id,
            removed,
            slugs.len()
        );
        Ok(())
    }

    /// Insert links and their `Add` entries inside an open unit of work.
    ///
    /// With `OnConflict::Ignore` an already-live link is left alone and gets
    /// no audit entry. Returns the slugs that were actually written.
    pub(crate) fn link<'s>(
        &self,
        uow: &UnitOfWork<'_>,
        user_id: UserId,
        slugs: &[&'s str],
        ttl_ms: Option<i64>,
        on_conflict: OnConflict,
        op: &'static str,
    ) -> Result<Vec<&'s str>> {
        links::ensure_user(uow, user_id, op)?;

        let mut written = Vec::with_capacity(slugs.len());
        for &slug in slugs {
            if links::insert(uow, user_id, slug, ttl_ms, on_conflict, op)?.wrote() {
                written.push(slug);
            } else {
                debug!("User {} already linked to '{}', left as is", user_id, slug);
            }
        }
        self.audit.append(uow, user_id, &written, Operation::Add)?;
        Ok(written)
    }
}

fn ttl_millis(ttl: Duration) -> Result<i64> {
    if ttl.is_zero() {
        return Err(Error::invalid_argument("ttl must be positive"));
    }
    i64::try_from(ttl.as_millis())
        .map_err(|_| Error::invalid_argument(format!("ttl too large: {ttl:?}")))
}
