//! Engine facade
//!
//! `SegmentEngine` wires the registry, mutator, resolver, audit log and
//! retention engine to one [`Store`]. Every method opens its own unit of
//! work; callers that need several operations in one transaction use the
//! components directly with a shared [`UnitOfWork`](crate::UnitOfWork).

use crate::audit::{AuditLog, AuditWriter};
use crate::context::OpContext;
use crate::error::Result;
use crate::mutator::Mutator;
use crate::registry::Registry;
use crate::resolver::Resolver;
use crate::retention::{PurgeReport, Retention, SegmentPurgeReport};
use crate::store::Store;
use chrono::{DateTime, Utc};
use segmentd_common::{LogEntry, Segment, UserId};
use std::time::Duration;

/// Segment membership engine
pub struct SegmentEngine<A = AuditLog> {
    store: Store,
    registry: Registry,
    mutator: Mutator<A>,
    resolver: Resolver<A>,
    retention: Retention,
}

impl<A> Clone for SegmentEngine<A> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registry: self.registry,
            mutator: self.mutator.clone(),
            resolver: self.resolver.clone(),
            retention: self.retention,
        }
    }
}

impl SegmentEngine<AuditLog> {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self::with_audit(store, AuditLog::new())
    }

    // ── Audit ──

    /// Audit entries for `user_id` in `[from, to)`.
    ///
    /// Only available when entries go to the built-in [`AuditLog`]; an
    /// engine with a custom sink reads its entries from that sink.
    pub fn logs(
        &self,
        ctx: &OpContext,
        user_id: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LogEntry>> {
        self.mutator.audit().query(&self.store, ctx, user_id, from, to)
    }
}

impl<A: AuditWriter> SegmentEngine<A> {
    /// Build an engine whose membership changes go to a custom audit sink.
    pub fn with_audit(store: Store, audit: A) -> Self {
        let mutator = Mutator::new(audit);
        Self {
            store,
            registry: Registry::new(),
            resolver: Resolver::new(mutator.clone()),
            mutator,
            retention: Retention::default(),
        }
    }

    #[must_use]
    pub fn with_log_retention_months(mut self, months: u32) -> Self {
        self.retention = Retention::new(months);
        self
    }

    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    // ── Segments ──

    pub fn create_segment(&self, ctx: &OpContext, slug: &str, rollout_percent: Option<u8>) -> Result<()> {
        self.registry.create(&self.store, ctx, slug, rollout_percent)
    }

    pub fn delete_segment(&self, ctx: &OpContext, slug: &str) -> Result<()> {
        self.registry.soft_delete(&self.store, ctx, slug)
    }

    pub fn get_segment(&self, ctx: &OpContext, slug: &str) -> Result<Option<Segment>> {
        self.registry.get(&self.store, ctx, slug)
    }

    pub fn list_segments(&self, ctx: &OpContext) -> Result<Vec<Segment>> {
        self.registry.list(&self.store, ctx)
    }

    // ── Membership ──

    pub fn add_user_to_segments<S: AsRef<str>>(
        &self,
        ctx: &OpContext,
        user_id: UserId,
        slugs: &[S],
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.mutator.add(&self.store, ctx, user_id, slugs, ttl)
    }

    pub fn remove_user_from_segments<S: AsRef<str>>(
        &self,
        ctx: &OpContext,
        user_id: UserId,
        slugs: &[S],
    ) -> Result<()> {
        self.mutator.delete(&self.store, ctx, user_id, slugs)
    }

    /// Resolve a user's segments, persisting rollout matches as links.
    pub fn active_segments(&self, ctx: &OpContext, user_id: UserId) -> Result<Vec<String>> {
        self.resolver.resolve(&self.store, ctx, user_id)
    }

    // ── Retention ──

    pub fn purge_deleted_segments(&self, ctx: &OpContext, limit: u64) -> Result<SegmentPurgeReport> {
        self.retention.purge_deleted_segments(&self.store, ctx, limit)
    }

    pub fn purge_expired_links(&self, ctx: &OpContext, limit: u64) -> Result<PurgeReport> {
        self.retention.purge_expired_links(&self.store, ctx, limit)
    }

    pub fn purge_old_logs(&self, ctx: &OpContext, limit: u64) -> Result<PurgeReport> {
        self.retention.purge_old_logs(&self.store, ctx, limit)
    }
}
