//! Retention engine
//!
//! Three independent purges, each bounded by a per-call row limit and run in
//! its own short write transaction. Re-running a purge is always safe; a
//! report with fewer rows than the limit means the backlog is drained.

use crate::audit;
use crate::context::OpContext;
use crate::error::{Error, Result};
use crate::links;
use crate::registry;
use crate::store::{Store, Transact};
use crate::tables;
use crate::types::to_millis;
use chrono::Months;
use segmentd_common::Segment;
use tracing::{debug, info};

/// Default audit retention window in months
pub const DEFAULT_LOG_RETENTION_MONTHS: u32 = 3;

/// Rows removed by one purge pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub rows: u64,
}

/// Segments removed by one purge pass, with the links cascaded away
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentPurgeReport {
    /// Purged segments, in state [`Purged`](segmentd_common::SegmentState::Purged)
    pub segments: Vec<Segment>,
    pub links: u64,
}

impl SegmentPurgeReport {
    #[must_use]
    pub fn rows(&self) -> u64 {
        self.segments.len() as u64
    }
}

/// Physically removes soft-deleted segments, expired links and old logs
#[derive(Clone, Copy, Debug)]
pub struct Retention {
    log_retention_months: u32,
}

impl Default for Retention {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_RETENTION_MONTHS)
    }
}

impl Retention {
    #[must_use]
    pub const fn new(log_retention_months: u32) -> Self {
        Self {
            log_retention_months,
        }
    }

    #[must_use]
    pub const fn log_retention_months(&self) -> u32 {
        self.log_retention_months
    }

    /// Delete up to `limit` soft-deleted segments together with every link
    /// that references them.
    pub fn purge_deleted_segments(
        &self,
        store: &Store,
        ctx: &OpContext,
        limit: u64,
    ) -> Result<SegmentPurgeReport> {
        const OP: &str = "purge deleted segments";
        check_limit(limit)?;

        let report = store.transact(ctx, OP, |uow| {
            let mut report = SegmentPurgeReport::default();
            for slug in registry::deleted_slugs(uow, limit, OP)? {
                let Some(segment) = registry::purge(uow, &slug, OP)? else {
                    continue;
                };
                report.links += links::remove_for_segment(uow, &slug, OP)?;
                debug!("Purged segment '{}'", slug);
                report.segments.push(segment);
            }
            Ok(report)
        })?;

        if !report.segments.is_empty() {
            info!(
                "Purged {} deleted segment(s), {} link(s)",
                report.segments.len(),
                report.links
            );
        }
        Ok(report)
    }

    /// Delete up to `limit` links whose `inserted_at + ttl` lies before now.
    pub fn purge_expired_links(
        &self,
        store: &Store,
        ctx: &OpContext,
        limit: u64,
    ) -> Result<PurgeReport> {
        const OP: &str = "purge expired links";
        check_limit(limit)?;

        let rows = store.transact(ctx, OP, |uow| {
            links::purge_expired(uow, to_millis(uow.now()), limit, OP)
        })?;

        if rows > 0 {
            info!("Purged {} expired link(s)", rows);
        }
        Ok(PurgeReport { rows })
    }

    /// Delete up to `limit` audit entries older than the retention window.
    pub fn purge_old_logs(&self, store: &Store, ctx: &OpContext, limit: u64) -> Result<PurgeReport> {
        const OP: &str = "purge old logs";
        check_limit(limit)?;

        let rows = store.transact(ctx, OP, |uow| {
            let Some(cutoff) = uow
                .now()
                .checked_sub_months(Months::new(self.log_retention_months))
            else {
                return Ok(0);
            };
            audit::purge_before(uow, to_millis(cutoff), limit, OP)
        })?;

        if rows > 0 {
            info!(
                "Purged {} audit entr(ies) older than {} month(s)",
                rows, self.log_retention_months
            );
        }
        Ok(PurgeReport { rows })
    }
}

fn check_limit(limit: u64) -> Result<()> {
    if limit == 0 {
        return Err(Error::invalid_argument("purge limit must be positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::mutator::Mutator;
    use crate::registry::Registry;
    use crate::test_support::{TestStore, ctx, epoch};
    use chrono::Duration as ChronoDuration;
    use segmentd_common::{SegmentState, UserId};
    use std::time::Duration;

    fn mutator() -> Mutator {
        Mutator::<AuditLog>::default()
    }

    fn link_count(t: &TestStore, user: i64) -> usize {
        t.store
            .transact(&ctx(), "count links", |uow| {
                links::for_user(uow, UserId::new(user), "count links")
            })
            .unwrap()
            .len()
    }

    fn log_count(t: &TestStore, user: i64) -> usize {
        AuditLog
            .query(
                &t.store,
                &ctx(),
                UserId::new(user),
                epoch() - ChronoDuration::days(3650),
                epoch() + ChronoDuration::days(3650),
            )
            .unwrap()
            .len()
    }

    #[test]
    fn test_purge_cascades_links() {
        let t = TestStore::new();
        Registry.create(&t.store, &ctx(), "A", None).unwrap();
        Registry.create(&t.store, &ctx(), "B", None).unwrap();
        for user in 1..=3 {
            mutator()
                .add(&t.store, &ctx(), UserId::new(user), &["A", "B"], None)
                .unwrap();
        }
        Registry.soft_delete(&t.store, &ctx(), "A").unwrap();

        let report = Retention::default()
            .purge_deleted_segments(&t.store, &ctx(), 10)
            .unwrap();
        assert_eq!(report.rows(), 1);
        assert_eq!(report.links, 3);
        assert_eq!(report.segments[0].slug, "A");
        assert_eq!(report.segments[0].state, SegmentState::Purged);

        assert!(Registry.get(&t.store, &ctx(), "A").unwrap().is_none());
        for user in 1..=3 {
            assert_eq!(link_count(&t, user), 1);
        }
        // No audit entries are written by retention
        assert_eq!(log_count(&t, 1), 2);
    }

    #[test]
    fn test_purge_skips_active_segments() {
        let t = TestStore::new();
        Registry.create(&t.store, &ctx(), "A", None).unwrap();
        let report = Retention::default()
            .purge_deleted_segments(&t.store, &ctx(), 10)
            .unwrap();
        assert_eq!(report, SegmentPurgeReport::default());
        assert!(Registry.get(&t.store, &ctx(), "A").unwrap().is_some());
    }

    #[test]
    fn test_segment_purge_is_batch_bounded() {
        let t = TestStore::new();
        for i in 0..5 {
            let slug = format!("s{i}");
            Registry.create(&t.store, &ctx(), &slug, None).unwrap();
            Registry.soft_delete(&t.store, &ctx(), &slug).unwrap();
        }
        let retention = Retention::default();
        assert_eq!(retention.purge_deleted_segments(&t.store, &ctx(), 3).unwrap().rows(), 3);
        assert_eq!(retention.purge_deleted_segments(&t.store, &ctx(), 3).unwrap().rows(), 2);
        assert_eq!(retention.purge_deleted_segments(&t.store, &ctx(), 3).unwrap().rows(), 0);
    }

    #[test]
    fn test_segment_purge_reads_only_deleted_index() {
        let t = TestStore::new();
        for i in 0..50 {
            Registry.create(&t.store, &ctx(), &format!("live{i:02}"), None).unwrap();
        }
        for slug in ["gone1", "gone2", "gone3"] {
            Registry.create(&t.store, &ctx(), slug, None).unwrap();
            Registry.soft_delete(&t.store, &ctx(), slug).unwrap();
        }
        mutator().add(&t.store, &ctx(), UserId::new(1), &["live00"], None).unwrap();

        let retention = Retention::default();
        let report = retention.purge_deleted_segments(&t.store, &ctx(), 1).unwrap();
        assert_eq!(report.segments.len(), 1);
        assert_eq!(report.segments[0].slug, "gone1");

        let report = retention.purge_deleted_segments(&t.store, &ctx(), 10).unwrap();
        let slugs: Vec<_> = report.segments.iter().map(|s| s.slug.as_str()).collect();
        assert_eq!(slugs, vec!["gone2", "gone3"]);

        t.store
            .transact(&ctx(), "scan", |uow| {
                assert!(registry::deleted_slugs(uow, 10, "scan")?.is_empty());
                Ok(())
            })
            .unwrap();
        assert_eq!(Registry.list(&t.store, &ctx()).unwrap().len(), 50);
        assert_eq!(link_count(&t, 1), 1);
    }

    #[test]
    fn test_slug_reusable_after_purge() {
        let t = TestStore::new();
        Registry.create(&t.store, &ctx(), "A", Some(10)).unwrap();
        mutator().add(&t.store, &ctx(), UserId::new(1), &["A"], None).unwrap();
        Registry.soft_delete(&t.store, &ctx(), "A").unwrap();
        Retention::default()
            .purge_deleted_segments(&t.store, &ctx(), 10)
            .unwrap();

        Registry.create(&t.store, &ctx(), "A", None).unwrap();
        let segment = Registry.get(&t.store, &ctx(), "A").unwrap().unwrap();
        assert_eq!(segment.state, SegmentState::Active);
        assert_eq!(segment.rollout_percent, None);
        // Old memberships did not come back with the slug
        assert_eq!(link_count(&t, 1), 0);
    }

    #[test]
    fn test_expired_links_batch_bound() {
        let t = TestStore::new();
        Registry.create(&t.store, &ctx(), "A", None).unwrap();
        Registry.create(&t.store, &ctx(), "B", None).unwrap();
        for user in 0..12 {
            mutator()
                .add(&t.store, &ctx(), UserId::new(user), &["A"], Some(Duration::from_secs(60)))
                .unwrap();
        }
        // Permanent and still-live links are never eligible
        mutator().add(&t.store, &ctx(), UserId::new(100), &["A"], None).unwrap();
        t.clock.advance(ChronoDuration::minutes(2));
        mutator()
            .add(&t.store, &ctx(), UserId::new(101), &["B"], Some(Duration::from_secs(60)))
            .unwrap();

        let retention = Retention::default();
        assert_eq!(retention.purge_expired_links(&t.store, &ctx(), 5).unwrap().rows, 5);
        assert_eq!(retention.purge_expired_links(&t.store, &ctx(), 5).unwrap().rows, 5);
        assert_eq!(retention.purge_expired_links(&t.store, &ctx(), 5).unwrap().rows, 2);
        assert_eq!(retention.purge_expired_links(&t.store, &ctx(), 5).unwrap().rows, 0);
        assert_eq!(link_count(&t, 100), 1);
        assert_eq!(link_count(&t, 101), 1);
    }

    #[test]
    fn test_expired_links_twelve_in_two_calls() {
        let t = TestStore::new();
        Registry.create(&t.store, &ctx(), "A", None).unwrap();
        for user in 0..12 {
            mutator()
                .add(&t.store, &ctx(), UserId::new(user), &["A"], Some(Duration::from_secs(1)))
                .unwrap();
        }
        t.clock.advance(ChronoDuration::seconds(2));

        let retention = Retention::default();
        assert_eq!(retention.purge_expired_links(&t.store, &ctx(), 5).unwrap().rows, 5);
        assert_eq!(retention.purge_expired_links(&t.store, &ctx(), 12).unwrap().rows, 7);
    }

    #[test]
    fn test_link_at_expiry_instant_not_purged() {
        let t = TestStore::new();
        Registry.create(&t.store, &ctx(), "A", None).unwrap();
        mutator()
            .add(&t.store, &ctx(), UserId::new(1), &["A"], Some(Duration::from_secs(60)))
            .unwrap();
        t.clock.advance(ChronoDuration::seconds(60));
        let retention = Retention::default();
        assert_eq!(retention.purge_expired_links(&t.store, &ctx(), 10).unwrap().rows, 0);
        t.clock.advance(ChronoDuration::milliseconds(1));
        assert_eq!(retention.purge_expired_links(&t.store, &ctx(), 10).unwrap().rows, 1);
    }

    #[test]
    fn test_old_logs_window() {
        let t = TestStore::new();
        Registry.create(&t.store, &ctx(), "A", None).unwrap();
        // Two entries at epoch (2024-03-01)
        mutator().add(&t.store, &ctx(), UserId::new(1), &["A"], None).unwrap();
        mutator().delete(&t.store, &ctx(), UserId::new(1), &["A"]).unwrap();
        // One entry a month later
        t.clock.advance(ChronoDuration::days(31));
        mutator().add(&t.store, &ctx(), UserId::new(1), &["A"], None).unwrap();

        let retention = Retention::default();
        t.clock.set(epoch() + ChronoDuration::days(60));
        assert_eq!(retention.purge_old_logs(&t.store, &ctx(), 10).unwrap().rows, 0);

        // 2024-06-01 12:00 minus three months is exactly epoch
        t.clock.set(epoch() + ChronoDuration::days(92));
        assert_eq!(retention.purge_old_logs(&t.store, &ctx(), 1).unwrap().rows, 1);
        assert_eq!(retention.purge_old_logs(&t.store, &ctx(), 10).unwrap().rows, 1);
        assert_eq!(log_count(&t, 1), 1);
    }

    #[test]
    fn test_zero_limit_rejected() {
        let t = TestStore::new();
        let retention = Retention::default();
        assert!(matches!(
            retention.purge_expired_links(&t.store, &ctx(), 0),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            retention.purge_old_logs(&t.store, &ctx(), 0),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            retention.purge_deleted_segments(&t.store, &ctx(), 0),
            Err(Error::InvalidArgument(_))
        ));
    }
}
