//! Membership resolver
//!
//! Resolution is a read with a side effect: segments a user qualifies for
//! by rollout bucket are persisted as explicit links the first time they
//! are observed, in the same transaction as the read.

use crate::audit::{AuditLog, AuditWriter};
use crate::context::OpContext;
use crate::error::Result;
use crate::links::{self, OnConflict};
use crate::mutator::Mutator;
use crate::registry;
use crate::store::Transact;
use crate::types::to_millis;
use segmentd_common::{UserId, bucket_for};
use std::collections::HashSet;
use tracing::debug;

/// Resolves the active segments of a user
pub struct Resolver<A = AuditLog> {
    mutator: Mutator<A>,
}

impl<A> Clone for Resolver<A> {
    fn clone(&self) -> Self {
        Self {
            mutator: self.mutator.clone(),
        }
    }
}

impl<A: AuditWriter> Resolver<A> {
    #[must_use]
    pub const fn new(mutator: Mutator<A>) -> Self {
        Self { mutator }
    }

    /// Active segment slugs of `user_id`, sorted.
    ///
    /// A segment counts when it is active and either holds a live link for
    /// the user or has `rollout_percent > bucket`. Rollout-only matches are
    /// written back as permanent links with an `Add` audit entry; any
    /// failure aborts the whole resolution with nothing written.
    pub fn resolve(&self, tx: &impl Transact, ctx: &OpContext, user_id: UserId) -> Result<Vec<String>> {
        const OP: &str = "resolve segments";
        let bucket = bucket_for(user_id);
        debug!("Resolving user {} (bucket {})", user_id, bucket);

        tx.transact(ctx, OP, |uow| {
            let now = to_millis(uow.now());
            let live: HashSet<String> = links::for_user(uow, user_id, OP)?
                .into_iter()
                .filter(|(_, link)| link.is_live(now))
                .map(|(slug, _)| slug)
                .collect();

            let mut explicit = Vec::new();
            let mut qualifying = Vec::new();
            for (slug, rollout_percent) in registry::rollout_segments(uow, OP)? {
                if live.contains(&slug) {
                    explicit.push(slug);
                } else if rollout_percent.is_some_and(|percent| percent > bucket) {
                    qualifying.push(slug);
                }
            }

            // Writers are serialized, so a concurrent resolve that committed
            // first is already in `live`. Ignore only covers links written
            // earlier in the caller's own unit of work.
            if !qualifying.is_empty() {
                let slugs: Vec<&str> = qualifying.iter().map(String::as_str).collect();
                let written = uow.transact(ctx, OP, |inner| {
                    self.mutator
                        .link(inner, user_id, &slugs, None, OnConflict::Ignore, OP)
                        .map(|written| written.len())
                })?;
                debug!(
                    "User {} enrolled into {}/{} rollout segment(s)",
                    user_id,
                    written,
                    qualifying.len()
                );
            }

            explicit.append(&mut qualifying);
            explicit.sort_unstable();
            Ok(explicit)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::registry::Registry;
    use crate::test_support::{FailingAudit, TestStore, ctx, epoch};
    use segmentd_common::Operation;
    use std::thread;
    use std::time::Duration;

    fn resolver() -> Resolver {
        Resolver::new(Mutator::<AuditLog>::default())
    }

    fn create(t: &TestStore, slug: &str, percent: Option<u8>) {
        Registry.create(&t.store, &ctx(), slug, percent).unwrap();
    }

    fn link_count(t: &TestStore, user: i64) -> usize {
        t.store
            .transact(&ctx(), "count links", |uow| {
                links::for_user(uow, UserId::new(user), "count links")
            })
            .unwrap()
            .len()
    }

    fn adds(t: &TestStore, user: i64) -> Vec<String> {
        AuditLog
            .query(
                &t.store,
                &ctx(),
                UserId::new(user),
                epoch() - chrono::Duration::days(1),
                epoch() + chrono::Duration::days(1),
            )
            .unwrap()
            .into_iter()
            .filter(|e| e.operation == Operation::Add)
            .map(|e| e.segment_id)
            .collect()
    }

    #[test]
    fn test_rollout_member_written_back() {
        let t = TestStore::new();
        create(&t, "beta", Some(50));
        // bucket(78) = 10, bucket(12) = 50
        assert_eq!(bucket_for(UserId::new(78)), 10);
        assert_eq!(bucket_for(UserId::new(12)), 50);

        let r = resolver();
        assert_eq!(r.resolve(&t.store, &ctx(), UserId::new(78)).unwrap(), vec!["beta"]);
        assert!(r.resolve(&t.store, &ctx(), UserId::new(12)).unwrap().is_empty());

        assert_eq!(link_count(&t, 78), 1);
        assert_eq!(adds(&t, 78), vec!["beta"]);
        assert_eq!(link_count(&t, 12), 0);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let t = TestStore::new();
        create(&t, "beta", Some(50));
        create(&t, "gamma", Some(100));
        create(&t, "closed", Some(0));
        create(&t, "manual", None);

        let r = resolver();
        let first = r.resolve(&t.store, &ctx(), UserId::new(78)).unwrap();
        let second = r.resolve(&t.store, &ctx(), UserId::new(78)).unwrap();
        assert_eq!(first, vec!["beta", "gamma"]);
        assert_eq!(first, second);
        assert_eq!(link_count(&t, 78), 2);
        assert_eq!(adds(&t, 78).len(), 2);
    }

    #[test]
    fn test_member_survives_unrelated_deletions() {
        let t = TestStore::new();
        create(&t, "beta", Some(50));
        create(&t, "other", None);
        let r = resolver();
        r.resolve(&t.store, &ctx(), UserId::new(78)).unwrap();

        Registry.soft_delete(&t.store, &ctx(), "other").unwrap();
        assert_eq!(r.resolve(&t.store, &ctx(), UserId::new(78)).unwrap(), vec!["beta"]);
    }

    #[test]
    fn test_explicit_links_and_rollout_combined() {
        let t = TestStore::new();
        create(&t, "A", None);
        create(&t, "B", None);
        create(&t, "beta", Some(50));
        let m = Mutator::<AuditLog>::default();
        m.add(&t.store, &ctx(), UserId::new(78), &["A", "B"], None).unwrap();
        m.delete(&t.store, &ctx(), UserId::new(78), &["A"]).unwrap();

        let slugs = resolver().resolve(&t.store, &ctx(), UserId::new(78)).unwrap();
        assert_eq!(slugs, vec!["B", "beta"]);
    }

    #[test]
    fn test_ttl_boundary_excluded() {
        let t = TestStore::new();
        create(&t, "A", None);
        Mutator::<AuditLog>::default()
            .add(&t.store, &ctx(), UserId::new(7), &["A"], Some(Duration::from_secs(3600)))
            .unwrap();

        let r = resolver();
        t.clock.advance(chrono::Duration::milliseconds(3_600_000 - 1));
        assert_eq!(r.resolve(&t.store, &ctx(), UserId::new(7)).unwrap(), vec!["A"]);

        // inserted_at + ttl == now
        t.clock.advance(chrono::Duration::milliseconds(1));
        assert!(r.resolve(&t.store, &ctx(), UserId::new(7)).unwrap().is_empty());
    }

    #[test]
    fn test_expired_link_renewed_by_rollout() {
        let t = TestStore::new();
        create(&t, "beta", Some(50));
        Mutator::<AuditLog>::default()
            .add(&t.store, &ctx(), UserId::new(78), &["beta"], Some(Duration::from_secs(60)))
            .unwrap();
        t.clock.advance(chrono::Duration::minutes(2));

        let r = resolver();
        assert_eq!(r.resolve(&t.store, &ctx(), UserId::new(78)).unwrap(), vec!["beta"]);
        // The renewed link is permanent
        t.clock.advance(chrono::Duration::days(365));
        assert_eq!(r.resolve(&t.store, &ctx(), UserId::new(78)).unwrap(), vec!["beta"]);
        assert_eq!(adds(&t, 78).len(), 2);
    }

    #[test]
    fn test_soft_deleted_segments_excluded() {
        let t = TestStore::new();
        create(&t, "A", None);
        create(&t, "wide", Some(100));
        Mutator::<AuditLog>::default()
            .add(&t.store, &ctx(), UserId::new(5), &["A"], None)
            .unwrap();
        Registry.soft_delete(&t.store, &ctx(), "A").unwrap();
        Registry.soft_delete(&t.store, &ctx(), "wide").unwrap();

        assert!(resolver().resolve(&t.store, &ctx(), UserId::new(5)).unwrap().is_empty());
        assert_eq!(link_count(&t, 5), 1);
    }

    #[test]
    fn test_write_back_atomic_on_audit_failure() {
        let t = TestStore::new();
        create(&t, "beta", Some(50));
        let r = Resolver::new(Mutator::new(FailingAudit));

        let err = r.resolve(&t.store, &ctx(), UserId::new(78)).unwrap_err();
        assert!(err.is_internal());
        assert_eq!(link_count(&t, 78), 0);
    }

    #[test]
    fn test_resolve_honors_cancellation() {
        let t = TestStore::new();
        create(&t, "beta", Some(50));
        let token = crate::context::CancelToken::new();
        token.cancel();
        let cancelled = OpContext::background().with_cancel(token);

        let err = resolver()
            .resolve(&t.store, &cancelled, UserId::new(78))
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert_eq!(link_count(&t, 78), 0);
    }

    #[test]
    fn test_concurrent_resolves_write_back_once() {
        let t = TestStore::new();
        create(&t, "beta", Some(50));
        create(&t, "gamma", Some(20));
        let r = resolver();

        let results: Vec<Vec<String>> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let store = t.store.clone();
                    let r = r.clone();
                    s.spawn(move || r.resolve(&store, &ctx(), UserId::new(78)))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap().unwrap())
                .collect()
        });

        for slugs in &results {
            assert_eq!(slugs, &vec!["beta".to_string(), "gamma".to_string()]);
        }
        assert_eq!(link_count(&t, 78), 2);
        let mut written = adds(&t, 78);
        written.sort();
        assert_eq!(written, vec!["beta", "gamma"]);
    }
}
