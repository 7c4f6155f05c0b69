//! Shared fixtures for the engine's unit tests

use crate::audit::AuditWriter;
use crate::context::OpContext;
use crate::engine::SegmentEngine;
use crate::error::{Error, Result, StoreError};
use crate::store::{Store, UnitOfWork};
use chrono::{DateTime, TimeZone, Utc};
use segmentd_common::{ManualClock, Operation, UserId};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// A store in a temporary directory with a hand-driven clock
pub struct TestStore {
    pub store: Store,
    pub clock: Arc<ManualClock>,
    dir: TempDir,
}

impl TestStore {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(epoch()));
        let store = Store::open_with_clock(dir.path().join("segments.redb"), clock.clone()).unwrap();
        Self { store, clock, dir }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().join("segments.redb")
    }

    pub fn engine(&self) -> SegmentEngine {
        SegmentEngine::new(self.store.clone())
    }
}

pub fn ctx() -> OpContext {
    OpContext::background()
}

/// Audit writer whose every append fails
pub struct FailingAudit;

impl AuditWriter for FailingAudit {
    fn append(
        &self,
        _uow: &UnitOfWork<'_>,
        _user_id: UserId,
        _slugs: &[&str],
        _operation: Operation,
    ) -> Result<()> {
        Err(Error::Store {
            op: "append audit log",
            source: StoreError::Io(std::io::Error::other("log table unavailable")),
        })
    }
}
