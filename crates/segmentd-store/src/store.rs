//! Transactional store adapter backed by redb.
//!
//! A [`UnitOfWork`] wraps one redb write transaction. The outermost caller
//! opens it through [`Store::transact`], which commits when the closure
//! returns `Ok` and aborts on `Err` or panic. Code that already holds a
//! `UnitOfWork` passes it on; its [`Transact`] impl runs the closure on the
//! same transaction, so only the outermost level decides the boundary.

use crate::context::OpContext;
use crate::error::{Result, StoreResultExt};
use crate::tables;
use chrono::{DateTime, Utc};
use redb::{
    Database, Key, ReadOnlyTable, ReadTransaction, ReadableTable, Table, TableDefinition, Value,
    WriteTransaction,
};
use segmentd_common::{Clock, SystemClock};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Something a transactional closure can run against: either the store
/// itself (opens a new transaction) or an open [`UnitOfWork`] (joins it).
pub trait Transact {
    fn transact<T>(
        &self,
        ctx: &OpContext,
        op: &'static str,
        f: impl FnOnce(&UnitOfWork<'_>) -> Result<T>,
    ) -> Result<T>;
}

/// Something a read-only closure can run against: a fresh snapshot of the
/// store, or an open [`UnitOfWork`] whose uncommitted writes it then sees.
pub trait Query {
    fn query<T>(
        &self,
        ctx: &OpContext,
        op: &'static str,
        f: impl FnOnce(&Reader<'_>) -> Result<T>,
    ) -> Result<T>;
}

/// Read access handed to a [`Query`] closure
pub enum Reader<'a> {
    /// Reads go through the caller's write transaction
    Txn(&'a UnitOfWork<'a>),
    /// Reads go to a committed snapshot
    Snapshot(&'a ReadView<'a>),
}

/// Persistent membership store backed by redb.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
}

impl Store {
    /// Open (or create) the redb database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    /// Open the store with an explicit time source.
    pub fn open_with_clock(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_op("create data directory")?;
        }
        let db = Database::create(path).with_op("open database")?;

        // Create all tables eagerly so later read txns don't fail
        let write_txn = db.begin_write().with_op("create tables")?;
        {
            write_txn.open_table(tables::SEGMENTS).with_op("create tables")?;
            write_txn.open_table(tables::DELETED_SEGMENTS).with_op("create tables")?;
            write_txn.open_table(tables::USERS).with_op("create tables")?;
            write_txn.open_table(tables::USER_SEGMENTS).with_op("create tables")?;
            write_txn.open_table(tables::SEGMENT_USERS).with_op("create tables")?;
            write_txn.open_table(tables::LINK_EXPIRY).with_op("create tables")?;
            write_txn.open_table(tables::LOGS).with_op("create tables")?;
            write_txn.open_table(tables::LOGS_BY_USER).with_op("create tables")?;
            write_txn.open_table(tables::LOGS_BY_TIME).with_op("create tables")?;
            write_txn.open_table(tables::SEQUENCES).with_op("create tables")?;
        }
        write_txn.commit().with_op("create tables")?;

        info!("Opened segment store at {}", path.display());
        Ok(Self {
            db: Arc::new(db),
            clock,
        })
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run `f` against a consistent read snapshot, outside any write
    /// transaction.
    pub fn read<T>(
        &self,
        ctx: &OpContext,
        op: &'static str,
        f: impl FnOnce(&ReadView<'_>) -> Result<T>,
    ) -> Result<T> {
        ctx.check(op)?;
        let txn = self.db.begin_read().with_op(op)?;
        let view = ReadView {
            txn,
            ctx,
            now: self.clock.now(),
        };
        f(&view)
    }
}

impl Query for Store {
    fn query<T>(
        &self,
        ctx: &OpContext,
        op: &'static str,
        f: impl FnOnce(&Reader<'_>) -> Result<T>,
    ) -> Result<T> {
        self.read(ctx, op, |view| f(&Reader::Snapshot(view)))
    }
}

impl Transact for Store {
    fn transact<T>(
        &self,
        ctx: &OpContext,
        op: &'static str,
        f: impl FnOnce(&UnitOfWork<'_>) -> Result<T>,
    ) -> Result<T> {
        ctx.check(op)?;
        // Blocks while another writer is active; the context cannot
        // interrupt the wait, so it is checked again once the lock is held
        let txn = self.db.begin_write().with_op(op)?;
        let uow = UnitOfWork {
            txn,
            ctx,
            now: self.clock.now(),
        };
        if let Err(e) = ctx.check(op) {
            uow.rollback(op);
            return Err(e);
        }

        match panic::catch_unwind(AssertUnwindSafe(|| f(&uow))) {
            Ok(Ok(value)) => {
                // Last chance to honor the context before anything becomes visible
                if let Err(e) = ctx.check(op) {
                    uow.rollback(op);
                    return Err(e);
                }
                uow.txn.commit().with_op(op)?;
                Ok(value)
            }
            Ok(Err(e)) => {
                uow.rollback(op);
                Err(e)
            }
            Err(payload) => {
                uow.rollback(op);
                panic::resume_unwind(payload)
            }
        }
    }
}

/// One open write transaction.
///
/// `now` is sampled once when the transaction opens, so every row written
/// by the same unit carries the same timestamp.
pub struct UnitOfWork<'a> {
    txn: WriteTransaction,
    ctx: &'a OpContext,
    now: DateTime<Utc>,
}

impl UnitOfWork<'_> {
    #[must_use]
    pub const fn now(&self) -> DateTime<Utc> {
        self.now
    }

    #[must_use]
    pub const fn context(&self) -> &OpContext {
        self.ctx
    }

    /// Open a table for this operation, checking the context first.
    pub(crate) fn open<K: Key + 'static, V: Value + 'static>(
        &self,
        def: TableDefinition<K, V>,
        op: &'static str,
    ) -> Result<Table<'_, K, V>> {
        self.ctx.check(op)?;
        self.txn.open_table(def).with_op(op)
    }

    /// Issue the next value of a named counter.
    pub(crate) fn next_sequence(&self, name: &str, op: &'static str) -> Result<u64> {
        let mut table = self.open(tables::SEQUENCES, op)?;
        let next = table.get(name).with_op(op)?.map_or(0, |v| v.value()) + 1;
        table.insert(name, next).with_op(op)?;
        Ok(next)
    }

    // Rollback is best effort; the caller's error is what gets reported.
    fn rollback(self, op: &'static str) {
        if let Err(e) = self.txn.abort() {
            warn!("Rollback of '{}' failed: {}", op, e);
        }
    }
}

impl Transact for UnitOfWork<'_> {
    fn transact<T>(
        &self,
        ctx: &OpContext,
        op: &'static str,
        f: impl FnOnce(&UnitOfWork<'_>) -> Result<T>,
    ) -> Result<T> {
        // Joining: no commit or rollback at this level
        ctx.check(op)?;
        f(self)
    }
}

impl Query for UnitOfWork<'_> {
    fn query<T>(
        &self,
        ctx: &OpContext,
        op: &'static str,
        f: impl FnOnce(&Reader<'_>) -> Result<T>,
    ) -> Result<T> {
        ctx.check(op)?;
        f(&Reader::Txn(self))
    }
}

/// Read-only snapshot used for queries outside a transaction
pub struct ReadView<'a> {
    txn: ReadTransaction,
    ctx: &'a OpContext,
    now: DateTime<Utc>,
}

impl ReadView<'_> {
    #[must_use]
    pub const fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub(crate) fn open<K: Key + 'static, V: Value + 'static>(
        &self,
        def: TableDefinition<K, V>,
        op: &'static str,
    ) -> Result<ReadOnlyTable<K, V>> {
        self.ctx.check(op)?;
        self.txn.open_table(def).with_op(op)
    }
}
