//! segmentd Store - Segment membership engine
//!
//! This crate implements segment registration, membership resolution with
//! percentage rollout, explicit membership changes with an audit trail, and
//! batch-bounded retention, all on top of a transactional redb store.

pub mod audit;
pub mod context;
pub mod engine;
pub mod error;
mod links;
pub mod mutator;
pub mod registry;
pub mod resolver;
pub mod retention;
pub mod store;
pub mod tables;
mod types;

#[cfg(test)]
mod test_support;

// Re-exports
pub use audit::{AuditLog, AuditWriter};
pub use context::{CancelToken, OpContext};
pub use engine::SegmentEngine;
pub use error::{Error, ErrorKind, Result, StoreError};
pub use mutator::Mutator;
pub use registry::Registry;
pub use resolver::Resolver;
pub use retention::{DEFAULT_LOG_RETENTION_MONTHS, PurgeReport, Retention, SegmentPurgeReport};
pub use store::{Query, ReadView, Reader, Store, Transact, UnitOfWork};
