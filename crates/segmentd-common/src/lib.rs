//! segmentd Common - Shared types and utilities
//!
//! This crate provides the storage-independent pieces shared by the
//! membership engine and the `segmentd` binary: identifiers, the
//! percentage bucket hash, the clock abstraction and configuration.

pub mod bucket;
pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use bucket::{BUCKET_COUNT, bucket_for, fnv1a_32};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::ConfigError;
pub use types::*;
