//! Error types for the membership engine
//!
//! Domain outcomes (`AlreadyExists`, `NotFound`, ...) are kept apart from
//! opaque storage failures so callers can map them to distinct responses.

use segmentd_common::UserId;
use thiserror::Error;

/// Failure inside redb or the record codec
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

/// Engine error
#[derive(Debug, Error)]
pub enum Error {
    #[error("segment already exists: {0}")]
    AlreadyExists(String),

    #[error("segment not found: {0}")]
    NotFound(String),

    #[error("user {user_id} is already in segment {slug}")]
    AlreadyMember { user_id: UserId, slug: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{op}: operation cancelled")]
    Cancelled { op: &'static str },

    #[error("{op}: {source}")]
    Store {
        op: &'static str,
        #[source]
        source: StoreError,
    },
}

/// Coarse classification for callers mapping errors to responses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    Conflict,
    InvalidArgument,
    Internal,
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyMember { .. } => ErrorKind::Conflict,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Cancelled { .. } | Self::Store { .. } => ErrorKind::Internal,
        }
    }

    /// Internal failures carry no detail meant for clients
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Internal)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Attach the failing operation's name to a storage error
pub(crate) trait StoreResultExt<T> {
    fn with_op(self, op: &'static str) -> Result<T>;
}

impl<T, E: Into<StoreError>> StoreResultExt<T> for std::result::Result<T, E> {
    fn with_op(self, op: &'static str) -> Result<T> {
        self.map_err(|e| Error::Store {
            op,
            source: e.into(),
        })
    }
}
