use std::path::PathBuf;

use lxp_meta::MetaError;
use lxp_types::{Oid, TupleError};

use crate::kind::BucketKind;

/// Errors from store, repository, bucket, index, and transaction operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No repository with this name exists.
    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    /// No bucket with this name exists in the repository.
    #[error("bucket not found: {repository}/{bucket}")]
    BucketNotFound { repository: String, bucket: String },

    /// No record file exists for the oid.
    #[error("object {oid} not found in bucket {bucket}")]
    ObjectNotFound { bucket: String, oid: Oid },

    /// The bucket has no index on this label.
    #[error("bucket {bucket} has no index on {label:?}")]
    IndexNotFound { bucket: String, label: String },

    /// A repository with this name already exists.
    #[error("repository already exists: {0}")]
    RepositoryExists(String),

    /// A bucket with this name already exists in the repository.
    #[error("bucket already exists: {repository}/{bucket}")]
    BucketExists { repository: String, bucket: String },

    /// A record for the oid is already on disk.
    #[error("object {oid} already exists in bucket {bucket}: records may not be overwritten, use update")]
    ObjectExists { bucket: String, oid: Oid },

    /// A repository or bucket name that cannot be used.
    #[error("illegal name {name:?}: {reason}")]
    IllegalName { name: String, reason: String },

    /// The on-disk kind marker disagrees with the requested kind.
    #[error("bucket {bucket} is {actual}, not {expected}")]
    KindMismatch {
        bucket: String,
        expected: BucketKind,
        actual: BucketKind,
    },

    /// The operation makes no sense for this kind of bucket.
    #[error("{op} is not supported by {kind} bucket {bucket}")]
    Unsupported {
        bucket: String,
        kind: BucketKind,
        op: &'static str,
    },

    /// An indirect bucket was asked to alias a tuple that lives nowhere.
    #[error("tuple {0} has not been persisted in any bucket")]
    Unplaced(Oid),

    /// Another transaction already holds a pending shadow for this record.
    #[error("write conflict on {bucket}/{oid}: an update is already pending")]
    Conflict { bucket: String, oid: Oid },

    /// The transaction was already rolled back.
    #[error("no active transaction")]
    NoActiveTransaction,

    /// More than one tuple in a key map shares a key.
    #[error("key {key:?} maps to more than one tuple in {bucket}")]
    DuplicateKey { bucket: String, key: String },

    /// Tuple access or encoding failed.
    #[error(transparent)]
    Tuple(#[from] TupleError),

    /// Type-layer failure, including structural rejection.
    #[error(transparent)]
    Meta(#[from] MetaError),

    /// A persisted file could not be decoded.
    #[error("malformed data in {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    /// A filesystem step the store cannot recover from.
    #[error("{op} failed for {path}: {source}")]
    Environment {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O error without more specific context.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The filesystem watcher could not be started or subscribed.
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The store backing this handle has been dropped.
    #[error("store has been closed")]
    StoreClosed,
}

impl StoreError {
    /// Whether this error means "absent" rather than "broken".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::RepositoryNotFound(_)
                | Self::BucketNotFound { .. }
                | Self::ObjectNotFound { .. }
                | Self::IndexNotFound { .. }
        )
    }

    /// Whether a write was rejected by the structural gate.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Meta(e) if e.is_structural())
    }

    pub(crate) fn env(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Environment {
            op,
            path: path.into(),
            source,
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
