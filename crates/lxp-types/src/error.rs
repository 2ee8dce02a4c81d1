use thiserror::Error;

use crate::value::ValueKind;

/// Errors produced by tuple, value, and reference operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TupleError {
    /// The tuple has no field with this label.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// The stored value is of a different kind than the accessor asked for.
    #[error("type mismatch for {label}: expected {expected}, found {actual}")]
    TypeMismatch {
        label: String,
        expected: ValueKind,
        actual: ValueKind,
    },

    /// The label is empty, or is not part of a static tuple's schema.
    #[error("illegal key {label:?}: {reason}")]
    IllegalKey { label: String, reason: String },

    /// An object id outside the 63-bit positive range.
    #[error("invalid object id: {0}")]
    InvalidOid(String),

    /// A reference string that is not of the form `repository/bucket/oid`.
    #[error("invalid store reference: {0:?}")]
    InvalidReference(String),

    /// A persisted record could not be decoded.
    #[error("malformed record: {0}")]
    Malformed(String),
}

/// Convenience alias for tuple operations.
pub type TupleResult<T> = Result<T, TupleError>;
