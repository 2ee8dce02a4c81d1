//! Error types for type metadata operations.

use lxp_types::{Oid, TupleError, ValueKind};

/// Errors raised by the type layer.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum MetaError {
    /// A field the type requires is absent from the tuple.
    #[error("structural inconsistency: {type_name} requires field {label:?}")]
    MissingField { type_name: String, label: String },

    /// A required field holds a value of the wrong kind.
    #[error("structural inconsistency: {type_name}.{label} must be {expected}, found {actual}")]
    WrongKind {
        type_name: String,
        label: String,
        expected: ValueKind,
        actual: ValueKind,
    },

    /// The tuple declares a type other than the one its bucket is bound to.
    #[error("label incompatibility: bucket is bound to type {expected}, tuple declares {found}")]
    LabelIncompatibility { expected: Oid, found: i64 },

    /// No type is registered under this name.
    #[error("unknown type name: {0}")]
    UnknownType(String),

    /// No type is registered under this id.
    #[error("unknown type id: {0}")]
    UnknownTypeId(Oid),

    /// A different type is already registered under this name.
    #[error("type {0:?} is already registered with a different shape")]
    DuplicateType(String),

    /// A persisted descriptor could not be decoded.
    #[error("malformed type descriptor: {0}")]
    Malformed(String),

    /// Tuple access failed.
    #[error(transparent)]
    Tuple(#[from] TupleError),
}

impl MetaError {
    /// Whether this error is a structural rejection of a tuple.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::MissingField { .. } | Self::WrongKind { .. } | Self::LabelIncompatibility { .. }
        )
    }
}

/// Convenience alias for type-layer results.
pub type MetaResult<T> = Result<T, MetaError>;
