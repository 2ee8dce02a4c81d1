//! Structural typing for the LXP store.
//!
//! A [`TypeDescriptor`] names a set of required field labels and their
//! kinds. Descriptors are registered once, get a permanent type id, and are
//! looked up through a [`TypeRegistry`]. Buckets bound to a type run every
//! incoming tuple through [`TypeRegistry::validate`] before writing a byte.
//!
//! # Modules
//!
//! - [`descriptor`]: [`TypeDescriptor`] and its persisted tuple form
//! - [`consistency`]: structural and label consistency checks
//! - [`registry`]: the in-memory [`TypeRegistry`]
//! - [`error`]: [`MetaError`]

pub mod consistency;
pub mod descriptor;
pub mod error;
pub mod registry;

pub use consistency::{
    check_label_consistency, check_structural_consistency, declared_type, kind_compatible,
};
pub use descriptor::{TypeDescriptor, LABELS_LABEL, NAME_LABEL, TYPE_LABEL};
pub use error::{MetaError, MetaResult};
pub use registry::TypeRegistry;
