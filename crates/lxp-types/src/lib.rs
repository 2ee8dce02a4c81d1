//! Foundation types for the LXP store.
//!
//! Every record in the store is a [`Tuple`]: a map from field label to
//! [`Value`], identified by a process-wide unique [`Oid`]. Tuples are either
//! dynamic (labels discovered on write) or static (labels fixed by a shared
//! [`StaticSchema`]). Fields may point at other tuples through a
//! [`StoreReference`], which resolves lazily through a [`TupleResolver`].
//!
//! # Key Types
//!
//! - [`Oid`]: 63-bit positive object identifier; [`OidGenerator`] produces them
//! - [`Value`] / [`ValueKind`]: field values and their kinds
//! - [`Tuple`]: the record itself, with typed accessors and a JSON codec
//! - [`StaticSchema`]: `(label, kind, slot)` table, declared with [`static_schema!`]
//! - [`StoreReference`]: `repository/bucket/oid` pointer to another tuple

pub mod error;
pub mod oid;
pub mod reference;
pub mod schema;
pub mod tuple;
pub mod value;

pub use error::{TupleError, TupleResult};
pub use oid::{Oid, OidGenerator, RandomOidGenerator, SequentialOidGenerator, MAX_OID};
pub use reference::{StoreReference, TupleResolver};
pub use schema::{FieldSpec, StaticSchema};
pub use tuple::{Tuple, TupleLocation};
pub use value::{Value, ValueKind};
