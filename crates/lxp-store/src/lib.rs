//! File-system-backed tuple store.
//!
//! A [`Store`] roots a hierarchy of [`Repository`] directories, each holding
//! [`Bucket`] directories with one JSON record file per [`Tuple`]. Buckets
//! cache decoded tuples, optionally feed secondary indexes
//! ([`BucketIndex`]), and take updates through shadow-file
//! [`Transaction`]s. A background [`Watcher`] invalidates caches when
//! another process changes a bucket.
//!
//! ```text
//! <root>/REPOS/<repository>/<bucket>/<oid>
//! ```
//!
//! # Modules
//!
//! - [`store`]: [`Store`], repository lifecycle, the type registry
//! - [`repository`]: [`Repository`], bucket lifecycle
//! - [`bucket`]: [`Bucket`] reads, writes, and shadow files
//! - [`index`]: [`BucketIndex`] secondary indexes
//! - [`keymap`]: [`KeyMap`] views over `IDMAP` / `STRINGMAP` buckets
//! - [`transaction`]: [`Transaction`] commit and rollback
//! - [`cache`]: [`ObjectCache`] bounded per-bucket cache
//! - [`watcher`]: [`Watcher`] filesystem monitor
//! - [`layout`]: directory names, name validation, atomic file writes
//! - [`config`]: [`StoreConfig`]
//! - [`error`]: [`StoreError`]
//!
//! [`Tuple`]: lxp_types::Tuple

pub mod bucket;
pub mod cache;
pub mod config;
pub mod error;
pub mod index;
pub mod keymap;
pub mod kind;
pub mod layout;
pub mod repository;
pub mod store;
pub mod transaction;
pub mod watcher;

pub use bucket::{Bucket, Records, REFERENCE_KEY};
pub use cache::ObjectCache;
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use index::BucketIndex;
pub use keymap::{KeyMap, MapKey, KEY_LABEL};
pub use kind::BucketKind;
pub use repository::Repository;
pub use store::{Store, TYPES_BUCKET};
pub use transaction::{Transaction, TransactionId, TransactionState};
pub use watcher::{CacheInvalidation, Watcher};

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;
    use std::sync::Arc;

    use lxp_types::{Oid, SequentialOidGenerator, Tuple};

    use crate::{Store, StoreConfig};

    /// A store without the watcher whose generated ids start well above
    /// the hand-picked oids tests use.
    pub(crate) fn open_store(dir: &Path) -> Store {
        let config = StoreConfig::new(dir).without_watcher();
        Store::open_with_generator(config, Arc::new(SequentialOidGenerator::starting_at(1_000_000)))
            .unwrap()
    }

    pub(crate) fn tuple(n: u64) -> Tuple {
        Tuple::new(Oid::new(n).unwrap())
    }
}
