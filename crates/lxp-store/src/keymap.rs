//! Key maps: indexed buckets where each tuple is filed under a unique key.

use std::fmt;
use std::sync::Arc;

use lxp_types::{Tuple, TupleError, Value, ValueKind};
use tracing::debug;

use crate::bucket::Bucket;
use crate::error::{StoreError, StoreResult};
use crate::index::BucketIndex;
use crate::kind::BucketKind;

/// Field under which a key map stores each tuple's key.
pub const KEY_LABEL: &str = "KEY";

/// A key for an `IDMAP` (integer) or `STRINGMAP` (string) bucket.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MapKey {
    Id(i64),
    Name(String),
}

impl MapKey {
    fn kind(&self) -> ValueKind {
        match self {
            Self::Id(_) => ValueKind::Long,
            Self::Name(_) => ValueKind::String,
        }
    }

    fn value(&self) -> Value {
        match self {
            Self::Id(id) => Value::Long(*id),
            Self::Name(name) => Value::String(name.clone()),
        }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl From<i64> for MapKey {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for MapKey {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for MapKey {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

/// Key-addressed view over an `IDMAP` or `STRINGMAP` bucket.
#[derive(Clone, Debug)]
pub struct KeyMap {
    bucket: Bucket,
    index: BucketIndex,
}

impl KeyMap {
    pub(crate) fn new(bucket: Bucket) -> StoreResult<Self> {
        if !bucket.kind().is_key_map() {
            return Err(StoreError::Unsupported {
                bucket: bucket.name().to_string(),
                kind: bucket.kind(),
                op: "key_map",
            });
        }
        let index = bucket.add_index(KEY_LABEL)?;
        Ok(Self { bucket, index })
    }

    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    fn key_kind(&self) -> ValueKind {
        match self.bucket.kind() {
            BucketKind::IdMap => ValueKind::Long,
            _ => ValueKind::String,
        }
    }

    fn check(&self, key: &MapKey) -> StoreResult<()> {
        let expected = self.key_kind();
        if key.kind() != expected {
            return Err(TupleError::TypeMismatch {
                label: KEY_LABEL.to_string(),
                expected,
                actual: key.kind(),
            }
            .into());
        }
        Ok(())
    }

    /// Store `tuple` under `key`. Keys are not checked for uniqueness here;
    /// a duplicate surfaces on [`lookup`](Self::lookup).
    pub fn insert(&self, key: impl Into<MapKey>, tuple: &mut Tuple) -> StoreResult<()> {
        let key = key.into();
        self.check(&key)?;
        tuple.put(KEY_LABEL, key.value())?;
        self.bucket.make_persistent(tuple)?;
        debug!(bucket = %self.bucket.name(), %key, oid = %tuple.oid(), "key inserted");
        Ok(())
    }

    /// The tuple filed under `key`, if any.
    pub fn lookup(&self, key: impl Into<MapKey>) -> StoreResult<Option<Arc<Tuple>>> {
        let key = key.into();
        self.check(&key)?;
        let oids = self.index.oids(&key.to_string())?;
        match oids.as_slice() {
            [] => Ok(None),
            [oid] => self.bucket.get_object_by_id(*oid).map(Some),
            _ => Err(StoreError::DuplicateKey {
                bucket: self.bucket.name().to_string(),
                key: key.to_string(),
            }),
        }
    }

    pub fn contains_key(&self, key: impl Into<MapKey>) -> StoreResult<bool> {
        Ok(self.lookup(key)?.is_some())
    }

    /// Number of distinct keys.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.index.values()?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{open_store, tuple};

    #[test]
    fn id_map_insert_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let repo = store.create_repository("r").unwrap();
        repo.create_bucket("ids", BucketKind::IdMap).unwrap();
        let map = repo.key_map("ids").unwrap();

        let mut t = tuple(1);
        t.put("name", "ann").unwrap();
        map.insert(42i64, &mut t).unwrap();

        let found = map.lookup(42i64).unwrap().unwrap();
        assert_eq!(found.get_string("name").unwrap(), "ann");
        assert_eq!(found.get_long(KEY_LABEL).unwrap(), 42);
        assert!(map.lookup(43i64).unwrap().is_none());
        assert_eq!(map.len().unwrap(), 1);
    }

    #[test]
    fn string_map_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_store(dir.path());
            let repo = store.create_repository("r").unwrap();
            repo.create_bucket("names", BucketKind::StringMap).unwrap();
            let mut t = tuple(5);
            t.put("born", 1850i64).unwrap();
            repo.key_map("names").unwrap().insert("Skye", &mut t).unwrap();
        }
        let store = open_store(dir.path());
        let map = store.get_repository("r").unwrap().key_map("names").unwrap();
        assert_eq!(map.lookup("Skye").unwrap().unwrap().get_long("born").unwrap(), 1850);
        assert!(!map.contains_key("Mull").unwrap());
    }

    #[test]
    fn key_kind_must_match_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let repo = store.create_repository("r").unwrap();
        repo.create_bucket("ids", BucketKind::IdMap).unwrap();
        let map = repo.key_map("ids").unwrap();
        let err = map.insert("seven", &mut tuple(7)).unwrap_err();
        assert!(matches!(err, StoreError::Tuple(TupleError::TypeMismatch { .. })));
        assert!(map.is_empty().unwrap());
    }

    #[test]
    fn duplicate_keys_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let repo = store.create_repository("r").unwrap();
        repo.create_bucket("names", BucketKind::StringMap).unwrap();
        let map = repo.key_map("names").unwrap();
        map.insert("x", &mut tuple(1)).unwrap();
        map.insert("x", &mut tuple(2)).unwrap();
        assert!(matches!(map.lookup("x"), Err(StoreError::DuplicateKey { .. })));
    }

    #[test]
    fn deleted_key_can_be_reused() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let repo = store.create_repository("r").unwrap();
        repo.create_bucket("names", BucketKind::StringMap).unwrap();
        let map = repo.key_map("names").unwrap();

        map.insert("x", &mut tuple(1)).unwrap();
        map.bucket().delete(lxp_types::Oid::new(1).unwrap()).unwrap();
        assert!(map.lookup("x").unwrap().is_none());
        assert!(map.is_empty().unwrap());

        let mut t = tuple(2);
        t.put("n", 2i64).unwrap();
        map.insert("x", &mut t).unwrap();
        assert_eq!(map.lookup("x").unwrap().unwrap().get_long("n").unwrap(), 2);
    }

    #[test]
    fn plain_bucket_is_not_a_key_map() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let repo = store.create_repository("r").unwrap();
        repo.create_bucket("plain", BucketKind::Plain).unwrap();
        assert!(matches!(repo.key_map("plain"), Err(StoreError::Unsupported { .. })));
    }
}
