//! Directory-backed collections of tuples.
//!
//! A bucket is a directory holding one JSON record file per tuple, named by
//! the tuple's decimal oid, plus the reserved `META`, `TRANSACTIONS`, and
//! (for indexed kinds) `INDICES` subdirectories. A [`Bucket`] is a cheap,
//! clonable handle; all handles for one directory share a cache, a memoised
//! listing, and the index set.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use lxp_meta::MetaError;
use lxp_types::{Oid, StaticSchema, StoreReference, Tuple};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::cache::ObjectCache;
use crate::error::{StoreError, StoreResult};
use crate::index::{BucketIndex, IndexState};
use crate::keymap::KEY_LABEL;
use crate::kind::BucketKind;
use crate::layout::{
    create_exclusive, validate_name, write_new_file, INDEX_PREFIX, INDICES_DIR, META_DIR,
    TRANSACTIONS_DIR, TYPELABEL_FILE,
};
use crate::store::StoreContext;
use crate::transaction::Transaction;
use crate::watcher::CacheInvalidation;

/// Key of the single field in an indirect bucket's record files.
pub const REFERENCE_KEY: &str = "$REFERENCE";

pub(crate) struct BucketShared {
    repository: String,
    name: String,
    dir: PathBuf,
    kind: BucketKind,
    type_label: RwLock<Option<Oid>>,
    schema: RwLock<Option<Arc<StaticSchema>>>,
    cache: ObjectCache,
    /// Memoised oid listing; `None` until scanned or after invalidation.
    listing: Mutex<Option<BTreeSet<Oid>>>,
    indexes: RwLock<BTreeMap<String, Arc<IndexState>>>,
    ctx: Arc<StoreContext>,
}

impl CacheInvalidation for BucketShared {
    fn invalidate_cache(&self) {
        self.listing.lock().take();
        self.cache.invalidate();
        debug!(repository = %self.repository, bucket = %self.name, "cache invalidated");
    }
}

/// Handle on a bucket.
#[derive(Clone)]
pub struct Bucket {
    shared: Arc<BucketShared>,
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("repository", &self.shared.repository)
            .field("name", &self.shared.name)
            .field("kind", &self.shared.kind)
            .finish()
    }
}

impl Bucket {
    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    /// Create the bucket directory tree and open it.
    pub(crate) fn create(
        ctx: Arc<StoreContext>,
        repository: &str,
        repo_dir: &Path,
        name: &str,
        kind: BucketKind,
    ) -> StoreResult<Self> {
        validate_name(name)?;
        let dir = repo_dir.join(name);
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StoreError::BucketExists {
                    repository: repository.to_string(),
                    bucket: name.to_string(),
                })
            }
            Err(e) => return Err(StoreError::env("create bucket", &dir, e)),
        }

        let meta = dir.join(META_DIR);
        let mut subdirs = vec![meta.clone(), dir.join(TRANSACTIONS_DIR)];
        if kind.is_indexed() {
            subdirs.push(dir.join(INDICES_DIR));
        }
        for sub in &subdirs {
            fs::create_dir_all(sub).map_err(|e| StoreError::env("create bucket", sub, e))?;
        }
        let marker = meta.join(kind.marker());
        create_exclusive(&marker, b"", ctx.config.sync_writes)
            .map_err(|e| StoreError::env("write kind marker", &marker, e))?;
        info!(repository, bucket = name, %kind, "bucket created");

        let bucket = Self::open(ctx, repository, repo_dir, name, Some(kind))?;
        if kind.is_key_map() {
            bucket.add_index(KEY_LABEL)?;
        }
        Ok(bucket)
    }

    /// Open an existing bucket, checking its kind marker against `expected`.
    ///
    /// Leftover shadow files from an interrupted process are discarded.
    pub(crate) fn open(
        ctx: Arc<StoreContext>,
        repository: &str,
        repo_dir: &Path,
        name: &str,
        expected: Option<BucketKind>,
    ) -> StoreResult<Self> {
        validate_name(name)?;
        let dir = repo_dir.join(name);
        if !dir.is_dir() {
            return Err(StoreError::BucketNotFound {
                repository: repository.to_string(),
                bucket: name.to_string(),
            });
        }

        let kind = read_kind(&dir.join(META_DIR))?;
        if let Some(expected) = expected {
            if expected != kind {
                return Err(StoreError::KindMismatch {
                    bucket: name.to_string(),
                    expected,
                    actual: kind,
                });
            }
        }
        let type_label = read_type_label(&dir.join(META_DIR).join(TYPELABEL_FILE))?;
        let indexes = discover_indexes(&dir.join(INDICES_DIR), ctx.config.sync_writes)?;

        let shared = Arc::new(BucketShared {
            repository: repository.to_string(),
            name: name.to_string(),
            cache: ObjectCache::new(ctx.config.cache_capacity),
            dir,
            kind,
            type_label: RwLock::new(type_label),
            schema: RwLock::new(None),
            listing: Mutex::new(None),
            indexes: RwLock::new(indexes),
            ctx,
        });
        let bucket = Self { shared };
        bucket.tidy_up_transaction_data()?;

        if let Some(watcher) = &bucket.shared.ctx.watcher {
            let target = Arc::downgrade(&bucket.shared) as Weak<dyn CacheInvalidation>;
            watcher.watch(&bucket.shared.dir, target)?;
        }
        debug!(repository, bucket = name, %kind, "bucket opened");
        Ok(bucket)
    }

    /// Stop watching this bucket's directory.
    pub(crate) fn detach(&self) {
        if let Some(watcher) = &self.shared.ctx.watcher {
            watcher.unwatch(&self.shared.dir);
        }
    }

    // ---------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn repository(&self) -> &str {
        &self.shared.repository
    }

    pub fn kind(&self) -> BucketKind {
        self.shared.kind
    }

    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }

    /// The type every tuple written here must match, if bound.
    pub fn type_label(&self) -> Option<Oid> {
        *self.shared.type_label.read()
    }

    /// Bind this bucket to a registered type.
    pub fn set_type_label(&self, type_id: Oid) -> StoreResult<()> {
        if self.shared.ctx.types.by_id(type_id).is_none() {
            return Err(MetaError::UnknownTypeId(type_id).into());
        }
        let path = self.shared.dir.join(META_DIR).join(TYPELABEL_FILE);
        fs::write(&path, type_id.to_string())
            .map_err(|e| StoreError::env("write type label", &path, e))?;
        *self.shared.type_label.write() = Some(type_id);
        info!(bucket = %self.shared.name, %type_id, "type label set");
        Ok(())
    }

    /// Decode records as static tuples of `schema` from now on.
    pub fn bind_schema(&self, schema: Arc<StaticSchema>) {
        *self.shared.schema.write() = Some(schema);
        self.shared.cache.invalidate();
    }

    pub fn schema(&self) -> Option<Arc<StaticSchema>> {
        self.shared.schema.read().clone()
    }

    /// A fresh, empty tuple with a generated oid (static if a schema is bound).
    pub fn new_tuple(&self) -> Tuple {
        let oid = self.shared.ctx.ids.next_oid();
        match self.schema() {
            Some(schema) => Tuple::new_static(oid, schema),
            None => Tuple::new(oid),
        }
    }

    /// Number of tuples currently held by the cache.
    pub fn cached(&self) -> usize {
        self.shared.cache.len()
    }

    fn record_path(&self, oid: Oid) -> PathBuf {
        self.shared.dir.join(oid.to_string())
    }

    fn transactions_dir(&self) -> PathBuf {
        self.shared.dir.join(TRANSACTIONS_DIR)
    }

    fn shadow_path(&self, oid: Oid) -> PathBuf {
        self.transactions_dir().join(oid.to_string())
    }

    fn not_found(&self, oid: Oid) -> StoreError {
        StoreError::ObjectNotFound {
            bucket: self.shared.name.clone(),
            oid,
        }
    }

    fn unsupported(&self, op: &'static str) -> StoreError {
        StoreError::Unsupported {
            bucket: self.shared.name.clone(),
            kind: self.shared.kind,
            op,
        }
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    pub fn contains(&self, oid: Oid) -> bool {
        self.record_path(oid).is_file()
    }

    /// Fetch a tuple, from the cache if present, else from disk.
    pub fn get_object_by_id(&self, oid: Oid) -> StoreResult<Arc<Tuple>> {
        if !self.contains(oid) {
            return Err(self.not_found(oid));
        }
        self.shared.cache.get_or_load(oid, || self.load(oid))
    }

    fn load(&self, oid: Oid) -> StoreResult<Arc<Tuple>> {
        let path = self.record_path(oid);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(self.not_found(oid)),
            Err(e) => return Err(StoreError::env("read record", &path, e)),
        };
        if self.shared.kind == BucketKind::Indirect {
            return self.follow_reference(&path, &text);
        }

        let decoded = match self.schema() {
            Some(schema) => Tuple::deserialize_static(oid, &text, schema),
            None => Tuple::deserialize(oid, &text),
        };
        let mut tuple = decoded.map_err(|e| StoreError::Malformed {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        tuple.place(&self.shared.repository, &self.shared.name);
        debug!(bucket = %self.shared.name, %oid, "record decoded");
        Ok(Arc::new(tuple))
    }

    fn follow_reference(&self, path: &Path, text: &str) -> StoreResult<Arc<Tuple>> {
        let malformed = |reason: String| StoreError::Malformed {
            path: path.to_path_buf(),
            reason,
        };
        let json: serde_json::Value =
            serde_json::from_str(text).map_err(|e| malformed(e.to_string()))?;
        let target = json
            .get(REFERENCE_KEY)
            .and_then(|v| v.as_str())
            .ok_or_else(|| malformed(format!("missing {REFERENCE_KEY}")))?;
        let reference = StoreReference::parse(target).map_err(|e| malformed(e.to_string()))?;
        let store = self.shared.ctx.store.upgrade().ok_or(StoreError::StoreClosed)?;
        store.resolve_reference(&reference)
    }

    /// All oids in the bucket, sorted. Memoised until the next invalidation.
    pub fn oids(&self) -> StoreResult<Vec<Oid>> {
        let mut listing = self.shared.listing.lock();
        if listing.is_none() {
            *listing = Some(self.scan()?);
        }
        Ok(listing.iter().flatten().copied().collect())
    }

    /// Number of tuples in the bucket. Memoised like [`oids`](Self::oids).
    pub fn size(&self) -> StoreResult<usize> {
        let mut listing = self.shared.listing.lock();
        if listing.is_none() {
            *listing = Some(self.scan()?);
        }
        Ok(listing.as_ref().map_or(0, BTreeSet::len))
    }

    fn scan(&self) -> StoreResult<BTreeSet<Oid>> {
        let dir = &self.shared.dir;
        let mut oids = BTreeSet::new();
        for entry in fs::read_dir(dir).map_err(|e| StoreError::env("list bucket", dir, e))? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(oid) = entry.file_name().to_str().and_then(|n| n.parse::<Oid>().ok()) {
                oids.insert(oid);
            }
        }
        Ok(oids)
    }

    /// Lazily iterate over every tuple in the bucket.
    pub fn stream(&self) -> StoreResult<Records> {
        Ok(Records::new(self.clone(), self.oids()?))
    }

    /// Drop the memoised listing and every cached tuple.
    pub fn invalidate_cache(&self) {
        self.shared.invalidate_cache();
    }

    // ---------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------

    /// Write a tuple for the first time.
    ///
    /// The structural gate runs before anything touches the disk. Existing
    /// records are never overwritten; use [`update`](Self::update).
    pub fn make_persistent(&self, tuple: &mut Tuple) -> StoreResult<()> {
        if self.shared.kind == BucketKind::Indirect {
            return self.persist_reference(tuple);
        }
        self.shared.ctx.types.validate(tuple, self.type_label())?;
        let content = tuple.serialize()?;

        // Held across the write so an index being added sees this record
        // either in its back-fill or here, never both.
        let indexes = self.shared.indexes.read();
        self.write_record(tuple.oid(), content.as_bytes())?;
        if self.shared.kind.is_indexed() {
            if let Err(e) = indexes.values().try_for_each(|index| index.add(tuple).map(drop)) {
                self.unwrite_record(tuple.oid(), indexes.values());
                return Err(e);
            }
        }
        drop(indexes);
        tuple.place(&self.shared.repository, &self.shared.name);

        self.note_written(tuple.oid());
        self.shared.cache.insert(Arc::new(tuple.clone()));
        debug!(bucket = %self.shared.name, oid = %tuple.oid(), "record written");
        Ok(())
    }

    fn persist_reference(&self, tuple: &Tuple) -> StoreResult<()> {
        let reference = tuple.reference().ok_or(StoreError::Unplaced(tuple.oid()))?;
        let mut object = serde_json::Map::new();
        object.insert(
            REFERENCE_KEY.to_string(),
            serde_json::Value::String(reference.to_string()),
        );
        let content = serde_json::Value::Object(object).to_string();
        self.write_record(tuple.oid(), content.as_bytes())?;
        self.note_written(tuple.oid());
        debug!(bucket = %self.shared.name, %reference, "reference written");
        Ok(())
    }

    fn write_record(&self, oid: Oid, content: &[u8]) -> StoreResult<()> {
        let path = self.record_path(oid);
        write_new_file(&self.transactions_dir(), &path, content, self.shared.ctx.config.sync_writes)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => StoreError::ObjectExists {
                    bucket: self.shared.name.clone(),
                    oid,
                },
                _ => StoreError::env("write record", &path, e),
            })
    }

    /// Undo a record write whose indexing failed part way.
    fn unwrite_record<'a>(&self, oid: Oid, indexes: impl Iterator<Item = &'a Arc<IndexState>>) {
        for index in indexes {
            if let Err(e) = index.remove(oid) {
                warn!(bucket = %self.shared.name, %oid, label = index.label(), error = %e, "could not unindex");
            }
        }
        let path = self.record_path(oid);
        if let Err(e) = fs::remove_file(&path) {
            warn!(bucket = %self.shared.name, %oid, error = %e, "could not remove unindexed record");
        }
    }

    fn note_written(&self, oid: Oid) {
        if let Some(listing) = self.shared.listing.lock().as_mut() {
            listing.insert(oid);
        }
    }

    /// Replace an existing tuple within `txn`. See [`Transaction::update`].
    pub fn update(&self, txn: &mut Transaction, tuple: &Tuple) -> StoreResult<()> {
        txn.update(self, tuple)
    }

    /// Remove a tuple's record file and its index entries.
    pub fn delete(&self, oid: Oid) -> StoreResult<()> {
        let path = self.record_path(oid);
        let indexes = self.shared.indexes.read();
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(self.not_found(oid)),
            Err(e) => return Err(StoreError::env("delete record", &path, e)),
        }
        self.shared.cache.remove(oid);
        if let Some(listing) = self.shared.listing.lock().as_mut() {
            listing.remove(&oid);
        }
        if self.shared.kind.is_indexed() {
            for index in indexes.values() {
                index.remove(oid)?;
            }
        }
        drop(indexes);
        debug!(bucket = %self.shared.name, %oid, "record deleted");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Shadow files
    // ---------------------------------------------------------------

    /// Write `tuple` as a pending shadow. An existing shadow is a conflict.
    pub(crate) fn write_shadow(&self, tuple: &Tuple) -> StoreResult<()> {
        if self.shared.kind == BucketKind::Indirect {
            return Err(self.unsupported("update"));
        }
        let oid = tuple.oid();
        if !self.contains(oid) {
            return Err(self.not_found(oid));
        }
        self.shared.ctx.types.validate(tuple, self.type_label())?;
        let content = tuple.serialize()?;

        let path = self.shadow_path(oid);
        create_exclusive(&path, content.as_bytes(), self.shared.ctx.config.sync_writes).map_err(
            |e| match e.kind() {
                io::ErrorKind::AlreadyExists => StoreError::Conflict {
                    bucket: self.shared.name.clone(),
                    oid,
                },
                _ => StoreError::env("write shadow", &path, e),
            },
        )?;
        debug!(bucket = %self.shared.name, %oid, "shadow written");
        Ok(())
    }

    /// Replace the primary record with its shadow.
    ///
    /// The shadow is linked to a scratch name which is renamed over the
    /// primary, so a reader opening the primary by path sees either the old
    /// or the new record. The shadow is removed last.
    pub(crate) fn swizzle(&self, oid: Oid) -> StoreResult<()> {
        let shadow = self.shadow_path(oid);
        let primary = self.record_path(oid);
        let staged = self.transactions_dir().join(format!("{oid}.swap"));
        let missing = |what: &str| io::Error::new(io::ErrorKind::NotFound, format!("{what} missing"));

        if !shadow.is_file() {
            return Err(StoreError::env("commit", &shadow, missing("shadow file")));
        }
        if !primary.is_file() {
            return Err(StoreError::env("commit", &primary, missing("primary record")));
        }
        match fs::remove_file(&staged) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::env("clear staged link", &staged, e)),
        }
        fs::hard_link(&shadow, &staged).map_err(|e| StoreError::env("link shadow", &staged, e))?;
        fs::rename(&staged, &primary).map_err(|e| StoreError::env("replace primary", &primary, e))?;
        fs::remove_file(&shadow).map_err(|e| StoreError::env("remove shadow", &shadow, e))?;

        self.shared.cache.remove(oid);
        debug!(bucket = %self.shared.name, %oid, "shadow committed");
        Ok(())
    }

    /// Delete the pending shadow for `oid`, if any.
    pub(crate) fn discard_shadow(&self, oid: Oid) -> StoreResult<()> {
        let path = self.shadow_path(oid);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::env("discard shadow", &path, e)),
        }
    }

    /// Delete every leftover file in `TRANSACTIONS`, treating each as rolled
    /// back. Individual failures are logged and skipped. Returns the number
    /// of files removed.
    pub fn tidy_up_transaction_data(&self) -> StoreResult<usize> {
        let dir = self.transactions_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir_all(&dir).map_err(|e| StoreError::env("create bucket", &dir, e))?;
                return Ok(0);
            }
            Err(e) => return Err(StoreError::env("list transactions", &dir, e)),
        };
        let mut removed = 0;
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "unreadable transaction entry");
                    continue;
                }
            };
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "could not discard shadow"),
            }
        }
        if removed > 0 {
            info!(bucket = %self.shared.name, removed, "discarded incomplete transaction data");
        }
        Ok(removed)
    }

    // ---------------------------------------------------------------
    // Indexes
    // ---------------------------------------------------------------

    /// Index this bucket on `label`, back-filling from existing tuples.
    /// Adding an index that already exists returns it.
    pub fn add_index(&self, label: &str) -> StoreResult<BucketIndex> {
        if !self.shared.kind.is_indexed() {
            return Err(self.unsupported("add_index"));
        }
        if label.is_empty() || label.contains(['/', '\\', '\0']) {
            return Err(StoreError::IllegalName {
                name: label.to_string(),
                reason: "index labels must be non-empty and free of path separators".into(),
            });
        }

        let mut indexes = self.shared.indexes.write();
        if let Some(state) = indexes.get(label) {
            return Ok(BucketIndex::new(state.clone(), self.clone()));
        }
        let state = Arc::new(IndexState::new(
            label,
            &self.shared.dir.join(INDICES_DIR),
            self.shared.ctx.config.sync_writes,
        ));
        fs::create_dir_all(state.dir()).map_err(|e| StoreError::env("create index", state.dir(), e))?;
        let mut filed = 0usize;
        for oid in self.oids()? {
            if state.add(&*self.get_object_by_id(oid)?)? {
                filed += 1;
            }
        }
        indexes.insert(label.to_string(), state.clone());
        info!(bucket = %self.shared.name, label, filed, "index added");
        Ok(BucketIndex::new(state, self.clone()))
    }

    pub fn index(&self, label: &str) -> StoreResult<BucketIndex> {
        self.shared
            .indexes
            .read()
            .get(label)
            .map(|state| BucketIndex::new(state.clone(), self.clone()))
            .ok_or_else(|| StoreError::IndexNotFound {
                bucket: self.shared.name.clone(),
                label: label.to_string(),
            })
    }

    /// Labels this bucket is indexed on, sorted.
    pub fn index_labels(&self) -> Vec<String> {
        self.shared.indexes.read().keys().cloned().collect()
    }
}

fn read_kind(meta: &Path) -> StoreResult<BucketKind> {
    let entries = fs::read_dir(meta).map_err(|e| StoreError::env("read bucket metadata", meta, e))?;
    for entry in entries {
        let entry = entry?;
        if let Some(kind) = entry.file_name().to_str().and_then(BucketKind::from_marker) {
            return Ok(kind);
        }
    }
    Err(StoreError::Malformed {
        path: meta.to_path_buf(),
        reason: "no bucket kind marker".into(),
    })
}

fn read_type_label(path: &Path) -> StoreResult<Option<Oid>> {
    match fs::read_to_string(path) {
        Ok(text) => text
            .trim()
            .parse::<Oid>()
            .map(Some)
            .map_err(|e| StoreError::Malformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::env("read type label", path, e)),
    }
}

fn discover_indexes(indices: &Path, sync_writes: bool) -> StoreResult<BTreeMap<String, Arc<IndexState>>> {
    let mut found = BTreeMap::new();
    let entries = match fs::read_dir(indices) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(found),
        Err(e) => return Err(StoreError::env("list indexes", indices, e)),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(label) = name.to_str().and_then(|n| n.strip_prefix(INDEX_PREFIX)) else {
            continue;
        };
        if !label.is_empty() && entry.file_type()?.is_dir() {
            found.insert(label.to_string(), Arc::new(IndexState::new(label, indices, sync_writes)));
        }
    }
    Ok(found)
}

/// Lazy sequence of tuples resolved by oid through a bucket.
pub struct Records {
    bucket: Bucket,
    oids: std::vec::IntoIter<Oid>,
}

impl Records {
    pub(crate) fn new(bucket: Bucket, oids: Vec<Oid>) -> Self {
        Self {
            bucket,
            oids: oids.into_iter(),
        }
    }
}

impl Iterator for Records {
    type Item = StoreResult<Arc<Tuple>>;

    fn next(&mut self) -> Option<Self::Item> {
        let oid = self.oids.next()?;
        Some(self.bucket.get_object_by_id(oid))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.oids.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{open_store, tuple};
    use lxp_types::{static_schema, Value, ValueKind};

    static_schema!(CENSUS = "Census" {
        "surname" => String,
        "household" => Long,
    });

    fn oid(n: u64) -> Oid {
        Oid::new(n).unwrap()
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let bucket = store
            .create_repository("r")
            .unwrap()
            .create_bucket("b", BucketKind::Plain)
            .unwrap();

        let mut t = tuple(11);
        t.put("name", "ann").unwrap();
        t.put("tags", vec![Value::from("x"), Value::from("y")]).unwrap();
        bucket.make_persistent(&mut t).unwrap();
        assert_eq!(t.location().unwrap().bucket, "b");
        assert!(bucket.dir().join("11").is_file());

        bucket.invalidate_cache();
        let back = bucket.get_object_by_id(oid(11)).unwrap();
        assert_eq!(back.get_string("name").unwrap(), "ann");
        assert_eq!(back.get_list("tags").unwrap().len(), 2);
        assert_eq!(back.location().unwrap().repository, "r");
    }

    #[test]
    fn records_may_not_be_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let bucket = store
            .create_repository("r")
            .unwrap()
            .create_bucket("b", BucketKind::Plain)
            .unwrap();
        let mut t = tuple(1);
        t.put("v", 1i64).unwrap();
        bucket.make_persistent(&mut t).unwrap();
        t.put("v", 2i64).unwrap();
        let err = bucket.make_persistent(&mut t).unwrap_err();
        assert!(matches!(err, StoreError::ObjectExists { .. }));

        bucket.invalidate_cache();
        assert_eq!(bucket.get_object_by_id(oid(1)).unwrap().get_long("v").unwrap(), 1);
    }

    #[test]
    fn missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let bucket = store
            .create_repository("r")
            .unwrap()
            .create_bucket("b", BucketKind::Plain)
            .unwrap();
        let err = bucket.get_object_by_id(oid(404)).unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(bucket.delete(oid(404)), Err(StoreError::ObjectNotFound { .. })));
    }

    #[test]
    fn structural_gate_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let person = store
            .register_type("Person", [("name", ValueKind::String), ("born", ValueKind::Long)])
            .unwrap();
        let bucket = store
            .create_repository("r")
            .unwrap()
            .create_bucket("people", BucketKind::Plain)
            .unwrap();
        bucket.set_type_label(person.type_id()).unwrap();

        let mut t = tuple(5);
        t.put("name", "ann").unwrap();
        let err = bucket.make_persistent(&mut t).unwrap_err();
        assert!(err.is_structural());
        assert!(!bucket.dir().join("5").exists());
        assert_eq!(bucket.size().unwrap(), 0);

        t.put("born", 1870i64).unwrap();
        bucket.make_persistent(&mut t).unwrap();
        assert_eq!(bucket.size().unwrap(), 1);
    }

    #[test]
    fn declared_type_must_match_bound_type() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let a = store.register_type("A", [("x", ValueKind::Long)]).unwrap();
        let b = store.register_type("B", [("x", ValueKind::Long)]).unwrap();
        let bucket = store
            .create_repository("r")
            .unwrap()
            .create_bucket("b", BucketKind::Plain)
            .unwrap();
        bucket.set_type_label(a.type_id()).unwrap();

        let mut t = tuple(1);
        t.put("x", 1i64).unwrap();
        t.put(lxp_meta::TYPE_LABEL, b.type_id().get() as i64).unwrap();
        let err = bucket.make_persistent(&mut t).unwrap_err();
        assert!(matches!(err, StoreError::Meta(MetaError::LabelIncompatibility { .. })));
    }

    #[test]
    fn unknown_type_cannot_be_bound() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let bucket = store
            .create_repository("r")
            .unwrap()
            .create_bucket("b", BucketKind::Plain)
            .unwrap();
        assert!(bucket.set_type_label(oid(999_999)).is_err());
        assert_eq!(bucket.type_label(), None);
    }

    #[test]
    fn type_label_persists() {
        let dir = tempfile::tempdir().unwrap();
        let type_id = {
            let store = open_store(dir.path());
            let t = store.register_type("T", [("x", ValueKind::Long)]).unwrap();
            store
                .create_repository("r")
                .unwrap()
                .create_bucket("b", BucketKind::Plain)
                .unwrap()
                .set_type_label(t.type_id())
                .unwrap();
            t.type_id()
        };
        let store = open_store(dir.path());
        let bucket = store.get_repository("r").unwrap().get_bucket("b").unwrap();
        assert_eq!(bucket.type_label(), Some(type_id));
    }

    #[test]
    fn size_and_oids_are_memoised_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let bucket = store
            .create_repository("r")
            .unwrap()
            .create_bucket("b", BucketKind::Plain)
            .unwrap();
        for n in [3, 1, 2] {
            bucket.make_persistent(&mut tuple(n)).unwrap();
        }
        assert_eq!(bucket.oids().unwrap(), vec![oid(1), oid(2), oid(3)]);

        // An external writer the bucket cannot see without invalidation.
        std::fs::write(bucket.dir().join("9"), "{\"a\":1}").unwrap();
        assert_eq!(bucket.size().unwrap(), 3);
        bucket.invalidate_cache();
        assert_eq!(bucket.size().unwrap(), 4);
        assert_eq!(bucket.get_object_by_id(oid(9)).unwrap().get_long("a").unwrap(), 1);
    }

    #[test]
    fn delete_updates_listing_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let bucket = store
            .create_repository("r")
            .unwrap()
            .create_bucket("b", BucketKind::Plain)
            .unwrap();
        bucket.make_persistent(&mut tuple(1)).unwrap();
        bucket.make_persistent(&mut tuple(2)).unwrap();
        assert_eq!(bucket.size().unwrap(), 2);
        bucket.delete(oid(1)).unwrap();
        assert_eq!(bucket.oids().unwrap(), vec![oid(2)]);
        assert!(!bucket.contains(oid(1)));
        assert!(bucket.get_object_by_id(oid(1)).is_err());
    }

    #[test]
    fn stream_visits_every_tuple() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let bucket = store
            .create_repository("r")
            .unwrap()
            .create_bucket("b", BucketKind::Plain)
            .unwrap();
        for n in 1..=5 {
            let mut t = tuple(n);
            t.put("n", n as i64).unwrap();
            bucket.make_persistent(&mut t).unwrap();
        }
        let total: i64 = bucket
            .stream()
            .unwrap()
            .map(|t| t.unwrap().get_long("n").unwrap())
            .sum();
        assert_eq!(total, 15);
    }

    #[test]
    fn malformed_record_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let bucket = store
            .create_repository("r")
            .unwrap()
            .create_bucket("b", BucketKind::Plain)
            .unwrap();
        std::fs::write(bucket.dir().join("8"), "{not json").unwrap();
        assert!(matches!(
            bucket.get_object_by_id(oid(8)),
            Err(StoreError::Malformed { .. })
        ));
    }

    #[test]
    fn bound_schema_decodes_static_tuples() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let bucket = store
            .create_repository("r")
            .unwrap()
            .create_bucket("census", BucketKind::Plain)
            .unwrap();
        bucket.bind_schema(CENSUS.clone());

        let mut t = bucket.new_tuple();
        assert!(t.is_static());
        t.put("surname", "Gray").unwrap();
        t.put("household", 4i64).unwrap();
        bucket.make_persistent(&mut t).unwrap();

        bucket.invalidate_cache();
        let back = bucket.get_object_by_id(t.oid()).unwrap();
        assert!(back.is_static());
        assert_eq!(back.get_long("household").unwrap(), 4);

        std::fs::write(bucket.dir().join("777"), r#"{"surname":"X","street":"High"}"#).unwrap();
        assert!(matches!(
            bucket.get_object_by_id(oid(777)),
            Err(StoreError::Malformed { .. })
        ));
    }

    #[test]
    fn indirect_bucket_aliases_canonical_tuple() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let repo = store.create_repository("r").unwrap();
        let canonical = repo.create_bucket("births", BucketKind::Plain).unwrap();
        let alias = repo.create_bucket("linked", BucketKind::Indirect).unwrap();

        let mut t = tuple(21);
        t.put("child", "eve").unwrap();
        assert!(matches!(alias.make_persistent(&mut t), Err(StoreError::Unplaced(_))));

        canonical.make_persistent(&mut t).unwrap();
        alias.make_persistent(&mut t).unwrap();

        let raw = std::fs::read_to_string(alias.dir().join("21")).unwrap();
        assert_eq!(raw, r#"{"$REFERENCE":"r/births/21"}"#);

        let via_alias = alias.get_object_by_id(oid(21)).unwrap();
        assert_eq!(via_alias.get_string("child").unwrap(), "eve");
        assert_eq!(via_alias.location().unwrap().bucket, "births");
        assert_eq!(alias.size().unwrap(), 1);
    }

    #[test]
    fn index_requires_indexed_kind() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let bucket = store
            .create_repository("r")
            .unwrap()
            .create_bucket("b", BucketKind::Plain)
            .unwrap();
        assert!(matches!(bucket.add_index("x"), Err(StoreError::Unsupported { .. })));
        assert!(matches!(bucket.index("x"), Err(StoreError::IndexNotFound { .. })));
    }

    #[test]
    fn reopening_discards_leftover_shadows() {
        let dir = tempfile::tempdir().unwrap();
        let shadow = {
            let store = open_store(dir.path());
            let bucket = store
                .create_repository("r")
                .unwrap()
                .create_bucket("b", BucketKind::Plain)
                .unwrap();
            let shadow = bucket.dir().join(TRANSACTIONS_DIR).join("5");
            std::fs::write(&shadow, "{}").unwrap();
            shadow
        };
        let store = open_store(dir.path());
        store.get_repository("r").unwrap().get_bucket("b").unwrap();
        assert!(!shadow.exists());
    }
}
